//! 복구 사이징 전략.
//!
//! 각 전략은 태스크와 시장 스냅샷을 받아 `StrategyProposal`을 만들거나,
//! 조건이 맞지 않으면 `StrategyDeclined`로 거절합니다. 전략 호출은
//! I/O가 없는 순수 계산이므로 동기 함수입니다.

mod grid;
mod martingale;

pub use grid::{GridLevel, GridLevelSizing, VolatilityTier};
pub use martingale::{AdaptiveMultiplierSizing, RecoveryState};

use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;
use trader_core::{MarketSnapshot, OrderKind, RecoveryOrderRequest, Side};

use crate::config::{GridConfig, MartingaleConfig};
use crate::error::{RecoveryError, Result};
use crate::task::{RecoveryMethod, RecoveryTask};

/// 제안 위험도
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// 제안에 포함된 개별 주문
#[derive(Debug, Clone, Serialize)]
pub struct ProposedOrder {
    pub direction: Side,
    pub volume: Decimal,
    pub price: Decimal,
    pub kind: OrderKind,
}

/// 사이징 전략 제안 (저장하지 않음)
#[derive(Debug, Clone, Serialize)]
pub struct StrategyProposal {
    pub method: RecoveryMethod,
    /// 대표 방향
    pub direction: Side,
    /// 총 수량
    pub volume: Decimal,
    pub reference_price: Decimal,
    pub target_profit: Decimal,
    /// 추가로 감수할 최대 손실
    pub max_additional_loss: Decimal,
    pub risk_level: RiskLevel,
    /// 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
    pub justification: String,
    pub orders: Vec<ProposedOrder>,
}

impl StrategyProposal {
    /// 실행 거래소로 보낼 주문 요청 목록.
    pub fn order_requests(
        &self,
        symbol: &str,
        tag: &str,
        max_slippage: Decimal,
    ) -> Vec<RecoveryOrderRequest> {
        self.orders
            .iter()
            .map(|order| {
                let request = match order.kind {
                    OrderKind::Market => RecoveryOrderRequest::market(
                        symbol,
                        order.direction,
                        order.volume,
                        order.price,
                        tag,
                    ),
                    OrderKind::Limit => RecoveryOrderRequest::limit(
                        symbol,
                        order.direction,
                        order.volume,
                        order.price,
                        tag,
                    ),
                };
                request.with_max_slippage(max_slippage)
            })
            .collect()
    }
}

/// 전략 입력
#[derive(Debug, Clone, Copy)]
pub struct SizingContext<'a> {
    pub task: &'a RecoveryTask,
    pub market: &'a MarketSnapshot,
    /// 추적 포지션의 합산 미실현 손익
    pub combined_pnl: Decimal,
}

impl<'a> SizingContext<'a> {
    pub fn new(task: &'a RecoveryTask, market: &'a MarketSnapshot, combined_pnl: Decimal) -> Self {
        Self {
            task,
            market,
            combined_pnl,
        }
    }

    /// 현재 복구 깊이
    pub fn recovery_level(&self) -> u32 {
        self.task.recovery_level()
    }
}

/// 사이징 전략 인터페이스
pub trait SizingStrategy: Send + Sync {
    /// 전략 종류
    fn method(&self) -> RecoveryMethod;

    /// 제안 생성. 조건이 맞지 않으면 `StrategyDeclined`.
    fn propose(&self, ctx: &SizingContext<'_>) -> Result<StrategyProposal>;

    /// 거절 에러 생성
    fn decline(&self, reason: impl Into<String>) -> RecoveryError
    where
        Self: Sized,
    {
        RecoveryError::StrategyDeclined {
            method: self.method(),
            reason: reason.into(),
        }
    }
}

/// 방식별 전략 묶음
#[derive(Debug, Clone)]
pub struct SizingRegistry {
    martingale: AdaptiveMultiplierSizing,
    grid: GridLevelSizing,
}

impl SizingRegistry {
    pub fn new(martingale: MartingaleConfig, grid: GridConfig) -> Self {
        Self {
            martingale: AdaptiveMultiplierSizing::new(martingale),
            grid: GridLevelSizing::new(grid),
        }
    }

    /// 방식에 해당하는 전략
    pub fn get(&self, method: RecoveryMethod) -> &dyn SizingStrategy {
        match method {
            RecoveryMethod::AdaptiveMultiplier => &self.martingale,
            RecoveryMethod::GridLevel => &self.grid,
        }
    }

    /// 사용 가능한 방식 목록
    pub fn available(&self) -> Vec<RecoveryMethod> {
        RecoveryMethod::ALL.to_vec()
    }
}

/// 소수 둘째 자리 반올림 (lot 단위)
pub(crate) fn round_lots(volume: Decimal) -> Decimal {
    volume.round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_registry_is_exhaustive() {
        let registry = SizingRegistry::new(MartingaleConfig::default(), GridConfig::default());
        for method in registry.available() {
            assert_eq!(registry.get(method).method(), method);
        }
    }

    #[test]
    fn test_order_requests_carry_tag_and_slippage() {
        let proposal = StrategyProposal {
            method: RecoveryMethod::GridLevel,
            direction: Side::Buy,
            volume: dec!(0.03),
            reference_price: dec!(2000),
            target_profit: dec!(30),
            max_additional_loss: dec!(100),
            risk_level: RiskLevel::Medium,
            confidence: 0.75,
            justification: String::new(),
            orders: vec![
                ProposedOrder {
                    direction: Side::Buy,
                    volume: dec!(0.01),
                    price: dec!(1998),
                    kind: OrderKind::Limit,
                },
                ProposedOrder {
                    direction: Side::Buy,
                    volume: dec!(0.02),
                    price: dec!(1996),
                    kind: OrderKind::Limit,
                },
            ],
        };

        let requests = proposal.order_requests("XAUUSD", "recovery-x", dec!(0.5));
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.tag == "recovery-x"));
        assert!(requests.iter().all(|r| r.max_slippage == dec!(0.5)));
        assert_eq!(requests[1].reference_price, dec!(1996));
        assert_eq!(requests[1].kind, OrderKind::Limit);
    }
}
