//! 포지션 스냅샷.
//!
//! 외부 포지션 소스가 매 모니터링 틱마다 공급하는 읽기 전용 데이터입니다.
//! 코어는 이 값을 한 틱 이상 캐시하지 않습니다.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// 방향 (Side)
// =============================================================================

/// 주문/포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// 반대 방향.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

// =============================================================================
// 포지션 스냅샷
// =============================================================================

/// 거래소 중립적 포지션 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// 포지션 식별자
    pub position_id: String,
    /// 종목 심볼 (예: "XAUUSD")
    pub symbol: String,
    /// 포지션 방향
    pub direction: Side,
    /// 보유 수량 (lot)
    pub volume: Decimal,
    /// 진입가
    pub open_price: Decimal,
    /// 현재가
    pub current_price: Decimal,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 진입 시각
    pub open_time: DateTime<Utc>,
    /// 주문 태그 (복구 주문으로 열린 포지션은 `recovery-<task_id>`)
    #[serde(default)]
    pub tag: Option<String>,
}

impl PositionSnapshot {
    /// 손실 중인지 여부.
    pub fn is_losing(&self) -> bool {
        self.unrealized_pnl < Decimal::ZERO
    }

    /// 보유 시간 (분).
    pub fn holding_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.open_time).num_minutes().max(0)
    }
}
