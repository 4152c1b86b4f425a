//! 적응형 배수 사이징 ("마틴게일").
//!
//! 원 포지션과 같은 방향으로 수량을 늘려 더 작은 되돌림으로 손익분기에
//! 도달하도록 합니다. 배수는 복구 깊이, 손실 크기, 세션, 추세, 변동성에
//! 따라 조정되며 항상 `max_multiplier`와 `max_position_size`로 제한됩니다.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;
use trader_core::{MarketSnapshot, OrderKind, Side, TradingSession, TrendDirection};

use super::{round_lots, ProposedOrder, RiskLevel, SizingContext, SizingStrategy, StrategyProposal};
use crate::config::MartingaleConfig;
use crate::error::Result;
use crate::task::RecoveryMethod;

/// 합산 손익 기준 복구 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Inactive,
    Active,
    Critical,
    Emergency,
}

impl RecoveryState {
    pub fn from_pnl(pnl: Decimal) -> Self {
        if pnl >= dec!(-50) {
            RecoveryState::Inactive
        } else if pnl >= dec!(-200) {
            RecoveryState::Active
        } else if pnl >= dec!(-400) {
            RecoveryState::Critical
        } else {
            RecoveryState::Emergency
        }
    }
}

/// 적응형 배수 사이징 전략
#[derive(Debug, Clone)]
pub struct AdaptiveMultiplierSizing {
    config: MartingaleConfig,
}

impl AdaptiveMultiplierSizing {
    pub fn new(config: MartingaleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MartingaleConfig {
        &self.config
    }

    /// 세션 배수
    pub fn session_multiplier(&self, session: TradingSession) -> f64 {
        let s = &self.config.session_multipliers;
        match session {
            TradingSession::Asian => s.asian,
            TradingSession::London => s.london,
            TradingSession::NewYork => s.new_york,
            TradingSession::Overlap => s.overlap,
            TradingSession::Quiet => s.quiet,
        }
    }

    /// 추세 조정 (역추세 0.7, 횡보 1.1, 순추세 0.9)
    pub fn trend_adjustment(&self, direction: Side, trend: TrendDirection) -> f64 {
        if !self.config.trend_awareness {
            return 1.0;
        }
        if trend == TrendDirection::Sideways {
            1.1
        } else if trend.opposes(direction) {
            0.7
        } else {
            0.9
        }
    }

    /// ATR(가격 대비 %) 기반 변동성 계수
    pub fn volatility_factor(&self, atr_percent: f64) -> f64 {
        if !self.config.volatility_adjustment {
            return 1.0;
        }
        if atr_percent > 1.5 {
            0.8
        } else if atr_percent > 1.0 {
            0.9
        } else if atr_percent < 0.5 {
            1.2
        } else {
            1.0
        }
    }

    /// 최종 배수 (`max_multiplier`로 제한)
    pub fn multiplier(
        &self,
        level: u32,
        pnl: Decimal,
        session: TradingSession,
        trend_adjustment: f64,
    ) -> f64 {
        let c = &self.config;
        let depth = c.base_multiplier.powf(1.0 + 0.2 * level as f64);

        let threshold = c.recovery_threshold.abs().to_f64().unwrap_or(1.0).max(f64::EPSILON);
        let loss_ratio = (pnl.abs().to_f64().unwrap_or(0.0) / threshold).min(1.0);
        let loss = 1.0 + 0.3 * loss_ratio;

        let raw = depth * loss * self.session_multiplier(session) * trend_adjustment;
        raw.min(c.max_multiplier)
    }

    /// 복구 수량 계산 (`max_position_size`로 제한)
    pub fn calculate_volume(
        &self,
        original_volume: Decimal,
        direction: Side,
        level: u32,
        pnl: Decimal,
        market: &MarketSnapshot,
    ) -> Decimal {
        let multiplier = self.multiplier(
            level,
            pnl,
            market.session,
            self.trend_adjustment(direction, market.trend),
        );
        let factor = multiplier * self.volatility_factor(market.atr_percent());
        let factor = Decimal::from_f64(factor).unwrap_or(Decimal::ZERO);

        round_lots(original_volume * factor).min(self.config.max_position_size)
    }

    /// 목표 수익
    fn target_profit(&self, loss: Decimal, level: u32, volume: Decimal, original: Decimal) -> Decimal {
        let depth = Decimal::ONE + dec!(0.05) * Decimal::from(level);
        let ratio = if original > Decimal::ZERO {
            volume / original
        } else {
            Decimal::ZERO
        };
        (loss * dec!(1.1) * depth * (Decimal::ONE + dec!(0.02) * ratio)).round_dp(2)
    }

    /// 위험도 점수화
    fn risk_level(&self, level: u32, volume_ratio: f64, loss: Decimal, atr_fraction: f64) -> RiskLevel {
        let mut score = 2 * level as i64;

        score += if volume_ratio > 5.0 {
            3
        } else if volume_ratio > 3.0 {
            2
        } else if volume_ratio > 2.0 {
            1
        } else {
            0
        };

        let loss_ratio = if self.config.max_total_loss > Decimal::ZERO {
            (loss / self.config.max_total_loss).to_f64().unwrap_or(1.0)
        } else {
            1.0
        };
        score += if loss_ratio > 0.8 {
            3
        } else if loss_ratio > 0.6 {
            2
        } else if loss_ratio > 0.4 {
            1
        } else {
            0
        };

        score += if atr_fraction > 0.02 {
            2
        } else if atr_fraction > 0.015 {
            1
        } else {
            0
        };

        match score {
            s if s <= 2 => RiskLevel::Low,
            s if s <= 5 => RiskLevel::Medium,
            s if s <= 8 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// 신뢰도 (0.1 ~ 0.95)
    fn confidence(&self, level: u32, market: &MarketSnapshot, state: RecoveryState) -> f64 {
        let mut confidence = match market.session {
            TradingSession::Asian => 0.8,
            TradingSession::Quiet => 0.85,
            TradingSession::London => 0.4,
            TradingSession::NewYork => 0.3,
            TradingSession::Overlap => 0.25,
        };

        confidence -= 0.1 * level as f64;

        let atr = market.atr_fraction();
        if atr < 0.01 {
            confidence += 0.1;
        } else if atr > 0.02 {
            confidence -= 0.15;
        }

        confidence -= match state {
            RecoveryState::Critical => 0.2,
            RecoveryState::Emergency => 0.4,
            _ => 0.0,
        };

        confidence.clamp(0.1, 0.95)
    }
}

impl SizingStrategy for AdaptiveMultiplierSizing {
    fn method(&self) -> RecoveryMethod {
        RecoveryMethod::AdaptiveMultiplier
    }

    fn propose(&self, ctx: &SizingContext<'_>) -> Result<StrategyProposal> {
        let c = &self.config;
        let task = ctx.task;
        let market = ctx.market;
        let pnl = ctx.combined_pnl;
        let level = ctx.recovery_level();
        let loss = pnl.abs();

        if pnl > c.recovery_threshold {
            return Err(self.decline(format!(
                "손실 {}이 복구 기준 {}에 미달",
                pnl, c.recovery_threshold
            )));
        }

        let state = RecoveryState::from_pnl(pnl);
        if state == RecoveryState::Emergency {
            return Err(self.decline(format!("긴급 상태 (손익 {})", pnl)));
        }
        if loss >= c.max_total_loss {
            return Err(self.decline(format!(
                "위험 예산 소진 (손실 {} ≥ {})",
                loss, c.max_total_loss
            )));
        }
        if level >= c.max_recovery_levels {
            return Err(self.decline(format!(
                "최대 복구 레벨 도달 ({}/{})",
                level, c.max_recovery_levels
            )));
        }

        let original = task.original.volume;
        let direction = task.original.direction;
        let volume = self.calculate_volume(original, direction, level, pnl, market);
        if volume <= Decimal::ZERO {
            return Err(self.decline("계산된 수량이 0"));
        }
        if task.total_recovery_volume + volume > c.max_position_size {
            return Err(self.decline(format!(
                "누적 복구 수량 초과 ({} + {} > {})",
                task.total_recovery_volume, volume, c.max_position_size
            )));
        }

        let volume_ratio = if original > Decimal::ZERO {
            (volume / original).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        let target_profit = self.target_profit(loss, level, volume, original);
        let max_additional_loss =
            ((c.max_total_loss - loss) * dec!(0.3)).max(dec!(100)).round_dp(2);
        let risk_level = self.risk_level(level, volume_ratio, loss, market.atr_fraction());
        let confidence = self.confidence(level, market, state);

        debug!(
            task_id = %task.task_id,
            level = level,
            volume = %volume,
            ratio = volume_ratio,
            risk = %risk_level,
            "배수 사이징 계산"
        );

        Ok(StrategyProposal {
            method: RecoveryMethod::AdaptiveMultiplier,
            direction,
            volume,
            reference_price: market.price,
            target_profit,
            max_additional_loss,
            risk_level,
            confidence,
            justification: format!(
                "레벨 {} 배수 복구: {} {} lot (원 수량 대비 {:.2}배), 세션 {}, 추세 {}",
                level + 1,
                direction,
                volume,
                volume_ratio,
                market.session,
                market.trend
            ),
            orders: vec![ProposedOrder {
                direction,
                volume,
                price: market.price,
                kind: OrderKind::Market,
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{RecoveryPriority, RecoveryRequest, RecoveryTask};
    use chrono::Utc;
    use proptest::prelude::*;
    use trader_core::{MarketState, PositionSnapshot};

    fn task(volume: Decimal, pnl: Decimal) -> RecoveryTask {
        let position = PositionSnapshot {
            position_id: "p-1".to_string(),
            symbol: "XAUUSD".to_string(),
            direction: Side::Buy,
            volume,
            open_price: dec!(2000),
            current_price: dec!(1990),
            unrealized_pnl: pnl,
            open_time: Utc::now(),
            tag: None,
        };
        RecoveryTask::from_request(
            RecoveryRequest::new(position, "test", RecoveryPriority::Medium),
            1,
            Utc::now(),
        )
    }

    fn market(session: TradingSession, trend: TrendDirection, atr: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "XAUUSD".to_string(),
            price: dec!(2000),
            atr,
            session,
            market_state: MarketState::RangingTight,
            trend,
            trend_confidence: 0.6,
        }
    }

    fn sizing() -> AdaptiveMultiplierSizing {
        AdaptiveMultiplierSizing::new(MartingaleConfig::default())
    }

    #[test]
    fn test_recovery_state_bands() {
        assert_eq!(RecoveryState::from_pnl(dec!(-10)), RecoveryState::Inactive);
        assert_eq!(RecoveryState::from_pnl(dec!(-100)), RecoveryState::Active);
        assert_eq!(RecoveryState::from_pnl(dec!(-300)), RecoveryState::Critical);
        assert_eq!(RecoveryState::from_pnl(dec!(-450)), RecoveryState::Emergency);
    }

    #[test]
    fn test_multiplier_components() {
        let s = sizing();
        // 1.8^1 × (1 + 0.3) × 1.2 × 1.1
        let m = s.multiplier(0, dec!(-40), TradingSession::Asian, 1.1);
        assert!((m - 1.8 * 1.3 * 1.2 * 1.1).abs() < 1e-9);

        // 깊은 레벨은 max_multiplier로 제한
        let m = s.multiplier(10, dec!(-400), TradingSession::Quiet, 1.1);
        assert_eq!(m, 8.0);
    }

    #[test]
    fn test_trend_opposition_reduces_volume() {
        let s = sizing();
        let against = s.calculate_volume(
            dec!(0.1),
            Side::Buy,
            0,
            dec!(-100),
            &market(TradingSession::Asian, TrendDirection::Down, dec!(10)),
        );
        let with = s.calculate_volume(
            dec!(0.1),
            Side::Buy,
            0,
            dec!(-100),
            &market(TradingSession::Asian, TrendDirection::Up, dec!(10)),
        );
        assert!(against < with);
    }

    #[test]
    fn test_propose_market_order_same_direction() {
        let s = sizing();
        let t = task(dec!(0.1), dec!(-100));
        let m = market(TradingSession::Asian, TrendDirection::Sideways, dec!(10));

        let proposal = s.propose(&SizingContext::new(&t, &m, dec!(-100))).unwrap();
        assert_eq!(proposal.method, RecoveryMethod::AdaptiveMultiplier);
        assert_eq!(proposal.direction, Side::Buy);
        assert_eq!(proposal.orders.len(), 1);
        assert_eq!(proposal.orders[0].kind, OrderKind::Market);
        assert!(proposal.volume > Decimal::ZERO);
        assert!(proposal.target_profit > dec!(110));
        // (500 - 100) × 0.3 = 120
        assert_eq!(proposal.max_additional_loss, dec!(120));
        // 아시아 0.8 + 저변동성 0.1
        assert!((proposal.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_declines() {
        let s = sizing();
        let m = market(TradingSession::Asian, TrendDirection::Sideways, dec!(10));

        // 복구 기준 미달
        let t = task(dec!(0.1), dec!(-10));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-10))).is_err());

        // 긴급 상태
        let t = task(dec!(0.1), dec!(-450));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-450))).is_err());

        // 최대 레벨
        let mut t = task(dec!(0.1), dec!(-100));
        t.recovery_attempts = 5;
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-100))).is_err());

        // 누적 수량 초과
        let mut t = task(dec!(0.1), dec!(-100));
        t.total_recovery_volume = dec!(1.95);
        let err = s.propose(&SizingContext::new(&t, &m, dec!(-100))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::RecoveryError::StrategyDeclined {
                method: RecoveryMethod::AdaptiveMultiplier,
                ..
            }
        ));
    }

    fn sessions() -> impl Strategy<Value = TradingSession> {
        prop_oneof![
            Just(TradingSession::Asian),
            Just(TradingSession::London),
            Just(TradingSession::Overlap),
            Just(TradingSession::NewYork),
            Just(TradingSession::Quiet),
        ]
    }

    fn trends() -> impl Strategy<Value = TrendDirection> {
        prop_oneof![
            Just(TrendDirection::Up),
            Just(TrendDirection::Down),
            Just(TrendDirection::Sideways),
        ]
    }

    proptest! {
        #[test]
        fn volume_never_exceeds_max_position_size(
            level in 0u32..20,
            loss_cents in 0i64..200_000,
            volume_cents in 1i64..500,
            atr_cents in 0i64..10_000,
            session in sessions(),
            trend in trends(),
        ) {
            let s = sizing();
            let m = market(session, trend, Decimal::new(atr_cents, 2));
            let volume = s.calculate_volume(
                Decimal::new(volume_cents, 2),
                Side::Sell,
                level,
                Decimal::new(-loss_cents, 2),
                &m,
            );
            prop_assert!(volume <= s.config().max_position_size);

            let mut t = task(Decimal::new(volume_cents, 2), Decimal::new(-loss_cents, 2));
            t.recovery_attempts = level;
            if let Ok(proposal) = s.propose(&SizingContext::new(&t, &m, Decimal::new(-loss_cents, 2))) {
                prop_assert!(proposal.volume <= s.config().max_position_size);
                prop_assert!(proposal.volume > Decimal::ZERO);
            }
        }
    }
}
