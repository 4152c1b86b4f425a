//! 가격 레벨 그리드 사이징.
//!
//! 현재가에서 일정 간격으로 지정가 주문 사다리를 만듭니다.
//! 추세가 뚜렷하면 한 방향, 횡보면 위아래 양방향으로 배치합니다.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;
use trader_core::{OrderKind, Side, TrendDirection};

use super::{round_lots, ProposedOrder, RiskLevel, SizingContext, SizingStrategy, StrategyProposal};
use crate::config::GridConfig;
use crate::error::Result;
use crate::task::RecoveryMethod;

/// ATR(pip) 기반 변동성 구간
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityTier {
    /// ATR(pip)로 구간 판정
    pub fn from_atr_pips(atr_pips: Decimal) -> Self {
        if atr_pips < dec!(15) {
            VolatilityTier::Low
        } else if atr_pips < dec!(30) {
            VolatilityTier::Medium
        } else if atr_pips < dec!(50) {
            VolatilityTier::High
        } else {
            VolatilityTier::Extreme
        }
    }

    /// 간격 배수
    pub fn spacing_multiplier(&self) -> Decimal {
        match self {
            VolatilityTier::Low => dec!(0.8),
            VolatilityTier::Medium => dec!(1.0),
            VolatilityTier::High => dec!(1.3),
            VolatilityTier::Extreme => dec!(1.6),
        }
    }
}

/// 그리드 레벨 1개
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridLevel {
    pub price: Decimal,
    pub direction: Side,
    pub volume: Decimal,
}

/// 그리드 사이징 전략
#[derive(Debug, Clone)]
pub struct GridLevelSizing {
    config: GridConfig,
}

impl GridLevelSizing {
    pub fn new(config: GridConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// ATR(가격 단위)로 변동성 구간 판정
    pub fn volatility_tier(&self, atr: Decimal) -> VolatilityTier {
        VolatilityTier::from_atr_pips(atr * self.config.pip_factor)
    }

    /// 레벨 간격 (가격 단위)
    pub fn spacing_price(&self, volatility_multiplier: Decimal) -> Decimal {
        self.config.base_spacing_pips * volatility_multiplier / self.config.pip_factor
    }

    /// 손실 크기로 레벨 수 결정 (3 ~ max_levels)
    pub fn level_count(&self, loss: Decimal) -> usize {
        let raw = (loss.abs() / dec!(50)).floor().to_usize().unwrap_or(usize::MAX);
        let max = self.config.max_levels.max(3);
        raw.clamp(3, max)
    }

    /// i번째 레벨 수량 (`base·mult^i`, 레벨 상한 적용)
    pub fn level_volume(&self, index: usize) -> Decimal {
        let c = &self.config;
        let mut volume = c.base_volume;
        for _ in 0..index {
            volume *= c.volume_multiplier;
            if volume >= c.max_volume_per_level {
                break;
            }
        }
        round_lots(volume.min(c.max_volume_per_level))
    }

    /// 레벨 생성 (가격 오름차순).
    pub fn build_levels(
        &self,
        price: Decimal,
        trend: TrendDirection,
        count: usize,
        spacing: Decimal,
    ) -> Vec<GridLevel> {
        let offset = |i: usize| spacing * Decimal::from(i as u64 + 1);

        let mut levels: Vec<GridLevel> = match trend {
            TrendDirection::Up => (0..count)
                .map(|i| GridLevel {
                    price: price - offset(i),
                    direction: Side::Buy,
                    volume: self.level_volume(i),
                })
                .collect(),
            TrendDirection::Down => (0..count)
                .map(|i| GridLevel {
                    price: price + offset(i),
                    direction: Side::Sell,
                    volume: self.level_volume(i),
                })
                .collect(),
            TrendDirection::Sideways => {
                let per_side = count / 2;
                (0..per_side)
                    .flat_map(|i| {
                        [
                            GridLevel {
                                price: price - offset(i),
                                direction: Side::Buy,
                                volume: self.level_volume(i),
                            },
                            GridLevel {
                                price: price + offset(i),
                                direction: Side::Sell,
                                volume: self.level_volume(i),
                            },
                        ]
                    })
                    .collect()
            }
        };

        levels.sort_by(|a, b| a.price.cmp(&b.price));
        levels
    }
}

impl SizingStrategy for GridLevelSizing {
    fn method(&self) -> RecoveryMethod {
        RecoveryMethod::GridLevel
    }

    fn propose(&self, ctx: &SizingContext<'_>) -> Result<StrategyProposal> {
        let c = &self.config;
        let market = ctx.market;
        let pnl = ctx.combined_pnl;
        let loss = pnl.abs();

        let tier = self.volatility_tier(market.atr);
        if tier == VolatilityTier::Extreme {
            return Err(self.decline(format!("극단적 변동성 (ATR {})", market.atr)));
        }
        if market.trend == TrendDirection::Sideways && market.trend_confidence < 0.4 {
            return Err(self.decline(format!(
                "방향성 없는 좁은 횡보 (신뢰도 {:.2})",
                market.trend_confidence
            )));
        }
        if pnl >= Decimal::ZERO {
            return Err(self.decline("복구할 손실 없음"));
        }
        if loss > c.max_drawdown_limit * dec!(0.5) {
            return Err(self.decline(format!(
                "손실 {}이 드로다운 한도의 절반 초과",
                loss
            )));
        }

        let count = self.level_count(loss);
        let spacing = self.spacing_price(tier.spacing_multiplier());
        let levels = self.build_levels(market.price, market.trend, count, spacing);
        if levels.is_empty() {
            return Err(self.decline("생성된 레벨 없음"));
        }

        let total_volume: Decimal = levels.iter().map(|l| l.volume).sum();
        if total_volume > c.max_total_exposure {
            return Err(self.decline(format!(
                "그리드 총 수량 {} > 한도 {}",
                total_volume, c.max_total_exposure
            )));
        }

        let bidirectional = market.trend == TrendDirection::Sideways;
        let direction = match market.trend {
            TrendDirection::Up => Side::Buy,
            TrendDirection::Down => Side::Sell,
            TrendDirection::Sideways => ctx.task.original.direction,
        };

        let mut confidence: f64 = if bidirectional { 0.6 } else { 0.75 };
        if tier == VolatilityTier::High {
            confidence -= 0.1;
        }
        let risk_level = if levels.len() >= 8 || tier == VolatilityTier::High {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        debug!(
            task_id = %ctx.task.task_id,
            levels = levels.len(),
            spacing = %spacing,
            tier = ?tier,
            total_volume = %total_volume,
            "그리드 사이징 계산"
        );

        Ok(StrategyProposal {
            method: RecoveryMethod::GridLevel,
            direction,
            volume: total_volume,
            reference_price: market.price,
            target_profit: (loss * c.profit_target_ratio).round_dp(2),
            max_additional_loss: loss,
            risk_level,
            confidence,
            justification: format!(
                "{} 그리드 {}레벨, 간격 {} ({}pip), 총 {} lot",
                if bidirectional { "양방향" } else { "단방향" },
                levels.len(),
                spacing,
                (spacing * c.pip_factor).normalize(),
                total_volume
            ),
            orders: levels
                .into_iter()
                .map(|level| ProposedOrder {
                    direction: level.direction,
                    volume: level.volume,
                    price: level.price,
                    kind: OrderKind::Limit,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{RecoveryPriority, RecoveryRequest, RecoveryTask};
    use chrono::Utc;
    use proptest::prelude::*;
    use trader_core::{MarketSnapshot, MarketState, PositionSnapshot, TradingSession};

    fn task(pnl: Decimal) -> RecoveryTask {
        let position = PositionSnapshot {
            position_id: "p-1".to_string(),
            symbol: "XAUUSD".to_string(),
            direction: Side::Buy,
            volume: dec!(0.1),
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

    fn market(trend: TrendDirection, confidence: f64, atr: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "XAUUSD".to_string(),
            price: dec!(2000),
            atr,
            session: TradingSession::London,
            market_state: MarketState::TrendingStrong,
            trend,
            trend_confidence: confidence,
        }
    }

    fn sizing() -> GridLevelSizing {
        GridLevelSizing::new(GridConfig::default())
    }

    #[test]
    fn test_volatility_tiers() {
        let s = sizing();
        assert_eq!(s.volatility_tier(dec!(1)), VolatilityTier::Low);
        assert_eq!(s.volatility_tier(dec!(2)), VolatilityTier::Medium);
        assert_eq!(s.volatility_tier(dec!(4)), VolatilityTier::High);
        assert_eq!(s.volatility_tier(dec!(6)), VolatilityTier::Extreme);
    }

    #[test]
    fn test_level_count_and_volume() {
        let s = sizing();
        assert_eq!(s.level_count(dec!(-20)), 3);
        assert_eq!(s.level_count(dec!(-260)), 5);
        assert_eq!(s.level_count(dec!(-5000)), 10);

        assert_eq!(s.level_volume(0), dec!(0.01));
        assert!(s.level_volume(9) >= s.level_volume(3));
        assert!(s.level_volume(100) <= dec!(0.5));
    }

    #[test]
    fn test_uptrend_ladder_buys_below_price() {
        let s = sizing();
        let t = task(dec!(-200));
        let m = market(TrendDirection::Up, 0.7, dec!(2));

        let proposal = s.propose(&SizingContext::new(&t, &m, dec!(-200))).unwrap();
        assert_eq!(proposal.orders.len(), 4);
        assert!(proposal
            .orders
            .iter()
            .all(|o| o.direction == Side::Buy && o.price < dec!(2000) && o.kind == OrderKind::Limit));
        // 중간 변동성: 20pip × 1.0 / 10 = 2.0
        assert_eq!(proposal.orders[3].price, dec!(1998));
        assert_eq!(proposal.orders[0].price, dec!(1992));
        assert_eq!(proposal.target_profit, dec!(60));
        assert_eq!(proposal.max_additional_loss, dec!(200));
        assert!((proposal.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_sideways_ladder_is_bidirectional() {
        let s = sizing();
        let t = task(dec!(-200));
        let m = market(TrendDirection::Sideways, 0.5, dec!(1));

        let proposal = s.propose(&SizingContext::new(&t, &m, dec!(-200))).unwrap();
        let buys = proposal.orders.iter().filter(|o| o.direction == Side::Buy).count();
        let sells = proposal.orders.iter().filter(|o| o.direction == Side::Sell).count();
        assert_eq!(buys, 2);
        assert_eq!(sells, 2);
        assert!(proposal
            .orders
            .iter()
            .all(|o| (o.direction == Side::Buy) == (o.price < dec!(2000))));
        assert!((proposal.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_declines() {
        let s = sizing();
        let t = task(dec!(-200));

        // 극단적 변동성
        let m = market(TrendDirection::Up, 0.7, dec!(10));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-200))).is_err());

        // 신뢰도 낮은 횡보
        let m = market(TrendDirection::Sideways, 0.2, dec!(2));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-200))).is_err());

        // 손실 없음
        let m = market(TrendDirection::Up, 0.7, dec!(2));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(5))).is_err());

        // 드로다운 한도 절반 초과
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-600))).is_err());
    }

    #[test]
    fn test_total_exposure_limit() {
        let s = GridLevelSizing::new(GridConfig {
            base_volume: dec!(1),
            max_volume_per_level: dec!(2),
            ..GridConfig::default()
        });
        let t = task(dec!(-200));
        let m = market(TrendDirection::Up, 0.7, dec!(2));
        assert!(s.propose(&SizingContext::new(&t, &m, dec!(-200))).is_err());
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
        fn levels_strictly_ordered_with_minimum_spacing(
            price_cents in 100_000i64..500_000,
            multiplier_tenths in 1i64..30,
            count in 2usize..12,
            trend in trends(),
        ) {
            let s = sizing();
            let price = Decimal::new(price_cents, 2);
            let spacing = s.spacing_price(Decimal::new(multiplier_tenths, 1));
            let levels = s.build_levels(price, trend, count, spacing);

            prop_assert!(!levels.is_empty());
            for pair in levels.windows(2) {
                prop_assert!(pair[0].price < pair[1].price);
                prop_assert!(pair[1].price - pair[0].price >= spacing);
            }
        }

        #[test]
        fn spacing_scales_with_volatility_multiplier(
            multiplier_tenths in 1i64..30,
            factor in 1i64..5,
        ) {
            let s = sizing();
            let m = Decimal::new(multiplier_tenths, 1);
            let base = s.spacing_price(m);
            let scaled = s.spacing_price(m * Decimal::from(factor));
            prop_assert_eq!(scaled, base * Decimal::from(factor));
        }
    }
}
