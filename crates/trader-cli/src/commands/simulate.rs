//! 페이퍼 거래소 복구 시뮬레이션.
//!
//! 손실 포지션을 만들고 복구를 트리거한 뒤, 시드 기반 랜덤 워크로 가격을
//! 움직이며 오케스트레이터를 실행합니다. 종료 시 통계를 출력합니다.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rust_decimal::{prelude::FromPrimitive, Decimal};
use rust_decimal_macros::dec;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use trader_core::{MarketState, Side, TrendDirection};
use trader_execution::{MarketContext, PaperVenue, PaperVenueConfig};
use trader_recovery::{RecoveryOrchestrator, RecoveryPriority, RecoveryProviders};

use super::config::load_config;

const SYMBOL: &str = "XAUUSD";
const START_PRICE: Decimal = dec!(2000);

/// 시뮬레이션 설정
#[derive(Debug, Clone)]
pub struct SimulateConfig {
    pub ticks: u32,
    pub seed: u64,
    pub positions: usize,
    pub tick_ms: u64,
    pub config_path: Option<PathBuf>,
}

/// 시뮬레이션 실행.
pub async fn run_simulation(sim: SimulateConfig) -> Result<()> {
    let config = load_config(sim.config_path.as_deref())?;
    let mut rng = StdRng::seed_from_u64(sim.seed);

    let venue = Arc::new(PaperVenue::new(PaperVenueConfig::default()));
    venue
        .set_market_context(
            SYMBOL,
            MarketContext {
                atr: dec!(3),
                market_state: MarketState::RangingWide,
                trend: TrendDirection::Sideways,
                trend_confidence: 0.5,
                session: None,
            },
        )
        .await;
    venue.set_price(SYMBOL, START_PRICE).await;

    // 현재가 기준으로 손실 중인 포지션 구성
    let mut seeded = Vec::with_capacity(sim.positions);
    for _ in 0..sim.positions {
        let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
        let offset = price_from_f64(rng.gen_range(3.0..8.0));
        let open_price = match side {
            Side::Buy => START_PRICE + offset,
            Side::Sell => START_PRICE - offset,
        };
        let opened_minutes_ago = rng.gen_range(10..240);
        let position_id = venue
            .open_position(
                SYMBOL,
                side,
                dec!(0.1),
                open_price,
                Utc::now() - chrono::Duration::minutes(opened_minutes_ago),
            )
            .await;
        seeded.push((position_id, side, offset));
    }

    let orchestrator =
        RecoveryOrchestrator::new(config, RecoveryProviders::from_venue(venue.clone()))?;
    orchestrator.start().await?;

    for (position_id, side, offset) in &seeded {
        let priority = if *offset > dec!(6) {
            RecoveryPriority::High
        } else {
            RecoveryPriority::Medium
        };
        let admitted = orchestrator
            .trigger_recovery(position_id, "시뮬레이션 손실 포지션", priority)
            .await;
        info!(
            position_id = %position_id,
            side = %side,
            priority = %priority,
            admitted = admitted,
            "복구 트리거"
        );
    }

    let mut price = START_PRICE;
    let mut interval = tokio::time::interval(Duration::from_millis(sim.tick_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    for tick in 1..=sim.ticks {
        interval.tick().await;

        let step = price_from_f64(rng.gen_range(-0.0015..0.0015));
        price = (price * (Decimal::ONE + step)).round_dp(2).max(dec!(1));
        let filled = venue.set_price(SYMBOL, price).await;
        if filled > 0 {
            info!(tick = tick, price = %price, filled = filled, "지정가 체결");
        }

        if tick % 50 == 0 {
            let active = orchestrator.get_active_recoveries().await;
            info!(
                tick = tick,
                price = %price,
                active = active.len(),
                positions = venue.position_count().await,
                "시뮬레이션 진행"
            );
            if active.is_empty() {
                break;
            }
        }
    }

    let remaining = orchestrator.get_active_recoveries().await;
    orchestrator.shutdown().await;

    if !remaining.is_empty() {
        warn!(remaining = remaining.len(), "미완료 복구 태스크");
    }

    let stats = orchestrator.get_recovery_statistics().await;
    println!("\n=== 복구 시뮬레이션 결과 ===");
    println!("최종 가격: {}", price);
    println!("총 주문: {}", venue.total_orders().await);
    println!("대기 지정가: {}", venue.pending_order_count().await);
    println!(
        "종료: {} (성공 {}, 성공률 {:.1}%)",
        stats.attempted, stats.successful, stats.success_rate
    );
    for recovery in &remaining {
        println!(
            "  [{}] {} {} 시도 {}회, 손익 {}",
            recovery.status,
            recovery.position_id,
            recovery
                .method
                .map(|m| m.to_string())
                .unwrap_or_else(|| "none".to_string()),
            recovery.attempts,
            recovery.unrealized_loss
        );
    }
    println!("\n{}", serde_json::to_string_pretty(&stats)?);

    Ok(())
}

fn price_from_f64(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(6)
}
