//! 복구 방식 선택기.
//!
//! 시장 상태 × 방식 호환성 행렬, 손실 긴급도, 기존 포지션의 방향 분포,
//! 계좌 건전성, 방식별 과거 성과를 조합해 방식 순위를 매깁니다.
//! 재시도 시에는 직전에 실패한 방식을 맨 뒤로 보내 바로 반복하지 않습니다.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use trader_core::{AccountSnapshot, MarketSnapshot, MarketState, PositionSnapshot};

use crate::config::SelectorConfig;
use crate::stats::RecoveryStats;
use crate::task::{RecoveryMethod, RecoveryTask};

// =============================================================================
// 손실 분석 / 긴급도
// =============================================================================

/// 손실 추이 (트리거 시점 손실 대비)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LossTrend {
    Worsening,
    Stable,
    Improving,
}

/// 복구 긴급도
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrgencyLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UrgencyLevel::Low => write!(f, "low"),
            UrgencyLevel::Medium => write!(f, "medium"),
            UrgencyLevel::High => write!(f, "high"),
            UrgencyLevel::Critical => write!(f, "critical"),
        }
    }
}

/// 추적 포지션 기준 손실 분석
#[derive(Debug, Clone, Serialize)]
pub struct LossAnalysis {
    /// 합산 손익 (음수면 손실)
    pub combined_pnl: Decimal,
    /// 손실 크기 (0 이상)
    pub total_loss: Decimal,
    /// equity 대비 손실 비율 (%)
    pub loss_percent: f64,
    pub trend: LossTrend,
    /// 가장 오래 보유한 포지션의 보유 시간 (분)
    pub max_holding_minutes: i64,
    pub position_count: usize,
}

impl LossAnalysis {
    pub fn new(
        task: &RecoveryTask,
        positions: &[PositionSnapshot],
        equity: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        let combined_pnl: Decimal = positions.iter().map(|p| p.unrealized_pnl).sum();
        let total_loss = (-combined_pnl).max(Decimal::ZERO);

        let loss_percent = if equity > Decimal::ZERO {
            (total_loss / equity * Decimal::ONE_HUNDRED)
                .to_f64()
                .unwrap_or(0.0)
        } else {
            100.0
        };

        let trigger_loss = task.trigger_pnl.abs();
        let trend = if trigger_loss.is_zero() {
            LossTrend::Stable
        } else if total_loss > trigger_loss * Decimal::new(12, 1) {
            LossTrend::Worsening
        } else if total_loss < trigger_loss * Decimal::new(8, 1) {
            LossTrend::Improving
        } else {
            LossTrend::Stable
        };

        let max_holding_minutes = positions
            .iter()
            .map(|p| p.holding_minutes(now))
            .max()
            .unwrap_or(0);

        Self {
            combined_pnl,
            total_loss,
            loss_percent,
            trend,
            max_holding_minutes,
            position_count: positions.len(),
        }
    }

    /// 긴급도 분류.
    pub fn urgency(&self) -> UrgencyLevel {
        let mut score = 0i32;

        let loss = self.total_loss.to_f64().unwrap_or(0.0);
        score += if loss > 1000.0 {
            3
        } else if loss > 500.0 {
            2
        } else if loss > 100.0 {
            1
        } else {
            0
        };

        score += if self.loss_percent > 50.0 {
            3
        } else if self.loss_percent > 30.0 {
            2
        } else if self.loss_percent > 15.0 {
            1
        } else {
            0
        };

        score += match self.trend {
            LossTrend::Worsening => 2,
            LossTrend::Improving => -1,
            LossTrend::Stable => 0,
        };

        if self.max_holding_minutes > 1440 {
            score += 1;
        }

        score += if self.position_count > 10 {
            2
        } else if self.position_count > 5 {
            1
        } else {
            0
        };

        match score {
            s if s >= 8 => UrgencyLevel::Critical,
            s if s >= 5 => UrgencyLevel::High,
            s if s >= 2 => UrgencyLevel::Medium,
            _ => UrgencyLevel::Low,
        }
    }

    /// 성공 확률 보정용 손실 크기 계수
    fn loss_adjustment(&self) -> f64 {
        if self.loss_percent > 50.0 {
            0.7
        } else if self.loss_percent > 30.0 {
            0.8
        } else if self.loss_percent > 15.0 {
            0.9
        } else {
            1.0
        }
    }

    /// 성공 확률 보정용 손실 추이 계수
    fn trend_adjustment(&self) -> f64 {
        match self.trend {
            LossTrend::Worsening => 0.8,
            LossTrend::Improving => 1.1,
            LossTrend::Stable => 1.0,
        }
    }
}

// =============================================================================
// 정적 테이블
// =============================================================================

/// 시장 상태 × 방식 호환성 (0 ~ 100)
pub fn market_compatibility(method: RecoveryMethod, state: MarketState) -> f64 {
    use MarketState::*;

    match method {
        RecoveryMethod::AdaptiveMultiplier => match state {
            RangingTight => 90.0,
            RangingWide => 70.0,
            TrendingWeak => 60.0,
            TrendingStrong => 30.0,
            VolatileHigh => 20.0,
            NewsImpact => 10.0,
        },
        RecoveryMethod::GridLevel => match state {
            RangingTight => 50.0,
            RangingWide => 60.0,
            TrendingWeak => 80.0,
            TrendingStrong => 90.0,
            VolatileHigh => 40.0,
            NewsImpact => 30.0,
        },
    }
}

/// 긴급도 × 방식 적합도 (0 ~ 100)
pub fn urgency_compatibility(method: RecoveryMethod, urgency: UrgencyLevel) -> f64 {
    match (method, urgency) {
        (RecoveryMethod::AdaptiveMultiplier, UrgencyLevel::Low) => 90.0,
        (RecoveryMethod::AdaptiveMultiplier, UrgencyLevel::Medium) => 70.0,
        (RecoveryMethod::AdaptiveMultiplier, UrgencyLevel::High) => 40.0,
        (RecoveryMethod::AdaptiveMultiplier, UrgencyLevel::Critical) => 20.0,
        (RecoveryMethod::GridLevel, UrgencyLevel::Low) => 80.0,
        (RecoveryMethod::GridLevel, UrgencyLevel::Medium) => 90.0,
        (RecoveryMethod::GridLevel, UrgencyLevel::High) => 70.0,
        (RecoveryMethod::GridLevel, UrgencyLevel::Critical) => 50.0,
    }
}

/// 기록이 부족할 때의 기본 성공 확률
fn default_success_probability(method: RecoveryMethod) -> f64 {
    match method {
        RecoveryMethod::AdaptiveMultiplier => 0.75,
        RecoveryMethod::GridLevel => 0.80,
    }
}

// =============================================================================
// 점수 / 선택
// =============================================================================

/// 방식별 호환성 점수
#[derive(Debug, Clone, Serialize)]
pub struct MethodCompatibilityScore {
    pub method: RecoveryMethod,
    /// 시장 상태 행렬 점수
    pub market_score: f64,
    /// 긴급도 적합도
    pub urgency_score: f64,
    /// 과거 성과 가중치
    pub performance_weight: f64,
    /// 포지션 상관 조정
    pub correlation_adjustment: f64,
    /// 계좌 건전성 조정
    pub health_adjustment: f64,
    /// 최종 점수 (0 ~ 100)
    pub total: f64,
}

/// 선택 결과
#[derive(Debug, Clone, Serialize)]
pub struct MethodSelection {
    /// 시도 순서대로 정렬된 방식
    pub ranked: Vec<MethodCompatibilityScore>,
    pub urgency: UrgencyLevel,
    pub analysis: LossAnalysis,
}

impl MethodSelection {
    /// 시도 순서
    pub fn order(&self) -> Vec<RecoveryMethod> {
        self.ranked.iter().map(|s| s.method).collect()
    }

    /// 1순위 방식
    pub fn primary(&self) -> Option<RecoveryMethod> {
        self.ranked.first().map(|s| s.method)
    }
}

/// 복구 방식 선택기
#[derive(Debug, Clone)]
pub struct MethodSelector {
    config: SelectorConfig,
}

impl MethodSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// 방식 순위 결정.
    ///
    /// `positions`는 태스크가 추적하는 포지션입니다. 점수 순으로 정렬한 뒤
    /// 태스크의 현재 방식(재진입)을 앞으로, 직전 실패 방식을 뒤로 보냅니다.
    pub fn select(
        &self,
        task: &RecoveryTask,
        market: &MarketSnapshot,
        account: &AccountSnapshot,
        positions: &[PositionSnapshot],
        stats: &RecoveryStats,
        now: DateTime<Utc>,
    ) -> MethodSelection {
        let analysis = LossAnalysis::new(task, positions, account.equity, now);
        let urgency = analysis.urgency();
        let correlation = self.correlation_adjustment(task, account);
        let health = self.health_adjustment(account.equity);

        let mut ranked: Vec<MethodCompatibilityScore> = RecoveryMethod::ALL
            .iter()
            .map(|&method| {
                self.score(
                    method,
                    market.market_state,
                    urgency,
                    stats.performance_weight(method),
                    correlation,
                    health,
                )
            })
            .collect();

        // 안정 정렬: 동점이면 열거 순서 유지
        ranked.sort_by(|a, b| b.total.total_cmp(&a.total));

        if let Some(current) = task.recovery_method {
            if task.last_failed_method != Some(current) {
                promote(&mut ranked, current);
            }
        }
        if let Some(failed) = task.last_failed_method {
            rotate(&mut ranked, failed);
        }

        MethodSelection {
            ranked,
            urgency,
            analysis,
        }
    }

    /// 방식 하나의 점수 계산.
    pub fn score(
        &self,
        method: RecoveryMethod,
        state: MarketState,
        urgency: UrgencyLevel,
        performance_weight: f64,
        correlation_adjustment: f64,
        health_adjustment: f64,
    ) -> MethodCompatibilityScore {
        let market_score = market_compatibility(method, state);
        let urgency_score = urgency_compatibility(method, urgency);
        let w = self.config.urgency_weight;

        let blended = (1.0 - w) * market_score + w * urgency_score;
        let total = (blended * performance_weight + correlation_adjustment + health_adjustment)
            .clamp(0.0, 100.0);

        MethodCompatibilityScore {
            method,
            market_score,
            urgency_score,
            performance_weight,
            correlation_adjustment,
            health_adjustment,
            total,
        }
    }

    /// 포지션 상관 조정.
    ///
    /// 계좌의 다른 포지션이 반대 방향 위주면(자연 헤지) 양수,
    /// 같은 방향 위주면 음수.
    pub fn correlation_adjustment(&self, task: &RecoveryTask, account: &AccountSnapshot) -> f64 {
        let (opposite, same) = account.direction_split(task.original.direction);
        // 태스크 자신의 포지션은 제외
        let same = same.saturating_sub(1);
        let total = opposite + same;
        if total == 0 {
            return 0.0;
        }

        let opposite_share = opposite as f64 / total as f64;
        let same_share = same as f64 / total as f64;
        (opposite_share - same_share) * self.config.correlation_weight
    }

    /// equity 구간별 건전성 조정.
    pub fn health_adjustment(&self, equity: Decimal) -> f64 {
        let c = &self.config;
        if equity >= c.health_high_equity {
            c.health_adjustments[0]
        } else if equity >= c.health_mid_equity {
            c.health_adjustments[1]
        } else if equity >= c.health_low_equity {
            c.health_adjustments[2]
        } else {
            c.health_adjustments[3]
        }
    }
}

/// 실패한 방식을 순위 맨 뒤로 이동.
pub fn rotate(ranked: &mut Vec<MethodCompatibilityScore>, failed: RecoveryMethod) {
    if let Some(pos) = ranked.iter().position(|s| s.method == failed) {
        let entry = ranked.remove(pos);
        ranked.push(entry);
    }
}

fn promote(ranked: &mut Vec<MethodCompatibilityScore>, method: RecoveryMethod) {
    if let Some(pos) = ranked.iter().position(|s| s.method == method) {
        let entry = ranked.remove(pos);
        ranked.insert(0, entry);
    }
}

// =============================================================================
// 추정치
// =============================================================================

/// 예상 복구 시간 (분, 15 ~ 1440).
pub fn estimate_recovery_minutes(
    method: RecoveryMethod,
    analysis: &LossAnalysis,
    urgency: UrgencyLevel,
) -> f64 {
    let base = match method {
        RecoveryMethod::AdaptiveMultiplier => 60.0,
        RecoveryMethod::GridLevel => 240.0,
    };
    let loss = analysis.total_loss.to_f64().unwrap_or(0.0);
    let urgency_factor = match urgency {
        UrgencyLevel::Low => 1.5,
        UrgencyLevel::Medium => 1.0,
        UrgencyLevel::High => 0.7,
        UrgencyLevel::Critical => 0.5,
    };

    let minutes = base
        * (1.0 + loss / 1000.0)
        * (1.0 + analysis.position_count as f64 / 10.0)
        * urgency_factor;
    minutes.clamp(15.0, 1440.0)
}

/// 성공 확률 추정 (0.1 ~ 0.95).
pub fn estimate_success_probability(
    method: RecoveryMethod,
    state: MarketState,
    analysis: &LossAnalysis,
    stats: &RecoveryStats,
) -> f64 {
    let base = stats
        .recorded_success_rate(method)
        .unwrap_or_else(|| default_success_probability(method));
    let market = market_compatibility(method, state) / 100.0;

    let probability = base * 0.4
        + market * 0.3
        + base * analysis.loss_adjustment() * 0.2
        + base * analysis.trend_adjustment() * 0.1;
    probability.clamp(0.1, 0.95)
}
