//! 복구 통계.
//!
//! 종료된 태스크마다 방식별 기록을 남기고, 선택기에서 쓰는
//! 방식별 성과 가중치를 계산합니다.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::task::RecoveryMethod;

/// 방식별 최대 보관 기록 수
const MAX_RECORDS_PER_METHOD: usize = 100;
/// 가중치 계산에 쓰는 최근 기록 수
const WEIGHT_WINDOW: usize = 20;
/// 가중치/성공률 반영에 필요한 최소 기록 수
const MIN_RECORDS: usize = 5;

/// 종료된 복구 1건의 기록
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub success: bool,
    pub final_pnl: Decimal,
    #[serde(skip)]
    pub duration: Duration,
    pub completed_at: DateTime<Utc>,
}

/// 방식별 누적 통계
#[derive(Debug, Clone, Default)]
pub struct MethodStats {
    pub attempts: usize,
    pub successes: usize,
    records: VecDeque<RecoveryRecord>,
}

impl MethodStats {
    fn push(&mut self, record: RecoveryRecord) {
        self.attempts += 1;
        if record.success {
            self.successes += 1;
        }
        if self.records.len() == MAX_RECORDS_PER_METHOD {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// 보관 중인 기록 수
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// 누적 성공 비율 (0.0 ~ 1.0)
    pub fn success_ratio(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.successes as f64 / self.attempts as f64
        }
    }

    /// 성과 가중치.
    ///
    /// 최근 20건 기준 `1 + (성공률 - 0.5) + 평균손익/1000`, [0.3, 2.0].
    /// 기록이 5건 미만이면 1.0.
    pub fn performance_weight(&self) -> f64 {
        if self.records.len() < MIN_RECORDS {
            return 1.0;
        }

        let recent: Vec<&RecoveryRecord> = self.records.iter().rev().take(WEIGHT_WINDOW).collect();
        let count = recent.len() as f64;
        let success_rate = recent.iter().filter(|r| r.success).count() as f64 / count;
        let avg_pnl = recent
            .iter()
            .map(|r| r.final_pnl.to_f64().unwrap_or(0.0))
            .sum::<f64>()
            / count;

        (1.0 + (success_rate - 0.5) + avg_pnl / 1000.0).clamp(0.3, 2.0)
    }
}

/// 전체 복구 통계
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    /// 종료된 태스크 수
    pub attempted: usize,
    /// 성공 수
    pub successful: usize,
    /// 실패 수 (취소 포함)
    pub failed: usize,
    /// 성공한 복구의 누적 소요 시간
    total_recovery_time: Duration,
    methods: BTreeMap<RecoveryMethod, MethodStats>,
}

impl RecoveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 종료된 태스크 기록.
    ///
    /// 방식이 정해지기 전에 종료된 태스크는 전체 집계에만 반영됩니다.
    pub fn record(
        &mut self,
        method: Option<RecoveryMethod>,
        success: bool,
        final_pnl: Decimal,
        duration: Duration,
        completed_at: DateTime<Utc>,
    ) {
        self.attempted += 1;
        if success {
            self.successful += 1;
            self.total_recovery_time += duration;
        } else {
            self.failed += 1;
        }

        if let Some(method) = method {
            self.methods.entry(method).or_default().push(RecoveryRecord {
                success,
                final_pnl,
                duration,
                completed_at,
            });
        }
    }

    /// 성공률 (%)
    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            0.0
        } else {
            (self.successful as f64 / self.attempted as f64) * 100.0
        }
    }

    /// 성공한 복구의 평균 소요 시간
    pub fn avg_recovery_time(&self) -> Duration {
        if self.successful == 0 {
            Duration::ZERO
        } else {
            self.total_recovery_time / self.successful as u32
        }
    }

    pub fn method(&self, method: RecoveryMethod) -> Option<&MethodStats> {
        self.methods.get(&method)
    }

    /// 방식별 성과 가중치 (기록 없으면 1.0)
    pub fn performance_weight(&self, method: RecoveryMethod) -> f64 {
        self.method(method)
            .map(MethodStats::performance_weight)
            .unwrap_or(1.0)
    }

    /// 방식별 기록 성공 비율 (시도 5건 이상일 때만)
    pub fn recorded_success_rate(&self, method: RecoveryMethod) -> Option<f64> {
        self.method(method)
            .filter(|m| m.attempts >= MIN_RECORDS)
            .map(MethodStats::success_ratio)
    }

    /// 조회 API 응답 생성
    pub fn report(&self, available_strategies: Vec<RecoveryMethod>) -> RecoveryStatistics {
        let methods = RecoveryMethod::ALL
            .iter()
            .map(|&method| {
                let stats = self.method(method);
                MethodReport {
                    method,
                    attempts: stats.map(|s| s.attempts).unwrap_or(0),
                    successes: stats.map(|s| s.successes).unwrap_or(0),
                    weight: self.performance_weight(method),
                }
            })
            .collect();

        RecoveryStatistics {
            attempted: self.attempted,
            successful: self.successful,
            success_rate: self.success_rate(),
            available_strategies,
            avg_recovery_time_secs: self.avg_recovery_time().as_secs_f64(),
            methods,
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self) {
        tracing::info!(
            attempted = self.attempted,
            successful = self.successful,
            failed = self.failed,
            success_rate = format!("{:.1}%", self.success_rate()),
            avg_recovery_time = format!("{:.1}s", self.avg_recovery_time().as_secs_f64()),
            "복구 통계"
        );
    }
}

/// `get_recovery_statistics` 응답
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryStatistics {
    pub attempted: usize,
    pub successful: usize,
    /// 성공률 (%)
    pub success_rate: f64,
    pub available_strategies: Vec<RecoveryMethod>,
    pub avg_recovery_time_secs: f64,
    pub methods: Vec<MethodReport>,
}

/// 방식별 통계 항목
#[derive(Debug, Clone, Serialize)]
pub struct MethodReport {
    pub method: RecoveryMethod,
    pub attempts: usize,
    pub successes: usize,
    pub weight: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn record_n(stats: &mut RecoveryStats, method: RecoveryMethod, n: usize, success: bool, pnl: Decimal) {
        for _ in 0..n {
            stats.record(Some(method), success, pnl, Duration::from_secs(60), Utc::now());
        }
    }

    #[test]
    fn test_success_rate_and_average() {
        let mut stats = RecoveryStats::new();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.avg_recovery_time(), Duration::ZERO);

        stats.record(
            Some(RecoveryMethod::AdaptiveMultiplier),
            true,
            dec!(10),
            Duration::from_secs(100),
            Utc::now(),
        );
        stats.record(
            Some(RecoveryMethod::GridLevel),
            true,
            dec!(5),
            Duration::from_secs(300),
            Utc::now(),
        );
        stats.record(None, false, dec!(-40), Duration::from_secs(50), Utc::now());

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.successful, 2);
        assert!((stats.success_rate() - 66.666).abs() < 0.01);
        // 실패 건은 평균 소요 시간에서 제외
        assert_eq!(stats.avg_recovery_time(), Duration::from_secs(200));
    }

    #[test]
    fn test_weight_needs_minimum_records() {
        let mut stats = RecoveryStats::new();
        record_n(&mut stats, RecoveryMethod::GridLevel, 4, true, dec!(100));
        assert_eq!(stats.performance_weight(RecoveryMethod::GridLevel), 1.0);
        assert_eq!(stats.recorded_success_rate(RecoveryMethod::GridLevel), None);

        record_n(&mut stats, RecoveryMethod::GridLevel, 1, true, dec!(100));
        // 1 + (1.0 - 0.5) + 100/1000 = 1.6
        let weight = stats.performance_weight(RecoveryMethod::GridLevel);
        assert!((weight - 1.6).abs() < 1e-9);
        assert_eq!(stats.recorded_success_rate(RecoveryMethod::GridLevel), Some(1.0));
    }

    #[test]
    fn test_weight_is_clamped() {
        let mut stats = RecoveryStats::new();
        record_n(&mut stats, RecoveryMethod::AdaptiveMultiplier, 10, false, dec!(-2000));
        assert_eq!(stats.performance_weight(RecoveryMethod::AdaptiveMultiplier), 0.3);

        record_n(&mut stats, RecoveryMethod::GridLevel, 10, true, dec!(5000));
        assert_eq!(stats.performance_weight(RecoveryMethod::GridLevel), 2.0);
    }

    #[test]
    fn test_records_are_bounded() {
        let mut stats = RecoveryStats::new();
        record_n(&mut stats, RecoveryMethod::GridLevel, 150, true, dec!(1));

        let method = stats.method(RecoveryMethod::GridLevel).unwrap();
        assert_eq!(method.record_count(), 100);
        assert_eq!(method.attempts, 150);
    }

    #[test]
    fn test_report_lists_every_method() {
        let mut stats = RecoveryStats::new();
        record_n(&mut stats, RecoveryMethod::GridLevel, 2, true, dec!(1));

        let report = stats.report(RecoveryMethod::ALL.to_vec());
        assert_eq!(report.methods.len(), 2);
        assert_eq!(report.methods[0].attempts, 0);
        assert_eq!(report.methods[1].successes, 2);
        assert_eq!(report.available_strategies.len(), 2);
    }
}
