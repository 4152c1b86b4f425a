//! 복구 오케스트레이터 설정.
//!
//! 기본값 → (선택) TOML 파일 → 환경변수 순으로 덮어씁니다.

use std::{path::Path, str::FromStr, time::Duration};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{RecoveryError, Result};

/// 전체 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// 스케줄러 설정
    pub scheduler: SchedulerConfig,
    /// 모니터 설정
    pub monitor: MonitorConfig,
    /// 주문 전송 설정
    pub submission: SubmissionConfig,
    /// 재시도 대기 설정
    pub retry: RetryConfig,
    /// 실행 루프 설정
    pub execution: ExecutionConfig,
    /// 방식 선택 설정
    pub selector: SelectorConfig,
    /// 적응형 배수(마틴게일) 사이징 설정
    pub martingale: MartingaleConfig,
    /// 그리드 사이징 설정
    pub grid: GridConfig,
}

/// 스케줄러 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// 동시에 진행 가능한 복구 수
    pub max_concurrent_recoveries: usize,
    /// 태스크당 최대 시도 횟수
    pub max_attempts: u32,
    /// 완료 이력 보존 시간 (시간)
    pub history_retention_hours: i64,
    /// 완료 이력 최대 보관 수
    pub history_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_recoveries: 5,
            max_attempts: 3,
            history_retention_hours: 24,
            history_capacity: 500,
        }
    }
}

/// 성공 판정 범위
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessScope {
    /// 원 포지션 + 태스크 태그가 붙은 복구 포지션
    TrackedPositions,
    /// 열린 포지션 전체
    Portfolio,
}

impl FromStr for SuccessScope {
    type Err = RecoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tracked" | "tracked_positions" => Ok(SuccessScope::TrackedPositions),
            "portfolio" => Ok(SuccessScope::Portfolio),
            other => Err(RecoveryError::Config(format!(
                "알 수 없는 success_scope: {}",
                other
            ))),
        }
    }
}

/// 모니터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// 폴링 주기 (밀리초)
    pub interval_ms: u64,
    /// 예상 복구 시간 대비 타임아웃 배수
    pub timeout_factor: f64,
    /// 성공 판정 범위
    pub success_scope: SuccessScope,
    /// 손실 확대 시 다음 복구 레벨로 재진입 허용
    pub escalation_enabled: bool,
    /// 트리거 시점 손실 대비 확대 배수
    pub escalation_loss_ratio: Decimal,
    /// 마지막 주문 후 재진입까지 대기 (초)
    pub escalation_cooldown_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_factor: 2.0,
            success_scope: SuccessScope::TrackedPositions,
            escalation_enabled: true,
            escalation_loss_ratio: dec!(1.5),
            escalation_cooldown_secs: 300,
        }
    }
}

/// 주문 전송 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// 주문 1건당 응답 대기 한도 (밀리초)
    pub timeout_ms: u64,
    /// 네트워크 에러 재전송 횟수 (같은 시도 안에서)
    pub max_retries: u32,
    /// 재전송 기본 대기 (밀리초)
    pub base_delay_ms: u64,
    /// 재전송 백오프 배수
    pub backoff_multiplier: f64,
    /// 최대 허용 슬리피지 (가격 단위, 0이면 제한 없음)
    pub max_slippage: Decimal,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            max_retries: 1,
            base_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_slippage: dec!(0.5),
        }
    }
}

/// 재시도 태스크의 다음 시도 전 대기 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// 기본 대기 (밀리초)
    pub base_delay_ms: u64,
    /// 최대 대기 (밀리초)
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// 실행 루프 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// 스케줄러 폴링 주기 (밀리초)
    pub poll_interval_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
        }
    }
}

/// 방식 선택 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// 포지션 상관 조정 최대폭 (점수)
    pub correlation_weight: f64,
    /// 계좌 건전성 구간 경계 (높은 순)
    pub health_high_equity: Decimal,
    pub health_mid_equity: Decimal,
    pub health_low_equity: Decimal,
    /// 구간별 점수 조정 (high 이상 / mid 이상 / low 이상 / low 미만)
    pub health_adjustments: [f64; 4],
    /// 긴급도 적합도 반영 비율
    pub urgency_weight: f64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            correlation_weight: 10.0,
            health_high_equity: dec!(10000),
            health_mid_equity: dec!(5000),
            health_low_equity: dec!(1000),
            health_adjustments: [5.0, 0.0, -10.0, -20.0],
            urgency_weight: 0.25,
        }
    }
}

/// 세션별 배수
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMultipliers {
    pub asian: f64,
    pub london: f64,
    pub new_york: f64,
    pub overlap: f64,
    pub quiet: f64,
}

impl Default for SessionMultipliers {
    fn default() -> Self {
        Self {
            asian: 1.2,
            london: 0.8,
            new_york: 0.7,
            overlap: 0.6,
            quiet: 1.5,
        }
    }
}

/// 적응형 배수 사이징 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MartingaleConfig {
    /// 기본 배수
    pub base_multiplier: f64,
    /// 배수 상한
    pub max_multiplier: f64,
    /// 최대 복구 레벨
    pub max_recovery_levels: u32,
    /// 최대 허용 누적 손실
    pub max_total_loss: Decimal,
    /// 최대 포지션 크기 (lot)
    pub max_position_size: Decimal,
    /// 복구 시작 손실 기준 (음수)
    pub recovery_threshold: Decimal,
    /// 추세 반영 여부
    pub trend_awareness: bool,
    /// 변동성 반영 여부
    pub volatility_adjustment: bool,
    /// 세션별 배수
    pub session_multipliers: SessionMultipliers,
}

impl Default for MartingaleConfig {
    fn default() -> Self {
        Self {
            base_multiplier: 1.8,
            max_multiplier: 8.0,
            max_recovery_levels: 5,
            max_total_loss: dec!(500),
            max_position_size: dec!(2.0),
            recovery_threshold: dec!(-20),
            trend_awareness: true,
            volatility_adjustment: true,
            session_multipliers: SessionMultipliers::default(),
        }
    }
}

/// 그리드 사이징 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// 기본 간격 (pip)
    pub base_spacing_pips: Decimal,
    /// 최대 레벨 수
    pub max_levels: usize,
    /// 1레벨 수량
    pub base_volume: Decimal,
    /// 레벨별 수량 증가 배수
    pub volume_multiplier: Decimal,
    /// 레벨당 최대 수량
    pub max_volume_per_level: Decimal,
    /// 그리드 전체 최대 수량
    pub max_total_exposure: Decimal,
    /// 최대 드로다운 한도
    pub max_drawdown_limit: Decimal,
    /// 목표 수익 비율 (누적 손실 대비)
    pub profit_target_ratio: Decimal,
    /// 가격 1단위당 pip 수
    pub pip_factor: Decimal,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            base_spacing_pips: dec!(20),
            max_levels: 10,
            base_volume: dec!(0.01),
            volume_multiplier: dec!(1.2),
            max_volume_per_level: dec!(0.5),
            max_total_exposure: dec!(5.0),
            max_drawdown_limit: dec!(1000),
            profit_target_ratio: dec!(0.3),
            pip_factor: dec!(10),
        }
    }
}

impl RecoveryConfig {
    /// 환경변수에서 설정 로드 (기본값 위에 덮어쓰기)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 로드 후 환경변수 적용
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecoveryError::Config(format!("설정 파일 읽기 실패 ({}): {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열 파싱 (누락 필드는 기본값)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RecoveryError::Config(format!("TOML 파싱 실패: {}", e)))
    }

    /// TOML 문자열로 직렬화
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RecoveryError::Config(format!("TOML 직렬화 실패: {}", e)))
    }

    fn apply_env(&mut self) {
        let s = &mut self.scheduler;
        s.max_concurrent_recoveries =
            env_var_parse("RECOVERY_MAX_CONCURRENT", s.max_concurrent_recoveries);
        s.max_attempts = env_var_parse("RECOVERY_MAX_ATTEMPTS", s.max_attempts);
        s.history_retention_hours =
            env_var_parse("RECOVERY_HISTORY_RETENTION_HOURS", s.history_retention_hours);
        s.history_capacity = env_var_parse("RECOVERY_HISTORY_CAPACITY", s.history_capacity);

        let m = &mut self.monitor;
        m.interval_ms = env_var_parse("RECOVERY_MONITOR_INTERVAL_MS", m.interval_ms);
        m.timeout_factor = env_var_parse("RECOVERY_TIMEOUT_FACTOR", m.timeout_factor);
        m.success_scope = env_var_parse("RECOVERY_SUCCESS_SCOPE", m.success_scope);
        m.escalation_enabled = env_var_bool("RECOVERY_ESCALATION_ENABLED", m.escalation_enabled);
        m.escalation_loss_ratio =
            env_var_parse("RECOVERY_ESCALATION_LOSS_RATIO", m.escalation_loss_ratio);
        m.escalation_cooldown_secs =
            env_var_parse("RECOVERY_ESCALATION_COOLDOWN_SECS", m.escalation_cooldown_secs);

        let sub = &mut self.submission;
        sub.timeout_ms = env_var_parse("RECOVERY_SUBMIT_TIMEOUT_MS", sub.timeout_ms);
        sub.max_retries = env_var_parse("RECOVERY_SUBMIT_MAX_RETRIES", sub.max_retries);
        sub.max_slippage = env_var_parse("RECOVERY_MAX_SLIPPAGE", sub.max_slippage);

        self.retry.base_delay_ms =
            env_var_parse("RECOVERY_RETRY_BASE_DELAY_MS", self.retry.base_delay_ms);
        self.retry.max_delay_ms =
            env_var_parse("RECOVERY_RETRY_MAX_DELAY_MS", self.retry.max_delay_ms);
        self.execution.poll_interval_ms =
            env_var_parse("RECOVERY_POLL_INTERVAL_MS", self.execution.poll_interval_ms);

        let mg = &mut self.martingale;
        mg.base_multiplier = env_var_parse("MARTINGALE_BASE_MULTIPLIER", mg.base_multiplier);
        mg.max_multiplier = env_var_parse("MARTINGALE_MAX_MULTIPLIER", mg.max_multiplier);
        mg.max_recovery_levels = env_var_parse("MARTINGALE_MAX_LEVELS", mg.max_recovery_levels);
        mg.max_total_loss = env_var_parse("MARTINGALE_MAX_TOTAL_LOSS", mg.max_total_loss);
        mg.max_position_size = env_var_parse("MARTINGALE_MAX_POSITION_SIZE", mg.max_position_size);
        mg.recovery_threshold = env_var_parse("MARTINGALE_RECOVERY_THRESHOLD", mg.recovery_threshold);

        let g = &mut self.grid;
        g.base_spacing_pips = env_var_parse("GRID_BASE_SPACING_PIPS", g.base_spacing_pips);
        g.max_levels = env_var_parse("GRID_MAX_LEVELS", g.max_levels);
        g.base_volume = env_var_parse("GRID_BASE_VOLUME", g.base_volume);
        g.max_total_exposure = env_var_parse("GRID_MAX_TOTAL_EXPOSURE", g.max_total_exposure);
        g.max_drawdown_limit = env_var_parse("GRID_MAX_DRAWDOWN_LIMIT", g.max_drawdown_limit);
    }

    /// 설정값 검증
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_recoveries == 0 {
            return Err(RecoveryError::Config(
                "max_concurrent_recoveries는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(RecoveryError::Config(
                "max_attempts는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.monitor.interval_ms == 0 || self.execution.poll_interval_ms == 0 {
            return Err(RecoveryError::Config(
                "폴링 주기는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.martingale.max_position_size <= Decimal::ZERO {
            return Err(RecoveryError::Config(
                "max_position_size는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.martingale.recovery_threshold >= Decimal::ZERO {
            return Err(RecoveryError::Config(
                "recovery_threshold는 음수여야 합니다".to_string(),
            ));
        }
        if self.grid.pip_factor <= Decimal::ZERO {
            return Err(RecoveryError::Config(
                "pip_factor는 0보다 커야 합니다".to_string(),
            ));
        }
        if !positive_finite(self.submission.backoff_multiplier) {
            return Err(RecoveryError::Config(format!(
                "backoff_multiplier는 0보다 큰 유한값이어야 합니다: {}",
                self.submission.backoff_multiplier
            )));
        }
        if !positive_finite(self.monitor.timeout_factor) {
            return Err(RecoveryError::Config(format!(
                "timeout_factor는 0보다 큰 유한값이어야 합니다: {}",
                self.monitor.timeout_factor
            )));
        }
        Ok(())
    }
}

impl MonitorConfig {
    /// 폴링 주기를 Duration으로 반환
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// 재진입 대기 시간을 Duration으로 반환
    pub fn escalation_cooldown(&self) -> Duration {
        Duration::from_secs(self.escalation_cooldown_secs)
    }
}

impl SubmissionConfig {
    /// 주문 응답 대기 한도를 Duration으로 반환
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// n번째 재전송 전 대기 시간 (표현할 수 없는 값이면 0)
    pub fn backoff(&self, retry: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(retry as i32);
        Duration::try_from_secs_f64(self.base_delay_ms as f64 / 1000.0 * multiplier)
            .unwrap_or_default()
    }
}

impl RetryConfig {
    /// `attempts`회 실패한 태스크의 다음 시도 전 대기 시간.
    ///
    /// 첫 시도(attempts = 0)는 대기하지 않습니다.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        if attempts == 0 {
            return Duration::ZERO;
        }
        let factor = 2u64.saturating_pow(attempts - 1);
        let delay = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

impl ExecutionConfig {
    /// 폴링 주기를 Duration으로 반환
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// 환경변수에서 값을 파싱 (실패 시 기본값 사용)
fn env_var_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// 환경변수에서 bool 값 파싱
fn env_var_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
