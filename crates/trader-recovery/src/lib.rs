//! 손실 복구 오케스트레이션.
//!
//! 이 crate는 다음을 제공합니다:
//! - 우선순위 기반 복구 태스크 스케줄러와 태스크 상태 머신
//! - 시장 상태/긴급도/성과를 반영한 복구 방식 선택기
//! - 복구 사이징 전략 (적응형 배수, 그리드 레벨)
//! - 합산 손익 모니터링과 손실 확대 시 재진입
//! - 실행/모니터링 루프를 묶은 오케스트레이터와 운영자 제어 API
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_recovery::{RecoveryConfig, RecoveryOrchestrator, RecoveryPriority, RecoveryProviders};
//!
//! let providers = RecoveryProviders::from_venue(venue.clone());
//! let orchestrator = RecoveryOrchestrator::new(RecoveryConfig::from_env()?, providers)?;
//! orchestrator.start().await?;
//!
//! orchestrator
//!     .trigger_recovery(&position_id, "손실 한도 도달", RecoveryPriority::High)
//!     .await;
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod scheduler;
pub mod selector;
pub mod sizing;
pub mod stats;
pub mod submission;
pub mod task;

pub use config::{
    ExecutionConfig, GridConfig, MartingaleConfig, MonitorConfig, RecoveryConfig, RetryConfig,
    SchedulerConfig, SelectorConfig, SessionMultipliers, SubmissionConfig, SuccessScope,
};
pub use error::{RecoveryError, Result};
pub use monitor::{MonitorRequest, RecoveryMonitor};
pub use orchestrator::{RecoveryOrchestrator, RecoveryProviders};
pub use scheduler::RecoveryScheduler;
pub use selector::{
    LossAnalysis, MethodCompatibilityScore, MethodSelection, MethodSelector, UrgencyLevel,
};
pub use sizing::{
    AdaptiveMultiplierSizing, GridLevel, GridLevelSizing, RiskLevel, SizingContext,
    SizingRegistry, SizingStrategy, StrategyProposal,
};
pub use stats::{MethodReport, RecoveryStatistics, RecoveryStats};
pub use task::{
    ActiveRecovery, RecoveryMethod, RecoveryPriority, RecoveryRequest, RecoveryStatus,
    RecoveryTask, TaskEvent,
};
