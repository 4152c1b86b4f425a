//! 에러 타입 정의.

use thiserror::Error;
use trader_core::ProviderError;
use uuid::Uuid;

use crate::task::{RecoveryMethod, RecoveryStatus, TaskEvent};

/// 복구 오케스트레이션 에러.
///
/// `DuplicateTask`, `StrategyDeclined`, `SubmissionFailure`, `CapacityExceeded`는
/// 재시도/전략 순환으로 로컬에서 처리되는 일시적 조건이며,
/// `AttemptsExhausted`만 운영자에게 노출되는 치명적 이벤트입니다.
#[derive(Debug, Clone, Error)]
pub enum RecoveryError {
    /// 이미 복구 중인 포지션
    #[error("이미 복구 중인 포지션: {position_id}")]
    DuplicateTask { position_id: String },

    /// 사이징 전략이 현재 조건에서 제안을 거절
    #[error("전략 거절 [{method}]: {reason}")]
    StrategyDeclined {
        method: RecoveryMethod,
        reason: String,
    },

    /// 주문 전송 실패 (거부 또는 시간 초과)
    #[error("주문 전송 실패: {0}")]
    SubmissionFailure(String),

    /// 재시도 횟수 소진
    #[error("복구 시도 소진 [{task_id}]: {attempts}회")]
    AttemptsExhausted { task_id: Uuid, attempts: u32 },

    /// 동시 복구 한도 도달 (태스크는 대기열에 남음)
    #[error("동시 복구 한도 도달: {active}/{max}")]
    CapacityExceeded { active: usize, max: usize },

    /// 태스크 없음
    #[error("태스크를 찾을 수 없음: {0}")]
    TaskNotFound(Uuid),

    /// 워커가 주문을 준비/전송 중인 태스크
    #[error("주문 전송 진행 중인 태스크: {0}")]
    SubmissionInFlight(Uuid),

    /// 허용되지 않는 상태 전이
    #[error("허용되지 않는 상태 전이: {from} --{event:?}-->")]
    InvalidTransition {
        from: RecoveryStatus,
        event: TaskEvent,
    },

    /// 외부 Provider 에러
    #[error("Provider 에러: {0}")]
    Provider(#[from] ProviderError),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, RecoveryError>;
