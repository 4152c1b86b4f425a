//! 복구 태스크와 상태 머신.
//!
//! 태스크 하나는 손실 중인 포지션 그룹 하나에 대한 복구 작업입니다.
//! 상태 전이는 `transition` 테이블로만 결정되며, 타이밍과 무관하게
//! 단위 테스트할 수 있습니다.
//!
//! ```text
//!             Start              Complete
//!  Pending ──────────> InProgress ─────────> Completed
//!     ^                 │   ^  │
//!     │ Retry/Escalate  │   │  │ Pause
//!     └─────────────────┘   │  v
//!                           └─ Paused ──(Complete)──> Completed
//!                            Resume
//!
//!  Pending | InProgress | Paused ──Fail──> Failed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trader_core::{PositionSnapshot, Side};
use uuid::Uuid;

use crate::error::{RecoveryError, Result};

// =============================================================================
// 열거형
// =============================================================================

/// 복구 방식 (사이징 전략 종류).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMethod {
    /// 적응형 배수 ("마틴게일")
    AdaptiveMultiplier,
    /// 가격 레벨 그리드
    GridLevel,
}

impl RecoveryMethod {
    /// 모든 복구 방식 (우선 순위 동점 시 이 순서 유지)
    pub const ALL: [RecoveryMethod; 2] =
        [RecoveryMethod::AdaptiveMultiplier, RecoveryMethod::GridLevel];
}

impl fmt::Display for RecoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryMethod::AdaptiveMultiplier => write!(f, "martingale"),
            RecoveryMethod::GridLevel => write!(f, "grid"),
        }
    }
}

/// 복구 우선순위 (Low < Medium < High < Emergency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPriority {
    Low,
    Medium,
    High,
    Emergency,
}

impl fmt::Display for RecoveryPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryPriority::Low => write!(f, "low"),
            RecoveryPriority::Medium => write!(f, "medium"),
            RecoveryPriority::High => write!(f, "high"),
            RecoveryPriority::Emergency => write!(f, "emergency"),
        }
    }
}

/// 태스크 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    Pending,
    InProgress,
    Paused,
    Completed,
    Failed,
}

impl RecoveryStatus {
    /// 종료 상태 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryStatus::Completed | RecoveryStatus::Failed)
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryStatus::Pending => "PENDING",
            RecoveryStatus::InProgress => "IN_PROGRESS",
            RecoveryStatus::Paused => "PAUSED",
            RecoveryStatus::Completed => "COMPLETED",
            RecoveryStatus::Failed => "FAILED",
        };
        write!(f, "{}", name)
    }
}

/// 상태 전이 이벤트.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskEvent {
    /// 대기열에서 꺼내 실행 시작
    Start,
    /// 실패 후 재시도 (대기열 재진입)
    Retry,
    /// 손실 확대로 다음 레벨 재진입
    Escalate,
    /// 운영자 일시정지
    Pause,
    /// 운영자 재개
    Resume,
    /// 성공 완료
    Complete,
    /// 실패 종료
    Fail,
}

/// 상태 전이 테이블.
///
/// 허용되지 않는 조합은 `None`을 반환합니다.
pub fn transition(from: RecoveryStatus, event: TaskEvent) -> Option<RecoveryStatus> {
    use RecoveryStatus::*;
    use TaskEvent::*;

    match (from, event) {
        (Pending, Start) => Some(InProgress),
        (InProgress, Retry) | (InProgress, Escalate) => Some(Pending),
        (InProgress, Pause) => Some(Paused),
        (Paused, Resume) => Some(InProgress),
        (InProgress, Complete) | (Paused, Complete) => Some(Completed),
        (Pending, Fail) | (InProgress, Fail) | (Paused, Fail) => Some(Failed),
        _ => None,
    }
}

// =============================================================================
// 원 포지션 스냅샷
// =============================================================================

/// 복구 대상 원 포지션의 진입 시점 정보.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginalPosition {
    pub symbol: String,
    pub direction: Side,
    pub volume: Decimal,
    pub entry_price: Decimal,
    pub open_time: DateTime<Utc>,
}

impl From<&PositionSnapshot> for OriginalPosition {
    fn from(position: &PositionSnapshot) -> Self {
        Self {
            symbol: position.symbol.clone(),
            direction: position.direction,
            volume: position.volume,
            entry_price: position.open_price,
            open_time: position.open_time,
        }
    }
}

/// 스케줄러 입장 요청.
///
/// 태스크 자체는 스케줄러의 입장 함수에서만 생성됩니다.
#[derive(Debug, Clone)]
pub struct RecoveryRequest {
    pub position: PositionSnapshot,
    pub trigger_reason: String,
    pub priority: RecoveryPriority,
}

impl RecoveryRequest {
    pub fn new(
        position: PositionSnapshot,
        trigger_reason: impl Into<String>,
        priority: RecoveryPriority,
    ) -> Self {
        Self {
            position,
            trigger_reason: trigger_reason.into(),
            priority,
        }
    }
}

// =============================================================================
// 복구 태스크
// =============================================================================

/// 복구 태스크.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryTask {
    /// 태스크 ID (입장 시 생성)
    pub task_id: Uuid,
    /// 복구 대상 포지션 ID
    pub position_id: String,
    /// 현재 복구 방식 (첫 실행 전에는 None)
    pub recovery_method: Option<RecoveryMethod>,
    pub priority: RecoveryPriority,
    pub trigger_reason: String,
    pub original: OriginalPosition,
    pub status: RecoveryStatus,
    /// 재시도/재진입마다 1씩 증가 (감소하지 않음)
    pub recovery_attempts: u32,
    /// 지금까지 전송한 주문 ID
    pub recovery_orders: Vec<String>,
    pub total_recovery_volume: Decimal,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_update_at: DateTime<Utc>,
    pub notes: Vec<String>,
    /// 직전에 실패한 방식 (다음 시도에서 후순위로 밀림)
    pub last_failed_method: Option<RecoveryMethod>,
    /// 예상 복구 시간 (분)
    pub expected_recovery_minutes: Option<f64>,
    /// 입장 시점 미실현 손익
    pub trigger_pnl: Decimal,
    /// 최근 관측 가격
    pub current_price: Decimal,
    /// 최근 관측 미실현 손익 (추적 포지션 합계)
    pub last_pnl: Decimal,
    pub last_submission_at: Option<DateTime<Utc>>,
    /// 타임아웃 경고 발생 여부
    pub timed_out: bool,
    /// 실행 중인데 아직 이번 시도의 주문을 전송하지 않음
    #[serde(default)]
    pub awaiting_submission: bool,
    /// FIFO 동점 처리용 입장 순번
    pub(crate) sequence: u64,
}

impl RecoveryTask {
    pub(crate) fn from_request(request: RecoveryRequest, sequence: u64, now: DateTime<Utc>) -> Self {
        let position = &request.position;
        Self {
            task_id: Uuid::new_v4(),
            position_id: position.position_id.clone(),
            recovery_method: None,
            priority: request.priority,
            trigger_reason: request.trigger_reason.clone(),
            original: OriginalPosition::from(position),
            status: RecoveryStatus::Pending,
            recovery_attempts: 0,
            recovery_orders: Vec::new(),
            total_recovery_volume: Decimal::ZERO,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_update_at: now,
            notes: Vec::new(),
            last_failed_method: None,
            expected_recovery_minutes: None,
            trigger_pnl: position.unrealized_pnl,
            current_price: position.current_price,
            last_pnl: position.unrealized_pnl,
            last_submission_at: None,
            timed_out: false,
            awaiting_submission: false,
            sequence,
        }
    }

    /// 복구 깊이 (지금까지의 시도 수)
    pub fn recovery_level(&self) -> u32 {
        self.recovery_attempts
    }

    /// 이 태스크가 보내는 주문의 태그.
    pub fn tag(&self) -> String {
        format!("recovery-{}", self.task_id)
    }

    /// 상태 전이 적용.
    pub fn apply(&mut self, event: TaskEvent, now: DateTime<Utc>) -> Result<RecoveryStatus> {
        let next = transition(self.status, event).ok_or(RecoveryError::InvalidTransition {
            from: self.status,
            event,
        })?;

        match event {
            TaskEvent::Start if self.started_at.is_none() => self.started_at = Some(now),
            TaskEvent::Complete | TaskEvent::Fail => self.completed_at = Some(now),
            _ => {}
        }

        self.status = next;
        self.last_update_at = now;
        Ok(next)
    }

    /// 실행 시작 이후 경과 시간 (시작 전이면 0).
    pub fn elapsed(&self, now: DateTime<Utc>) -> chrono::Duration {
        match self.started_at {
            Some(started) => now - started,
            None => chrono::Duration::zero(),
        }
    }

    /// 로그용 방식 이름 (미정이면 "none").
    pub fn method_label(&self) -> String {
        self.recovery_method
            .map(|m| m.to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    /// 메모 추가.
    pub fn add_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

// =============================================================================
// 조회용 요약
// =============================================================================

/// 활성 복구 요약 (`get_active_recoveries` 응답 항목).
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRecovery {
    pub task_id: Uuid,
    pub position_id: String,
    pub method: Option<RecoveryMethod>,
    pub priority: RecoveryPriority,
    pub status: RecoveryStatus,
    pub unrealized_loss: Decimal,
    pub attempts: u32,
    /// 경과 시간 (초)
    pub elapsed_secs: i64,
}

impl ActiveRecovery {
    pub fn from_task(task: &RecoveryTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.task_id,
            position_id: task.position_id.clone(),
            method: task.recovery_method,
            priority: task.priority,
            status: task.status,
            unrealized_loss: task.last_pnl.min(Decimal::ZERO),
            attempts: task.recovery_attempts,
            elapsed_secs: task.elapsed(now).num_seconds(),
        }
    }
}
