//! 복구 진행 모니터.
//!
//! 매 틱마다 최신 포지션 스냅샷으로 활성 태스크를 평가하고,
//! 필요한 상태 변경을 `MonitorRequest`로 돌려줍니다. 모니터는 태스크를
//! 직접 수정하지 않으며, 요청은 오케스트레이터의 디스패처가 스케줄러에
//! 반영합니다.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use trader_core::PositionSnapshot;
use uuid::Uuid;

use crate::config::{MonitorConfig, SuccessScope};
use crate::task::{RecoveryStatus, RecoveryTask};

/// 모니터가 디스패처에 보내는 요청
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorRequest {
    /// 관측값 갱신
    Progress {
        task_id: Uuid,
        current_price: Decimal,
        pnl: Decimal,
    },
    /// 합산 손익이 0 이상으로 회복
    Complete { task_id: Uuid, pnl: Decimal },
    /// 손실 확대로 다음 레벨 재진입
    Escalate { task_id: Uuid, pnl: Decimal },
    /// 예상 복구 시간 초과 (경고만)
    TimedOut { task_id: Uuid, elapsed_minutes: i64 },
}

/// 태스크가 추적하는 포지션 선택.
///
/// `TrackedPositions`: 원 포지션과 태스크 태그가 붙은 포지션.
/// `Portfolio`: 열린 포지션 전체.
pub fn tracked_positions<'a>(
    scope: SuccessScope,
    task: &RecoveryTask,
    positions: &'a [PositionSnapshot],
) -> Vec<&'a PositionSnapshot> {
    match scope {
        SuccessScope::Portfolio => positions.iter().collect(),
        SuccessScope::TrackedPositions => {
            let tag = task.tag();
            positions
                .iter()
                .filter(|p| p.position_id == task.position_id || p.tag.as_deref() == Some(tag.as_str()))
                .collect()
        }
    }
}

/// 합산 미실현 손익
pub fn combined_pnl(positions: &[&PositionSnapshot]) -> Decimal {
    positions.iter().map(|p| p.unrealized_pnl).sum()
}

/// 복구 모니터
#[derive(Debug)]
pub struct RecoveryMonitor {
    config: MonitorConfig,
    max_attempts: u32,
    /// 추적 포지션 없음 경고를 이미 낸 태스크
    warned_untracked: HashSet<Uuid>,
}

impl RecoveryMonitor {
    pub fn new(config: MonitorConfig, max_attempts: u32) -> Self {
        Self {
            config,
            max_attempts,
            warned_untracked: HashSet::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// 활성 태스크 평가.
    pub fn evaluate(
        &mut self,
        tasks: &[RecoveryTask],
        positions: &[PositionSnapshot],
        now: DateTime<Utc>,
    ) -> Vec<MonitorRequest> {
        let mut requests = Vec::new();

        for task in tasks {
            if task.status.is_terminal() || task.status == RecoveryStatus::Pending {
                continue;
            }

            let tracked = tracked_positions(self.config.success_scope, task, positions);
            if tracked.is_empty() {
                if self.warned_untracked.insert(task.task_id) {
                    warn!(
                        task_id = %task.task_id,
                        position_id = %task.position_id,
                        attempt = task.recovery_attempts,
                        method = %task.method_label(),
                        "추적 포지션 없음, 태스크 유지"
                    );
                }
                continue;
            }
            self.warned_untracked.remove(&task.task_id);

            let pnl = combined_pnl(&tracked);
            let current_price = tracked
                .iter()
                .find(|p| p.symbol == task.original.symbol)
                .map(|p| p.current_price)
                .unwrap_or(task.current_price);

            requests.push(MonitorRequest::Progress {
                task_id: task.task_id,
                current_price,
                pnl,
            });

            if pnl >= Decimal::ZERO {
                info!(
                    task_id = %task.task_id,
                    attempt = task.recovery_attempts,
                    method = %task.method_label(),
                    pnl = %pnl,
                    positions = tracked.len(),
                    "합산 손익 회복"
                );
                requests.push(MonitorRequest::Complete {
                    task_id: task.task_id,
                    pnl,
                });
                continue;
            }

            if self.should_escalate(task, pnl, now) {
                requests.push(MonitorRequest::Escalate {
                    task_id: task.task_id,
                    pnl,
                });
            }

            if let Some(elapsed_minutes) = self.timed_out(task, now) {
                warn!(
                    task_id = %task.task_id,
                    attempt = task.recovery_attempts,
                    method = %task.method_label(),
                    loss = %pnl,
                    elapsed_minutes = elapsed_minutes,
                    expected_minutes = task.expected_recovery_minutes.unwrap_or_default(),
                    "예상 복구 시간 초과"
                );
                requests.push(MonitorRequest::TimedOut {
                    task_id: task.task_id,
                    elapsed_minutes,
                });
            }
        }

        requests
    }

    /// 더 이상 활성이 아닌 태스크의 경고 기록 정리
    pub fn retain_active(&mut self, tasks: &[RecoveryTask]) {
        self.warned_untracked
            .retain(|id| tasks.iter().any(|t| t.task_id == *id));
    }

    fn should_escalate(&self, task: &RecoveryTask, pnl: Decimal, now: DateTime<Utc>) -> bool {
        if !self.config.escalation_enabled || task.status != RecoveryStatus::InProgress {
            return false;
        }
        // 워커가 사이징/전송 중인 시도는 건드리지 않음
        if task.awaiting_submission {
            return false;
        }
        if task.recovery_attempts + 1 >= self.max_attempts {
            return false;
        }

        let Some(last_submission) = task.last_submission_at else {
            return false;
        };
        let cooldown = chrono::Duration::seconds(self.config.escalation_cooldown_secs as i64);
        if now - last_submission < cooldown {
            return false;
        }

        let trigger_loss = task.trigger_pnl.abs();
        let escalate = pnl.abs() > trigger_loss * self.config.escalation_loss_ratio;
        if escalate {
            debug!(
                task_id = %task.task_id,
                loss = %pnl,
                trigger_loss = %trigger_loss,
                "재진입 조건 충족"
            );
        }
        escalate
    }

    /// 타임아웃이면 경과 시간(분) 반환. 태스크당 한 번만.
    fn timed_out(&self, task: &RecoveryTask, now: DateTime<Utc>) -> Option<i64> {
        if task.timed_out {
            return None;
        }
        let expected = task.expected_recovery_minutes?;
        let elapsed = task.elapsed(now);
        let limit_secs = expected * 60.0 * self.config.timeout_factor;

        if elapsed.num_milliseconds() as f64 / 1000.0 > limit_secs {
            Some(elapsed.num_minutes())
        } else {
            None
        }
    }
}
