//! 복구 태스크 스케줄러.
//!
//! 대기열, 활성 집합, 완료 이력을 단독으로 소유합니다. 모든 구조 변경
//! (입장, 꺼내기, 재시도 재진입, 종료)은 이 타입의 메서드로만 일어나며,
//! 오케스트레이터는 이 타입을 하나의 뮤텍스 안에 둡니다.
//!
//! 불변 조건:
//! - 같은 `position_id`는 대기열과 활성 집합을 통틀어 최대 한 번만 존재
//! - 활성 태스크 수는 `max_concurrent_recoveries`를 넘지 않음
//! - 종료된 태스크는 대기열에 다시 들어가지 않음

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{RecoveryError, Result};
use crate::stats::RecoveryStats;
use crate::task::{
    ActiveRecovery, RecoveryMethod, RecoveryRequest, RecoveryStatus, RecoveryTask, TaskEvent,
};

/// 대기열 정렬 키: 우선순위 내림차순, 생성 시각 오름차순, 입장 순번 오름차순.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<crate::task::RecoveryPriority>,
    created_at: DateTime<Utc>,
    sequence: u64,
}

impl QueueKey {
    fn of(task: &RecoveryTask) -> Self {
        Self {
            priority: Reverse(task.priority),
            created_at: task.created_at,
            sequence: task.sequence,
        }
    }
}

/// 복구 스케줄러
#[derive(Debug)]
pub struct RecoveryScheduler {
    config: SchedulerConfig,
    pending: BTreeMap<QueueKey, RecoveryTask>,
    active: HashMap<Uuid, RecoveryTask>,
    /// position_id → task_id (대기 + 활성)
    positions: HashMap<String, Uuid>,
    history: VecDeque<RecoveryTask>,
    stats: RecoveryStats,
    next_sequence: u64,
}

impl RecoveryScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            pending: BTreeMap::new(),
            active: HashMap::new(),
            positions: HashMap::new(),
            history: VecDeque::new(),
            stats: RecoveryStats::new(),
            next_sequence: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // =========================================================================
    // 입장 / 꺼내기
    // =========================================================================

    /// 새 복구 태스크 입장.
    ///
    /// 같은 포지션을 대상으로 하는 대기/활성 태스크가 있으면 아무것도
    /// 바꾸지 않고 `DuplicateTask`를 반환합니다. 용량과 무관하게 대기열에는
    /// 항상 들어갑니다.
    pub fn admit(&mut self, request: RecoveryRequest, now: DateTime<Utc>) -> Result<Uuid> {
        let position_id = request.position.position_id.clone();
        if self.positions.contains_key(&position_id) {
            debug!(position_id = %position_id, "중복 복구 요청 거절");
            return Err(RecoveryError::DuplicateTask { position_id });
        }

        self.next_sequence += 1;
        let task = RecoveryTask::from_request(request, self.next_sequence, now);
        let task_id = task.task_id;

        info!(
            task_id = %task_id,
            position_id = %task.position_id,
            priority = %task.priority,
            reason = %task.trigger_reason,
            loss = %task.trigger_pnl,
            "복구 태스크 입장"
        );

        self.positions.insert(position_id, task_id);
        self.pending.insert(QueueKey::of(&task), task);
        Ok(task_id)
    }

    /// 용량 확인.
    pub fn check_capacity(&self) -> Result<()> {
        let max = self.config.max_concurrent_recoveries;
        if self.active.len() >= max {
            return Err(RecoveryError::CapacityExceeded {
                active: self.active.len(),
                max,
            });
        }
        Ok(())
    }

    /// 다음 실행할 태스크를 꺼내 `InProgress`로 전환.
    ///
    /// 활성 태스크 수가 한도에 도달했으면 `None`.
    pub fn next(&mut self, now: DateTime<Utc>) -> Option<RecoveryTask> {
        if let Err(e) = self.check_capacity() {
            if !self.pending.is_empty() {
                debug!(pending = self.pending.len(), "{}", e);
            }
            return None;
        }

        let (_, mut task) = self.pending.pop_first()?;
        if let Err(e) = task.apply(TaskEvent::Start, now) {
            // 대기열에는 Pending 태스크만 존재
            error!(task_id = %task.task_id, error = %e, "대기열 태스크 상태 불일치");
            self.positions.remove(&task.position_id);
            return None;
        }

        info!(
            task_id = %task.task_id,
            attempt = task.recovery_attempts,
            method = %task.method_label(),
            priority = %task.priority,
            loss = %task.last_pnl,
            "복구 시작"
        );

        task.awaiting_submission = true;
        let snapshot = task.clone();
        self.active.insert(task.task_id, task);
        Some(snapshot)
    }

    // =========================================================================
    // 진행 기록
    // =========================================================================

    /// 주문 전송 성공 기록.
    pub fn record_submission(
        &mut self,
        task_id: Uuid,
        method: RecoveryMethod,
        order_ids: Vec<String>,
        volume: Decimal,
        expected_recovery_minutes: f64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = self
            .active
            .get_mut(&task_id)
            .ok_or(RecoveryError::TaskNotFound(task_id))?;

        task.recovery_method = Some(method);
        task.recovery_orders.extend(order_ids);
        task.total_recovery_volume += volume;
        task.expected_recovery_minutes = Some(expected_recovery_minutes);
        task.last_submission_at = Some(now);
        task.last_update_at = now;
        task.awaiting_submission = false;

        info!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %method,
            volume = %volume,
            orders = task.recovery_orders.len(),
            loss = %task.last_pnl,
            "복구 주문 전송 완료"
        );
        Ok(())
    }

    /// 활성 집합을 떠난 태스크에 늦게 접수된 주문 기록.
    ///
    /// 워커가 전송하는 사이 태스크가 종료되거나 대기열로 돌아간 경우입니다.
    /// 태스크를 찾으면 true.
    pub fn attach_late_orders(
        &mut self,
        task_id: Uuid,
        order_ids: &[String],
        volume: Decimal,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(task) = self
            .pending
            .values_mut()
            .chain(self.history.iter_mut())
            .find(|t| t.task_id == task_id)
        else {
            return false;
        };

        task.recovery_orders.extend(order_ids.iter().cloned());
        task.total_recovery_volume += volume;
        task.last_update_at = now;
        task.add_note(format!("활성 종료 후 접수된 주문 {}건", order_ids.len()));
        true
    }

    /// 모니터 관측값 반영.
    pub fn update_progress(
        &mut self,
        task_id: Uuid,
        current_price: Decimal,
        pnl: Decimal,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let task = self
            .active
            .get_mut(&task_id)
            .ok_or(RecoveryError::TaskNotFound(task_id))?;
        task.current_price = current_price;
        task.last_pnl = pnl;
        task.last_update_at = now;
        Ok(())
    }

    /// 타임아웃 표시. 처음 표시될 때만 true.
    pub fn mark_timed_out(&mut self, task_id: Uuid) -> bool {
        match self.active.get_mut(&task_id) {
            Some(task) if !task.timed_out => {
                task.timed_out = true;
                task.add_note("예상 복구 시간 초과");
                true
            }
            _ => false,
        }
    }

    // =========================================================================
    // 재시도 / 재진입
    // =========================================================================

    /// 실패한 시도 처리.
    ///
    /// 시도 횟수를 늘리고, 한도 미만이면 대기열에 다시 넣습니다.
    /// 한도에 도달하면 `Failed`로 종료하고 `AttemptsExhausted`를 반환합니다.
    /// 일시정지 중인 태스크는 횟수만 늘리고 그대로 둡니다.
    pub fn retry(
        &mut self,
        task_id: Uuid,
        failed_method: Option<RecoveryMethod>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<u32> {
        let mut task = self
            .active
            .remove(&task_id)
            .ok_or(RecoveryError::TaskNotFound(task_id))?;

        task.recovery_attempts += 1;
        if failed_method.is_some() {
            task.last_failed_method = failed_method;
        }
        task.add_note(format!("시도 {} 실패: {}", task.recovery_attempts, reason));
        let attempts = task.recovery_attempts;

        if attempts >= self.config.max_attempts {
            task.apply(TaskEvent::Fail, now)?;
            error!(
                task_id = %task_id,
                attempt = attempts,
                method = %task.method_label(),
                loss = %task.last_pnl,
                reason = reason,
                "복구 시도 소진, 운영자 확인 필요"
            );
            self.finish(task, false, now);
            return Err(RecoveryError::AttemptsExhausted { task_id, attempts });
        }

        if task.status == RecoveryStatus::Paused {
            warn!(
                task_id = %task_id,
                attempt = attempts,
                method = %task.method_label(),
                reason = reason,
                "일시정지 중 시도 실패, 재개 대기"
            );
            self.active.insert(task_id, task);
            return Ok(attempts);
        }

        if let Err(e) = task.apply(TaskEvent::Retry, now) {
            self.active.insert(task_id, task);
            return Err(e);
        }

        warn!(
            task_id = %task_id,
            attempt = attempts,
            method = %task.method_label(),
            loss = %task.last_pnl,
            reason = reason,
            "복구 재시도 대기열 진입"
        );
        self.pending.insert(QueueKey::of(&task), task);
        Ok(attempts)
    }

    /// 손실 확대에 따른 다음 레벨 재진입.
    ///
    /// 재진입 후 시도 횟수가 한도에 닿으면 건너뛰고 false를 반환합니다.
    /// 주문 전송을 기다리는 태스크는 `SubmissionInFlight`로 거절합니다.
    /// 현재 방식은 유지됩니다.
    pub fn escalate(&mut self, task_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        let task = self
            .active
            .get(&task_id)
            .ok_or(RecoveryError::TaskNotFound(task_id))?;

        if task.status != RecoveryStatus::InProgress {
            return Ok(false);
        }
        if task.awaiting_submission {
            return Err(RecoveryError::SubmissionInFlight(task_id));
        }
        if task.recovery_attempts + 1 >= self.config.max_attempts {
            debug!(task_id = %task_id, attempt = task.recovery_attempts, "재진입 한도, 건너뜀");
            return Ok(false);
        }

        let mut task = match self.active.remove(&task_id) {
            Some(task) => task,
            None => return Err(RecoveryError::TaskNotFound(task_id)),
        };
        task.apply(TaskEvent::Escalate, now)?;
        task.recovery_attempts += 1;
        task.add_note(format!("손실 확대로 레벨 {} 재진입", task.recovery_attempts));

        warn!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %task.method_label(),
            loss = %task.last_pnl,
            trigger_loss = %task.trigger_pnl,
            "손실 확대, 다음 복구 레벨 재진입"
        );
        self.pending.insert(QueueKey::of(&task), task);
        Ok(true)
    }

    // =========================================================================
    // 운영자 제어
    // =========================================================================

    /// 활성 태스크 일시정지.
    pub fn pause(&mut self, task_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let task = self.find_mut(task_id)?;
        task.apply(TaskEvent::Pause, now)?;
        info!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %task.method_label(),
            loss = %task.last_pnl,
            "복구 일시정지"
        );
        Ok(())
    }

    /// 일시정지 해제.
    pub fn resume(&mut self, task_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        let task = self.find_mut(task_id)?;
        task.apply(TaskEvent::Resume, now)?;
        info!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %task.method_label(),
            loss = %task.last_pnl,
            "복구 재개"
        );
        Ok(())
    }

    /// 진행 중인 모든 활성 태스크 일시정지. 전환된 수 반환.
    pub fn pause_all(&mut self, now: DateTime<Utc>) -> usize {
        let mut paused = 0;
        for task in self.active.values_mut() {
            if task.status == RecoveryStatus::InProgress && task.apply(TaskEvent::Pause, now).is_ok()
            {
                paused += 1;
            }
        }
        if paused > 0 {
            warn!(paused = paused, "모든 활성 복구 일시정지");
        }
        paused
    }

    /// 태스크 강제 종료.
    ///
    /// 대기 또는 활성 태스크를 `Completed`(success) 또는 `Failed`로 종료하고
    /// 이력으로 옮깁니다.
    pub fn force_complete(
        &mut self,
        task_id: Uuid,
        success: bool,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<RecoveryTask> {
        let event = if success {
            TaskEvent::Complete
        } else {
            TaskEvent::Fail
        };

        let mut task = self.take(task_id)?;
        if let Err(e) = task.apply(event, now) {
            self.restore(task);
            return Err(e);
        }
        task.add_note(note);

        info!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %task.method_label(),
            loss = %task.last_pnl,
            success = success,
            note = note,
            "복구 종료"
        );

        let finished = task.clone();
        self.finish(task, success, now);
        Ok(finished)
    }

    /// 운영자 취소 (`Failed`).
    pub fn cancel(&mut self, task_id: Uuid, now: DateTime<Utc>) -> Result<RecoveryTask> {
        self.force_complete(task_id, false, "운영자 취소", now)
    }

    /// 활성 태스크를 종료하고 이력으로 이동. 대상이 없거나 전이가 불가하면 false.
    pub fn retire(&mut self, task_id: Uuid, success: bool, now: DateTime<Utc>) -> bool {
        let note = if success { "복구 성공" } else { "복구 실패" };
        self.force_complete(task_id, success, note, now).is_ok()
    }

    // =========================================================================
    // 조회
    // =========================================================================

    pub fn get(&self, task_id: Uuid) -> Option<&RecoveryTask> {
        self.active
            .get(&task_id)
            .or_else(|| self.pending.values().find(|t| t.task_id == task_id))
    }

    /// 이력 포함 조회.
    pub fn find(&self, task_id: Uuid) -> Option<&RecoveryTask> {
        self.get(task_id)
            .or_else(|| self.history.iter().find(|t| t.task_id == task_id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.active.is_empty()
    }

    /// 해당 포지션이 복구 중인지 여부.
    pub fn is_recovering(&self, position_id: &str) -> bool {
        self.positions.contains_key(position_id)
    }

    /// 활성 태스크 복사본.
    pub fn active_snapshot(&self) -> Vec<RecoveryTask> {
        let mut tasks: Vec<RecoveryTask> = self.active.values().cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    /// 대기 + 활성 태스크 요약 (생성 순).
    pub fn active_recoveries(&self, now: DateTime<Utc>) -> Vec<ActiveRecovery> {
        let mut tasks: Vec<&RecoveryTask> =
            self.active.values().chain(self.pending.values()).collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
            .into_iter()
            .map(|t| ActiveRecovery::from_task(t, now))
            .collect()
    }

    pub fn history(&self) -> impl Iterator<Item = &RecoveryTask> {
        self.history.iter()
    }

    pub fn stats(&self) -> &RecoveryStats {
        &self.stats
    }

    /// 보존 기간이 지난 이력 제거.
    pub fn prune_history(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::hours(self.config.history_retention_hours);
        let before = self.history.len();
        self.history
            .retain(|t| t.completed_at.map(|at| at >= cutoff).unwrap_or(true));
        while self.history.len() > self.config.history_capacity {
            self.history.pop_front();
        }
        before - self.history.len()
    }

    // =========================================================================
    // 내부
    // =========================================================================

    fn find_mut(&mut self, task_id: Uuid) -> Result<&mut RecoveryTask> {
        if self.active.contains_key(&task_id) {
            return self
                .active
                .get_mut(&task_id)
                .ok_or(RecoveryError::TaskNotFound(task_id));
        }
        self.pending
            .values_mut()
            .find(|t| t.task_id == task_id)
            .ok_or(RecoveryError::TaskNotFound(task_id))
    }

    /// 대기열 또는 활성 집합에서 꺼냄 (위치 인덱스는 유지).
    fn take(&mut self, task_id: Uuid) -> Result<RecoveryTask> {
        if let Some(task) = self.active.remove(&task_id) {
            return Ok(task);
        }
        let key = self
            .pending
            .iter()
            .find(|(_, t)| t.task_id == task_id)
            .map(|(k, _)| *k)
            .ok_or(RecoveryError::TaskNotFound(task_id))?;
        self.pending
            .remove(&key)
            .ok_or(RecoveryError::TaskNotFound(task_id))
    }

    fn restore(&mut self, task: RecoveryTask) {
        if task.status == RecoveryStatus::Pending {
            self.pending.insert(QueueKey::of(&task), task);
        } else {
            self.active.insert(task.task_id, task);
        }
    }

    /// 종료 태스크를 통계와 이력에 반영.
    fn finish(&mut self, task: RecoveryTask, success: bool, now: DateTime<Utc>) {
        self.positions.remove(&task.position_id);

        let duration = task.elapsed(now).to_std().unwrap_or(Duration::ZERO);
        self.stats
            .record(task.recovery_method, success, task.last_pnl, duration, now);

        self.history.push_back(task);
        self.prune_history(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::RecoveryPriority;
    use rust_decimal_macros::dec;
    use trader_core::{PositionSnapshot, Side};

    fn request(position_id: &str, priority: RecoveryPriority) -> RecoveryRequest {
        let position = PositionSnapshot {
            position_id: position_id.to_string(),
            symbol: "XAUUSD".to_string(),
            direction: Side::Buy,
            volume: dec!(0.1),
            open_price: dec!(2000),
            current_price: dec!(1990),
            unrealized_pnl: dec!(-100),
            open_time: Utc::now(),
            tag: None,
        };
        RecoveryRequest::new(position, "test", priority)
    }

    fn scheduler(max_concurrent: usize) -> RecoveryScheduler {
        RecoveryScheduler::new(SchedulerConfig {
            max_concurrent_recoveries: max_concurrent,
            ..Default::default()
        })
    }

    #[test]
    fn test_duplicate_position_is_rejected_without_mutation() {
        let mut s = scheduler(5);
        let now = Utc::now();
        s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();

        let result = s.admit(request("p-1", RecoveryPriority::High), now);
        assert!(matches!(result, Err(RecoveryError::DuplicateTask { .. })));
        assert_eq!(s.pending_count(), 1);

        // 활성 상태에서도 중복 거절
        s.next(now).unwrap();
        assert!(s.admit(request("p-1", RecoveryPriority::Low), now).is_err());
    }

    #[test]
    fn test_next_respects_capacity() {
        let mut s = scheduler(1);
        let now = Utc::now();
        s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.admit(request("p-2", RecoveryPriority::Low), now).unwrap();

        assert!(s.next(now).is_some());
        assert!(s.next(now).is_none());
        assert!(matches!(
            s.check_capacity(),
            Err(RecoveryError::CapacityExceeded { active: 1, max: 1 })
        ));
        assert_eq!(s.pending_count(), 1);
    }

    #[test]
    fn test_fifo_within_priority() {
        let mut s = scheduler(5);
        let t0 = Utc::now();
        let first = s.admit(request("p-1", RecoveryPriority::Medium), t0).unwrap();
        let second = s
            .admit(request("p-2", RecoveryPriority::Medium), t0 + chrono::Duration::seconds(1))
            .unwrap();

        assert_eq!(s.next(t0).unwrap().task_id, first);
        assert_eq!(s.next(t0).unwrap().task_id, second);
    }

    #[test]
    fn test_retry_requeues_and_rotates() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.next(now).unwrap();

        let attempts = s
            .retry(id, Some(RecoveryMethod::GridLevel), "venue rejected", now)
            .unwrap();
        assert_eq!(attempts, 1);
        assert_eq!(s.pending_count(), 1);
        assert_eq!(s.active_count(), 0);

        let task = s.next(now).unwrap();
        assert_eq!(task.recovery_attempts, 1);
        assert_eq!(task.last_failed_method, Some(RecoveryMethod::GridLevel));
    }

    #[test]
    fn test_retry_exhaustion_fails_task() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();

        for _ in 0..2 {
            s.next(now).unwrap();
            s.retry(id, None, "timeout", now).unwrap();
        }
        s.next(now).unwrap();
        let result = s.retry(id, None, "timeout", now);

        assert!(matches!(
            result,
            Err(RecoveryError::AttemptsExhausted { attempts: 3, .. })
        ));
        assert!(s.is_idle());
        assert!(!s.is_recovering("p-1"));
        assert_eq!(s.find(id).unwrap().status, RecoveryStatus::Failed);
        assert_eq!(s.stats().failed, 1);
    }

    #[test]
    fn test_pause_resume_and_pause_all() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let a = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        let b = s.admit(request("p-2", RecoveryPriority::Low), now).unwrap();

        // 대기 중 태스크는 일시정지 불가
        assert!(matches!(
            s.pause(a, now),
            Err(RecoveryError::InvalidTransition { .. })
        ));

        s.next(now).unwrap();
        s.next(now).unwrap();
        s.pause(a, now).unwrap();
        assert_eq!(s.get(a).unwrap().status, RecoveryStatus::Paused);
        s.resume(a, now).unwrap();

        assert_eq!(s.pause_all(now), 2);
        assert_eq!(s.get(b).unwrap().status, RecoveryStatus::Paused);
    }

    #[test]
    fn test_escalate_keeps_method_and_respects_limit() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.next(now).unwrap();
        s.record_submission(id, RecoveryMethod::AdaptiveMultiplier, vec!["o-1".into()], dec!(0.2), 60.0, now)
            .unwrap();

        assert!(s.escalate(id, now).unwrap());
        let task = s.next(now).unwrap();
        assert_eq!(task.recovery_attempts, 1);
        assert_eq!(task.recovery_method, Some(RecoveryMethod::AdaptiveMultiplier));

        // attempts + 1 == max_attempts 이면 건너뜀
        s.retry(id, None, "x", now).unwrap();
        s.next(now).unwrap();
        s.record_submission(id, RecoveryMethod::AdaptiveMultiplier, vec!["o-2".into()], dec!(0.3), 60.0, now)
            .unwrap();
        assert!(!s.escalate(id, now).unwrap());
        assert_eq!(s.get(id).unwrap().status, RecoveryStatus::InProgress);
    }

    #[test]
    fn test_escalate_refuses_task_awaiting_submission() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.next(now).unwrap();
        s.record_submission(id, RecoveryMethod::AdaptiveMultiplier, vec!["o-1".into()], dec!(0.2), 60.0, now)
            .unwrap();

        // 실패 후 재시도: 이전 전송 시각이 남아 있어도 전송 전에는 재진입 불가
        s.retry(id, Some(RecoveryMethod::GridLevel), "level rejected", now)
            .unwrap();
        let task = s.next(now).unwrap();
        assert!(task.awaiting_submission);
        assert!(task.last_submission_at.is_some());

        assert!(matches!(
            s.escalate(id, now),
            Err(RecoveryError::SubmissionInFlight(_))
        ));
        assert_eq!(s.get(id).unwrap().status, RecoveryStatus::InProgress);
        assert_eq!(s.get(id).unwrap().recovery_attempts, 1);

        // 워커 결과가 그대로 반영됨
        s.record_submission(id, RecoveryMethod::AdaptiveMultiplier, vec!["o-2".into()], dec!(0.3), 60.0, now)
            .unwrap();
        let task = s.get(id).unwrap();
        assert_eq!(task.recovery_orders, vec!["o-1".to_string(), "o-2".to_string()]);
        assert_eq!(task.total_recovery_volume, dec!(0.5));
    }

    #[test]
    fn test_late_orders_attach_to_finished_task() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.next(now).unwrap();
        s.cancel(id, now).unwrap();

        let orders = vec!["o-9".to_string()];
        assert!(matches!(
            s.record_submission(id, RecoveryMethod::GridLevel, orders.clone(), dec!(0.05), 30.0, now),
            Err(RecoveryError::TaskNotFound(_))
        ));
        assert!(s.attach_late_orders(id, &orders, dec!(0.05), now));

        let task = s.find(id).unwrap();
        assert_eq!(task.status, RecoveryStatus::Failed);
        assert_eq!(task.recovery_orders, orders);
        assert_eq!(task.total_recovery_volume, dec!(0.05));
        assert!(!s.attach_late_orders(Uuid::new_v4(), &orders, dec!(0.05), now));
    }

    #[test]
    fn test_cancel_pending_task() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();

        let task = s.cancel(id, now).unwrap();
        assert_eq!(task.status, RecoveryStatus::Failed);
        assert!(s.is_idle());
        assert!(s.admit(request("p-1", RecoveryPriority::Low), now).is_ok());
    }

    #[test]
    fn test_history_retention() {
        let mut s = scheduler(5);
        let now = Utc::now();
        let id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
        s.next(now).unwrap();
        assert!(s.retire(id, true, now));
        assert_eq!(s.history().count(), 1);

        let pruned = s.prune_history(now + chrono::Duration::hours(25));
        assert_eq!(pruned, 1);
        assert_eq!(s.history().count(), 0);
    }
}
