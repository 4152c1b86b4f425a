//! 복구 스케줄러 통합 테스트.
//!
//! 우선순위 순서, 동시 실행 한도, 중복 입장 거절, 시도 소진 흐름을 검증합니다.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use trader_core::{PositionSnapshot, Side};
use trader_recovery::{
    RecoveryError, RecoveryMethod, RecoveryPriority, RecoveryRequest, RecoveryScheduler,
    RecoveryStatus, SchedulerConfig,
};

// ================================================================================================
// 헬퍼 함수
// ================================================================================================

fn position(id: &str, pnl: Decimal) -> PositionSnapshot {
    PositionSnapshot {
        position_id: id.to_string(),
        symbol: "EURUSD".to_string(),
        direction: Side::Sell,
        volume: dec!(0.2),
        open_price: dec!(1.0850),
        current_price: dec!(1.0900),
        unrealized_pnl: pnl,
        open_time: Utc::now() - Duration::minutes(45),
        tag: None,
    }
}

fn request(id: &str, priority: RecoveryPriority) -> RecoveryRequest {
    RecoveryRequest::new(position(id, dec!(-100)), "손실 한도 도달", priority)
}

fn scheduler(max_concurrent: usize, max_attempts: u32) -> RecoveryScheduler {
    RecoveryScheduler::new(SchedulerConfig {
        max_concurrent_recoveries: max_concurrent,
        max_attempts,
        ..Default::default()
    })
}

// ================================================================================================
// 우선순위 / 용량
// ================================================================================================

#[test]
fn test_higher_priority_starts_first_within_capacity() {
    let mut s = scheduler(2, 3);
    let now = Utc::now();

    s.admit(request("low", RecoveryPriority::Low), now).unwrap();
    s.admit(request("high", RecoveryPriority::High), now).unwrap();
    s.admit(request("medium", RecoveryPriority::Medium), now).unwrap();

    let first = s.next(now).unwrap();
    let second = s.next(now).unwrap();
    assert_eq!(first.position_id, "high");
    assert_eq!(second.position_id, "medium");
    assert_eq!(first.status, RecoveryStatus::InProgress);

    // 한도 도달: LOW는 대기열에 남음
    assert!(s.next(now).is_none());
    assert!(matches!(
        s.check_capacity(),
        Err(RecoveryError::CapacityExceeded { active: 2, max: 2 })
    ));
    assert_eq!(s.pending_count(), 1);
    assert_eq!(s.active_recoveries(now).len(), 3);

    // 하나가 끝나면 LOW 시작
    assert!(s.retire(first.task_id, true, now));
    let third = s.next(now).unwrap();
    assert_eq!(third.position_id, "low");
}

#[test]
fn test_equal_priority_is_first_in_first_out() {
    let mut s = scheduler(5, 3);
    let now = Utc::now();

    s.admit(request("a", RecoveryPriority::High), now).unwrap();
    s.admit(request("b", RecoveryPriority::High), now).unwrap();
    s.admit(request("c", RecoveryPriority::Emergency), now + Duration::seconds(1))
        .unwrap();

    let order: Vec<String> = std::iter::from_fn(|| s.next(now))
        .map(|t| t.position_id)
        .collect();
    assert_eq!(order, vec!["c", "a", "b"]);
}

// ================================================================================================
// 중복 입장
// ================================================================================================

#[test]
fn test_duplicate_position_is_rejected_without_side_effects() {
    let mut s = scheduler(2, 3);
    let now = Utc::now();

    let task_id = s.admit(request("p-1", RecoveryPriority::Low), now).unwrap();
    let result = s.admit(request("p-1", RecoveryPriority::Emergency), now);

    assert!(matches!(
        result,
        Err(RecoveryError::DuplicateTask { ref position_id }) if position_id == "p-1"
    ));
    assert_eq!(s.pending_count(), 1);
    assert_eq!(s.get(task_id).unwrap().priority, RecoveryPriority::Low);

    // 종료 후에는 다시 입장 가능
    s.next(now).unwrap();
    s.cancel(task_id, now).unwrap();
    assert!(!s.is_recovering("p-1"));
    assert!(s.admit(request("p-1", RecoveryPriority::High), now).is_ok());
}

// ================================================================================================
// 재시도 / 소진
// ================================================================================================

#[test]
fn test_retry_until_attempts_exhausted() {
    let mut s = scheduler(2, 3);
    let now = Utc::now();
    let task_id = s.admit(request("p-1", RecoveryPriority::High), now).unwrap();

    s.next(now).unwrap();
    assert_eq!(
        s.retry(task_id, Some(RecoveryMethod::GridLevel), "주문 거부", now)
            .unwrap(),
        1
    );
    assert_eq!(s.get(task_id).unwrap().status, RecoveryStatus::Pending);

    s.next(now).unwrap();
    assert_eq!(s.retry(task_id, None, "주문 거부", now).unwrap(), 2);
    assert_eq!(
        s.get(task_id).unwrap().last_failed_method,
        Some(RecoveryMethod::GridLevel)
    );

    // attempts = 2, max = 3: 다음 실패로 소진
    s.next(now).unwrap();
    let result = s.retry(task_id, Some(RecoveryMethod::AdaptiveMultiplier), "주문 거부", now);
    assert!(matches!(
        result,
        Err(RecoveryError::AttemptsExhausted { attempts: 3, .. })
    ));

    assert!(s.active_recoveries(now).is_empty());
    assert!(s.is_idle());

    let finished = s.find(task_id).unwrap();
    assert_eq!(finished.status, RecoveryStatus::Failed);
    assert!(finished.completed_at.is_some());

    let stats = s.stats();
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.success_rate(), 0.0);
}

#[test]
fn test_pause_blocks_retry_requeue() {
    let mut s = scheduler(2, 5);
    let now = Utc::now();
    let task_id = s.admit(request("p-1", RecoveryPriority::Medium), now).unwrap();
    s.next(now).unwrap();

    s.pause(task_id, now).unwrap();
    assert_eq!(s.retry(task_id, None, "시간 초과", now).unwrap(), 1);

    // 일시정지 상태 유지, 대기열로 돌아가지 않음
    assert_eq!(s.get(task_id).unwrap().status, RecoveryStatus::Paused);
    assert_eq!(s.pending_count(), 0);
    assert!(s.next(now).is_none());

    s.resume(task_id, now).unwrap();
    assert_eq!(s.get(task_id).unwrap().status, RecoveryStatus::InProgress);
}

#[test]
fn test_history_is_pruned_after_retention() {
    let mut s = RecoveryScheduler::new(SchedulerConfig {
        history_retention_hours: 1,
        ..Default::default()
    });
    let then = Utc::now() - Duration::hours(3);
    let task_id = s.admit(request("p-1", RecoveryPriority::Low), then).unwrap();
    s.next(then).unwrap();
    s.force_complete(task_id, true, "수동 청산", then).unwrap();

    assert_eq!(s.history().count(), 1);
    assert_eq!(s.prune_history(Utc::now()), 1);
    assert!(s.find(task_id).is_none());
}
