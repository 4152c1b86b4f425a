//! 복구 오케스트레이터.
//!
//! 스케줄러, 방식 선택기, 사이징 전략, 모니터를 묶어 두 개의 장기 실행
//! 루프(실행 / 모니터링)를 돌리고, 운영자용 제어/조회 API를 제공합니다.
//!
//! # 아키텍처
//!
//! ```text
//!  operator API ──(scheduler mutex)──┐
//!                                    v
//!  ┌─────────────┐  job_tx   ┌──────────────┐  place_order   ┌───────────┐
//!  │ Dispatcher  │ ────────> │ Worker × N   │ ─────────────> │  Venue    │
//!  │ (scheduler  │ <──────── │ select+size  │                └───────────┘
//!  │  단독 변경) │ outcome   └──────────────┘
//!  │             │ <──────── ┌──────────────┐  fetch_positions
//!  └─────────────┘ request   │ Monitor loop │ ──────────────> positions
//!                            └──────────────┘
//! ```
//!
//! 워커 결과와 모니터 요청은 채널로 디스패처에 전달되며, 디스패처만
//! 이를 스케줄러에 반영합니다. 전역 상태는 없고 오케스트레이터 핸들을
//! 복제해서 공유합니다.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trader_core::{
    AccountProvider, MarketDataProvider, OrderExecutionProvider, PositionProvider,
    PositionSnapshot,
};
use uuid::Uuid;

use crate::config::RecoveryConfig;
use crate::error::{RecoveryError, Result};
use crate::monitor::{combined_pnl, tracked_positions, MonitorRequest, RecoveryMonitor};
use crate::scheduler::RecoveryScheduler;
use crate::selector::{estimate_recovery_minutes, estimate_success_probability, MethodSelector};
use crate::sizing::{SizingContext, SizingRegistry};
use crate::stats::RecoveryStatistics;
use crate::submission::submit_proposal;
use crate::task::{
    ActiveRecovery, RecoveryMethod, RecoveryPriority, RecoveryRequest, RecoveryStatus,
    RecoveryTask,
};

// =============================================================================
// 외부 협력자 묶음
// =============================================================================

/// 오케스트레이터가 사용하는 외부 협력자.
#[derive(Clone)]
pub struct RecoveryProviders {
    pub positions: Arc<dyn PositionProvider>,
    pub market: Arc<dyn MarketDataProvider>,
    pub account: Arc<dyn AccountProvider>,
    pub execution: Arc<dyn OrderExecutionProvider>,
}

impl RecoveryProviders {
    /// 네 가지 trait을 모두 구현한 하나의 거래소로 구성.
    pub fn from_venue<V>(venue: Arc<V>) -> Self
    where
        V: PositionProvider
            + MarketDataProvider
            + AccountProvider
            + OrderExecutionProvider
            + 'static,
    {
        Self {
            positions: venue.clone(),
            market: venue.clone(),
            account: venue.clone(),
            execution: venue,
        }
    }
}

// =============================================================================
// 루프 간 메시지
// =============================================================================

/// 워커가 디스패처에 돌려주는 시도 결과
#[derive(Debug)]
enum WorkerOutcome {
    Submitted {
        task_id: Uuid,
        method: RecoveryMethod,
        order_ids: Vec<String>,
        volume: rust_decimal::Decimal,
        expected_minutes: f64,
    },
    Failed {
        task_id: Uuid,
        method: Option<RecoveryMethod>,
        reason: String,
    },
    /// 일시정지 또는 종료로 이번 시도를 보류
    Deferred { task_id: Uuid },
}

impl WorkerOutcome {
    fn task_id(&self) -> Uuid {
        match self {
            WorkerOutcome::Submitted { task_id, .. }
            | WorkerOutcome::Failed { task_id, .. }
            | WorkerOutcome::Deferred { task_id } => *task_id,
        }
    }
}

/// 실행 중인 루프 핸들
struct RunHandle {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct Inner {
    config: RecoveryConfig,
    providers: RecoveryProviders,
    scheduler: Mutex<RecoveryScheduler>,
    selector: MethodSelector,
    sizing: SizingRegistry,
    /// 입장/재개 시 디스패처 깨우기
    wake: Notify,
    runtime: Mutex<Option<RunHandle>>,
}

// =============================================================================
// 오케스트레이터
// =============================================================================

/// 복구 오케스트레이터 핸들.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

impl RecoveryOrchestrator {
    /// 새 오케스트레이터 생성.
    pub fn new(config: RecoveryConfig, providers: RecoveryProviders) -> Result<Self> {
        config.validate()?;

        let inner = Inner {
            scheduler: Mutex::new(RecoveryScheduler::new(config.scheduler.clone())),
            selector: MethodSelector::new(config.selector.clone()),
            sizing: SizingRegistry::new(config.martingale.clone(), config.grid.clone()),
            config,
            providers,
            wake: Notify::new(),
            runtime: Mutex::new(None),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.inner.config
    }

    /// 실행/모니터링 루프 시작.
    ///
    /// 이미 실행 중이면 아무것도 하지 않습니다. `emergency_shutdown` 이후
    /// 다시 호출할 수 있으며, 일시정지된 태스크는 재개될 때까지 그대로입니다.
    pub async fn start(&self) -> Result<()> {
        let mut runtime = self.inner.runtime.lock().await;
        if runtime.is_some() {
            warn!("오케스트레이터가 이미 실행 중");
            return Ok(());
        }

        let shutdown = CancellationToken::new();
        let workers = self.inner.config.scheduler.max_concurrent_recoveries;

        let (job_tx, job_rx) = mpsc::channel::<RecoveryTask>(workers);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<WorkerOutcome>();
        let (monitor_tx, monitor_rx) = mpsc::unbounded_channel::<MonitorRequest>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(workers + 2);

        for worker_id in 0..workers {
            let inner = self.inner.clone();
            let jobs = job_rx.clone();
            let outcomes = outcome_tx.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                inner.run_worker(worker_id, jobs, outcomes, token).await;
            }));
        }
        // 디스패처는 워커가 모두 끝나면 결과 채널이 닫히는 것으로 종료를 판단
        drop(outcome_tx);

        let inner = self.inner.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            inner.run_monitor(monitor_tx, token).await;
        }));

        let inner = self.inner.clone();
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            inner
                .run_dispatcher(job_tx, outcome_rx, monitor_rx, token)
                .await;
        }));

        info!(workers = workers, "복구 오케스트레이터 시작");
        *runtime = Some(RunHandle { shutdown, handles });
        Ok(())
    }

    /// 루프 실행 여부
    pub async fn is_running(&self) -> bool {
        self.inner.runtime.lock().await.is_some()
    }

    // =========================================================================
    // 제어 API
    // =========================================================================

    /// 복구 트리거. 이미 복구 중이거나 포지션을 찾지 못하면 false.
    pub async fn trigger_recovery(
        &self,
        position_id: &str,
        trigger_reason: &str,
        priority: RecoveryPriority,
    ) -> bool {
        match self
            .admit_recovery(position_id, trigger_reason, priority)
            .await
        {
            Ok(_) => true,
            Err(RecoveryError::DuplicateTask { .. }) => false,
            Err(e) => {
                warn!(position_id = position_id, error = %e, "복구 트리거 실패");
                false
            }
        }
    }

    /// 복구 태스크 입장 (태스크 ID 반환).
    pub async fn admit_recovery(
        &self,
        position_id: &str,
        trigger_reason: &str,
        priority: RecoveryPriority,
    ) -> Result<Uuid> {
        if self.inner.scheduler.lock().await.is_recovering(position_id) {
            return Err(RecoveryError::DuplicateTask {
                position_id: position_id.to_string(),
            });
        }

        let position = self
            .inner
            .providers
            .positions
            .fetch_position(position_id)
            .await?;
        self.admit_position(position, trigger_reason, priority).await
    }

    /// 이미 조회한 포지션 스냅샷으로 입장.
    pub async fn admit_position(
        &self,
        position: PositionSnapshot,
        trigger_reason: &str,
        priority: RecoveryPriority,
    ) -> Result<Uuid> {
        let request = RecoveryRequest::new(position, trigger_reason, priority);
        let task_id = self
            .inner
            .scheduler
            .lock()
            .await
            .admit(request, Utc::now())?;
        self.inner.wake.notify_one();
        Ok(task_id)
    }

    /// 대기 + 활성 복구 목록
    pub async fn get_active_recoveries(&self) -> Vec<ActiveRecovery> {
        self.inner
            .scheduler
            .lock()
            .await
            .active_recoveries(Utc::now())
    }

    /// 복구 통계
    pub async fn get_recovery_statistics(&self) -> RecoveryStatistics {
        let available = self.inner.sizing.available();
        self.inner.scheduler.lock().await.stats().report(available)
    }

    /// 태스크 조회 (종료 이력 포함)
    pub async fn task(&self, task_id: Uuid) -> Option<RecoveryTask> {
        self.inner.scheduler.lock().await.find(task_id).cloned()
    }

    /// 활성 태스크 일시정지. 모니터 관측은 계속됩니다.
    pub async fn pause(&self, task_id: Uuid) -> Result<()> {
        self.inner
            .scheduler
            .lock()
            .await
            .pause(task_id, Utc::now())
    }

    /// 일시정지 해제.
    pub async fn resume(&self, task_id: Uuid) -> Result<()> {
        self.inner
            .scheduler
            .lock()
            .await
            .resume(task_id, Utc::now())?;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// 강제 종료 (`success`면 Completed, 아니면 Failed).
    pub async fn force_complete(&self, task_id: Uuid, success: bool) -> Result<()> {
        let note = if success {
            "운영자 강제 완료"
        } else {
            "운영자 강제 실패"
        };
        self.inner
            .scheduler
            .lock()
            .await
            .force_complete(task_id, success, note, Utc::now())?;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// 대기/활성 태스크 취소 (`Failed`).
    pub async fn cancel(&self, task_id: Uuid) -> Result<()> {
        self.inner
            .scheduler
            .lock()
            .await
            .cancel(task_id, Utc::now())?;
        self.inner.wake.notify_one();
        Ok(())
    }

    /// 긴급 정지.
    ///
    /// 모든 활성 태스크를 `Paused`로 바꾸고 두 루프를 멈춥니다.
    /// 태스크 상태는 보존되므로 `start`로 다시 시작할 수 있습니다.
    pub async fn emergency_shutdown(&self) -> usize {
        let paused = self.inner.scheduler.lock().await.pause_all(Utc::now());
        error!(paused = paused, "긴급 정지");
        self.stop_loops().await;
        paused
    }

    /// 정상 종료 (태스크 상태 변경 없음).
    pub async fn shutdown(&self) {
        self.stop_loops().await;
        self.inner.scheduler.lock().await.stats().log_summary();
    }

    async fn stop_loops(&self) {
        let runtime = self.inner.runtime.lock().await.take();
        let Some(runtime) = runtime else {
            return;
        };

        runtime.shutdown.cancel();
        for handle in runtime.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "루프 종료 중 에러");
            }
        }
        info!("복구 오케스트레이터 정지");
    }
}

// =============================================================================
// 루프
// =============================================================================

impl Inner {
    /// 실행 루프의 디스패처.
    ///
    /// 스케줄러에서 태스크를 꺼내 워커에 넘기고, 워커 결과와 모니터 요청을
    /// 스케줄러에 반영합니다.
    async fn run_dispatcher(
        self: Arc<Self>,
        job_tx: mpsc::Sender<RecoveryTask>,
        mut outcome_rx: mpsc::UnboundedReceiver<WorkerOutcome>,
        mut monitor_rx: mpsc::UnboundedReceiver<MonitorRequest>,
        shutdown: CancellationToken,
    ) {
        let mut in_flight: HashSet<Uuid> = HashSet::new();
        let mut poll = tokio::time::interval(self.config.execution.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(outcome) = outcome_rx.recv() => {
                    in_flight.remove(&outcome.task_id());
                    self.apply_outcome(outcome).await;
                }

                Some(request) = monitor_rx.recv() => {
                    self.apply_monitor_request(request, &in_flight).await;
                }

                _ = self.wake.notified() => {}

                _ = poll.tick() => {
                    self.scheduler.lock().await.prune_history(Utc::now());
                }
            }

            self.dispatch_ready(&job_tx, &mut in_flight).await;
        }

        // 진행 중인 시도 결과는 워커가 모두 끝날 때까지 반영
        drop(job_tx);
        while let Some(outcome) = outcome_rx.recv().await {
            self.apply_outcome(outcome).await;
        }
        debug!("디스패처 종료");
    }

    /// 용량 안에서 대기 태스크를 꺼내고, 주문 전송이 필요한 활성 태스크를
    /// 워커에 넘깁니다.
    async fn dispatch_ready(
        &self,
        job_tx: &mpsc::Sender<RecoveryTask>,
        in_flight: &mut HashSet<Uuid>,
    ) {
        let jobs: Vec<RecoveryTask> = {
            let mut scheduler = self.scheduler.lock().await;
            let now = Utc::now();
            while scheduler.next(now).is_some() {}

            scheduler
                .active_snapshot()
                .into_iter()
                .filter(|t| {
                    t.status == RecoveryStatus::InProgress
                        && t.awaiting_submission
                        && !in_flight.contains(&t.task_id)
                })
                .collect()
        };

        for task in jobs {
            let task_id = task.task_id;
            in_flight.insert(task_id);
            if job_tx.send(task).await.is_err() {
                in_flight.remove(&task_id);
                warn!(task_id = %task_id, "워커 채널 닫힘");
                break;
            }
        }
    }

    async fn apply_outcome(&self, outcome: WorkerOutcome) {
        let now = Utc::now();
        let mut scheduler = self.scheduler.lock().await;

        let result = match outcome {
            WorkerOutcome::Submitted {
                task_id,
                method,
                order_ids,
                volume,
                expected_minutes,
            } => match scheduler.record_submission(
                task_id,
                method,
                order_ids.clone(),
                volume,
                expected_minutes,
                now,
            ) {
                Err(RecoveryError::TaskNotFound(_)) => {
                    // 거래소가 이미 접수한 주문은 버리지 않음
                    let attached = scheduler.attach_late_orders(task_id, &order_ids, volume, now);
                    warn!(
                        task_id = %task_id,
                        method = %method,
                        orders = ?order_ids,
                        volume = %volume,
                        attached = attached,
                        "활성 종료 후 주문 접수, 운영자 확인 필요"
                    );
                    Ok(())
                }
                other => other,
            },
            WorkerOutcome::Failed {
                task_id,
                method,
                reason,
            } => scheduler.retry(task_id, method, &reason, now).map(|_| ()),
            WorkerOutcome::Deferred { .. } => Ok(()),
        };

        match result {
            Ok(()) => {}
            Err(e @ RecoveryError::AttemptsExhausted { .. }) => {
                error!(error = %e, "복구 실패 확정");
            }
            Err(RecoveryError::TaskNotFound(task_id)) => {
                // 시도 중에 취소/완료된 태스크
                debug!(task_id = %task_id, "종료된 태스크의 시도 결과 무시");
            }
            Err(e) => warn!(error = %e, "시도 결과 반영 실패"),
        }
    }

    async fn apply_monitor_request(&self, request: MonitorRequest, in_flight: &HashSet<Uuid>) {
        let now = Utc::now();
        let mut scheduler = self.scheduler.lock().await;

        let result = match request {
            MonitorRequest::Progress {
                task_id,
                current_price,
                pnl,
            } => scheduler.update_progress(task_id, current_price, pnl, now),
            MonitorRequest::Complete { task_id, .. } => scheduler
                .force_complete(task_id, true, "합산 손익 회복", now)
                .map(|_| ()),
            MonitorRequest::Escalate { task_id, .. } if in_flight.contains(&task_id) => {
                Err(RecoveryError::SubmissionInFlight(task_id))
            }
            MonitorRequest::Escalate { task_id, .. } => {
                scheduler.escalate(task_id, now).map(|_| ())
            }
            MonitorRequest::TimedOut { task_id, .. } => {
                scheduler.mark_timed_out(task_id);
                Ok(())
            }
        };

        if let Err(e) = result {
            // 틱 사이에 상태가 바뀐 경우
            debug!(error = %e, "모니터 요청 무시");
        }
    }

    /// 워커: 태스크 하나에 대해 방식 선택 → 사이징 → 주문 전송.
    async fn run_worker(
        self: Arc<Self>,
        worker_id: usize,
        jobs: Arc<Mutex<mpsc::Receiver<RecoveryTask>>>,
        outcomes: mpsc::UnboundedSender<WorkerOutcome>,
        shutdown: CancellationToken,
    ) {
        loop {
            let job = {
                let mut rx = jobs.lock().await;
                tokio::select! {
                    _ = shutdown.cancelled() => None,
                    job = rx.recv() => job,
                }
            };
            let Some(task) = job else {
                break;
            };

            debug!(worker_id = worker_id, task_id = %task.task_id, "워커 시도 시작");
            let outcome = self.process(task, &shutdown).await;
            if outcomes.send(outcome).is_err() {
                break;
            }
        }
        debug!(worker_id = worker_id, "워커 종료");
    }

    async fn process(&self, task: RecoveryTask, shutdown: &CancellationToken) -> WorkerOutcome {
        let task_id = task.task_id;

        // 재시도 전 대기
        let delay = self.config.retry.delay_for(task.recovery_attempts);
        if !delay.is_zero() {
            debug!(
                task_id = %task_id,
                attempt = task.recovery_attempts,
                delay_ms = delay.as_millis() as u64,
                "재시도 대기"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return WorkerOutcome::Deferred { task_id },
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let providers = &self.providers;
        let fetched = tokio::try_join!(
            providers.positions.fetch_positions(),
            providers.market.fetch_market(&task.original.symbol),
            providers.account.fetch_account(),
        );
        let (positions, market, account) = match fetched {
            Ok(data) => data,
            Err(e) => {
                return WorkerOutcome::Failed {
                    task_id,
                    method: None,
                    reason: RecoveryError::from(e).to_string(),
                }
            }
        };

        let tracked: Vec<PositionSnapshot> =
            tracked_positions(self.config.monitor.success_scope, &task, &positions)
                .into_iter()
                .cloned()
                .collect();
        let pnl = if tracked.is_empty() {
            task.last_pnl
        } else {
            combined_pnl(&tracked.iter().collect::<Vec<_>>())
        };

        let stats = self.scheduler.lock().await.stats().clone();
        let now = Utc::now();
        let selection = self
            .selector
            .select(&task, &market, &account, &tracked, &stats, now);

        // 직전에 실패한 방식은 이번 시도에서 제외
        let candidates: Vec<RecoveryMethod> = selection
            .order()
            .into_iter()
            .filter(|m| Some(*m) != task.last_failed_method)
            .collect();
        if candidates.is_empty() {
            return WorkerOutcome::Failed {
                task_id,
                method: None,
                reason: "직전 실패 방식 외 후보 없음".to_string(),
            };
        }

        let ctx = SizingContext::new(&task, &market, pnl);
        let mut declines = Vec::new();
        let mut chosen = None;
        for &method in &candidates {
            match self.sizing.get(method).propose(&ctx) {
                Ok(proposal) => {
                    chosen = Some(proposal);
                    break;
                }
                Err(e) => {
                    warn!(
                        task_id = %task_id,
                        attempt = task.recovery_attempts,
                        method = %method,
                        loss = %pnl,
                        reason = %e,
                        "전략 거절, 다음 방식 확인"
                    );
                    declines.push(e.to_string());
                }
            }
        }

        let Some(proposal) = chosen else {
            return WorkerOutcome::Failed {
                task_id,
                method: candidates.first().copied(),
                reason: declines.join("; "),
            };
        };

        let expected_minutes =
            estimate_recovery_minutes(proposal.method, &selection.analysis, selection.urgency);
        let probability = estimate_success_probability(
            proposal.method,
            market.market_state,
            &selection.analysis,
            &stats,
        );

        info!(
            task_id = %task_id,
            attempt = task.recovery_attempts,
            method = %proposal.method,
            loss = %pnl,
            urgency = %selection.urgency,
            volume = %proposal.volume,
            orders = proposal.orders.len(),
            risk = %proposal.risk_level,
            confidence = proposal.confidence,
            success_probability = probability,
            expected_minutes = expected_minutes,
            justification = %proposal.justification,
            "복구 제안"
        );

        // 일시정지/종료된 태스크는 주문을 보내지 않음
        let still_running = matches!(
            self.scheduler.lock().await.get(task_id).map(|t| t.status),
            Some(RecoveryStatus::InProgress)
        );
        if !still_running {
            debug!(task_id = %task_id, "실행 중이 아니므로 전송 보류");
            return WorkerOutcome::Deferred { task_id };
        }

        match submit_proposal(
            providers.execution.as_ref(),
            &proposal,
            &task.original.symbol,
            &task.tag(),
            &self.config.submission,
        )
        .await
        {
            Ok(report) => WorkerOutcome::Submitted {
                task_id,
                method: proposal.method,
                order_ids: report.order_ids,
                volume: report.volume,
                expected_minutes,
            },
            Err(e) => WorkerOutcome::Failed {
                task_id,
                method: Some(proposal.method),
                reason: e.to_string(),
            },
        }
    }

    /// 모니터링 루프.
    async fn run_monitor(
        self: Arc<Self>,
        requests: mpsc::UnboundedSender<MonitorRequest>,
        shutdown: CancellationToken,
    ) {
        let mut monitor =
            RecoveryMonitor::new(self.config.monitor.clone(), self.config.scheduler.max_attempts);
        let mut interval = tokio::time::interval(self.config.monitor.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 첫 tick은 즉시 발생하므로 소비
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let tasks = self.scheduler.lock().await.active_snapshot();
            monitor.retain_active(&tasks);
            if tasks.is_empty() {
                continue;
            }

            let positions = match self.providers.positions.fetch_positions().await {
                Ok(positions) => positions,
                Err(e) => {
                    warn!(error = %e, "포지션 조회 실패, 다음 틱에 재시도");
                    continue;
                }
            };

            for request in monitor.evaluate(&tasks, &positions, Utc::now()) {
                if requests.send(request).is_err() {
                    return;
                }
            }
        }
        debug!("모니터 종료");
    }
}
