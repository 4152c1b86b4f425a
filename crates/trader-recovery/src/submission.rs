//! 복구 주문 전송.
//!
//! 주문 1건마다 `tokio::time::timeout`을 걸어 응답이 멈춘 거래소가
//! 워커를 붙잡지 않도록 합니다. 같은 시도 안에서는 거래소에 도달하지
//! 못한 네트워크 에러만 지수 백오프로 재전송합니다. 타임아웃된 주문은
//! 늦게 접수될 수 있으므로 재전송하지 않고 시도 실패로 넘깁니다.

use rust_decimal::Decimal;
use tracing::{debug, warn};
use trader_core::{OrderAck, OrderExecutionProvider, ProviderError, RecoveryOrderRequest};

use crate::config::SubmissionConfig;
use crate::error::{RecoveryError, Result};
use crate::sizing::StrategyProposal;

/// 제안 전송 결과
#[derive(Debug, Clone, Default)]
pub struct SubmissionReport {
    /// 접수된 주문 ID
    pub order_ids: Vec<String>,
    /// 접수된 주문 수량 합계
    pub volume: Decimal,
    /// 실패한 주문 수
    pub failed: usize,
}

/// 주문 1건 전송 (타임아웃 + 네트워크 에러 재전송).
pub async fn submit_order(
    venue: &dyn OrderExecutionProvider,
    request: &RecoveryOrderRequest,
    config: &SubmissionConfig,
) -> std::result::Result<OrderAck, ProviderError> {
    let mut retry = 0;

    loop {
        let result = match tokio::time::timeout(config.timeout(), venue.place_order(request)).await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(format!(
                "{}ms 내 응답 없음 ({})",
                config.timeout_ms,
                venue.venue_name()
            ))),
        };

        match result {
            Ok(ack) => {
                if retry > 0 {
                    debug!(order_id = %ack.order_id, retries = retry, "재전송 후 접수");
                }
                return Ok(ack);
            }
            Err(e) if is_resendable(&e) && retry < config.max_retries => {
                let delay = config.backoff(retry);
                warn!(
                    error = %e,
                    retry = retry + 1,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "주문 재전송 대기"
                );
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// 같은 요청을 다시 보내도 중복 접수되지 않는 에러인지.
///
/// `Timeout`은 거래소가 주문을 이미 받았을 수 있어 제외합니다.
fn is_resendable(error: &ProviderError) -> bool {
    error.is_retryable() && !matches!(error, ProviderError::Timeout(_))
}

/// 제안의 모든 주문 전송.
///
/// 하나 이상 접수되면 성공으로 봅니다. 모두 실패하면 `SubmissionFailure`.
pub async fn submit_proposal(
    venue: &dyn OrderExecutionProvider,
    proposal: &StrategyProposal,
    symbol: &str,
    tag: &str,
    config: &SubmissionConfig,
) -> Result<SubmissionReport> {
    let requests = proposal.order_requests(symbol, tag, config.max_slippage);
    let mut report = SubmissionReport::default();
    let mut last_error = None;

    for request in &requests {
        match submit_order(venue, request, config).await {
            Ok(ack) => {
                report.order_ids.push(ack.order_id);
                report.volume += request.volume;
            }
            Err(e) => {
                warn!(
                    symbol = %request.symbol,
                    side = %request.direction,
                    volume = %request.volume,
                    price = %request.reference_price,
                    error = %e,
                    "복구 주문 실패"
                );
                report.failed += 1;
                last_error = Some(e);
            }
        }
    }

    if report.order_ids.is_empty() {
        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "전송할 주문 없음".to_string());
        return Err(RecoveryError::SubmissionFailure(reason));
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use trader_core::{OrderKind, Side};

    use crate::sizing::{ProposedOrder, RiskLevel};
    use crate::task::RecoveryMethod;

    /// 앞의 N번은 지정한 에러, 이후에는 접수
    struct FlakyVenue {
        failures: AtomicU32,
        error: ProviderError,
        calls: AtomicU32,
        latency: Duration,
    }

    impl FlakyVenue {
        fn new(failures: u32, error: ProviderError) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                error,
                calls: AtomicU32::new(0),
                latency: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl OrderExecutionProvider for FlakyVenue {
        async fn place_order(
            &self,
            _request: &RecoveryOrderRequest,
        ) -> std::result::Result<OrderAck, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(self.error.clone());
            }
            Ok(OrderAck {
                order_id: format!("ord-{}", call),
                position_id: None,
                accepted_at: Utc::now(),
            })
        }

        fn venue_name(&self) -> &str {
            "flaky"
        }
    }

    fn request() -> RecoveryOrderRequest {
        RecoveryOrderRequest::market("XAUUSD", Side::Buy, dec!(0.1), dec!(2000), "recovery-t")
    }

    fn config() -> SubmissionConfig {
        SubmissionConfig {
            timeout_ms: 100,
            max_retries: 2,
            base_delay_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_is_resent() {
        let venue = FlakyVenue::new(2, ProviderError::Network("reset".into()));
        let ack = submit_order(&venue, &request(), &config()).await.unwrap();

        assert_eq!(ack.order_id, "ord-2");
        assert_eq!(venue.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_resent() {
        let venue = FlakyVenue::new(1, ProviderError::Rejected("no margin".into()));
        let result = submit_order(&venue, &request(), &config()).await;

        assert!(matches!(result, Err(ProviderError::Rejected(_))));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_venue_times_out() {
        let mut venue = FlakyVenue::new(0, ProviderError::Other("unused".into()));
        venue.latency = Duration::from_secs(10);
        let config = SubmissionConfig {
            max_retries: 0,
            ..config()
        };

        let result = submit_order(&venue, &request(), &config).await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_after_timeout_is_not_resent() {
        // 타임아웃 뒤에야 접수하는 거래소
        let mut venue = FlakyVenue::new(0, ProviderError::Other("unused".into()));
        venue.latency = Duration::from_millis(150);

        let result = submit_order(&venue, &request(), &config()).await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 1);

        let venue = FlakyVenue::new(1, ProviderError::Timeout("gateway".into()));
        let result = submit_order(&venue, &request(), &config()).await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
        assert_eq!(venue.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_proposal_partial_success() {
        let venue = FlakyVenue::new(1, ProviderError::Rejected("level rejected".into()));
        let proposal = StrategyProposal {
            method: RecoveryMethod::GridLevel,
            direction: Side::Buy,
            volume: dec!(0.03),
            reference_price: dec!(2000),
            target_profit: dec!(30),
            max_additional_loss: dec!(100),
            risk_level: RiskLevel::Medium,
            confidence: 0.75,
            justification: String::new(),
            orders: vec![
                ProposedOrder {
                    direction: Side::Buy,
                    volume: dec!(0.01),
                    price: dec!(1998),
                    kind: OrderKind::Limit,
                },
                ProposedOrder {
                    direction: Side::Buy,
                    volume: dec!(0.02),
                    price: dec!(1996),
                    kind: OrderKind::Limit,
                },
            ],
        };

        let report = submit_proposal(&venue, &proposal, "XAUUSD", "recovery-t", &config())
            .await
            .unwrap();
        assert_eq!(report.order_ids.len(), 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.volume, dec!(0.02));

        let venue = FlakyVenue::new(5, ProviderError::Rejected("closed".into()));
        let result = submit_proposal(&venue, &proposal, "XAUUSD", "recovery-t", &config()).await;
        assert!(matches!(result, Err(RecoveryError::SubmissionFailure(_))));
    }
}
