//! 외부 협력자 추상화.
//!
//! 복구 코어는 포지션, 시장, 계좌 데이터를 pull 방식으로 읽고
//! 주문은 실행 거래소로 전송만 합니다. 각 협력자는 이 모듈의 trait을
//! 구현하여 교체할 수 있습니다.

use async_trait::async_trait;
use thiserror::Error;

use super::{AccountSnapshot, MarketSnapshot, OrderAck, PositionSnapshot, RecoveryOrderRequest};

// =============================================================================
// 에러 타입
// =============================================================================

/// Provider 에러.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 인증 실패
    #[error("인증 실패: {0}")]
    Authentication(String),

    /// API 에러
    #[error("API 에러: {0}")]
    Api(String),

    /// 주문 거부
    #[error("주문 거부: {0}")]
    Rejected(String),

    /// 응답 시간 초과
    #[error("응답 시간 초과: {0}")]
    Timeout(String),

    /// 대상 없음
    #[error("대상을 찾을 수 없음: {0}")]
    NotFound(String),

    /// 기타 에러
    #[error("기타 에러: {0}")]
    Other(String),
}

impl ProviderError {
    /// 같은 시도 안에서 재전송해도 되는 일시적 에러인지 여부.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_) | ProviderError::Timeout(_))
    }
}

// =============================================================================
// Provider Traits
// =============================================================================

/// 포지션 데이터 제공자.
#[async_trait]
pub trait PositionProvider: Send + Sync {
    /// 현재 열린 모든 포지션 조회.
    ///
    /// # Errors
    ///
    /// - `ProviderError::Network`: 네트워크 연결 실패
    /// - `ProviderError::Api`: 거래소 API 에러
    async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, ProviderError>;

    /// 단일 포지션 조회.
    ///
    /// 기본 구현은 전체 목록에서 검색합니다.
    async fn fetch_position(&self, position_id: &str) -> Result<PositionSnapshot, ProviderError> {
        self.fetch_positions()
            .await?
            .into_iter()
            .find(|p| p.position_id == position_id)
            .ok_or_else(|| ProviderError::NotFound(position_id.to_string()))
    }
}

/// 시장 데이터 제공자.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// 심볼의 최신 시장 스냅샷 조회.
    async fn fetch_market(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError>;
}

/// 계좌 정보 제공자.
#[async_trait]
pub trait AccountProvider: Send + Sync {
    /// 계좌 스냅샷 조회.
    async fn fetch_account(&self) -> Result<AccountSnapshot, ProviderError>;
}

/// 주문 실행 제공자.
///
/// 주문 접수 결과만 반환하며 동기 체결 확인을 가정하지 않습니다.
///
/// # 구현 예시
///
/// ```ignore
/// #[async_trait]
/// impl OrderExecutionProvider for BrokerAdapter {
///     async fn place_order(&self, request: &RecoveryOrderRequest) -> Result<OrderAck, ProviderError> {
///         // 브로커 API 호출 및 변환
///     }
///
///     fn venue_name(&self) -> &str { "broker" }
/// }
/// ```
#[async_trait]
pub trait OrderExecutionProvider: Send + Sync {
    /// 주문 전송.
    ///
    /// # Errors
    ///
    /// - `ProviderError::Rejected`: 거래소가 주문을 거부
    /// - `ProviderError::Network`: 네트워크 연결 실패
    async fn place_order(&self, request: &RecoveryOrderRequest) -> Result<OrderAck, ProviderError>;

    /// 거래소 이름 (로깅용).
    fn venue_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Timeout("5s".into()).is_retryable());
        assert!(!ProviderError::Rejected("margin".into()).is_retryable());
        assert!(!ProviderError::NotFound("p-1".into()).is_retryable());
    }
}
