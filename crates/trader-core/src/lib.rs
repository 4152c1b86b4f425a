//! 손실 복구 시스템의 공통 도메인 타입.
//!
//! 이 crate는 다음을 제공합니다:
//! - 포지션/시장/계좌 스냅샷 (외부에서 읽기 전용으로 공급되는 입력)
//! - 복구 주문 요청 및 접수 응답
//! - 외부 협력자(포지션 소스, 시장 데이터, 계좌, 실행 거래소) 추상화 trait

pub mod domain;

pub use domain::{
    AccountProvider, AccountSnapshot, MarketDataProvider, MarketSnapshot, MarketState,
    OrderAck, OrderExecutionProvider, OrderKind, PositionProvider, PositionSnapshot,
    ProviderError, RecoveryOrderRequest, Side, TradingSession, TrendDirection,
};
