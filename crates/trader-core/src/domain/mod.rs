//! 도메인 모델.

mod account;
mod market;
mod order;
mod position;
mod provider;

pub use account::AccountSnapshot;
pub use market::{MarketSnapshot, MarketState, TradingSession, TrendDirection};
pub use order::{OrderAck, OrderKind, RecoveryOrderRequest};
pub use position::{PositionSnapshot, Side};
pub use provider::{
    AccountProvider, MarketDataProvider, OrderExecutionProvider, PositionProvider, ProviderError,
};
