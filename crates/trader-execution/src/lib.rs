//! 복구 주문 실행.
//!
//! 이 crate는 다음을 제공합니다:
//! - 가상 체결을 수행하는 페이퍼 거래소 (`PaperVenue`)
//! - 슬리피지/미실현 손익 계산 유틸리티
//!
//! # 예제
//!
//! ```rust,ignore
//! use trader_execution::PaperVenue;
//!
//! let venue = PaperVenue::with_balance(dec!(10000));
//! venue.set_price("XAUUSD", dec!(2000)).await;
//! let position_id = venue.open_position("XAUUSD", Side::Buy, dec!(0.1), dec!(2010), Utc::now()).await;
//! ```

pub mod paper_venue;
pub mod pricing;

pub use paper_venue::{MarketContext, PaperVenue, PaperVenueConfig};
pub use pricing::{apply_slippage, calculate_unrealized_pnl, limit_crossed};
