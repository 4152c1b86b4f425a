//! 시장 스냅샷 및 시장 분류.

use std::fmt;

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

// =============================================================================
// 시장 상태 분류
// =============================================================================

/// 개략적인 시장 상태 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketState {
    /// 좁은 박스권
    RangingTight,
    /// 넓은 박스권
    RangingWide,
    /// 약한 추세
    TrendingWeak,
    /// 강한 추세
    TrendingStrong,
    /// 고변동성
    VolatileHigh,
    /// 뉴스 영향 구간
    NewsImpact,
}

impl MarketState {
    /// 모든 시장 상태.
    pub const ALL: [MarketState; 6] = [
        MarketState::RangingTight,
        MarketState::RangingWide,
        MarketState::TrendingWeak,
        MarketState::TrendingStrong,
        MarketState::VolatileHigh,
        MarketState::NewsImpact,
    ];

    /// 세션 기반 기본 시장 상태.
    ///
    /// 실시간 분류기가 없을 때 사용하는 시간대 기반 추정치입니다.
    pub fn from_session(session: TradingSession) -> Self {
        match session {
            TradingSession::Asian => MarketState::RangingTight,
            TradingSession::London => MarketState::TrendingStrong,
            TradingSession::Overlap => MarketState::VolatileHigh,
            TradingSession::NewYork => MarketState::TrendingWeak,
            TradingSession::Quiet => MarketState::RangingWide,
        }
    }

    pub fn is_trending(&self) -> bool {
        matches!(self, MarketState::TrendingWeak | MarketState::TrendingStrong)
    }
}

impl fmt::Display for MarketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MarketState::RangingTight => "ranging_tight",
            MarketState::RangingWide => "ranging_wide",
            MarketState::TrendingWeak => "trending_weak",
            MarketState::TrendingStrong => "trending_strong",
            MarketState::VolatileHigh => "volatile_high",
            MarketState::NewsImpact => "news_impact",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// 거래 세션
// =============================================================================

/// 거래 세션 (UTC 기준).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingSession {
    /// 아시아 (23:00 ~ 06:59 UTC)
    Asian,
    /// 런던 (07:00 ~ 11:59 UTC)
    London,
    /// 런던/뉴욕 중첩 (12:00 ~ 15:59 UTC)
    Overlap,
    /// 뉴욕 (16:00 ~ 20:59 UTC)
    NewYork,
    /// 한산 시간대 (21:00 ~ 22:59 UTC)
    Quiet,
}

impl TradingSession {
    /// UTC 시(hour)로 세션 판정.
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            7..=11 => TradingSession::London,
            12..=15 => TradingSession::Overlap,
            16..=20 => TradingSession::NewYork,
            21..=22 => TradingSession::Quiet,
            _ => TradingSession::Asian,
        }
    }

    /// 시각으로 세션 판정.
    pub fn at(time: DateTime<Utc>) -> Self {
        Self::from_utc_hour(time.hour())
    }
}

impl fmt::Display for TradingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TradingSession::Asian => "asian",
            TradingSession::London => "london",
            TradingSession::Overlap => "overlap",
            TradingSession::NewYork => "new_york",
            TradingSession::Quiet => "quiet",
        };
        write!(f, "{}", name)
    }
}

// =============================================================================
// 추세 방향
// =============================================================================

/// 지배적 추세 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl TrendDirection {
    /// 포지션 방향과 추세가 반대인지 여부.
    pub fn opposes(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (TrendDirection::Down, Side::Buy) | (TrendDirection::Up, Side::Sell)
        )
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "up"),
            TrendDirection::Down => write!(f, "down"),
            TrendDirection::Sideways => write!(f, "sideways"),
        }
    }
}

// =============================================================================
// 시장 스냅샷
// =============================================================================

/// 읽기 전용 시장 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// 종목 심볼
    pub symbol: String,
    /// 현재가
    pub price: Decimal,
    /// ATR (가격 단위)
    pub atr: Decimal,
    /// 현재 세션
    pub session: TradingSession,
    /// 시장 상태 분류
    pub market_state: MarketState,
    /// 추세 방향
    pub trend: TrendDirection,
    /// 추세 판단 신뢰도 (0.0 ~ 1.0)
    pub trend_confidence: f64,
}

impl MarketSnapshot {
    /// 가격 대비 ATR 비율 (0.01 = 1%).
    pub fn atr_fraction(&self) -> f64 {
        if self.price <= Decimal::ZERO {
            return 0.0;
        }
        (self.atr / self.price).to_f64().unwrap_or(0.0)
    }

    /// 가격 대비 ATR 백분율.
    pub fn atr_percent(&self) -> f64 {
        self.atr_fraction() * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_session_from_hour() {
        assert_eq!(TradingSession::from_utc_hour(3), TradingSession::Asian);
        assert_eq!(TradingSession::from_utc_hour(23), TradingSession::Asian);
        assert_eq!(TradingSession::from_utc_hour(9), TradingSession::London);
        assert_eq!(TradingSession::from_utc_hour(13), TradingSession::Overlap);
        assert_eq!(TradingSession::from_utc_hour(18), TradingSession::NewYork);
        assert_eq!(TradingSession::from_utc_hour(22), TradingSession::Quiet);
    }

    #[test]
    fn test_trend_opposes() {
        assert!(TrendDirection::Down.opposes(Side::Buy));
        assert!(TrendDirection::Up.opposes(Side::Sell));
        assert!(!TrendDirection::Up.opposes(Side::Buy));
        assert!(!TrendDirection::Sideways.opposes(Side::Sell));
    }

    #[test]
    fn test_atr_fraction() {
        let snapshot = MarketSnapshot {
            symbol: "XAUUSD".to_string(),
            price: dec!(2000),
            atr: dec!(20),
            session: TradingSession::London,
            market_state: MarketState::TrendingStrong,
            trend: TrendDirection::Up,
            trend_confidence: 0.7,
        };

        assert!((snapshot.atr_fraction() - 0.01).abs() < 1e-9);
        assert!((snapshot.atr_percent() - 1.0).abs() < 1e-9);
    }
}
