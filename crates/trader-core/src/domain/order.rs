//! 복구 주문 요청/응답 타입.
//!
//! 실행 거래소는 fire-and-report 방식으로 동작합니다.
//! 접수 응답(`OrderAck`)은 체결 확인이 아니며, 체결 결과는
//! 이후 포지션 스냅샷으로 관측됩니다.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    /// 시장가 (즉시 체결 시도)
    Market,
    /// 지정가 (기준가 도달 시 체결)
    Limit,
}

/// 실행 거래소로 보내는 복구 주문 요청.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryOrderRequest {
    /// 종목 심볼
    pub symbol: String,
    /// 주문 방향
    pub direction: Side,
    /// 주문 수량 (lot)
    pub volume: Decimal,
    /// 기준 가격
    pub reference_price: Decimal,
    /// 최대 허용 슬리피지 (가격 단위)
    pub max_slippage: Decimal,
    /// 주문 태그 (복구 태스크 식별용)
    pub tag: String,
    /// 주문 유형
    pub kind: OrderKind,
}

impl RecoveryOrderRequest {
    /// 시장가 요청 생성.
    pub fn market(
        symbol: impl Into<String>,
        direction: Side,
        volume: Decimal,
        reference_price: Decimal,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            volume,
            reference_price,
            max_slippage: Decimal::ZERO,
            tag: tag.into(),
            kind: OrderKind::Market,
        }
    }

    /// 지정가 요청 생성.
    pub fn limit(
        symbol: impl Into<String>,
        direction: Side,
        volume: Decimal,
        price: Decimal,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            kind: OrderKind::Limit,
            ..Self::market(symbol, direction, volume, price, tag)
        }
    }

    /// 최대 슬리피지 설정.
    pub fn with_max_slippage(mut self, max_slippage: Decimal) -> Self {
        self.max_slippage = max_slippage;
        self
    }
}

/// 주문 접수 응답.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    /// 거래소 주문 번호
    pub order_id: String,
    /// 즉시 체결되어 생성된 포지션 ID (지정가 대기 주문은 None)
    pub position_id: Option<String>,
    /// 접수 시각
    pub accepted_at: DateTime<Utc>,
}
