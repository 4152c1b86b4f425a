//! 체결가/손익 계산 유틸리티.
//!
//! PaperVenue의 체결과 포지션 평가에서 공통으로 사용합니다.

use rust_decimal::Decimal;
use trader_core::Side;

/// 슬리피지 적용.
///
/// 매수는 높은 가격, 매도는 낮은 가격으로 체결됩니다.
pub fn apply_slippage(price: Decimal, slippage_rate: Decimal, side: Side) -> Decimal {
    let slippage = price * slippage_rate;
    match side {
        Side::Buy => price + slippage,
        Side::Sell => price - slippage,
    }
}

/// 미실현 손익 계산.
///
/// `contract_size`는 1 lot당 기초자산 수량입니다 (예: XAUUSD 100oz).
pub fn calculate_unrealized_pnl(
    open_price: Decimal,
    current_price: Decimal,
    volume: Decimal,
    contract_size: Decimal,
    side: Side,
) -> Decimal {
    let diff = match side {
        Side::Buy => current_price - open_price,
        Side::Sell => open_price - current_price,
    };
    diff * volume * contract_size
}

/// 지정가 주문이 현재가에서 체결 가능한지 여부.
pub fn limit_crossed(limit_price: Decimal, current_price: Decimal, side: Side) -> bool {
    match side {
        Side::Buy => current_price <= limit_price,
        Side::Sell => current_price >= limit_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_apply_slippage() {
        assert_eq!(apply_slippage(dec!(2000), dec!(0.001), Side::Buy), dec!(2002));
        assert_eq!(apply_slippage(dec!(2000), dec!(0.001), Side::Sell), dec!(1998));
    }

    #[test]
    fn test_unrealized_pnl() {
        // 0.1 lot 매수, 10달러 하락 → -100
        let pnl = calculate_unrealized_pnl(dec!(2000), dec!(1990), dec!(0.1), dec!(100), Side::Buy);
        assert_eq!(pnl, dec!(-100));

        let pnl = calculate_unrealized_pnl(dec!(2000), dec!(1990), dec!(0.1), dec!(100), Side::Sell);
        assert_eq!(pnl, dec!(100));
    }

    #[test]
    fn test_limit_crossed() {
        assert!(limit_crossed(dec!(1995), dec!(1994), Side::Buy));
        assert!(!limit_crossed(dec!(1995), dec!(1996), Side::Buy));
        assert!(limit_crossed(dec!(2005), dec!(2005), Side::Sell));
        assert!(!limit_crossed(dec!(2005), dec!(2004), Side::Sell));
    }
}
