//! 계좌 스냅샷.
//!
//! 복구 방식 선택 시 계좌 건전성(equity 구간)과
//! 기존 포지션의 방향 분포(자연 헤지 여부)를 판단하는 데 사용됩니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// 거래소 중립적 계좌 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    /// 평가 자산 (equity)
    pub equity: Decimal,
    /// 현재 열린 포지션들의 방향 목록
    pub open_position_directions: Vec<Side>,
}

impl AccountSnapshot {
    /// 새 계좌 스냅샷 생성.
    pub fn new(equity: Decimal, open_position_directions: Vec<Side>) -> Self {
        Self {
            equity,
            open_position_directions,
        }
    }

    /// 주어진 방향 기준으로 (반대 방향 수, 같은 방향 수) 반환.
    pub fn direction_split(&self, side: Side) -> (usize, usize) {
        let same = self
            .open_position_directions
            .iter()
            .filter(|d| **d == side)
            .count();
        (self.open_position_directions.len() - same, same)
    }
}
