//! 페이퍼 실행 거래소.
//!
//! 시뮬레이션과 테스트에서 사용하는 가상 거래소입니다.
//! 포지션/시장/계좌/주문 실행 trait을 모두 구현하여
//! 실거래 어댑터와 동일한 인터페이스를 제공합니다.
//!
//! 실제 API를 호출하지 않고 내부 상태만 업데이트합니다.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};
use trader_core::{
    AccountProvider, AccountSnapshot, MarketDataProvider, MarketSnapshot, MarketState, OrderAck,
    OrderExecutionProvider, OrderKind, PositionProvider, PositionSnapshot, ProviderError,
    RecoveryOrderRequest, Side, TradingSession, TrendDirection,
};

use crate::pricing::{apply_slippage, calculate_unrealized_pnl, limit_crossed};

/// 페이퍼 거래소 설정.
#[derive(Debug, Clone)]
pub struct PaperVenueConfig {
    /// 슬리피지 비율 (0.0001 = 0.01%)
    pub slippage_rate: Decimal,
    /// 1 lot당 계약 수량
    pub contract_size: Decimal,
    /// 초기 잔고
    pub initial_balance: Decimal,
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            slippage_rate: Decimal::new(1, 4),
            contract_size: Decimal::from(100),
            initial_balance: Decimal::from(10_000),
        }
    }
}

/// 시장 컨텍스트 (심볼별로 외부에서 주입).
#[derive(Debug, Clone)]
pub struct MarketContext {
    pub atr: Decimal,
    pub market_state: MarketState,
    pub trend: TrendDirection,
    pub trend_confidence: f64,
    /// None이면 현재 시각으로 세션 판정
    pub session: Option<TradingSession>,
}

#[derive(Debug, Clone)]
struct PaperPosition {
    position_id: String,
    symbol: String,
    side: Side,
    volume: Decimal,
    open_price: Decimal,
    open_time: DateTime<Utc>,
    tag: Option<String>,
}

#[derive(Debug, Clone)]
struct PendingLimit {
    order_id: String,
    request: RecoveryOrderRequest,
}

#[derive(Debug, Default)]
struct PaperBook {
    balance: Decimal,
    positions: HashMap<String, PaperPosition>,
    pending: Vec<PendingLimit>,
    prices: HashMap<String, Decimal>,
    markets: HashMap<String, MarketContext>,
    next_id: u64,
    fail_next: u32,
    latency: Duration,
    total_orders: usize,
}

impl PaperBook {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    fn open(
        &mut self,
        symbol: &str,
        side: Side,
        volume: Decimal,
        price: Decimal,
        open_time: DateTime<Utc>,
        tag: Option<String>,
    ) -> String {
        let position_id = self.next_id("pos");
        self.positions.insert(
            position_id.clone(),
            PaperPosition {
                position_id: position_id.clone(),
                symbol: symbol.to_string(),
                side,
                volume,
                open_price: price,
                open_time,
                tag,
            },
        );
        position_id
    }
}

/// 페이퍼 실행 거래소.
#[derive(Debug)]
pub struct PaperVenue {
    config: PaperVenueConfig,
    book: RwLock<PaperBook>,
}

impl PaperVenue {
    /// 새 페이퍼 거래소 생성.
    pub fn new(config: PaperVenueConfig) -> Self {
        let book = PaperBook {
            balance: config.initial_balance,
            ..Default::default()
        };
        Self {
            config,
            book: RwLock::new(book),
        }
    }

    /// 기본 설정 + 지정 잔고로 생성.
    pub fn with_balance(initial_balance: Decimal) -> Self {
        Self::new(PaperVenueConfig {
            initial_balance,
            ..Default::default()
        })
    }

    /// 설정 조회
    pub fn config(&self) -> &PaperVenueConfig {
        &self.config
    }

    /// 현재가 설정.
    ///
    /// 가격이 지정가 대기 주문을 통과하면 해당 주문을 체결합니다.
    /// 체결된 주문 수를 반환합니다.
    pub async fn set_price(&self, symbol: &str, price: Decimal) -> usize {
        let mut book = self.book.write().await;
        book.prices.insert(symbol.to_string(), price);

        let (crossed, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut book.pending)
            .into_iter()
            .partition(|p| {
                p.request.symbol == symbol
                    && limit_crossed(p.request.reference_price, price, p.request.direction)
            });
        book.pending = remaining;

        let now = Utc::now();
        for limit in &crossed {
            let request = &limit.request;
            let position_id = book.open(
                &request.symbol,
                request.direction,
                request.volume,
                request.reference_price,
                now,
                Some(request.tag.clone()),
            );
            debug!(
                order_id = %limit.order_id,
                position_id = %position_id,
                price = %request.reference_price,
                "지정가 주문 체결"
            );
        }

        crossed.len()
    }

    /// 심볼의 시장 컨텍스트 설정.
    pub async fn set_market_context(&self, symbol: &str, context: MarketContext) {
        self.book
            .write()
            .await
            .markets
            .insert(symbol.to_string(), context);
    }

    /// 포지션 직접 개설 (시뮬레이션 초기 상태 구성용).
    pub async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        volume: Decimal,
        open_price: Decimal,
        open_time: DateTime<Utc>,
    ) -> String {
        let mut book = self.book.write().await;
        book.prices.entry(symbol.to_string()).or_insert(open_price);
        book.open(symbol, side, volume, open_price, open_time, None)
    }

    /// 포지션 청산. 실현 손익을 반환합니다.
    pub async fn close_position(&self, position_id: &str) -> Option<Decimal> {
        let mut book = self.book.write().await;
        let position = book.positions.remove(position_id)?;
        let price = book
            .prices
            .get(&position.symbol)
            .copied()
            .unwrap_or(position.open_price);
        let exit_price = apply_slippage(price, self.config.slippage_rate, position.side.opposite());
        let realized = calculate_unrealized_pnl(
            position.open_price,
            exit_price,
            position.volume,
            self.config.contract_size,
            position.side,
        );
        book.balance += realized;
        Some(realized)
    }

    /// 다음 N개 주문을 거부하도록 설정.
    pub async fn fail_next(&self, count: u32) {
        self.book.write().await.fail_next = count;
    }

    /// 주문 응답 지연 설정.
    pub async fn set_latency(&self, latency: Duration) {
        self.book.write().await.latency = latency;
    }

    /// 총 접수 주문 수
    pub async fn total_orders(&self) -> usize {
        self.book.read().await.total_orders
    }

    /// 열린 포지션 수
    pub async fn position_count(&self) -> usize {
        self.book.read().await.positions.len()
    }

    /// 대기 중인 지정가 주문 수
    pub async fn pending_order_count(&self) -> usize {
        self.book.read().await.pending.len()
    }

    fn snapshot(&self, position: &PaperPosition, price: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            position_id: position.position_id.clone(),
            symbol: position.symbol.clone(),
            direction: position.side,
            volume: position.volume,
            open_price: position.open_price,
            current_price: price,
            unrealized_pnl: calculate_unrealized_pnl(
                position.open_price,
                price,
                position.volume,
                self.config.contract_size,
                position.side,
            ),
            open_time: position.open_time,
            tag: position.tag.clone(),
        }
    }
}

#[async_trait]
impl PositionProvider for PaperVenue {
    async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, ProviderError> {
        let book = self.book.read().await;
        let mut snapshots: Vec<PositionSnapshot> = book
            .positions
            .values()
            .map(|p| {
                let price = book.prices.get(&p.symbol).copied().unwrap_or(p.open_price);
                self.snapshot(p, price)
            })
            .collect();
        snapshots.sort_by(|a, b| a.open_time.cmp(&b.open_time));
        Ok(snapshots)
    }
}

#[async_trait]
impl MarketDataProvider for PaperVenue {
    async fn fetch_market(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError> {
        let book = self.book.read().await;
        let price = book
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("시세 없음: {}", symbol)))?;

        let snapshot = match book.markets.get(symbol) {
            Some(ctx) => MarketSnapshot {
                symbol: symbol.to_string(),
                price,
                atr: ctx.atr,
                session: ctx.session.unwrap_or_else(|| TradingSession::at(Utc::now())),
                market_state: ctx.market_state,
                trend: ctx.trend,
                trend_confidence: ctx.trend_confidence,
            },
            None => {
                let session = TradingSession::at(Utc::now());
                MarketSnapshot {
                    symbol: symbol.to_string(),
                    price,
                    // 컨텍스트가 없으면 가격의 0.1%를 ATR로 가정 (금 2000 기준 20pip)
                    atr: price * Decimal::new(1, 3),
                    session,
                    market_state: MarketState::from_session(session),
                    trend: TrendDirection::Sideways,
                    trend_confidence: 0.5,
                }
            }
        };

        Ok(snapshot)
    }
}

#[async_trait]
impl AccountProvider for PaperVenue {
    async fn fetch_account(&self) -> Result<AccountSnapshot, ProviderError> {
        let book = self.book.read().await;
        let mut floating = Decimal::ZERO;
        let mut directions = Vec::with_capacity(book.positions.len());

        for position in book.positions.values() {
            let price = book
                .prices
                .get(&position.symbol)
                .copied()
                .unwrap_or(position.open_price);
            floating += self.snapshot(position, price).unrealized_pnl;
            directions.push(position.side);
        }

        Ok(AccountSnapshot::new(book.balance + floating, directions))
    }
}

#[async_trait]
impl OrderExecutionProvider for PaperVenue {
    async fn place_order(&self, request: &RecoveryOrderRequest) -> Result<OrderAck, ProviderError> {
        // 지연은 잠금 밖에서 적용
        let latency = self.book.read().await.latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut book = self.book.write().await;

        if book.fail_next > 0 {
            book.fail_next -= 1;
            return Err(ProviderError::Rejected("주입된 주문 거부".to_string()));
        }

        if request.volume <= Decimal::ZERO {
            return Err(ProviderError::Rejected(format!(
                "유효하지 않은 수량: {}",
                request.volume
            )));
        }

        let market_price = book
            .prices
            .get(&request.symbol)
            .copied()
            .ok_or_else(|| ProviderError::NotFound(format!("시세 없음: {}", request.symbol)))?;

        let fill_price = apply_slippage(market_price, self.config.slippage_rate, request.direction);
        if request.kind == OrderKind::Market
            && request.max_slippage > Decimal::ZERO
            && (fill_price - request.reference_price).abs() > request.max_slippage
        {
            return Err(ProviderError::Rejected(format!(
                "슬리피지 초과: 기준 {}, 체결 {}",
                request.reference_price, fill_price
            )));
        }

        // 거부된 주문은 ID와 접수 수에 포함하지 않음
        book.total_orders += 1;
        let order_id = book.next_id("ord");
        let now = Utc::now();

        let position_id = match request.kind {
            OrderKind::Market => {
                let position_id = book.open(
                    &request.symbol,
                    request.direction,
                    request.volume,
                    fill_price,
                    now,
                    Some(request.tag.clone()),
                );
                info!(
                    order_id = %order_id,
                    symbol = %request.symbol,
                    side = %request.direction,
                    volume = %request.volume,
                    price = %fill_price,
                    "페이퍼 시장가 체결"
                );
                Some(position_id)
            }
            OrderKind::Limit => {
                book.pending.push(PendingLimit {
                    order_id: order_id.clone(),
                    request: request.clone(),
                });
                debug!(
                    order_id = %order_id,
                    side = %request.direction,
                    price = %request.reference_price,
                    "페이퍼 지정가 접수"
                );
                None
            }
        };

        Ok(OrderAck {
            order_id,
            position_id,
            accepted_at: now,
        })
    }

    fn venue_name(&self) -> &str {
        "paper"
    }
}
