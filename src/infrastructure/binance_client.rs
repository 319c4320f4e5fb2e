//! Binance Spot REST client
//!
//! Implements `ExchangeClient` on top of the signed `/api/v3` endpoints. Prices
//! and quantities are normalised to the symbol's tick and lot filters before an
//! order is sent, and every request goes through a shared rate limiter.

use crate::domain::entities::order::OrderSide;
use crate::domain::repositories::exchange_client::{
    Balance, ExchangeClient, ExchangeError, ExchangeResult, OpenOrder, OrderReport,
};
use crate::rate_limit::{create_rate_limiter, throttle, RateLimiterConfig, RequestRateLimiter};
use crate::secrets::ApiCredentials;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Binance API endpoints
const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_BASE: &str = "https://testnet.binance.vision";

type HmacSha256 = Hmac<Sha256>;

/// Binance connection configuration
#[derive(Debug)]
pub struct BinanceConfig {
    pub api_base: String,
    pub credentials: ApiCredentials,
    pub testnet: bool,
    pub recv_window_ms: u64,
    pub request_timeout: Duration,
    pub rate_limit: RateLimiterConfig,
}

impl BinanceConfig {
    pub fn new(credentials: ApiCredentials, testnet: bool) -> Self {
        Self {
            api_base: if testnet {
                BINANCE_TESTNET_BASE.to_string()
            } else {
                BINANCE_API_BASE.to_string()
            },
            credentials,
            testnet,
            recv_window_ms: 5000,
            request_timeout: Duration::from_secs(10),
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

/// Tick and lot constraints of one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: Decimal,
    pub step_size: Decimal,
    pub min_qty: Decimal,
}

impl SymbolFilters {
    /// Round a price to the nearest tick.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        if self.tick_size <= Decimal::ZERO {
            return price;
        }
        let ticks = (price / self.tick_size)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        (ticks * self.tick_size).normalize()
    }

    /// Truncate a quantity to the lot step, raised to the minimum quantity.
    pub fn round_quantity(&self, quantity: Decimal) -> Decimal {
        let stepped = if self.step_size > Decimal::ZERO {
            (quantity / self.step_size).trunc() * self.step_size
        } else {
            quantity
        };
        stepped.max(self.min_qty).normalize()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "filterType")]
enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize")]
        tick_size: Decimal,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: Decimal,
        #[serde(rename = "minQty")]
        min_qty: Decimal,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AccountInfo {
    balances: Vec<AccountBalance>,
}

#[derive(Debug, Deserialize)]
struct AccountBalance {
    asset: String,
    free: Decimal,
    locked: Decimal,
}

/// Order as returned by the order, cancel and openOrders endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceOrder {
    symbol: String,
    order_id: i64,
    price: Decimal,
    orig_qty: Decimal,
    executed_qty: Decimal,
    #[serde(rename = "cummulativeQuoteQty")]
    cumulative_quote_qty: Decimal,
    status: String,
    side: String,
    update_time: Option<i64>,
    transact_time: Option<i64>,
    time: Option<i64>,
}

impl BinanceOrder {
    fn into_report(self) -> ExchangeResult<OrderReport> {
        let side = self.side.parse().map_err(ExchangeError::UnexpectedResponse)?;
        let status = self
            .status
            .parse()
            .map_err(ExchangeError::UnexpectedResponse)?;
        let updated_at = self
            .update_time
            .or(self.transact_time)
            .or(self.time)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(OrderReport {
            exchange_order_id: self.order_id,
            symbol: self.symbol,
            side,
            status,
            price: self.price,
            orig_quantity: self.orig_qty,
            executed_quantity: self.executed_qty,
            cumulative_quote_quantity: self.cumulative_quote_qty,
            updated_at,
        })
    }
}

/// HMAC-SHA256 of the query string, hex encoded
pub fn sign_query(secret: &str, query: &str) -> ExchangeResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ExchangeError::Authentication(format!("HMAC error: {}", e)))?;
    mac.update(query.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

fn map_api_error(status: u16, body: &str) -> ExchangeError {
    match serde_json::from_str::<ApiErrorBody>(body) {
        // -1022 bad signature, -2014 bad key format, -2015 key/IP/permissions
        Ok(err) if status == 401 || matches!(err.code, -1022 | -2014 | -2015) => {
            ExchangeError::Authentication(format!("{} ({})", err.msg, err.code))
        }
        Ok(err) => ExchangeError::Api {
            code: err.code,
            msg: err.msg,
        },
        Err(_) => ExchangeError::Http {
            status,
            body: body.chars().take(512).collect(),
        },
    }
}

fn filters_for(info: ExchangeInfo, symbol: &str) -> ExchangeResult<SymbolFilters> {
    let entry = info
        .symbols
        .into_iter()
        .find(|s| s.symbol == symbol)
        .ok_or_else(|| ExchangeError::UnexpectedResponse(format!("Unknown symbol {}", symbol)))?;

    let mut filters = SymbolFilters {
        tick_size: Decimal::ZERO,
        step_size: Decimal::ZERO,
        min_qty: Decimal::ZERO,
    };
    for filter in entry.filters {
        match filter {
            SymbolFilter::Price { tick_size } => filters.tick_size = tick_size,
            SymbolFilter::LotSize { step_size, min_qty } => {
                filters.step_size = step_size;
                filters.min_qty = min_qty;
            }
            SymbolFilter::Other => {}
        }
    }
    Ok(filters)
}

fn balance_for(account: AccountInfo, asset: &str) -> Balance {
    account
        .balances
        .into_iter()
        .find(|b| b.asset == asset)
        .map(|b| Balance {
            asset: b.asset,
            free: b.free,
            locked: b.locked,
        })
        .unwrap_or_else(|| Balance::zero(asset))
}

/// Binance client for API interactions
pub struct BinanceClient {
    client: Client,
    config: BinanceConfig,
    limiter: RequestRateLimiter,
    filters: Mutex<HashMap<String, SymbolFilters>>,
}

impl BinanceClient {
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("dcabot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExchangeError::Network(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            "Binance client ready ({}, {})",
            if config.testnet { "testnet" } else { "mainnet" },
            config.api_base
        );

        Ok(Self {
            client,
            limiter: create_rate_limiter(config.rate_limit),
            config,
            filters: Mutex::new(HashMap::new()),
        })
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> ExchangeResult<T> {
        throttle(&self.limiter).await;

        let response = request
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !status.is_success() {
            let err = map_api_error(status.as_u16(), &body);
            debug!("Binance request failed: {}", err);
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|e| {
            ExchangeError::UnexpectedResponse(format!("Failed to parse response: {}", e))
        })
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        let url = format!("{}{}?{}", self.config.api_base, path, encode_params(params));
        self.send(self.client.get(url)).await
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        params.push(("recvWindow", self.config.recv_window_ms.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = encode_params(&params);
        let signature = sign_query(&self.config.credentials.api_secret, &query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.config.api_base, path, query, signature
        );

        let request = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.config.credentials.api_key);
        self.send(request).await
    }

    /// Tick and lot filters for a symbol, fetched once and cached.
    pub async fn symbol_filters(&self, symbol: &str) -> ExchangeResult<SymbolFilters> {
        let mut cache = self.filters.lock().await;
        if let Some(filters) = cache.get(symbol) {
            return Ok(*filters);
        }

        let info: ExchangeInfo = self
            .public_get("/api/v3/exchangeInfo", &[("symbol", symbol.to_string())])
            .await?;
        let filters = filters_for(info, symbol)?;
        debug!(
            "{} filters: tick {}, step {}, min qty {}",
            symbol, filters.tick_size, filters.step_size, filters.min_qty
        );
        cache.insert(symbol.to_string(), filters);
        Ok(filters)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    fn name(&self) -> &str {
        "Binance"
    }

    fn is_test(&self) -> bool {
        self.config.testnet
    }

    async fn current_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let ticker: TickerPrice = self
            .public_get("/api/v3/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Ok(ticker.price)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExchangeResult<OrderReport> {
        let filters = self.symbol_filters(symbol).await?;
        let price = filters.round_price(price);
        let quantity = filters.round_quantity(quantity);
        if price <= Decimal::ZERO || quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder(format!(
                "{} {} {} at {} after filter rounding",
                side, quantity, symbol, price
            )));
        }

        let order: BinanceOrder = self
            .signed(
                Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.as_str().to_string()),
                    ("type", "LIMIT".to_string()),
                    ("timeInForce", "GTC".to_string()),
                    ("quantity", quantity.to_string()),
                    ("price", price.to_string()),
                    ("newOrderRespType", "RESULT".to_string()),
                ],
            )
            .await?;

        let report = order.into_report()?;
        info!(
            "Binance accepted {} order {}: {} {} @ {}",
            report.side, report.exchange_order_id, report.orig_quantity, report.symbol, report.price
        );
        Ok(report)
    }

    async fn order_status(&self, symbol: &str, exchange_order_id: i64) -> ExchangeResult<OrderReport> {
        let order: BinanceOrder = self
            .signed(
                Method::GET,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", exchange_order_id.to_string()),
                ],
            )
            .await?;
        order.into_report()
    }

    async fn cancel_order(&self, symbol: &str, exchange_order_id: i64) -> ExchangeResult<()> {
        let order: BinanceOrder = self
            .signed(
                Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", exchange_order_id.to_string()),
                ],
            )
            .await?;
        info!("Canceled order {} ({})", order.order_id, order.status);
        Ok(())
    }

    async fn account_balance(&self, asset: &str) -> ExchangeResult<Balance> {
        let account: AccountInfo = self
            .signed(Method::GET, "/api/v3/account", Vec::new())
            .await?;
        Ok(balance_for(account, asset))
    }

    async fn list_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        let orders: Vec<BinanceOrder> = self
            .signed(
                Method::GET,
                "/api/v3/openOrders",
                vec![("symbol", symbol.to_string())],
            )
            .await?;

        let mut open = Vec::with_capacity(orders.len());
        for order in orders {
            match order.status.parse() {
                Ok(status) => open.push(OpenOrder {
                    exchange_order_id: order.order_id,
                    status,
                }),
                Err(e) => warn!("Skipping open order {}: {}", order.order_id, e),
            }
        }
        Ok(open)
    }
}
