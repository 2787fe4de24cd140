//! Binance USDT-margined futures REST adapter.
//!
//! Market data endpoints are public; order endpoints sign the query string
//! with HMAC-SHA256 per the exchange's authentication scheme. Credentials
//! come from `BINANCE_API_KEY` / `BINANCE_API_SECRET`.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::market::{Candle, Timeframe};
use crate::types::Direction;

use super::{
    with_retry, ExchangeError, ExecutionGateway, MarketDataFeed, MAX_CANDLES_PER_FETCH,
    REQUEST_TIMEOUT,
};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";

type HmacSha256 = Hmac<Sha256>;

pub struct BinanceFuturesClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl BinanceFuturesClient {
    /// Public-data client; order endpoints will fail until credentials are
    /// present in the environment.
    pub fn new() -> Result<Self, ExchangeError> {
        let base_url =
            std::env::var("BINANCE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::with_base_url(base_url)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self, ExchangeError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: std::env::var("BINANCE_API_KEY").ok(),
            api_secret: std::env::var("BINANCE_API_SECRET").ok(),
        })
    }

    fn credentials(&self) -> Result<(&str, &str), ExchangeError> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(ExchangeError::Malformed(
                "BINANCE_API_KEY / BINANCE_API_SECRET not set".to_string(),
            )),
        }
    }

    fn sign(secret: &str, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_millis() as u64
    }

    async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value, ExchangeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Malformed(e.to_string()))
    }

    async fn signed_request(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value, ExchangeError> {
        let (key, secret) = self.credentials()?;
        params.push(("timestamp".to_string(), Self::timestamp_ms().to_string()));
        params.push(("recvWindow".to_string(), "5000".to_string()));
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = Self::sign(secret, &query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", key)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Malformed(e.to_string()))
    }
}

fn field_decimal(value: &Value, context: &str) -> Result<Decimal, ExchangeError> {
    let raw = value
        .as_str()
        .ok_or_else(|| ExchangeError::Malformed(format!("{context}: expected string")))?;
    Decimal::from_str(raw).map_err(|e| ExchangeError::Malformed(format!("{context}: {e}")))
}

/// One kline entry is a positional array:
/// `[open_time, open, high, low, close, volume, close_time, quote_vol,
///   trades, taker_buy_base, taker_buy_quote, ignore]`.
fn parse_kline(symbol: &str, timeframe: Timeframe, entry: &Value) -> Result<Candle, ExchangeError> {
    let fields = entry
        .as_array()
        .ok_or_else(|| ExchangeError::Malformed("kline entry is not an array".to_string()))?;
    if fields.len() < 10 {
        return Err(ExchangeError::Malformed(format!(
            "kline entry has {} fields",
            fields.len()
        )));
    }
    Ok(Candle {
        timestamp: fields[0]
            .as_i64()
            .ok_or_else(|| ExchangeError::Malformed("kline open_time".to_string()))?,
        symbol: symbol.to_string(),
        timeframe,
        open: field_decimal(&fields[1], "kline open")?,
        high: field_decimal(&fields[2], "kline high")?,
        low: field_decimal(&fields[3], "kline low")?,
        close: field_decimal(&fields[4], "kline close")?,
        volume: field_decimal(&fields[5], "kline volume")?,
        taker_buy_volume: Some(field_decimal(&fields[9], "kline taker_buy")?),
    })
}

#[async_trait]
impl MarketDataFeed for BinanceFuturesClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
        start_time_ms: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit = limit.min(MAX_CANDLES_PER_FETCH);
        let mut query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("interval".to_string(), timeframe.token().to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(start) = start_time_ms {
            query.push(("startTime".to_string(), start.to_string()));
        }

        let payload = with_retry("fetch_candles", || {
            self.get_json("/fapi/v1/klines", &query)
        })
        .await?;

        let entries = payload
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("klines payload is not an array".to_string()))?;
        let mut candles = entries
            .iter()
            .map(|e| parse_kline(symbol, timeframe, e))
            .collect::<Result<Vec<_>, _>>()?;
        candles.sort_by_key(|c| c.timestamp);
        debug!(symbol, tf = timeframe.token(), count = candles.len(), "Fetched klines");
        Ok(candles)
    }

    async fn current_price(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let query = vec![("symbol".to_string(), symbol.to_string())];
        let payload = with_retry("current_price", || {
            self.get_json("/fapi/v1/ticker/price", &query)
        })
        .await?;
        field_decimal(&payload["price"], "ticker price")
    }
}

#[async_trait]
impl ExecutionGateway for BinanceFuturesClient {
    async fn place_order(
        &self,
        symbol: &str,
        direction: Direction,
        quantity: Decimal,
        limit_price: Option<Decimal>,
    ) -> Result<String, ExchangeError> {
        let side = match direction {
            Direction::Long => "BUY",
            Direction::Short => "SELL",
        };
        let mut params = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("side".to_string(), side.to_string()),
            ("quantity".to_string(), quantity.to_string()),
        ];
        match limit_price {
            Some(price) => {
                params.push(("type".to_string(), "LIMIT".to_string()));
                params.push(("timeInForce".to_string(), "GTC".to_string()));
                params.push(("price".to_string(), price.to_string()));
            }
            None => params.push(("type".to_string(), "MARKET".to_string())),
        }

        let payload = self
            .signed_request(reqwest::Method::POST, "/fapi/v1/order", params)
            .await?;
        payload["orderId"]
            .as_i64()
            .map(|id| id.to_string())
            .ok_or_else(|| ExchangeError::Malformed("order response missing orderId".to_string()))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        self.signed_request(
            reqwest::Method::DELETE,
            "/fapi/v1/order",
            vec![
                ("symbol".to_string(), symbol.to_string()),
                ("orderId".to_string(), order_id.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Decimal, ExchangeError> {
        let payload = self
            .signed_request(
                reqwest::Method::GET,
                "/fapi/v2/positionRisk",
                vec![("symbol".to_string(), symbol.to_string())],
            )
            .await?;
        let positions = payload
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("positionRisk payload".to_string()))?;
        positions
            .first()
            .map(|p| field_decimal(&p["positionAmt"], "positionAmt"))
            .unwrap_or(Ok(Decimal::ZERO))
    }

    async fn close_position(&self, symbol: &str) -> Result<(), ExchangeError> {
        let amount = self.get_position(symbol).await?;
        if amount.is_zero() {
            return Ok(());
        }
        let direction = if amount > Decimal::ZERO {
            Direction::Short
        } else {
            Direction::Long
        };
        self.place_order(symbol, direction, amount.abs(), None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_entry() {
        let entry = json!([
            1700000000000i64,
            "64000.10",
            "64100.00",
            "63950.55",
            "64050.00",
            "123.456",
            1700000299999i64,
            "7901234.5",
            4567,
            "70.1",
            "4489000.2",
            "0"
        ]);
        let candle = parse_kline("BTCUSDT", Timeframe::M5, &entry).unwrap();
        assert_eq!(candle.timestamp, 1_700_000_000_000);
        assert_eq!(candle.open, Decimal::from_str("64000.10").unwrap());
        assert_eq!(candle.low, Decimal::from_str("63950.55").unwrap());
        assert_eq!(candle.taker_buy_volume, Some(Decimal::from_str("70.1").unwrap()));
    }

    #[test]
    fn short_kline_entry_is_malformed() {
        let entry = json!([1700000000000i64, "1", "2"]);
        assert!(matches!(
            parse_kline("BTCUSDT", Timeframe::M1, &entry),
            Err(ExchangeError::Malformed(_))
        ));
    }

    #[test]
    fn numeric_kline_field_is_malformed() {
        // exchange sends prices as strings; a bare number is a payload bug
        let entry = json!([
            1700000000000i64, 64000.1, "64100", "63950", "64050", "123",
            1700000299999i64, "0", 0, "0", "0", "0"
        ]);
        assert!(parse_kline("BTCUSDT", Timeframe::M1, &entry).is_err());
    }

    #[test]
    fn signature_is_stable_hmac() {
        let sig = BinanceFuturesClient::sign("secret", "symbol=BTCUSDT&timestamp=1");
        assert_eq!(sig.len(), 64);
        assert_eq!(sig, BinanceFuturesClient::sign("secret", "symbol=BTCUSDT&timestamp=1"));
        assert_ne!(sig, BinanceFuturesClient::sign("other", "symbol=BTCUSDT&timestamp=1"));
    }
}
