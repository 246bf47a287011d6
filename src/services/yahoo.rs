use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Candle, FetchRange, FundamentalMetrics, FundamentalsSnapshot, Timeframe};
use crate::services::market_data::{FetchError, FundamentalsFetcher, MarketDataFetcher};
use crate::services::rate_limiter::SharedRateLimiter;

pub const YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Sets the session cookie the crumb endpoint requires
const YAHOO_COOKIE_URL: &str = "https://fc.yahoo.com";

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const QUOTE_SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData,assetProfile";

/// Yahoo Finance adapter for candles (chart v8) and fundamentals (quoteSummary v10).
///
/// Clones share the HTTP client, the crumb and the rate limiter.
#[derive(Clone)]
pub struct YahooClient {
    client: reqwest::Client,
    base_url: String,
    cookie_url: String,
    rate_limiter: Arc<SharedRateLimiter>,
    crumb: Arc<TokioMutex<Option<String>>>,
    request_timeout: Duration,
}

impl YahooClient {
    pub fn new(rate_limiter: Arc<SharedRateLimiter>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .build()?;

        Ok(Self {
            client,
            base_url: YAHOO_BASE_URL.to_string(),
            cookie_url: YAHOO_COOKIE_URL.to_string(),
            rate_limiter,
            crumb: Arc::new(TokioMutex::new(None)),
            request_timeout,
        })
    }

    /// Point the client at another host (proxies, recorded fixtures)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_cookie_url(mut self, cookie_url: impl Into<String>) -> Self {
        self.cookie_url = cookie_url.into();
        self
    }

    fn map_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.request_timeout)
        } else if err.is_decode() {
            FetchError::Parse(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }

    /// Rate-limited GET returning status and body
    async fn get(&self, url: &str, query: &[(&str, String)]) -> std::result::Result<(u16, String), FetchError> {
        self.rate_limiter.enforce_rate_limit().await;

        let response = self.client.get(url).query(query).send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_error(e))?;
        debug!(url, status, bytes = body.len(), "Yahoo response");
        Ok((status, body))
    }

    async fn crumb(&self) -> std::result::Result<String, FetchError> {
        let mut cached = self.crumb.lock().await;
        if let Some(crumb) = cached.as_ref() {
            return Ok(crumb.clone());
        }

        // the cookie host answers 404 but still sets the session cookie
        self.client
            .get(&self.cookie_url)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let (status, body) = self.get(&format!("{}/v1/test/getcrumb", self.base_url), &[]).await?;
        classify_status(status, &body)?;
        let crumb = body.trim().to_string();
        if crumb.is_empty() || crumb.contains('<') {
            return Err(FetchError::RateLimited);
        }

        *cached = Some(crumb.clone());
        Ok(crumb)
    }
}

#[async_trait]
impl MarketDataFetcher for YahooClient {
    async fn fetch(&self, symbol: &str, timeframe: Timeframe, range: &FetchRange) -> std::result::Result<Vec<Candle>, FetchError> {
        let interval = timeframe
            .yahoo_interval()
            .ok_or_else(|| FetchError::InvalidRequest(format!("{} is not served by Yahoo", timeframe)))?;

        let mut query = vec![("interval", interval.to_string()), ("includePrePost", "false".to_string())];
        match range.start {
            Some(start) => {
                query.push(("period1", start.timestamp().to_string()));
                query.push(("period2", range.end.timestamp().to_string()));
            }
            None => query.push(("range", "max".to_string())),
        }

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        let (status, body) = self.get(&url, &query).await?;
        classify_status(status, &body)?;
        let candles = parse_chart(symbol, &body)?;
        debug!(symbol, timeframe = %timeframe, rows = candles.len(), "Fetched candles");
        Ok(candles)
    }
}

#[async_trait]
impl FundamentalsFetcher for YahooClient {
    async fn fetch_fundamentals(&self, symbol: &str) -> std::result::Result<FundamentalsSnapshot, FetchError> {
        let crumb = self.crumb().await?;
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, symbol);
        let query = [("modules", QUOTE_SUMMARY_MODULES.to_string()), ("crumb", crumb)];

        let (status, body) = self.get(&url, &query).await?;
        if status == 401 {
            // stale crumb; the retry picks up a fresh one
            warn!(symbol, "Yahoo rejected crumb, refreshing");
            self.crumb.lock().await.take();
        }
        classify_status(status, &body)?;
        parse_quote_summary(symbol, &body, Utc::now())
    }
}

/// Map an HTTP status to the retry taxonomy. Yahoo answers throttled clients
/// with 429, or with 401/403 and an empty or HTML body.
fn classify_status(status: u16, body: &str) -> std::result::Result<(), FetchError> {
    match status {
        200..=299 => {
            let trimmed = body.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('<') {
                Err(FetchError::RateLimited)
            } else {
                Ok(())
            }
        }
        401 | 403 | 429 => Err(FetchError::RateLimited),
        404 => Err(FetchError::NotFound(error_description(body).unwrap_or_else(|| "no data found".to_string()))),
        500..=599 => Err(FetchError::Upstream {
            status,
            message: error_description(body).unwrap_or_else(|| "server error".to_string()),
        }),
        _ => Err(FetchError::InvalidRequest(format!(
            "HTTP {}: {}",
            status,
            error_description(body).unwrap_or_else(|| "rejected".to_string())
        ))),
    }
}

/// `description` of a `{"chart"|"quoteSummary": {"error": {...}}}` body
fn error_description(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let envelope = value.get("chart").or_else(|| value.get("quoteSummary")).or_else(|| value.get("finance"))?;
    let error = envelope.get("error")?;
    error
        .get("description")
        .and_then(Value::as_str)
        .or_else(|| error.get("code").and_then(Value::as_str))
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<UpstreamError>,
}

#[derive(Debug, Deserialize)]
struct UpstreamError {
    code: String,
    description: Option<String>,
}

impl UpstreamError {
    fn into_fetch_error(self, symbol: &str) -> FetchError {
        let description = self.description.unwrap_or_else(|| self.code.clone());
        if self.code.eq_ignore_ascii_case("Not Found") {
            FetchError::NotFound(format!("{}: {}", symbol, description))
        } else {
            FetchError::InvalidRequest(format!("{}: {}", self.code, description))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Decode a chart v8 body. Rows with any missing price are dropped; a missing
/// volume counts as zero.
pub fn parse_chart(symbol: &str, body: &str) -> std::result::Result<Vec<Candle>, FetchError> {
    let envelope: ChartEnvelope =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("{}: {}", symbol, e)))?;

    if let Some(error) = envelope.chart.error {
        return Err(error.into_fetch_error(symbol));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };
    let quote = result.indicators.quote.into_iter().next().unwrap_or_default();

    let mut candles = Vec::with_capacity(result.timestamp.len());
    let mut dropped = 0usize;
    for (i, ts) in result.timestamp.iter().enumerate() {
        let field = |series: &[Option<f64>]| series.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) =
            (field(&quote.open), field(&quote.high), field(&quote.low), field(&quote.close))
        else {
            dropped += 1;
            continue;
        };
        let Some(time) = DateTime::<Utc>::from_timestamp(*ts, 0) else {
            dropped += 1;
            continue;
        };
        let volume = field(&quote.volume).filter(|v| v.is_finite() && *v > 0.0).unwrap_or(0.0);
        candles.push(Candle::new(time, open, high, low, close, volume.round() as u64));
    }

    if dropped > 0 {
        debug!(symbol, dropped, "Dropped incomplete rows from chart payload");
    }
    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

fn module_value<'a>(root: &'a Value, module: &str, key: &str) -> Option<&'a Value> {
    root.get(module)?.get(key)
}

/// Numeric field, either plain or wrapped as `{"raw": x, "fmt": "..."}`
fn raw_f64(root: &Value, module: &str, key: &str) -> Option<f64> {
    let value = module_value(root, module, key)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(o) => o.get("raw").and_then(Value::as_f64),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn raw_str(root: &Value, module: &str, key: &str) -> Option<String> {
    module_value(root, module, key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Decode a quoteSummary v10 body into a snapshot
pub fn parse_quote_summary(
    symbol: &str,
    body: &str,
    fetched_at: DateTime<Utc>,
) -> std::result::Result<FundamentalsSnapshot, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("{}: {}", symbol, e)))?;
    let summary = value
        .get("quoteSummary")
        .ok_or_else(|| FetchError::Parse(format!("{}: missing quoteSummary", symbol)))?;

    if let Some(error) = summary.get("error").filter(|e| !e.is_null()) {
        let error: UpstreamError =
            serde_json::from_value(error.clone()).map_err(|e| FetchError::Parse(format!("{}: {}", symbol, e)))?;
        return Err(error.into_fetch_error(symbol));
    }

    let root = summary
        .get("result")
        .and_then(Value::as_array)
        .and_then(|r| r.first())
        .cloned()
        .ok_or_else(|| FetchError::NotFound(format!("{}: no fundamentals available", symbol)))?;

    let r = &root;
    let metrics = FundamentalMetrics {
        current_price: raw_f64(r, "financialData", "currentPrice")
            .or_else(|| raw_f64(r, "price", "regularMarketPrice")),
        previous_close: raw_f64(r, "summaryDetail", "previousClose"),
        fifty_two_week_low: raw_f64(r, "summaryDetail", "fiftyTwoWeekLow"),
        fifty_two_week_high: raw_f64(r, "summaryDetail", "fiftyTwoWeekHigh"),
        market_cap: raw_f64(r, "summaryDetail", "marketCap").or_else(|| raw_f64(r, "price", "marketCap")),
        enterprise_value: raw_f64(r, "defaultKeyStatistics", "enterpriseValue"),
        trailing_pe: raw_f64(r, "summaryDetail", "trailingPE"),
        forward_pe: raw_f64(r, "summaryDetail", "forwardPE")
            .or_else(|| raw_f64(r, "defaultKeyStatistics", "forwardPE")),
        price_to_book: raw_f64(r, "defaultKeyStatistics", "priceToBook"),
        peg_ratio: raw_f64(r, "defaultKeyStatistics", "pegRatio"),
        profit_margins: raw_f64(r, "financialData", "profitMargins"),
        operating_margins: raw_f64(r, "financialData", "operatingMargins"),
        return_on_equity: raw_f64(r, "financialData", "returnOnEquity"),
        return_on_assets: raw_f64(r, "financialData", "returnOnAssets"),
        revenue_growth: raw_f64(r, "financialData", "revenueGrowth"),
        earnings_growth: raw_f64(r, "financialData", "earningsGrowth"),
        total_cash: raw_f64(r, "financialData", "totalCash"),
        total_debt: raw_f64(r, "financialData", "totalDebt"),
        debt_to_equity: raw_f64(r, "financialData", "debtToEquity"),
        current_ratio: raw_f64(r, "financialData", "currentRatio"),
        dividend_rate: raw_f64(r, "summaryDetail", "dividendRate"),
        dividend_yield: raw_f64(r, "summaryDetail", "dividendYield"),
        payout_ratio: raw_f64(r, "summaryDetail", "payoutRatio"),
        average_volume: raw_f64(r, "summaryDetail", "averageVolume"),
        shares_outstanding: raw_f64(r, "defaultKeyStatistics", "sharesOutstanding"),
        beta: raw_f64(r, "summaryDetail", "beta").or_else(|| raw_f64(r, "defaultKeyStatistics", "beta")),
        target_mean_price: raw_f64(r, "financialData", "targetMeanPrice"),
        recommendation_key: raw_str(r, "financialData", "recommendationKey"),
        sector: raw_str(r, "assetProfile", "sector"),
        industry: raw_str(r, "assetProfile", "industry"),
    };

    if metrics.populated() == 0 {
        return Err(FetchError::NotFound(format!("{}: no fundamentals available", symbol)));
    }

    Ok(FundamentalsSnapshot {
        symbol: symbol.to_string(),
        metrics,
        raw_data: root,
        updated_at: fetched_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Local HTTP/1.1 responder: one queued reply per connection
    struct StubServer {
        base: String,
        requests: Arc<Mutex<Vec<String>>>,
    }

    impl StubServer {
        async fn start(replies: Vec<(u16, &'static str)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&requests);

            tokio::spawn(async move {
                for (status, body) in replies {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let mut head = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => head.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&head);
                    log.lock().unwrap().push(head.lines().next().unwrap_or_default().to_string());

                    let response = format!(
                        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });

            Self { base, requests }
        }

        fn client(&self) -> YahooClient {
            YahooClient::new(Arc::new(SharedRateLimiter::new(Duration::ZERO)), Duration::from_secs(5))
                .unwrap()
                .with_base_url(&self.base)
                .with_cookie_url(format!("{}/cookie", self.base))
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    const CHART_OK: &str = r#"{
        "chart": {
            "result": [{
                "meta": {"symbol": "TCS.NS", "currency": "INR"},
                "timestamp": [1718250300, 1718336700, 1718595900],
                "indicators": {"quote": [{
                    "open":   [3800.0, null, 3850.5],
                    "high":   [3850.0, 3870.0, 3890.0],
                    "low":    [3790.0, 3810.0, 3840.0],
                    "close":  [3840.0, 3860.0, 3880.0],
                    "volume": [1200000, 900000, null]
                }]}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_chart_drops_null_rows() {
        let candles = parse_chart("TCS.NS", CHART_OK).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].time, Utc.timestamp_opt(1718250300, 0).unwrap());
        assert_eq!(candles[0].open, 3800.0);
        assert_eq!(candles[0].volume, 1_200_000);
        // missing volume becomes zero, the row is kept
        assert_eq!(candles[1].volume, 0);
        assert_eq!(candles[1].close, 3880.0);
    }

    #[test]
    fn test_parse_chart_empty_result() {
        let body = r#"{"chart": {"result": [{"meta": {}, "indicators": {"quote": [{}]}}], "error": null}}"#;
        assert!(parse_chart("TCS.NS", body).unwrap().is_empty());

        let no_result = r#"{"chart": {"result": null, "error": null}}"#;
        assert!(parse_chart("TCS.NS", no_result).unwrap().is_empty());
    }

    #[test]
    fn test_parse_chart_upstream_error() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        assert!(matches!(parse_chart("GONE.NS", body), Err(FetchError::NotFound(_))));

        let bad = r#"{"chart": {"result": null, "error": {"code": "Bad Request", "description": "Invalid input - interval=7m is not supported"}}}"#;
        assert!(matches!(parse_chart("TCS.NS", bad), Err(FetchError::InvalidRequest(_))));
    }

    #[test]
    fn test_parse_chart_garbage_is_parse_error() {
        let err = parse_chart("TCS.NS", "{\"chart\": 12}").unwrap_err();
        assert!(matches!(err, FetchError::Parse(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(200, CHART_OK).is_ok());
        assert_eq!(classify_status(200, ""), Err(FetchError::RateLimited));
        assert_eq!(classify_status(200, "<html>Too many requests</html>"), Err(FetchError::RateLimited));
        assert_eq!(classify_status(429, "Too Many Requests"), Err(FetchError::RateLimited));
        assert!(matches!(
            classify_status(404, r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#),
            Err(FetchError::NotFound(d)) if d == "No data found"
        ));
        assert!(matches!(classify_status(503, ""), Err(FetchError::Upstream { status: 503, .. })));
        assert!(matches!(classify_status(422, "{}"), Err(FetchError::InvalidRequest(_))));
    }

    const SUMMARY_OK: &str = r#"{
        "quoteSummary": {
            "result": [{
                "price": {"regularMarketPrice": {"raw": 2950.5, "fmt": "2,950.50"}, "marketCap": {"raw": 19950000000000}},
                "summaryDetail": {
                    "previousClose": {"raw": 2940.0},
                    "trailingPE": {"raw": 28.4, "fmt": "28.40"},
                    "dividendYield": {"raw": 0.0034},
                    "beta": {"raw": 0.81},
                    "fiftyTwoWeekHigh": {}
                },
                "defaultKeyStatistics": {"priceToBook": {"raw": 2.35}, "sharesOutstanding": {"raw": 6766000000}},
                "financialData": {
                    "currentPrice": {"raw": 2951.0},
                    "returnOnEquity": {"raw": 0.089},
                    "recommendationKey": "buy"
                },
                "assetProfile": {"sector": "Energy", "industry": "Oil & Gas Refining & Marketing"}
            }],
            "error": null
        }
    }"#;

    #[test]
    fn test_parse_quote_summary() {
        let at = Utc.with_ymd_and_hms(2024, 6, 14, 12, 0, 0).unwrap();
        let snapshot = parse_quote_summary("RELIANCE.NS", SUMMARY_OK, at).unwrap();
        let m = &snapshot.metrics;
        assert_eq!(snapshot.symbol, "RELIANCE.NS");
        assert_eq!(snapshot.updated_at, at);
        assert_eq!(m.current_price, Some(2951.0));
        assert_eq!(m.previous_close, Some(2940.0));
        assert_eq!(m.trailing_pe, Some(28.4));
        assert_eq!(m.market_cap, Some(19950000000000.0));
        assert_eq!(m.price_to_book, Some(2.35));
        assert_eq!(m.beta, Some(0.81));
        assert_eq!(m.fifty_two_week_high, None);
        assert_eq!(m.recommendation_key.as_deref(), Some("buy"));
        assert_eq!(m.sector.as_deref(), Some("Energy"));
        assert!(snapshot.raw_data.get("assetProfile").is_some());
    }

    #[test]
    fn test_parse_quote_summary_errors() {
        let at = Utc::now();
        let missing = r#"{"quoteSummary": {"result": null, "error": {"code": "Not Found", "description": "Quote not found for ticker symbol: NOPE.NS"}}}"#;
        assert!(matches!(parse_quote_summary("NOPE.NS", missing, at), Err(FetchError::NotFound(_))));

        let empty = r#"{"quoteSummary": {"result": [{}], "error": null}}"#;
        assert!(matches!(parse_quote_summary("NOPE.NS", empty, at), Err(FetchError::NotFound(_))));

        assert!(matches!(parse_quote_summary("X.NS", "not json", at), Err(FetchError::Parse(_))));
    }

    #[tokio::test]
    async fn test_fetch_sends_period_window() {
        let server = StubServer::start(vec![(200, CHART_OK)]).await;
        let start = Utc.with_ymd_and_hms(2024, 6, 19, 3, 45, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 6, 19, 9, 0, 0).unwrap();
        let range = FetchRange { start: Some(start), end };

        let candles = server.client().fetch("TCS.NS", Timeframe::Minute5, &range).await.unwrap();
        assert_eq!(candles.len(), 2);

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let line = &requests[0];
        assert!(line.starts_with("GET /v8/finance/chart/TCS.NS?"), "{}", line);
        assert!(line.contains("interval=5m"));
        assert!(line.contains("includePrePost=false"));
        assert!(line.contains(&format!("period1={}", start.timestamp())));
        assert!(line.contains(&format!("period2={}", end.timestamp())));
        assert!(!line.contains("range="));
    }

    #[tokio::test]
    async fn test_fetch_without_start_asks_for_max_range() {
        let server = StubServer::start(vec![(200, CHART_OK)]).await;
        let range = FetchRange { start: None, end: Utc::now() };

        server.client().fetch("TCS.NS", Timeframe::Day1, &range).await.unwrap();
        let line = &server.requests()[0];
        assert!(line.contains("interval=1d"));
        assert!(line.contains("range=max"));
        assert!(!line.contains("period1"));
    }

    #[tokio::test]
    async fn test_derived_timeframe_is_rejected_before_any_request() {
        let server = StubServer::start(vec![]).await;
        let range = FetchRange { start: None, end: Utc::now() };

        let err = server.client().fetch("TCS.NS", Timeframe::Minute75, &range).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRequest(_)));
        assert!(!err.is_transient());
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_maps_http_404_to_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let server = StubServer::start(vec![(404, body)]).await;
        let range = FetchRange { start: None, end: Utc::now() };

        let err = server.client().fetch("GONE.NS", Timeframe::Day1, &range).await.unwrap_err();
        assert!(matches!(err, FetchError::NotFound(ref d) if d.contains("delisted")));
    }

    #[tokio::test]
    async fn test_rejected_crumb_is_refreshed_on_next_call() {
        let server = StubServer::start(vec![
            (404, ""),
            (200, "abc"),
            (401, ""),
            (404, ""),
            (200, "def"),
            (200, SUMMARY_OK),
            (200, SUMMARY_OK),
        ])
        .await;
        let client = server.client();

        let err = client.fetch_fundamentals("RELIANCE.NS").await.unwrap_err();
        assert_eq!(err, FetchError::RateLimited);
        assert!(err.is_transient());

        let snapshot = client.fetch_fundamentals("RELIANCE.NS").await.unwrap();
        assert_eq!(snapshot.metrics.current_price, Some(2951.0));

        // cached crumb, no new handshake
        client.fetch_fundamentals("RELIANCE.NS").await.unwrap();

        let requests = server.requests();
        assert_eq!(requests.len(), 7);
        assert!(requests[0].starts_with("GET /cookie"));
        assert!(requests[1].starts_with("GET /v1/test/getcrumb"));
        assert!(requests[2].starts_with("GET /v10/finance/quoteSummary/RELIANCE.NS?"));
        assert!(requests[2].contains("crumb=abc"));
        assert!(requests[4].starts_with("GET /v1/test/getcrumb"));
        assert!(requests[5].contains("crumb=def"));
        assert!(requests[6].contains("crumb=def"));
    }
}
