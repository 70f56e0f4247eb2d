//! Tushare Pro adapter.
//!
//! # API Documentation
//! https://tushare.pro/document/2
//!
//! # Endpoints used
//! - `daily_basic`: daily valuation snapshot (close, PE TTM, PB, dividend yield, market value)
//! - `fina_indicator`: quarterly financial indicators
//! - `cashflow`: cash flow statement
//! - `income`: income statement
//!
//! Every endpoint answers with a column-oriented table:
//! `{"code": 0, "msg": "", "data": {"fields": [...], "items": [[...], ...]}}`.
//! Rows are decoded by column name so field order changes are harmless.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{CashFlowRow, DailyBasicRow, FinancialIndicatorRow, IncomeRow, MarketDataProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "http://api.tushare.pro";

const DAILY_BASIC_FIELDS: &[&str] = &[
    "ts_code", "trade_date", "close", "pe_ttm", "pb", "dv_ttm", "total_mv",
];
const FINA_INDICATOR_FIELDS: &[&str] = &[
    "ts_code",
    "ann_date",
    "end_date",
    "roe",
    "grossprofit_margin",
    "debt_to_assets",
    "or_yoy",
    "netprofit_yoy",
];
const CASHFLOW_FIELDS: &[&str] = &["ts_code", "end_date", "n_cashflow_act", "c_pay_acq_const_fiolta"];
const INCOME_FIELDS: &[&str] = &["ts_code", "end_date", "total_revenue", "n_income"];

/// Tushare Pro HTTP client.
pub struct TushareProvider {
    /// API token
    token: String,
    /// HTTP client
    client: reqwest::Client,
    /// API base URL
    base_url: String,
}

impl TushareProvider {
    /// Create a new adapter against the public endpoint.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_endpoint(token, DEFAULT_BASE_URL, Duration::from_secs(30))
    }

    /// Create an adapter against a custom endpoint.
    pub fn with_endpoint(token: impl Into<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            token: token.into(),
            client,
            base_url: base_url.into(),
        }
    }

    /// Create from config. Returns `None` when no token is set.
    pub fn from_config(config: &ProviderConfig) -> Option<Self> {
        config.token.as_ref().filter(|t| !t.is_empty()).map(|token| {
            Self::with_endpoint(
                token.clone(),
                config.base_url.clone(),
                Duration::from_secs(config.timeout_secs),
            )
        })
    }

    /// Call one Tushare endpoint and return its table.
    async fn call_api(
        &self,
        api_name: &str,
        params: HashMap<&str, String>,
        fields: &[&str],
    ) -> Result<TushareTable, ProviderError> {
        let request = TushareRequest {
            api_name: api_name.to_string(),
            token: self.token.clone(),
            params: params.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            fields: fields.join(","),
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited(format!("HTTP 429 from {}", api_name)));
        }
        if status.is_server_error() {
            return Err(ProviderError::Network(format!("HTTP {} from {}", status, api_name)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                code: i64::from(status.as_u16()),
                msg: body,
            });
        }

        let result: TushareResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(format!("{}: {}", api_name, e)))?;

        if result.code != 0 {
            return Err(classify_api_error(result.code, result.msg.unwrap_or_default()));
        }

        let table = result.data.unwrap_or_default();
        debug!(api = api_name, rows = table.items.len(), "Tushare response received");
        Ok(table)
    }
}

#[async_trait]
impl MarketDataProvider for TushareProvider {
    fn name(&self) -> &'static str {
        "tushare"
    }

    async fn daily_basic(
        &self,
        ts_code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBasicRow>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("ts_code", ts_code.to_string());
        params.insert("start_date", start.format("%Y%m%d").to_string());
        params.insert("end_date", end.format("%Y%m%d").to_string());

        let table = self.call_api("daily_basic", params, DAILY_BASIC_FIELDS).await?;
        Ok(parse_daily_basic(ts_code, &table))
    }

    async fn financial_indicators(
        &self,
        ts_code: &str,
    ) -> Result<Vec<FinancialIndicatorRow>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("ts_code", ts_code.to_string());

        let table = self.call_api("fina_indicator", params, FINA_INDICATOR_FIELDS).await?;
        Ok(parse_financial_indicators(&table))
    }

    async fn cash_flow(&self, ts_code: &str) -> Result<Vec<CashFlowRow>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("ts_code", ts_code.to_string());

        let table = self.call_api("cashflow", params, CASHFLOW_FIELDS).await?;
        Ok(parse_cash_flow(&table))
    }

    async fn income(&self, ts_code: &str) -> Result<Vec<IncomeRow>, ProviderError> {
        let mut params = HashMap::new();
        params.insert("ts_code", ts_code.to_string());

        let table = self.call_api("income", params, INCOME_FIELDS).await?;
        Ok(parse_income(&table))
    }
}

fn classify_api_error(code: i64, msg: String) -> ProviderError {
    match code {
        // 每分钟/每天访问次数超限
        40203 => ProviderError::RateLimited(msg),
        // token 无效 / 积分不足
        40001 | 40101 => ProviderError::Auth(msg),
        _ => ProviderError::Api { code, msg },
    }
}

// ============================================================================
// Table decoding
// ============================================================================

/// Column-oriented result table.
#[derive(Debug, Default, Deserialize)]
struct TushareTable {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl TushareTable {
    fn column(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }

    /// Column indexes for `names`, or `None` if any is missing.
    fn require(&self, api: &str, names: &[&str]) -> Option<Vec<usize>> {
        let found: Option<Vec<usize>> = names.iter().map(|n| self.column(n)).collect();
        if found.is_none() && !self.items.is_empty() {
            warn!(api, expected = ?names, got = ?self.fields, "Response missing expected columns");
        }
        found
    }
}

fn cell_f64(row: &[Value], idx: Option<usize>) -> Option<f64> {
    match row.get(idx?)? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn cell_date(row: &[Value], idx: Option<usize>) -> Option<NaiveDate> {
    match row.get(idx?)? {
        Value::String(s) => parse_tushare_date(s),
        Value::Number(n) => parse_tushare_date(&n.to_string()),
        _ => None,
    }
}

/// Parse `YYYYMMDD` (also accepts `YYYY-MM-DD`).
pub fn parse_tushare_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

fn parse_daily_basic(ts_code: &str, table: &TushareTable) -> Vec<DailyBasicRow> {
    let Some(cols) = table.require("daily_basic", &["trade_date"]) else {
        return Vec::new();
    };
    let date_idx = cols[0];
    let close = table.column("close");
    let pe_ttm = table.column("pe_ttm");
    let pb = table.column("pb");
    let dv_ttm = table.column("dv_ttm");
    let total_mv = table.column("total_mv");
    let code = table.column("ts_code");

    let mut skipped = 0usize;
    let rows: Vec<DailyBasicRow> = table
        .items
        .iter()
        .filter_map(|row| {
            let Some(trade_date) = cell_date(row, Some(date_idx)) else {
                skipped += 1;
                return None;
            };
            let ts_code = code
                .and_then(|i| row.get(i))
                .and_then(Value::as_str)
                .unwrap_or(ts_code)
                .to_string();
            Some(DailyBasicRow {
                ts_code,
                trade_date,
                close: cell_f64(row, close),
                pe_ttm: cell_f64(row, pe_ttm),
                pb: cell_f64(row, pb),
                dv_ttm: cell_f64(row, dv_ttm),
                total_mv: cell_f64(row, total_mv),
            })
        })
        .collect();

    if skipped > 0 {
        warn!(ts_code, skipped, "Dropped daily_basic rows with unparsable trade_date");
    }
    rows
}

fn parse_financial_indicators(table: &TushareTable) -> Vec<FinancialIndicatorRow> {
    if table.require("fina_indicator", &["end_date"]).is_none() {
        return Vec::new();
    }
    let end_date = table.column("end_date");
    let ann_date = table.column("ann_date");
    let roe = table.column("roe");
    let gross = table.column("grossprofit_margin");
    let debt = table.column("debt_to_assets");
    let or_yoy = table.column("or_yoy");
    let np_yoy = table.column("netprofit_yoy");

    table
        .items
        .iter()
        .map(|row| FinancialIndicatorRow {
            end_date: cell_date(row, end_date),
            ann_date: cell_date(row, ann_date),
            roe: cell_f64(row, roe),
            grossprofit_margin: cell_f64(row, gross),
            debt_to_assets: cell_f64(row, debt),
            or_yoy: cell_f64(row, or_yoy),
            netprofit_yoy: cell_f64(row, np_yoy),
        })
        .collect()
}

fn parse_cash_flow(table: &TushareTable) -> Vec<CashFlowRow> {
    if table.require("cashflow", &["end_date", "n_cashflow_act"]).is_none() {
        return Vec::new();
    }
    let end_date = table.column("end_date");
    let operating = table.column("n_cashflow_act");
    let capex = table.column("c_pay_acq_const_fiolta");

    table
        .items
        .iter()
        .map(|row| CashFlowRow {
            end_date: cell_date(row, end_date),
            n_cashflow_act: cell_f64(row, operating),
            capex: cell_f64(row, capex),
        })
        .collect()
}

fn parse_income(table: &TushareTable) -> Vec<IncomeRow> {
    if table.require("income", &["end_date"]).is_none() {
        return Vec::new();
    }
    let end_date = table.column("end_date");
    let revenue = table.column("total_revenue");
    let net_income = table.column("n_income");

    table
        .items
        .iter()
        .map(|row| IncomeRow {
            end_date: cell_date(row, end_date),
            total_revenue: cell_f64(row, revenue),
            n_income: cell_f64(row, net_income),
        })
        .collect()
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct TushareRequest {
    api_name: String,
    token: String,
    params: HashMap<String, String>,
    fields: String,
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    msg: Option<String>,
    data: Option<TushareTable>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> TushareTable {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_adapter_creation() {
        let adapter = TushareProvider::new("test_token");
        assert_eq!(adapter.name(), "tushare");
        assert_eq!(adapter.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_from_config_requires_token() {
        let mut config = ProviderConfig::default();
        assert!(TushareProvider::from_config(&config).is_none());

        config.token = Some(String::new());
        assert!(TushareProvider::from_config(&config).is_none());

        config.token = Some("abc".into());
        assert!(TushareProvider::from_config(&config).is_some());
    }

    #[test]
    fn test_parse_tushare_date() {
        assert_eq!(
            parse_tushare_date("20240315"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            parse_tushare_date("2024-03-15"),
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(parse_tushare_date("2024/03/15"), None);
    }

    #[test]
    fn test_parse_daily_basic_by_column_name() {
        let t = table(json!({
            "fields": ["trade_date", "ts_code", "dv_ttm", "close", "pe_ttm", "pb", "total_mv"],
            "items": [
                ["20240103", "600036.SH", 5.8, 32.1, 5.0, 0.82, 80000000.0],
                ["20240102", "600036.SH", null, 32.5, 5.1, 0.83, 81000000.0],
                ["bad-date", "600036.SH", 5.7, 32.0, 5.0, 0.80, 79000000.0]
            ]
        }));

        let rows = parse_daily_basic("600036.SH", &t);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trade_date, NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        assert_eq!(rows[0].dv_ttm, Some(5.8));
        assert_eq!(rows[0].close, Some(32.1));
        assert_eq!(rows[1].dv_ttm, None);
        assert_eq!(rows[1].market_cap(), Some(8100.0));
    }

    #[test]
    fn test_missing_columns_is_no_data() {
        let t = table(json!({
            "fields": ["ts_code", "close"],
            "items": [["600036.SH", 32.1]]
        }));
        assert!(parse_daily_basic("600036.SH", &t).is_empty());

        let t = table(json!({ "fields": ["end_date"], "items": [["20240331"]] }));
        assert!(parse_cash_flow(&t).is_empty());
    }

    #[test]
    fn test_parse_financial_indicators() {
        let t = table(json!({
            "fields": ["ts_code", "ann_date", "end_date", "roe", "grossprofit_margin",
                       "debt_to_assets", "or_yoy", "netprofit_yoy"],
            "items": [
                ["600036.SH", "20240426", "20240331", 4.1, null, 90.5, -4.65, -2.0]
            ]
        }));

        let rows = parse_financial_indicators(&t);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end_date, NaiveDate::from_ymd_opt(2024, 3, 31));
        assert_eq!(rows[0].ann_date, NaiveDate::from_ymd_opt(2024, 4, 26));
        assert_eq!(rows[0].roe, Some(4.1));
        assert_eq!(rows[0].grossprofit_margin, None);
        assert_eq!(rows[0].or_yoy, Some(-4.65));
    }

    #[test]
    fn test_parse_income_and_cash_flow() {
        let income = table(json!({
            "fields": ["ts_code", "end_date", "total_revenue", "n_income"],
            "items": [["600900.SH", "20240331", "1.5e10", 4.0e9]]
        }));
        let rows = parse_income(&income);
        assert_eq!(rows[0].total_revenue, Some(1.5e10));
        assert_eq!(rows[0].n_income, Some(4.0e9));

        let cash = table(json!({
            "fields": ["ts_code", "end_date", "n_cashflow_act", "c_pay_acq_const_fiolta"],
            "items": [["600900.SH", "20240331", 9.0e9, 1.0e9]]
        }));
        let rows = parse_cash_flow(&cash);
        assert_eq!(rows[0].free_cash_flow(), Some(8.0e9));
    }

    #[test]
    fn test_classify_api_error() {
        assert!(matches!(
            classify_api_error(40203, "too many".into()),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_api_error(40101, "bad token".into()),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_api_error(-1, "oops".into()),
            ProviderError::Api { code: -1, .. }
        ));
    }
}
