/// Core records flowing through `fetch -> decode -> version -> load`.
///
/// Kept as narrow, strongly-typed structs rather than dynamically-typed row
/// dictionaries, per the source pattern table: one struct per stage, a small
/// tagged enum for each axis of variation (instrument type, data source,
/// archive source kind).
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentType {
    Spot,
    FuturesUm,
}

impl InstrumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::FuturesUm => "futures-um",
        }
    }

    pub fn cdn_market_path(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::FuturesUm => "futures/um",
        }
    }

    pub fn rest_base_url(self) -> &'static str {
        match self {
            Self::Spot => "https://api.binance.com/api/v3/klines",
            Self::FuturesUm => "https://fapi.binance.com/fapi/v1/klines",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Cloudfront,
    RestApi,
    BinanceCdnValidation,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloudfront => "cloudfront",
            Self::RestApi => "rest_api",
            Self::BinanceCdnValidation => "binance_cdn_validation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Monthly,
    Daily,
}

/// One stored OHLCV row, post-normalization and post-versioning.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp_ms: i64,
    pub symbol: String,
    pub timeframe: crate::timeframe::Timeframe,
    pub instrument_type: InstrumentType,
    pub data_source: DataSource,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
    pub quote_asset_volume: f64,
    pub number_of_trades: i64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
    pub funding_rate: Option<f64>,
    pub version: u64,
    pub sign: i8,
}

/// A transient unit of work produced by the Source Catalog; never persisted.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub url: String,
    pub filename: String,
    pub source_kind: SourceKind,
    pub period_id: String,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
}

/// A missing range surfaced by the Gap Detector. Ephemeral; recomputed on
/// every query, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub gap_start_ms: i64,
    pub gap_end_ms: i64,
    pub expected_bars: i64,
}

/// The orchestrator's unit of work for one call to `query`.
#[derive(Debug, Clone)]
pub struct IngestionRequest {
    pub symbols: Vec<String>,
    pub timeframe: crate::timeframe::Timeframe,
    pub instrument_type: InstrumentType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub auto_ingest: bool,
    pub fill_gaps: bool,
}
