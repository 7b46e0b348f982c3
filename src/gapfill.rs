/// REST Gap Filler: fetches exactly the rows covering one Gap from
/// Binance's live REST endpoints, stamped with `data_source=rest_api`, and
/// handed to the Bulk Loader. Chunked to the 1000-row API limit, with
/// incremental backoff and `Retry-After` honored verbatim on 418/429.
use crate::decoder::{OhlcvFields, check_ohlcv_invariants};
use crate::errors::GaplessError;
use crate::model::{Candle, DataSource, Gap, InstrumentType};
use crate::retry::{RetryDecision, RetryPolicy, retry_with};
use crate::timeframe::Timeframe;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

const REST_CHUNK_SIZE: i64 = 1000;

pub struct RestGapFiller {
    client: Client,
    retries: u32,
}

impl RestGapFiller {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builds with static config");
        Self { client, retries }
    }

    /// Fetches and returns the candles covering `gap`, already versioned
    /// identically to what the archive path would have produced for the
    /// same logical rows.
    pub async fn fill(
        &self,
        gap: Gap,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
    ) -> Result<Vec<Candle>, GaplessError> {
        let mut candles = Vec::new();
        for (chunk_start, chunk_end) in chunk_range(gap.gap_start_ms, gap.gap_end_ms, timeframe) {
            let rows = self
                .fetch_chunk(symbol, timeframe, instrument_type, chunk_start, chunk_end)
                .await?;
            candles.extend(rows);
            tokio::time::sleep(Duration::from_millis(150)).await;
        }

        // Boundary filtering: Binance may return rows just outside the
        // requested range; keep only [gap_start, gap_end).
        candles.retain(|c| c.timestamp_ms >= gap.gap_start_ms && c.timestamp_ms < gap.gap_end_ms);

        for candle in &mut candles {
            crate::versioner::stamp(candle);
        }

        Ok(candles)
    }

    async fn fetch_chunk(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GaplessError> {
        let policy = RetryPolicy::incremental(self.retries, Duration::from_secs(1));
        let url = instrument_type.rest_base_url().to_string();

        retry_with(
            policy,
            &url,
            || self.attempt_chunk(symbol, timeframe, instrument_type, start_ms, end_ms),
            |err: &GaplessError| match err {
                GaplessError::RateLimited { retry_after, .. } => RetryDecision::RetryAfter(*retry_after),
                GaplessError::SourceUnavailable { status, .. } if *status < 500 => RetryDecision::Fatal,
                _ => RetryDecision::Retry,
            },
        )
        .await
    }

    async fn attempt_chunk(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, GaplessError> {
        let url = instrument_type.rest_base_url();
        let response = self
            .client
            .get(url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", timeframe.rest_interval().to_string()),
                ("startTime", start_ms.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", REST_CHUNK_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| GaplessError::Transport {
                url: url.to_string(),
                attempts: 1,
                source: Box::new(e),
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            warn!(url, retry_after_secs, "rate limited by REST API");
            return Err(GaplessError::RateLimited {
                url: url.to_string(),
                retry_after: Duration::from_secs(retry_after_secs),
            });
        }
        if status != StatusCode::OK {
            return Err(GaplessError::SourceUnavailable {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body: Vec<Value> = response.json().await.map_err(|e| GaplessError::Transport {
            url: url.to_string(),
            attempts: 1,
            source: Box::new(e),
        })?;

        parse_klines(symbol, timeframe, instrument_type, &body)
    }
}

fn chunk_range(start_ms: i64, end_ms: i64, timeframe: Timeframe) -> Vec<(i64, i64)> {
    let max_range = timeframe.duration_ms() * REST_CHUNK_SIZE;
    let mut chunks = Vec::new();
    let mut cursor = start_ms;
    while cursor < end_ms {
        let chunk_end = (cursor + max_range).min(end_ms);
        chunks.push((cursor, chunk_end));
        cursor = chunk_end;
    }
    chunks
}

fn parse_klines(
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: InstrumentType,
    body: &[Value],
) -> Result<Vec<Candle>, GaplessError> {
    let mut candles = Vec::with_capacity(body.len());
    for (row_index, entry) in body.iter().enumerate() {
        let arr = entry.as_array().ok_or_else(|| GaplessError::DecodeFailure {
            archive: "<rest-response>".to_string(),
            reason: "kline entry is not an array".to_string(),
        })?;
        let get_i64 = |idx: usize| -> Result<i64, GaplessError> {
            arr.get(idx)
                .and_then(|v| v.as_i64())
                .ok_or_else(|| GaplessError::DecodeFailure {
                    archive: "<rest-response>".to_string(),
                    reason: format!("missing/invalid integer field at index {idx}"),
                })
        };
        let get_f64 = |idx: usize| -> Result<f64, GaplessError> {
            arr.get(idx)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| GaplessError::DecodeFailure {
                    archive: "<rest-response>".to_string(),
                    reason: format!("missing/invalid numeric field at index {idx}"),
                })
        };

        let timestamp_ms = get_i64(0)?;
        let open = get_f64(1)?;
        let high = get_f64(2)?;
        let low = get_f64(3)?;
        let close = get_f64(4)?;
        let volume = get_f64(5)?;
        let close_time_ms = get_i64(6)?;
        let quote_asset_volume = get_f64(7)?;
        let number_of_trades = get_i64(8)?;
        let taker_buy_base_asset_volume = get_f64(9)?;
        let taker_buy_quote_asset_volume = get_f64(10)?;

        check_ohlcv_invariants(&OhlcvFields {
            open_time_ms: timestamp_ms,
            close_time_ms,
            duration_ms: timeframe.duration_ms(),
            open,
            high,
            low,
            close,
            volume,
            quote_asset_volume,
            taker_buy_base_asset_volume,
            taker_buy_quote_asset_volume,
        })
        .map_err(|reason| GaplessError::InvariantViolation { row_index, reason })?;

        candles.push(Candle {
            timestamp_ms,
            symbol: symbol.to_string(),
            timeframe,
            instrument_type,
            data_source: DataSource::RestApi,
            open,
            high,
            low,
            close,
            volume,
            close_time_ms,
            quote_asset_volume,
            number_of_trades,
            taker_buy_base_asset_volume,
            taker_buy_quote_asset_volume,
            funding_rate: None,
            version: 0,
            sign: 1,
        });
    }
    Ok(candles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_range_splits_at_thousand_row_boundary() {
        let tf = Timeframe::M1;
        let start = 0;
        let end = tf.duration_ms() * 2500;
        let chunks = chunk_range(start, end, tf);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], (0, tf.duration_ms() * 1000));
        assert_eq!(chunks[2].1, end);
    }

    #[test]
    fn parse_klines_maps_fields_in_order() {
        let body = serde_json::json!([
            [1704067200000i64, "42000.0", "42500.0", "41800.0", "42300.0", "12.5",
             1704070799999i64, "530000.0", 150, "6.0", "260000.0", "0"]
        ]);
        let candles = parse_klines(
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::Spot,
            body.as_array().unwrap(),
        )
        .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 42300.0);
        assert_eq!(candles[0].data_source, DataSource::RestApi);
    }

    #[test]
    fn parse_klines_rejects_a_row_violating_ohlcv_invariants() {
        let body = serde_json::json!([
            [1704067200000i64, "42000.0", "41000.0", "41800.0", "42300.0", "12.5",
             1704070799999i64, "530000.0", 150, "6.0", "260000.0", "0"]
        ]);
        let result = parse_klines(
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::Spot,
            body.as_array().unwrap(),
        );
        assert!(matches!(
            result,
            Err(GaplessError::InvariantViolation { row_index: 0, .. })
        ));
    }
}
