/// Query Orchestrator: the single public entry point. Validates the
/// request, ingests whatever archive-sourced months are missing, queries
/// the store, fills any remaining gaps from the REST API, and returns a
/// gapless, version-deduplicated result.
use crate::catalog::SourceCatalog;
use crate::config::Config;
use crate::decoder::decode_archive;
use crate::errors::{GaplessError, Result};
use crate::etag_cache::EtagCache;
use crate::fetcher::ConditionalFetcher;
use crate::gapfill::RestGapFiller;
use crate::model::{Candle, IngestionRequest};
use crate::store::{gaps, loader, read, Store};
use crate::versioner;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Orchestrator {
    catalog: SourceCatalog,
    fetcher: ConditionalFetcher,
    gap_filler: RestGapFiller,
    store: Mutex<Store>,
}

impl Orchestrator {
    pub fn new(config: Config) -> std::io::Result<Self> {
        let etag_cache = EtagCache::load(config.etag_cache_path())?;
        let fetcher = ConditionalFetcher::new(
            config.archive_cache_dir(),
            etag_cache,
            config.concurrency,
            config.retries,
            config.archive_timeout,
        )?;
        let gap_filler = RestGapFiller::new(config.rest_timeout, config.retries);
        let catalog = SourceCatalog::new(config.daily_lookback_days, config.concurrency);
        let store = Store::open(&config.store.sqlite_path).map_err(|e| {
            std::io::Error::other(e.to_string())
        })?;

        Ok(Self {
            catalog,
            fetcher,
            gap_filler,
            store: Mutex::new(store),
        })
    }

    /// Runs the full query algorithm for `request`, honoring `cancel`
    /// between per-month and per-gap units of work.
    pub async fn query(
        &self,
        request: IngestionRequest,
        cancel: CancellationToken,
    ) -> Result<Vec<Candle>> {
        self.validate(&request)?;

        let start_ms = request.start.timestamp_millis();
        let end_ms = request.end.timestamp_millis();

        for symbol in &request.symbols {
            if cancel.is_cancelled() {
                return Err(GaplessError::InvalidInput("query cancelled".to_string()));
            }

            if request.auto_ingest {
                let expected = (end_ms - start_ms) / request.timeframe.duration_ms();
                let existing = {
                    let store = self.store.lock().await;
                    read::count_in_range(
                        store.connection(),
                        symbol,
                        request.timeframe,
                        request.instrument_type,
                        start_ms,
                        end_ms,
                    )?
                };
                if (existing as f64) < expected as f64 * 0.5 {
                    self.ingest_missing(symbol, &request, &cancel).await?;
                }
            }

            if request.fill_gaps {
                self.fill_gaps_for(symbol, &request, &cancel).await?;
            }
        }

        let store = self.store.lock().await;
        read::multi_symbol(
            store.connection(),
            &request.symbols,
            request.timeframe,
            request.instrument_type,
            start_ms,
            end_ms,
        )
    }

    fn validate(&self, request: &IngestionRequest) -> Result<()> {
        if request.symbols.is_empty() {
            return Err(GaplessError::InvalidInput("no symbols requested".to_string()));
        }
        for symbol in &request.symbols {
            if !is_valid_symbol(symbol) {
                return Err(GaplessError::InvalidInput(format!(
                    "invalid symbol: {symbol}"
                )));
            }
        }
        if request.start >= request.end {
            return Err(GaplessError::InvalidInput(
                "start must precede end".to_string(),
            ));
        }
        Ok(())
    }

    /// Downloads and loads every archive task whose period has not already
    /// been checkpointed, skipping (not failing) tasks the source doesn't
    /// have yet, e.g. the in-progress current month.
    async fn ingest_missing(
        &self,
        symbol: &str,
        request: &IngestionRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let tasks = self.catalog.tasks_for(
            symbol,
            request.timeframe,
            request.instrument_type,
            request.start,
            request.end,
        );

        let pending: Vec<_> = {
            let store = self.store.lock().await;
            let mut pending = Vec::new();
            for task in tasks {
                let already = store.is_month_ingested(
                    symbol,
                    request.timeframe.cdn_token(),
                    request.instrument_type.as_str(),
                    &task.period_id,
                )?;
                if !already {
                    pending.push(task);
                }
            }
            pending
        };

        for batch in self.catalog.batches(&pending) {
            if cancel.is_cancelled() {
                return Err(GaplessError::InvalidInput("query cancelled".to_string()));
            }

            let results = self.fetcher.fetch_batch(batch).await;
            for result in results {
                match result {
                    Ok(archive) => {
                        let (mut candles, report) = match decode_archive(
                            &archive.task.filename,
                            &archive.bytes,
                            symbol,
                            request.timeframe,
                            request.instrument_type,
                        ) {
                            Ok(decoded) => decoded,
                            Err(err) => {
                                warn!(archive = archive.task.filename, %err, "skipping undecodable archive");
                                continue;
                            }
                        };
                        if !report.rejected_rows.is_empty() {
                            warn!(
                                archive = archive.task.filename,
                                rejected = report.rejected_rows.len(),
                                "archive had rejected rows"
                            );
                        }
                        for candle in &mut candles {
                            versioner::stamp(candle);
                        }

                        let mut store = self.store.lock().await;
                        loader::insert_candles(store.connection_mut(), &candles)?;
                        store.mark_month_ingested(
                            symbol,
                            request.timeframe.cdn_token(),
                            request.instrument_type.as_str(),
                            &archive.task.period_id,
                            archive.task.range_end.timestamp_millis(),
                        )?;
                    }
                    Err((task, err)) => {
                        warn!(url = task.url, %err, "archive fetch failed, will rely on gap fill");
                    }
                }
            }
        }

        Ok(())
    }

    async fn fill_gaps_for(
        &self,
        symbol: &str,
        request: &IngestionRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let start_ms = request.start.timestamp_millis();
        let end_ms = request.end.timestamp_millis();

        let found_gaps = {
            let store = self.store.lock().await;
            gaps::detect_gaps(
                store.connection(),
                symbol,
                request.timeframe,
                request.instrument_type.as_str(),
                start_ms,
                end_ms,
            )?
        };

        for gap in found_gaps {
            if cancel.is_cancelled() {
                return Err(GaplessError::InvalidInput("query cancelled".to_string()));
            }

            info!(symbol, gap_start = gap.gap_start_ms, gap_end = gap.gap_end_ms, "filling gap via REST");
            let candles = self
                .gap_filler
                .fill(gap, symbol, request.timeframe, request.instrument_type)
                .await?;

            let mut store = self.store.lock().await;
            loader::insert_candles(store.connection_mut(), &candles)?;
        }

        Ok(())
    }
}

/// `^[A-Z0-9]+$`: rejects anything path-traversal-shaped before it reaches
/// `catalog.rs`'s URL/filename construction.
fn is_valid_symbol(symbol: &str) -> bool {
    !symbol.is_empty() && symbol.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataSource, InstrumentType};
    use crate::timeframe::Timeframe;
    use chrono::{TimeZone, Utc};

    fn candle_at(symbol: &str, ts: i64) -> Candle {
        let mut c = Candle {
            timestamp_ms: ts,
            symbol: symbol.to_string(),
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            data_source: DataSource::Cloudfront,
            open: 1.0,
            high: 2.0,
            low: 1.0,
            close: 1.5,
            volume: 1.0,
            close_time_ms: ts + Timeframe::H1.duration_ms() - 1,
            quote_asset_volume: 1.0,
            number_of_trades: 1,
            taker_buy_base_asset_volume: 0.5,
            taker_buy_quote_asset_volume: 0.5,
            funding_rate: None,
            version: 0,
            sign: 1,
        };
        versioner::stamp(&mut c);
        c
    }

    #[tokio::test]
    async fn query_with_ingestion_disabled_reads_only_whats_stored() {
        let config = test_config();
        let orchestrator = Orchestrator::new(config).unwrap();
        {
            let mut store = orchestrator.store.lock().await;
            let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_millis();
            loader::insert_candles(store.connection_mut(), &[candle_at("BTCUSDT", base)]).unwrap();
        }

        let request = IngestionRequest {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            auto_ingest: false,
            fill_gaps: false,
        };
        let rows = orchestrator.query(request, CancellationToken::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn empty_symbols_is_rejected() {
        let config = test_config();
        let orchestrator = Orchestrator::new(config).unwrap();
        let request = IngestionRequest {
            symbols: vec![],
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            auto_ingest: false,
            fill_gaps: false,
        };
        let result = orchestrator.query(request, CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn path_traversal_shaped_symbol_is_rejected() {
        let config = test_config();
        let orchestrator = Orchestrator::new(config).unwrap();
        let request = IngestionRequest {
            symbols: vec!["../../etc/passwd".to_string()],
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
            auto_ingest: false,
            fill_gaps: false,
        };
        let result = orchestrator.query(request, CancellationToken::new()).await;
        assert!(matches!(result, Err(GaplessError::InvalidInput(_))));
    }

    #[test]
    fn symbol_pattern_accepts_only_uppercase_alphanumeric() {
        assert!(is_valid_symbol("BTCUSDT"));
        assert!(is_valid_symbol("BTC3USDT"));
        assert!(!is_valid_symbol(""));
        assert!(!is_valid_symbol("btcusdt"));
        assert!(!is_valid_symbol("../../etc/passwd"));
        assert!(!is_valid_symbol("BTC/USDT"));
    }

    fn test_config() -> Config {
        let dir = tempfile::tempdir().unwrap().keep();
        Config {
            store: crate::config::StoreTarget {
                host: "localhost".to_string(),
                port: 9000,
                user: "default".to_string(),
                password: String::new(),
                database: "default".to_string(),
                sqlite_path: dir.join("ohlcv.sqlite3"),
            },
            daily_lookback_days: 30,
            concurrency: 4,
            retries: 1,
            archive_timeout: std::time::Duration::from_secs(5),
            rest_timeout: std::time::Duration::from_secs(5),
            cache_dir: dir,
        }
    }
}
