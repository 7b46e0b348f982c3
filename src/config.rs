/// Process-wide configuration, built once at entry and threaded down
/// explicitly to the orchestrator and fetcher — no module-level singleton,
/// per the Design Notes' "implicit globals" -> "explicit config record"
/// strategy.
use crate::errors::GaplessError;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Local SQLite file backing the store (see DESIGN.md for why the
    /// networked store target above is retained for interface parity but
    /// only this path is actually dialled).
    pub sqlite_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreTarget,
    /// `W`: cutoff, in days, between monthly and daily archive sourcing.
    pub daily_lookback_days: i64,
    /// `C`: max parallel archive downloads per batch.
    pub concurrency: usize,
    /// `R`: attempts per HTTP request (archive or REST).
    pub retries: u32,
    pub archive_timeout: Duration,
    pub rest_timeout: Duration,
    pub cache_dir: PathBuf,
}

const APP_ID: &str = "gapless-binance-ohlcv";

impl Config {
    /// Builds the default configuration, then applies `GAPLESS_*`
    /// environment overrides. Invalid overrides fail fast here rather than
    /// surfacing later as a confusing store or HTTP error.
    pub fn from_env() -> Result<Self, GaplessError> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        let default_cache_dir = PathBuf::from(home).join(".cache").join(APP_ID);

        let mut config = Self {
            store: StoreTarget {
                host: "localhost".to_string(),
                port: 9000,
                user: "default".to_string(),
                password: String::new(),
                database: "default".to_string(),
                sqlite_path: default_cache_dir.join("ohlcv.sqlite3"),
            },
            daily_lookback_days: 30,
            concurrency: 13,
            retries: 3,
            archive_timeout: Duration::from_secs(30),
            rest_timeout: Duration::from_secs(30),
            cache_dir: default_cache_dir,
        };

        if let Ok(v) = std::env::var("GAPLESS_STORE_HOST") {
            config.store.host = v;
        }
        if let Ok(v) = std::env::var("GAPLESS_STORE_PORT") {
            config.store.port = parse_env("GAPLESS_STORE_PORT", &v)?;
        }
        if let Ok(v) = std::env::var("GAPLESS_STORE_USER") {
            config.store.user = v;
        }
        if let Ok(v) = std::env::var("GAPLESS_STORE_PASSWORD") {
            config.store.password = v;
        }
        if let Ok(v) = std::env::var("GAPLESS_STORE_DB") {
            config.store.database = v;
        }
        if let Ok(v) = std::env::var("GAPLESS_DAILY_LOOKBACK_DAYS") {
            config.daily_lookback_days = parse_env("GAPLESS_DAILY_LOOKBACK_DAYS", &v)?;
        }
        if let Ok(v) = std::env::var("GAPLESS_CONCURRENCY") {
            config.concurrency = parse_env("GAPLESS_CONCURRENCY", &v)?;
        }
        if let Ok(v) = std::env::var("GAPLESS_RETRIES") {
            config.retries = parse_env("GAPLESS_RETRIES", &v)?;
        }
        if let Ok(v) = std::env::var("GAPLESS_ARCHIVE_TIMEOUT_SECS") {
            config.archive_timeout = Duration::from_secs(parse_env("GAPLESS_ARCHIVE_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("GAPLESS_REST_TIMEOUT_SECS") {
            config.rest_timeout = Duration::from_secs(parse_env("GAPLESS_REST_TIMEOUT_SECS", &v)?);
        }
        if let Ok(v) = std::env::var("GAPLESS_CACHE_DIR") {
            config.cache_dir = PathBuf::from(&v);
            config.store.sqlite_path = config.cache_dir.join("ohlcv.sqlite3");
        }

        Ok(config)
    }

    pub fn etag_cache_path(&self) -> PathBuf {
        self.cache_dir.join("etags.json")
    }

    pub fn archive_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("zips")
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, GaplessError> {
    value
        .parse::<T>()
        .map_err(|_| GaplessError::InvalidInput(format!("invalid value for {name}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.daily_lookback_days, 30);
        assert_eq!(cfg.concurrency, 13);
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.store.host, "localhost");
    }
}
