/// The OHLCV store: a thin wrapper around a SQLite connection, following
/// the teacher's `DatabaseManager` shape, but with the replacing-merge
/// dedup discipline applied eagerly at insert time rather than via a
/// background merge + read-time `FINAL` modifier (see DESIGN.md).
pub mod gaps;
pub mod loader;
pub mod read;

use crate::errors::Result;
use rusqlite::Connection;
use std::path::Path;

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| crate::errors::GaplessError::StoreFailure(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS candles (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                instrument_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                data_source TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                close_time INTEGER NOT NULL,
                quote_asset_volume REAL NOT NULL,
                number_of_trades INTEGER NOT NULL,
                taker_buy_base_asset_volume REAL NOT NULL,
                taker_buy_quote_asset_volume REAL NOT NULL,
                funding_rate REAL,
                _version INTEGER NOT NULL,
                _sign INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe, instrument_type, timestamp)
            );
            CREATE INDEX IF NOT EXISTS idx_candles_ordering
                ON candles (symbol, timeframe, instrument_type, timestamp);
            CREATE TABLE IF NOT EXISTS ingested_months (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                instrument_type TEXT NOT NULL,
                period_id TEXT NOT NULL,
                ingested_at INTEGER NOT NULL,
                PRIMARY KEY (symbol, timeframe, instrument_type, period_id)
            );",
        )?;
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Records that a calendar month has been ingested for a given
    /// instrument, so a repeated orchestrator call can skip re-downloading
    /// its archive (an efficiency supplement, see SPEC_FULL.md §4).
    pub fn mark_month_ingested(
        &self,
        symbol: &str,
        timeframe: &str,
        instrument_type: &str,
        period_id: &str,
        now_ms: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO ingested_months
                (symbol, timeframe, instrument_type, period_id, ingested_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![symbol, timeframe, instrument_type, period_id, now_ms],
        )?;
        Ok(())
    }

    pub fn is_month_ingested(
        &self,
        symbol: &str,
        timeframe: &str,
        instrument_type: &str,
        period_id: &str,
    ) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ingested_months
             WHERE symbol = ?1 AND timeframe = ?2 AND instrument_type = ?3 AND period_id = ?4",
            rusqlite::params![symbol, timeframe, instrument_type, period_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
