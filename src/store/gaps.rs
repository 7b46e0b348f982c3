/// Gap Detector: a single window-function scan that lists every missing
/// candle range strictly inside a query window. Gaps at the window's head
/// or tail are not reported here — the orchestrator handles those via
/// expected-row-count estimation (§4.6, §4.8).
use crate::errors::Result;
use crate::model::Gap;
use crate::timeframe::Timeframe;
use rusqlite::{Connection, params};

pub fn detect_gaps(
    conn: &Connection,
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: &str,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<Gap>> {
    let interval = timeframe.duration_ms();

    let mut stmt = conn.prepare(
        "SELECT timestamp, prev_timestamp FROM (
            SELECT
                timestamp,
                LAG(timestamp) OVER (ORDER BY timestamp ASC) AS prev_timestamp
            FROM candles
            WHERE symbol = ?1 AND timeframe = ?2 AND instrument_type = ?3
                  AND timestamp >= ?4 AND timestamp <= ?5
        )
        WHERE prev_timestamp IS NOT NULL AND (timestamp - prev_timestamp) > ?6
        ORDER BY timestamp ASC",
    )?;

    let gaps = stmt
        .query_map(
            params![symbol, timeframe.cdn_token(), instrument_type, start_ms, end_ms, interval],
            |row| {
                let current: i64 = row.get(0)?;
                let prev: i64 = row.get(1)?;
                Ok((prev, current))
            },
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .map(|(prev, current)| Gap {
            gap_start_ms: prev + interval,
            gap_end_ms: current,
            expected_bars: (current - prev) / interval - 1,
        })
        .collect();

    Ok(gaps)
}
