/// Read API: three parameterized access patterns over the deduplicated
/// store. Because the Bulk Loader dedups eagerly (see store/mod.rs), no
/// read-time dedup marker is needed — every row already reflects the
/// highest `_version` for its identity key.
use crate::errors::Result;
use crate::model::{Candle, DataSource, InstrumentType};
use crate::timeframe::Timeframe;
use rusqlite::{Connection, Row, params};

fn row_to_candle(row: &Row) -> rusqlite::Result<Candle> {
    let timeframe_token: String = row.get("timeframe")?;
    let instrument_token: String = row.get("instrument_type")?;
    let data_source_token: String = row.get("data_source")?;

    Ok(Candle {
        timestamp_ms: row.get("timestamp")?,
        symbol: row.get("symbol")?,
        timeframe: Timeframe::parse(&timeframe_token).unwrap_or(Timeframe::H1),
        instrument_type: if instrument_token == "futures-um" {
            InstrumentType::FuturesUm
        } else {
            InstrumentType::Spot
        },
        data_source: match data_source_token.as_str() {
            "rest_api" => DataSource::RestApi,
            "binance_cdn_validation" => DataSource::BinanceCdnValidation,
            _ => DataSource::Cloudfront,
        },
        open: row.get("open")?,
        high: row.get("high")?,
        low: row.get("low")?,
        close: row.get("close")?,
        volume: row.get("volume")?,
        close_time_ms: row.get("close_time")?,
        quote_asset_volume: row.get("quote_asset_volume")?,
        number_of_trades: row.get("number_of_trades")?,
        taker_buy_base_asset_volume: row.get("taker_buy_base_asset_volume")?,
        taker_buy_quote_asset_volume: row.get("taker_buy_quote_asset_volume")?,
        funding_rate: row.get("funding_rate")?,
        version: row.get::<_, i64>("_version")? as u64,
        sign: row.get::<_, i64>("_sign")? as i8,
    })
}

pub fn range(
    conn: &Connection,
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: InstrumentType,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<Candle>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM candles
         WHERE symbol = ?1 AND timeframe = ?2 AND instrument_type = ?3
               AND timestamp >= ?4 AND timestamp <= ?5
         ORDER BY timestamp ASC",
    )?;
    let rows = stmt
        .query_map(
            params![symbol, timeframe.cdn_token(), instrument_type.as_str(), start_ms, end_ms],
            row_to_candle,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn latest(
    conn: &Connection,
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: InstrumentType,
    n: usize,
) -> Result<Vec<Candle>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM candles
         WHERE symbol = ?1 AND timeframe = ?2 AND instrument_type = ?3
         ORDER BY timestamp DESC LIMIT ?4",
    )?;
    let mut rows = stmt
        .query_map(
            params![symbol, timeframe.cdn_token(), instrument_type.as_str(), n as i64],
            row_to_candle,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.reverse();
    Ok(rows)
}

pub fn multi_symbol(
    conn: &Connection,
    symbols: &[String],
    timeframe: Timeframe,
    instrument_type: InstrumentType,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<Candle>> {
    let mut all = Vec::new();
    for symbol in symbols {
        all.extend(range(conn, symbol, timeframe, instrument_type, start_ms, end_ms)?);
    }
    all.sort_by(|a, b| (a.symbol.as_str(), a.timestamp_ms).cmp(&(b.symbol.as_str(), b.timestamp_ms)));
    Ok(all)
}

pub fn count_in_range(
    conn: &Connection,
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: InstrumentType,
    start_ms: i64,
    end_ms: i64,
) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM candles
         WHERE symbol = ?1 AND timeframe = ?2 AND instrument_type = ?3
               AND timestamp >= ?4 AND timestamp <= ?5",
        params![symbol, timeframe.cdn_token(), instrument_type.as_str(), start_ms, end_ms],
        |row| row.get(0),
    )?;
    Ok(count)
}
