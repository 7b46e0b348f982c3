/// Bulk Loader: appends a versioned table to the store. The table engine
/// assumption is a replacing-merge discipline keyed on the identity key
/// `(symbol, timeframe, instrument_type, timestamp)`, keeping the row with
/// the highest `_version`. SQLite has no background merge step, so the
/// dedup happens immediately via `ON CONFLICT ... DO UPDATE ... WHERE
/// excluded._version > _version` — the same observable contract (§4.5),
/// reached eagerly instead of on read.
use crate::errors::Result;
use crate::model::Candle;
use rusqlite::{Connection, params};

pub fn insert_candles(conn: &mut Connection, candles: &[Candle]) -> Result<usize> {
    if candles.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let mut applied = 0usize;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO candles (
                symbol, timeframe, instrument_type, timestamp, data_source,
                open, high, low, close, volume,
                close_time, quote_asset_volume, number_of_trades,
                taker_buy_base_asset_volume, taker_buy_quote_asset_volume,
                funding_rate, _version, _sign
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)
            ON CONFLICT(symbol, timeframe, instrument_type, timestamp)
            DO UPDATE SET
                data_source = excluded.data_source,
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                close_time = excluded.close_time,
                quote_asset_volume = excluded.quote_asset_volume,
                number_of_trades = excluded.number_of_trades,
                taker_buy_base_asset_volume = excluded.taker_buy_base_asset_volume,
                taker_buy_quote_asset_volume = excluded.taker_buy_quote_asset_volume,
                funding_rate = excluded.funding_rate,
                _version = excluded._version,
                _sign = excluded._sign
            WHERE excluded._version > candles._version",
        )?;

        for candle in candles {
            let changes = stmt.execute(params![
                candle.symbol,
                candle.timeframe.cdn_token(),
                candle.instrument_type.as_str(),
                candle.timestamp_ms,
                candle.data_source.as_str(),
                candle.open,
                candle.high,
                candle.low,
                candle.close,
                candle.volume,
                candle.close_time_ms,
                candle.quote_asset_volume,
                candle.number_of_trades,
                candle.taker_buy_base_asset_volume,
                candle.taker_buy_quote_asset_volume,
                candle.funding_rate,
                candle.version as i64,
                candle.sign as i64,
            ])?;
            applied += changes;
        }
    }
    tx.commit()?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataSource, InstrumentType};
    use crate::store::Store;
    use crate::timeframe::Timeframe;

    fn sample(version: u64, close: f64) -> Candle {
        Candle {
            timestamp_ms: 1_704_067_200_000,
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::H1,
            instrument_type: InstrumentType::Spot,
            data_source: DataSource::Cloudfront,
            open: 42000.0,
            high: 42500.0,
            low: 41800.0,
            close,
            volume: 10.0,
            close_time_ms: 1_704_070_799_999,
            quote_asset_volume: 420_000.0,
            number_of_trades: 100,
            taker_buy_base_asset_volume: 5.0,
            taker_buy_quote_asset_volume: 210_000.0,
            funding_rate: None,
            version,
            sign: 1,
        }
    }

    #[test]
    fn reinserting_same_row_is_a_no_op() {
        let mut store = Store::open_in_memory().unwrap();
        let candle = sample(1, 42300.0);
        insert_candles(store.connection_mut(), std::slice::from_ref(&candle)).unwrap();
        insert_candles(store.connection_mut(), &[candle]).unwrap();

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM candles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn higher_version_wins_on_conflict() {
        let mut store = Store::open_in_memory().unwrap();
        insert_candles(store.connection_mut(), &[sample(1, 42300.0)]).unwrap();
        insert_candles(store.connection_mut(), &[sample(2, 42999.0)]).unwrap();

        let close: f64 = store
            .connection()
            .query_row("SELECT close FROM candles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(close, 42999.0);
    }

    #[test]
    fn lower_version_does_not_overwrite() {
        let mut store = Store::open_in_memory().unwrap();
        insert_candles(store.connection_mut(), &[sample(5, 42300.0)]).unwrap();
        insert_candles(store.connection_mut(), &[sample(1, 1.0)]).unwrap();

        let close: f64 = store
            .connection()
            .query_row("SELECT close FROM candles", [], |r| r.get(0))
            .unwrap();
        assert_eq!(close, 42300.0);
    }
}
