/// Archive Decoder: extracts the single tabular member from a Binance ZIP
/// archive, auto-detects the spot (headerless, 11-column) vs futures
/// (header, 12-column) shape, normalizes column names, detects millisecond
/// vs microsecond epoch timestamps, and enforces OHLCV invariants per row.
use crate::errors::GaplessError;
use crate::model::{Candle, DataSource, InstrumentType};
use crate::timeframe::Timeframe;
use std::io::{Cursor, Read};
use tracing::warn;

const MIN_YEAR: i32 = 2010;
const MAX_YEAR: i32 = 2030;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochFormat {
    Milliseconds,
    Microseconds,
}

#[derive(Debug, Clone)]
pub struct FormatTransition {
    pub row_index: usize,
    pub from: EpochFormat,
    pub to: EpochFormat,
}

#[derive(Debug, Clone)]
pub struct RowError {
    pub row_index: usize,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DecodeReport {
    pub format_transitions: Vec<FormatTransition>,
    pub rejected_rows: Vec<RowError>,
}

/// A row with fields still as raw text, column order already normalized to
/// the canonical 11-field shape (the `ignore` column dropped, futures
/// column names renamed) but not yet type-checked or validated.
type TextRow = [String; 11];

pub fn decode_archive(
    archive_name: &str,
    bytes: &[u8],
    symbol: &str,
    timeframe: Timeframe,
    instrument_type: InstrumentType,
) -> Result<(Vec<Candle>, DecodeReport), GaplessError> {
    let member = extract_single_member(archive_name, bytes)?;
    let text_rows = parse_text_rows(archive_name, &member)?;

    let mut report = DecodeReport::default();
    let mut candles = Vec::with_capacity(text_rows.len());
    let mut prev_format: Option<EpochFormat> = None;

    for (row_index, row) in text_rows.into_iter().enumerate() {
        let raw = match parse_typed_row(&row) {
            Ok(raw) => raw,
            Err(reason) => {
                // Header-detection edge case: a headerless archive whose
                // first row isn't numeric at all is actually a header row
                // the shape-sniffer missed; discard silently instead of
                // counting it as a corrupt data row.
                if row_index == 0 {
                    continue;
                }
                report.rejected_rows.push(RowError { row_index, reason });
                continue;
            }
        };

        let open_time_format = match classify_epoch(raw.open_time_raw) {
            Some(f) => f,
            None => {
                // Same edge case, but the row *was* numeric: an implausible
                // digit count for the first row means it's a header whose
                // columns happen to be integers (rare, but seen in early
                // archives); later rows with a bad digit count are genuine
                // corruption.
                if row_index == 0 {
                    continue;
                }
                report.rejected_rows.push(RowError {
                    row_index,
                    reason: format!("unrecognized epoch digit count: {}", raw.open_time_raw),
                });
                continue;
            }
        };

        if let Some(prev) = prev_format
            && prev != open_time_format
        {
            report.format_transitions.push(FormatTransition {
                row_index,
                from: prev,
                to: open_time_format,
            });
        }
        prev_format = Some(open_time_format);

        let open_time_ms = scale_to_ms(raw.open_time_raw, open_time_format);
        let close_time_ms = match classify_epoch(raw.close_time_raw) {
            Some(fmt) => scale_to_ms(raw.close_time_raw, fmt),
            None => open_time_ms + timeframe.duration_ms() - 1,
        };

        if !year_in_range(open_time_ms) {
            if row_index == 0 {
                continue;
            }
            report.rejected_rows.push(RowError {
                row_index,
                reason: format!("open_time out of plausible range: {open_time_ms}"),
            });
            continue;
        }

        if let Err(reason) = validate_invariants(&raw, open_time_ms, close_time_ms, timeframe.duration_ms()) {
            report.rejected_rows.push(RowError { row_index, reason });
            continue;
        }

        candles.push(Candle {
            timestamp_ms: open_time_ms,
            symbol: symbol.to_string(),
            timeframe,
            instrument_type,
            data_source: DataSource::Cloudfront,
            open: raw.open,
            high: raw.high,
            low: raw.low,
            close: raw.close,
            volume: raw.volume,
            close_time_ms,
            quote_asset_volume: raw.quote_asset_volume,
            number_of_trades: raw.number_of_trades,
            taker_buy_base_asset_volume: raw.taker_buy_base_asset_volume,
            taker_buy_quote_asset_volume: raw.taker_buy_quote_asset_volume,
            funding_rate: None,
            version: 0,
            sign: 1,
        });
    }

    if candles.is_empty() && !report.rejected_rows.is_empty() {
        warn!(archive = archive_name, rejected = report.rejected_rows.len(), "archive produced no valid rows");
    }

    Ok((candles, report))
}

fn extract_single_member(archive_name: &str, bytes: &[u8]) -> Result<Vec<u8>, GaplessError> {
    let cursor = Cursor::new(bytes);
    let mut zip = zip::ZipArchive::new(cursor).map_err(|e| GaplessError::DecodeFailure {
        archive: archive_name.to_string(),
        reason: format!("not a valid zip: {e}"),
    })?;

    let tabular_indices: Vec<usize> = (0..zip.len())
        .filter(|&i| zip.by_index(i).map(|f| !f.is_dir()).unwrap_or(false))
        .collect();

    if tabular_indices.is_empty() {
        return Err(GaplessError::DecodeFailure {
            archive: archive_name.to_string(),
            reason: "archive contains no tabular member".to_string(),
        });
    }
    if tabular_indices.len() > 1 {
        warn!(archive = archive_name, members = tabular_indices.len(), "multiple members, using first");
    }

    let mut file = zip
        .by_index(tabular_indices[0])
        .map_err(|e| GaplessError::DecodeFailure {
            archive: archive_name.to_string(),
            reason: e.to_string(),
        })?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| GaplessError::DecodeFailure {
        archive: archive_name.to_string(),
        reason: e.to_string(),
    })?;
    Ok(buf)
}

/// Parses the CSV member into rows already normalized to the canonical
/// 11-field spot order, regardless of which of the two Binance shapes it
/// arrived in.
fn parse_text_rows(archive_name: &str, member: &[u8]) -> Result<Vec<TextRow>, GaplessError> {
    let text = String::from_utf8_lossy(member);
    let first_line = text.lines().next().unwrap_or("");
    let has_header = first_line.trim_start().starts_with("open_time");

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(has_header)
        .flexible(true)
        .from_reader(member);

    let mut rows = Vec::new();

    if has_header {
        let headers = reader.headers().map_err(|e| decode_err(archive_name, e))?.clone();
        let col = |name: &str| {
            headers.iter().position(|h| h == name).ok_or_else(|| GaplessError::DecodeFailure {
                archive: archive_name.to_string(),
                reason: format!("missing expected column: {name}"),
            })
        };
        let indices = [
            col("open_time")?,
            col("open")?,
            col("high")?,
            col("low")?,
            col("close")?,
            col("volume")?,
            col("close_time")?,
            col("quote_volume")?,
            col("count")?,
            col("taker_buy_volume")?,
            col("taker_buy_quote_volume")?,
        ];
        for record in reader.records() {
            let record = record.map_err(|e| decode_err(archive_name, e))?;
            let row: TextRow = indices.map(|i| record.get(i).unwrap_or_default().to_string());
            rows.push(row);
        }
    } else {
        for record in reader.records() {
            let record = record.map_err(|e| decode_err(archive_name, e))?;
            if record.len() < 11 {
                continue;
            }
            let row: TextRow = std::array::from_fn(|i| record.get(i).unwrap_or_default().to_string());
            rows.push(row);
        }
    }

    Ok(rows)
}

fn decode_err(archive_name: &str, err: csv::Error) -> GaplessError {
    GaplessError::DecodeFailure {
        archive: archive_name.to_string(),
        reason: err.to_string(),
    }
}

struct TypedRow {
    open_time_raw: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    close_time_raw: i64,
    quote_asset_volume: f64,
    number_of_trades: i64,
    taker_buy_base_asset_volume: f64,
    taker_buy_quote_asset_volume: f64,
}

fn parse_typed_row(row: &TextRow) -> Result<TypedRow, String> {
    let i = |idx: usize| row[idx].parse::<i64>().map_err(|_| format!("unparseable integer in column {idx}"));
    let f = |idx: usize| row[idx].parse::<f64>().map_err(|_| format!("unparseable number in column {idx}"));
    Ok(TypedRow {
        open_time_raw: i(0)?,
        open: f(1)?,
        high: f(2)?,
        low: f(3)?,
        close: f(4)?,
        volume: f(5)?,
        close_time_raw: i(6)?,
        quote_asset_volume: f(7)?,
        number_of_trades: i(8)?,
        taker_buy_base_asset_volume: f(9)?,
        taker_buy_quote_asset_volume: f(10)?,
    })
}

/// Classifies an epoch integer as milliseconds (13 digits) or microseconds
/// (16 digits) by digit count.
fn classify_epoch(value: i64) -> Option<EpochFormat> {
    let digits = value.unsigned_abs().to_string().len();
    match digits {
        13 => Some(EpochFormat::Milliseconds),
        16 => Some(EpochFormat::Microseconds),
        _ => None,
    }
}

fn scale_to_ms(value: i64, format: EpochFormat) -> i64 {
    match format {
        EpochFormat::Milliseconds => value,
        EpochFormat::Microseconds => value / 1_000,
    }
}

fn year_in_range(timestamp_ms: i64) -> bool {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| {
            let year = chrono::Datelike::year(&dt);
            (MIN_YEAR..=MAX_YEAR).contains(&year)
        })
        .unwrap_or(false)
}

fn validate_invariants(
    raw: &TypedRow,
    open_time_ms: i64,
    close_time_ms: i64,
    duration_ms: i64,
) -> Result<(), String> {
    check_ohlcv_invariants(&OhlcvFields {
        open_time_ms,
        close_time_ms,
        duration_ms,
        open: raw.open,
        high: raw.high,
        low: raw.low,
        close: raw.close,
        volume: raw.volume,
        quote_asset_volume: raw.quote_asset_volume,
        taker_buy_base_asset_volume: raw.taker_buy_base_asset_volume,
        taker_buy_quote_asset_volume: raw.taker_buy_quote_asset_volume,
    })
}

/// The OHLCV/volume/close-time shape invariants of §3.1, independent of
/// which source (archive CSV, REST kline) produced the row — shared by the
/// Archive Decoder and the REST Gap Filler so both enforce the same rules.
pub(crate) struct OhlcvFields {
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub duration_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_asset_volume: f64,
    pub taker_buy_base_asset_volume: f64,
    pub taker_buy_quote_asset_volume: f64,
}

pub(crate) fn check_ohlcv_invariants(f: &OhlcvFields) -> Result<(), String> {
    let max_oc = f.open.max(f.close);
    let min_oc = f.open.min(f.close);
    if f.high < max_oc.max(f.low) {
        return Err(format!("high {} < max(open,close,low)", f.high));
    }
    if f.low > min_oc.min(f.high) {
        return Err(format!("low {} > min(open,close,high)", f.low));
    }
    if f.volume < 0.0 {
        return Err("negative volume".to_string());
    }
    if f.taker_buy_base_asset_volume > f.volume {
        return Err("taker_buy_base_asset_volume exceeds volume".to_string());
    }
    if f.taker_buy_quote_asset_volume > f.quote_asset_volume {
        return Err("taker_buy_quote_asset_volume exceeds quote_asset_volume".to_string());
    }
    let expected_close_time_ms = f.open_time_ms + f.duration_ms - 1;
    if f.close_time_ms != expected_close_time_ms {
        return Err(format!(
            "close_time {} != open_time + duration - 1 ({expected_close_time_ms})",
            f.close_time_ms
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bytes(entry_name: &str, content: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let mut writer = zip::ZipWriter::new(cursor);
            writer
                .start_file(entry_name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content.as_bytes()).unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn decodes_spot_headerless_shape() {
        let csv = "1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n";
        let bytes = zip_bytes("BTCUSDT-1h-2024-01.csv", csv);
        let (candles, report) = decode_archive(
            "BTCUSDT-1h-2024-01.zip",
            &bytes,
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::Spot,
        )
        .unwrap();
        assert_eq!(candles.len(), 1);
        assert!(report.rejected_rows.is_empty());
        assert_eq!(candles[0].timestamp_ms, 1_704_067_200_000);
        assert_eq!(candles[0].data_source, DataSource::Cloudfront);
    }

    #[test]
    fn decodes_futures_with_header_shape() {
        let csv = "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore\n\
                   1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n";
        let bytes = zip_bytes("BTCUSDT-1h-2024-01.csv", csv);
        let (candles, _report) = decode_archive(
            "BTCUSDT-1h-2024-01.zip",
            &bytes,
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::FuturesUm,
        )
        .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].number_of_trades, 150);
    }

    #[test]
    fn spot_and_futures_agree_on_row_count_and_columns() {
        let spot_csv = "1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n";
        let futures_csv = "open_time,open,high,low,close,volume,close_time,quote_volume,count,taker_buy_volume,taker_buy_quote_volume,ignore\n\
                   1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n";
        let (spot_candles, _) = decode_archive(
            "x.zip",
            &zip_bytes("x.csv", spot_csv),
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::Spot,
        )
        .unwrap();
        let (futures_candles, _) = decode_archive(
            "x.zip",
            &zip_bytes("x.csv", futures_csv),
            "BTCUSDT",
            Timeframe::H1,
            InstrumentType::FuturesUm,
        )
        .unwrap();
        assert_eq!(spot_candles.len(), futures_candles.len());
        assert_eq!(spot_candles[0].close, futures_candles[0].close);
    }

    #[test]
    fn microsecond_epochs_are_detected_and_scaled() {
        let csv = "1704067200000000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999000,530000.0,150,6.0,260000.0,0\n";
        let bytes = zip_bytes("x.csv", csv);
        let (candles, _) =
            decode_archive("x.zip", &bytes, "BTCUSDT", Timeframe::H1, InstrumentType::Spot).unwrap();
        assert_eq!(candles[0].timestamp_ms, 1_704_067_200_000);
    }

    #[test]
    fn classify_epoch_rejects_twelve_digit_values() {
        assert_eq!(classify_epoch(1_704_067_200_000), Some(EpochFormat::Milliseconds));
        assert_eq!(classify_epoch(1_704_067_200_000_000), Some(EpochFormat::Microseconds));
        assert_eq!(classify_epoch(170_406_720_000), None);
    }

    #[test]
    fn implausible_first_row_is_treated_as_a_missed_header() {
        let csv = "170406720000,42000.0,42500.0,41800.0,42300.0,12.5,170407079999,530000.0,150,6.0,260000.0,0\n\
                   1704070800000,42300.0,42600.0,42100.0,42400.0,10.0,1704074399999,420000.0,120,5.0,210000.0,0\n";
        let bytes = zip_bytes("x.csv", csv);
        let (candles, report) =
            decode_archive("x.zip", &bytes, "BTCUSDT", Timeframe::H1, InstrumentType::Spot).unwrap();
        assert_eq!(candles.len(), 1);
        assert!(report.rejected_rows.is_empty());
    }

    #[test]
    fn twelve_digit_epoch_on_a_later_row_is_a_decode_failure() {
        let csv = "1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n\
                   170406720000,42300.0,42600.0,42100.0,42400.0,10.0,170407439999,420000.0,120,5.0,210000.0,0\n";
        let bytes = zip_bytes("x.csv", csv);
        let (candles, report) =
            decode_archive("x.zip", &bytes, "BTCUSDT", Timeframe::H1, InstrumentType::Spot).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(report.rejected_rows.len(), 1);
    }

    #[test]
    fn invariant_violation_drops_row_not_archive() {
        let csv = "1704067200000,42000.0,41000.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n\
                   1704070800000,42300.0,42600.0,42100.0,42400.0,10.0,1704074399999,420000.0,120,5.0,210000.0,0\n";
        let bytes = zip_bytes("x.csv", csv);
        let (candles, report) =
            decode_archive("x.zip", &bytes, "BTCUSDT", Timeframe::H1, InstrumentType::Spot).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(report.rejected_rows.len(), 1);
    }

    #[test]
    fn empty_archive_is_decode_failure() {
        let mut buf = Vec::new();
        {
            let cursor = Cursor::new(&mut buf);
            let writer = zip::ZipWriter::new(cursor);
            writer.finish().unwrap();
        }
        let result = decode_archive("x.zip", &buf, "BTCUSDT", Timeframe::H1, InstrumentType::Spot);
        assert!(result.is_err());
    }
}
