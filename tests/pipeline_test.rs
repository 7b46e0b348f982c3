/// End-to-end exercise of decode -> version -> load -> gap-detect -> read,
/// the portion of the pipeline that doesn't require a live network peer.
use gapless_binance_ohlcv::decoder::decode_archive;
use gapless_binance_ohlcv::model::InstrumentType;
use gapless_binance_ohlcv::store::{gaps, loader, read, Store};
use gapless_binance_ohlcv::timeframe::Timeframe;
use gapless_binance_ohlcv::versioner;
use std::io::{Cursor, Write};

fn archive_with_gap() -> Vec<u8> {
    // Hourly rows for 00:00 and 03:00, a three-hour gap in between.
    let csv = "1704067200000,42000.0,42500.0,41800.0,42300.0,12.5,1704070799999,530000.0,150,6.0,260000.0,0\n\
               1704078000000,42900.0,43100.0,42700.0,43000.0,9.0,1704081599999,387000.0,120,4.5,193500.0,0\n";
    let mut buf = Vec::new();
    {
        let cursor = Cursor::new(&mut buf);
        let mut writer = zip::ZipWriter::new(cursor);
        writer.start_file("BTCUSDT-1h-2024-01.csv", zip::write::SimpleFileOptions::default()).unwrap();
        writer.write_all(csv.as_bytes()).unwrap();
        writer.finish().unwrap();
    }
    buf
}

#[test]
fn decoded_archive_loads_and_leaves_a_detectable_gap() {
    let bytes = archive_with_gap();
    let (mut candles, report) = decode_archive(
        "BTCUSDT-1h-2024-01.zip",
        &bytes,
        "BTCUSDT",
        Timeframe::H1,
        InstrumentType::Spot,
    )
    .unwrap();
    assert_eq!(candles.len(), 2);
    assert!(report.rejected_rows.is_empty());

    for candle in &mut candles {
        versioner::stamp(candle);
    }

    let mut store = Store::open_in_memory().unwrap();
    let inserted = loader::insert_candles(store.connection_mut(), &candles).unwrap();
    assert_eq!(inserted, 2);

    let base = 1_704_067_200_000i64;
    let end = base + 3 * Timeframe::H1.duration_ms();

    let found_gaps = gaps::detect_gaps(
        store.connection(),
        "BTCUSDT",
        Timeframe::H1,
        InstrumentType::Spot.as_str(),
        base,
        end,
    )
    .unwrap();
    assert_eq!(found_gaps.len(), 1);
    assert_eq!(found_gaps[0].expected_bars, 2);

    let rows = read::range(
        store.connection(),
        "BTCUSDT",
        Timeframe::H1,
        InstrumentType::Spot,
        base,
        end,
    )
    .unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn reingesting_the_same_archive_does_not_duplicate_rows() {
    let bytes = archive_with_gap();
    let (mut candles, _) = decode_archive(
        "BTCUSDT-1h-2024-01.zip",
        &bytes,
        "BTCUSDT",
        Timeframe::H1,
        InstrumentType::Spot,
    )
    .unwrap();
    for candle in &mut candles {
        versioner::stamp(candle);
    }

    let mut store = Store::open_in_memory().unwrap();
    loader::insert_candles(store.connection_mut(), &candles).unwrap();
    loader::insert_candles(store.connection_mut(), &candles).unwrap();

    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM candles", [], |r| r.get(0))
        .unwrap();
    assert_eq!(count, 2);
}
