/// Source Catalog: enumerates CDN download tasks for a symbol/timeframe
/// over a date range, classifying monthly vs daily sourcing at the
/// configured lookback cutoff, and batches them for bounded-concurrency
/// fetch.
use crate::model::{DownloadTask, InstrumentType, SourceKind};
use crate::timeframe::Timeframe;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, TimeZone, Utc};

const BASE_URL: &str = "https://data.binance.vision/data";

pub struct SourceCatalog {
    pub daily_lookback_days: i64,
    pub concurrency: usize,
}

impl SourceCatalog {
    pub fn new(daily_lookback_days: i64, concurrency: usize) -> Self {
        Self {
            daily_lookback_days,
            concurrency,
        }
    }

    /// Returns download tasks covering `[start, end]`, sorted ascending by
    /// start instant. Missing archives (404, typically the in-progress
    /// month) are not an error here; they surface later as failed fetches.
    pub fn tasks_for(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<DownloadTask> {
        let cutoff = Utc::now() - ChronoDuration::days(self.daily_lookback_days);
        let mut tasks = Vec::new();

        let mut month_cursor = start.date_naive().with_day(1).expect("day 1 is always valid");
        let end_date = end.date_naive();

        while month_cursor <= end_date {
            let month_start = Utc.from_utc_datetime(&month_cursor.and_hms_opt(0, 0, 0).unwrap());
            let next_month = add_month(month_cursor);
            let month_end_exclusive =
                Utc.from_utc_datetime(&next_month.and_hms_opt(0, 0, 0).unwrap());
            let clipped_start = month_start.max(start);
            let clipped_end = month_end_exclusive.min(end + ChronoDuration::milliseconds(1));

            if month_end_exclusive <= cutoff {
                tasks.push(self.monthly_task(
                    symbol,
                    timeframe,
                    instrument_type,
                    month_cursor,
                    clipped_start,
                    clipped_end,
                ));
            } else {
                let mut day_cursor = clipped_start.date_naive().max(month_cursor);
                let day_end = clipped_end.date_naive();
                while day_cursor <= day_end && day_cursor < next_month {
                    let day_start = Utc.from_utc_datetime(&day_cursor.and_hms_opt(0, 0, 0).unwrap());
                    let day_end_exclusive = day_start + ChronoDuration::days(1);
                    tasks.push(self.daily_task(
                        symbol,
                        timeframe,
                        instrument_type,
                        day_cursor,
                        day_start.max(start),
                        day_end_exclusive.min(end + ChronoDuration::milliseconds(1)),
                    ));
                    day_cursor = day_cursor.succ_opt().expect("date overflow");
                }
            }

            month_cursor = next_month;
        }

        tasks.sort_by_key(|t| t.range_start);
        tasks
    }

    /// Groups tasks into concurrent batches of width `concurrency`.
    pub fn batches<'a>(&self, tasks: &'a [DownloadTask]) -> Vec<&'a [DownloadTask]> {
        tasks.chunks(self.concurrency.max(1)).collect()
    }

    fn monthly_task(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
        month: NaiveDate,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> DownloadTask {
        let period_id = format!("{:04}-{:02}", month.year(), month.month());
        let filename = format!("{symbol}-{}-{period_id}.zip", timeframe.cdn_token());
        let url = format!(
            "{BASE_URL}/{}/monthly/klines/{symbol}/{}/{filename}",
            instrument_type.cdn_market_path(),
            timeframe.cdn_token(),
        );
        DownloadTask {
            url,
            filename,
            source_kind: SourceKind::Monthly,
            period_id,
            range_start,
            range_end,
        }
    }

    fn daily_task(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        instrument_type: InstrumentType,
        day: NaiveDate,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> DownloadTask {
        let period_id = format!("{:04}-{:02}-{:02}", day.year(), day.month(), day.day());
        let filename = format!("{symbol}-{}-{period_id}.zip", timeframe.cdn_token());
        let url = format!(
            "{BASE_URL}/{}/daily/klines/{symbol}/{}/{filename}",
            instrument_type.cdn_market_path(),
            timeframe.cdn_token(),
        );
        DownloadTask {
            url,
            filename,
            source_kind: SourceKind::Daily,
            period_id,
            range_start,
            range_end,
        }
    }
}

fn add_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("valid month arithmetic")
}
