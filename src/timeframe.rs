/// Canonical timeframe table: one row per supported token, giving the CDN
/// path fragment, the REST `interval` query value, and the candle duration.
///
/// Binance's dual monthly notation (`1mo` in CDN paths, `1M` over REST) is
/// just two columns of the same row rather than a special case threaded
/// through the rest of the pipeline.
use crate::errors::GaplessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    S1,
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H8,
    H12,
    D1,
    D3,
    W1,
    Mo1,
}

pub const ALL_TIMEFRAMES: [Timeframe; 16] = [
    Timeframe::S1,
    Timeframe::M1,
    Timeframe::M3,
    Timeframe::M5,
    Timeframe::M15,
    Timeframe::M30,
    Timeframe::H1,
    Timeframe::H2,
    Timeframe::H4,
    Timeframe::H6,
    Timeframe::H8,
    Timeframe::H12,
    Timeframe::D1,
    Timeframe::D3,
    Timeframe::W1,
    Timeframe::Mo1,
];

impl Timeframe {
    /// Parses the token used in CDN paths, REST queries, and user input
    /// (`1mo` and `1M` both resolve to the same variant).
    pub fn parse(token: &str) -> std::result::Result<Self, GaplessError> {
        Ok(match token {
            "1s" => Self::S1,
            "1m" => Self::M1,
            "3m" => Self::M3,
            "5m" => Self::M5,
            "15m" => Self::M15,
            "30m" => Self::M30,
            "1h" => Self::H1,
            "2h" => Self::H2,
            "4h" => Self::H4,
            "6h" => Self::H6,
            "8h" => Self::H8,
            "12h" => Self::H12,
            "1d" => Self::D1,
            "3d" => Self::D3,
            "1w" => Self::W1,
            "1mo" | "1M" => Self::Mo1,
            other => {
                return Err(GaplessError::InvalidInput(format!(
                    "unsupported timeframe: {other}"
                )));
            }
        })
    }

    /// Token as used in CDN URL paths and as stored in the `timeframe` column.
    pub fn cdn_token(self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1mo",
        }
    }

    /// Token as used in the REST `interval` query parameter.
    pub fn rest_interval(self) -> &'static str {
        match self {
            Self::Mo1 => "1M",
            other => other.cdn_token(),
        }
    }

    /// Exact candle duration in milliseconds. `1mo` uses the average
    /// Gregorian month (30 days) as the CDN and REST sources themselves do
    /// not emit calendar-variable candle widths for bucketing purposes.
    pub fn duration_ms(self) -> i64 {
        match self {
            Self::S1 => 1_000,
            Self::M1 => 60_000,
            Self::M3 => 180_000,
            Self::M5 => 300_000,
            Self::M15 => 900_000,
            Self::M30 => 1_800_000,
            Self::H1 => 3_600_000,
            Self::H2 => 7_200_000,
            Self::H4 => 14_400_000,
            Self::H6 => 21_600_000,
            Self::H8 => 28_800_000,
            Self::H12 => 43_200_000,
            Self::D1 => 86_400_000,
            Self::D3 => 259_200_000,
            Self::W1 => 604_800_000,
            Self::Mo1 => 2_592_000_000,
        }
    }
}
