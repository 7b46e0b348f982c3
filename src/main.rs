/// Thin CLI over the orchestrator: `ingest` downloads and loads archives
/// for a range without returning rows, `query` runs the full gapless
/// algorithm and prints the result as JSON.
use clap::{Parser, Subcommand};
use gapless_binance_ohlcv::config::Config;
use gapless_binance_ohlcv::model::{InstrumentType, IngestionRequest};
use gapless_binance_ohlcv::orchestrator::Orchestrator;
use gapless_binance_ohlcv::timeframe::Timeframe;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "gapless-binance-ohlcv", about = "Gapless Binance OHLCV ingestion and query")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download and load archives covering a range; does not fill gaps.
    Ingest(RangeArgs),
    /// Run the full gapless query algorithm and print candles as JSON.
    Query(RangeArgs),
}

#[derive(Parser)]
struct RangeArgs {
    /// Comma-separated symbols, e.g. BTCUSDT,ETHUSDT
    #[arg(long)]
    symbols: String,
    #[arg(long)]
    timeframe: String,
    #[arg(long, value_enum, default_value = "spot")]
    instrument: InstrumentArg,
    #[arg(long)]
    start: chrono::DateTime<chrono::Utc>,
    #[arg(long)]
    end: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, clap::ValueEnum)]
enum InstrumentArg {
    Spot,
    FuturesUm,
}

impl From<InstrumentArg> for InstrumentType {
    fn from(value: InstrumentArg) -> Self {
        match value {
            InstrumentArg::Spot => InstrumentType::Spot,
            InstrumentArg::FuturesUm => InstrumentType::FuturesUm,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        tracing::error!(%err, "fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    let orchestrator = Orchestrator::new(config)?;

    match cli.command {
        Command::Ingest(args) => {
            let request = build_request(args, true, false)?;
            orchestrator.query(request, CancellationToken::new()).await?;
            println!("ingestion complete");
        }
        Command::Query(args) => {
            let request = build_request(args, true, true)?;
            let candles = orchestrator.query(request, CancellationToken::new()).await?;
            println!("{}", serde_json::to_string_pretty(&CandleRows(&candles))?);
        }
    }
    Ok(())
}

fn build_request(args: RangeArgs, auto_ingest: bool, fill_gaps: bool) -> anyhow::Result<IngestionRequest> {
    let symbols = args.symbols.split(',').map(|s| s.trim().to_string()).collect();
    let timeframe = Timeframe::parse(&args.timeframe)?;
    Ok(IngestionRequest {
        symbols,
        timeframe,
        instrument_type: args.instrument.into(),
        start: args.start,
        end: args.end,
        auto_ingest,
        fill_gaps,
    })
}

/// Serializes candles field-by-field; `Candle` itself carries a
/// `Timeframe`/`InstrumentType` pair that don't implement `Serialize`.
struct CandleRows<'a>(&'a [gapless_binance_ohlcv::model::Candle]);

impl serde::Serialize for CandleRows<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for c in self.0 {
            seq.serialize_element(&serde_json::json!({
                "timestamp_ms": c.timestamp_ms,
                "symbol": c.symbol,
                "timeframe": c.timeframe.cdn_token(),
                "instrument_type": c.instrument_type.as_str(),
                "data_source": c.data_source.as_str(),
                "open": c.open,
                "high": c.high,
                "low": c.low,
                "close": c.close,
                "volume": c.volume,
                "close_time_ms": c.close_time_ms,
                "quote_asset_volume": c.quote_asset_volume,
                "number_of_trades": c.number_of_trades,
                "taker_buy_base_asset_volume": c.taker_buy_base_asset_volume,
                "taker_buy_quote_asset_volume": c.taker_buy_quote_asset_volume,
                "funding_rate": c.funding_rate,
            }))?;
        }
        seq.end()
    }
}
