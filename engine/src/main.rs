// `atr` command: load candles from a CSV export and print the Average True Range.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use engine::config::EngineSettings;
use engine::data::{CsvCandleParser, MarketDataStore};
use engine::indicators::AtrCalculator;
use shared::models::Granularity;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atr", version, about = "Average True Range over a CSV candle export")]
struct Cli {
    /// CSV file with one candle per row
    #[arg(long)]
    csv: PathBuf,

    /// Instrument to compute the ATR for; also used for rows without a symbol column
    #[arg(long)]
    instrument: String,

    /// Candle granularity code (S5 .. M30, H1 .. H12, D, W, M)
    #[arg(long)]
    granularity: Option<Granularity>,

    /// Number of true range samples to average
    #[arg(long)]
    period: Option<usize>,

    /// JSON settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the full reading as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    // Logs go to stderr so stdout only carries the result.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => EngineSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => EngineSettings::default(),
    };
    if let Some(period) = cli.period {
        settings.atr_period = period;
    }
    if let Some(granularity) = cli.granularity {
        settings.granularity = granularity;
    }
    settings.validate()?;

    let parser = CsvCandleParser::new(settings.csv.clone())?;
    let candles = parser
        .load_candles_from_csv(&cli.csv, &cli.instrument)
        .with_context(|| format!("failed to read candles from {}", cli.csv.display()))?;

    // Rows tagged with other symbols are stored under their own series.
    let mut store = MarketDataStore::new();
    let mut by_symbol: Vec<(String, Vec<_>)> = Vec::new();
    for candle in candles {
        match by_symbol.iter_mut().find(|(symbol, _)| *symbol == candle.symbol) {
            Some((_, series)) => series.push(candle),
            None => by_symbol.push((candle.symbol.clone(), vec![candle])),
        }
    }
    for (symbol, series) in by_symbol {
        store.add_candles(&symbol, settings.granularity, series);
    }
    info!(symbols = ?store.symbols(), granularity = %settings.granularity, "Candle store ready");

    let mut calculator = AtrCalculator::with_period(&store, settings.atr_period)?;
    let value = calculator.calculate(&cli.instrument, settings.granularity)?;

    match calculator.reading() {
        Some(reading) if cli.json => println!("{}", serde_json::to_string_pretty(reading)?),
        _ => println!("{}", value),
    }
    Ok(())
}
