use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use shared::models::Candle;

use crate::config::CsvSettings;
use crate::error::EngineError;

// Number and date handling for exported quote files.
pub mod number_format {
    use anyhow::{anyhow, Result};
    use chrono::{DateTime, NaiveDate, NaiveTime, Utc};

    use crate::config::DecimalStyle;

    /// Parses `1.234,56` (comma style) or `1,234.56` (point style).
    pub fn parse_decimal(s: &str, style: DecimalStyle) -> Result<f64> {
        let trimmed = s.trim();
        let normalized = match style {
            DecimalStyle::Comma => trimmed.replace('.', "").replace(',', "."),
            DecimalStyle::Point => trimmed.replace(',', ""),
        };
        normalized
            .parse::<f64>()
            .map_err(|e| anyhow!("Failed to parse decimal '{}': {}", s, e))
    }

    /// Trade counts are integers, possibly with thousands separators.
    pub fn parse_count(s: &str) -> Result<u32> {
        let digits: String = s
            .trim()
            .chars()
            .filter(|c| *c != '.' && *c != ',')
            .collect();
        digits
            .parse::<u32>()
            .map_err(|e| anyhow!("Failed to parse count '{}': {}", s, e))
    }

    /// Combines a date and an optional time column into a UTC timestamp.
    /// Without a time column the date may also be a full RFC 3339 timestamp.
    pub fn parse_timestamp(
        date_str: &str,
        time_str: Option<&str>,
        date_format: &str,
        time_format: &str,
    ) -> Result<DateTime<Utc>> {
        let date_str = date_str.trim();
        let date = match NaiveDate::parse_from_str(date_str, date_format) {
            Ok(date) => date,
            Err(e) => {
                if time_str.is_none() {
                    if let Ok(dt) = DateTime::parse_from_rfc3339(date_str) {
                        return Ok(dt.with_timezone(&Utc));
                    }
                }
                return Err(anyhow!("Failed to parse date '{}': {}", date_str, e));
            }
        };
        let time = match time_str {
            Some(t) => NaiveTime::parse_from_str(t.trim(), time_format)
                .map_err(|e| anyhow!("Failed to parse time '{}': {}", t, e))?,
            None => NaiveTime::MIN,
        };
        Ok(DateTime::from_naive_utc_and_offset(date.and_time(time), Utc))
    }

}

const SYMBOL_HEADERS: &[&str] = &["symbol", "ticker", "instrument", "ativo"];
const DATE_HEADERS: &[&str] = &["date", "timestamp", "datetime", "data"];
const TIME_HEADERS: &[&str] = &["time", "hora"];
const OPEN_HEADERS: &[&str] = &["open", "o", "abertura"];
const HIGH_HEADERS: &[&str] = &["high", "h", "máximo", "maximo"];
const LOW_HEADERS: &[&str] = &["low", "l", "mínimo", "minimo"];
const CLOSE_HEADERS: &[&str] = &["close", "c", "fechamento"];
const VOLUME_HEADERS: &[&str] = &["volume", "vol"];
const TRADES_HEADERS: &[&str] = &["trades", "quantidade", "negocios", "negócios"];

// Column positions resolved once from the header row.
struct ColumnMap {
    symbol: Option<usize>,
    date: usize,
    time: Option<usize>,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: Option<usize>,
    trades: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &StringRecord) -> Result<Self, EngineError> {
        let find = |aliases: &[&str]| {
            headers.iter().position(|h| {
                let h = h.trim().to_lowercase();
                aliases.iter().any(|a| *a == h)
            })
        };
        let require = |aliases: &[&str]| {
            find(aliases).ok_or_else(|| {
                EngineError::CsvDataFormatError(format!(
                    "Missing '{}' column in CSV header",
                    aliases[0]
                ))
            })
        };

        Ok(ColumnMap {
            symbol: find(SYMBOL_HEADERS),
            date: require(DATE_HEADERS)?,
            time: find(TIME_HEADERS),
            open: require(OPEN_HEADERS)?,
            high: require(HIGH_HEADERS)?,
            low: require(LOW_HEADERS)?,
            close: require(CLOSE_HEADERS)?,
            volume: find(VOLUME_HEADERS),
            trades: find(TRADES_HEADERS),
        })
    }
}

/// Loads candles from delimited quote exports.
///
/// Both English (`date,open,high,low,close`) and B3 style
/// (`Ativo;Data;Hora;Abertura;Máximo;Mínimo;Fechamento;Volume;Quantidade`)
/// headers are recognised.
pub struct CsvCandleParser {
    settings: CsvSettings,
    delimiter: u8,
}

impl CsvCandleParser {
    pub fn new(settings: CsvSettings) -> Result<Self, EngineError> {
        let delimiter = settings.delimiter_byte()?;
        Ok(CsvCandleParser { settings, delimiter })
    }

    pub fn load_candles_from_csv(
        &self,
        file_path: impl AsRef<Path>,
        default_symbol: &str,
    ) -> Result<Vec<Candle>, EngineError> {
        let file_path = file_path.as_ref();
        let file = File::open(file_path)?;
        let candles = self.parse_reader(BufReader::new(file), default_symbol)?;
        tracing::info!(
            path = %file_path.display(),
            count = candles.len(),
            "Loaded candles from CSV"
        );
        Ok(candles)
    }

    pub fn parse_reader<R: Read>(
        &self,
        reader: R,
        default_symbol: &str,
    ) -> Result<Vec<Candle>, EngineError> {
        let mut rdr = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = ColumnMap::from_headers(rdr.headers()?)?;
        let mut candles = Vec::new();

        for (idx, result) in rdr.records().enumerate() {
            // Header is line 1.
            let line = idx + 2;
            let record = result?;
            candles.push(self.parse_record(&record, &columns, default_symbol, line)?);
        }
        Ok(candles)
    }

    fn parse_record(
        &self,
        record: &StringRecord,
        columns: &ColumnMap,
        default_symbol: &str,
        line: usize,
    ) -> Result<Candle, EngineError> {
        let field = |pos: usize, name: &str| {
            record.get(pos).filter(|v| !v.is_empty()).ok_or_else(|| {
                EngineError::CsvDataFormatError(format!(
                    "Missing '{}' field at line {}",
                    name, line
                ))
            })
        };
        let optional = |pos: Option<usize>| {
            pos.and_then(|p| record.get(p)).filter(|v| !v.is_empty())
        };
        let bad = |name: &str, err: anyhow::Error| {
            EngineError::CsvDataFormatError(format!(
                "Error parsing '{}' at line {}: {}",
                name, line, err
            ))
        };
        let style = self.settings.decimal_style;
        let price = |pos: usize, name: &str| -> Result<f64, EngineError> {
            number_format::parse_decimal(field(pos, name)?, style).map_err(|e| bad(name, e))
        };

        let timestamp = number_format::parse_timestamp(
            field(columns.date, "date")?,
            optional(columns.time),
            &self.settings.date_format,
            &self.settings.time_format,
        )
        .map_err(|e| bad("date", e))?;

        let volume = match optional(columns.volume) {
            Some(v) => {
                number_format::parse_decimal(v, style).map_err(|e| bad("volume", e))?
            }
            None => 0.0,
        };
        let trades = match optional(columns.trades) {
            Some(v) => number_format::parse_count(v).map_err(|e| bad("trades", e))?,
            None => 0,
        };

        Ok(Candle {
            symbol: optional(columns.symbol).unwrap_or(default_symbol).to_string(),
            timestamp,
            open: price(columns.open, "open")?,
            high: price(columns.high, "high")?,
            low: price(columns.low, "low")?,
            close: price(columns.close, "close")?,
            volume,
            trades,
        })
    }
}
