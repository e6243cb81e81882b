// Engine settings, loaded from a JSON file or taken from defaults.
use std::path::Path;

use serde::Deserialize;
use shared::models::Granularity;

use crate::error::EngineError;
use crate::indicators::atr::{check_period, DEFAULT_PERIOD};

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub atr_period: usize,
    pub granularity: Granularity,
    pub csv: CsvSettings,
}

/// How decimal numbers are written in input files.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DecimalStyle {
    /// `1.234,56`
    #[default]
    Comma,
    /// `1,234.56`
    Point,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CsvSettings {
    pub delimiter: String,
    pub decimal_style: DecimalStyle,
    pub date_format: String,
    pub time_format: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            atr_period: DEFAULT_PERIOD,
            granularity: Granularity::default(),
            csv: CsvSettings::default(),
        }
    }
}

impl Default for CsvSettings {
    fn default() -> Self {
        // B3 exports: "Ativo;Data;Hora;Abertura;..." with Brazilian number formatting.
        CsvSettings {
            delimiter: ";".to_string(),
            decimal_style: DecimalStyle::Comma,
            date_format: "%d/%m/%Y".to_string(),
            time_format: "%H:%M:%S".to_string(),
        }
    }
}

impl EngineSettings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let settings: EngineSettings = serde_json::from_str(&raw).map_err(|e| {
            EngineError::ConfigError(format!("Invalid settings file '{}': {}", path.display(), e))
        })?;
        settings.validate()?;
        tracing::debug!(path = %path.display(), ?settings, "Loaded engine settings");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        check_period(self.atr_period)?;
        self.csv.delimiter_byte()?;
        Ok(())
    }
}

impl CsvSettings {
    pub fn delimiter_byte(&self) -> Result<u8, EngineError> {
        match self.delimiter.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(EngineError::ConfigError(format!(
                "CSV delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            ))),
        }
    }
}
