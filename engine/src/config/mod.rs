pub mod settings;

pub use settings::{CsvSettings, DecimalStyle, EngineSettings};
