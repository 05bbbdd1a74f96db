// ⚙️ Pipeline Configuration - run settings from JSON, overridable from the CLI

use crate::aggregation::TemporalWindow;
use crate::error::{PipelineError, PipelineResult};
use crate::fx::DEFAULT_BASE_CURRENCY;
use crate::parser::LoadOptions;
use crate::period::Granularity;
use crate::record::InstrumentType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One export to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,

    /// For exports without an instrument column (e.g. "bond")
    #[serde(default)]
    pub default_instrument: Option<InstrumentType>,

    #[serde(default)]
    pub default_currency: Option<String>,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SourceConfig {
            path: path.into(),
            default_instrument: None,
            default_currency: None,
        }
    }

    pub fn with_default_instrument(mut self, instrument: InstrumentType) -> Self {
        self.default_instrument = Some(instrument);
        self
    }

    pub fn load_options(&self) -> LoadOptions {
        let mut options = LoadOptions::default();
        if let Some(instrument) = self.default_instrument {
            options = options.with_default_instrument(instrument);
        }
        if let Some(currency) = &self.default_currency {
            options = options.with_default_currency(currency);
        }
        options
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sources: Vec<SourceConfig>,

    /// Banks, adoption flags, fundamentals, mechanisms; built-in tables when absent
    pub reference: Option<PathBuf>,

    /// `currency,date,rate` CSV; only the base currency converts when absent
    pub fx_rates: Option<PathBuf>,

    pub output_dir: PathBuf,
    pub base_currency: String,
    pub granularity: Granularity,
    pub temporal: TemporalWindow,
    pub render_charts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sources: Vec::new(),
            reference: None,
            fx_rates: None,
            output_dir: PathBuf::from("results"),
            base_currency: DEFAULT_BASE_CURRENCY.to_string(),
            granularity: Granularity::Year,
            temporal: TemporalWindow::default(),
            render_charts: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: PipelineConfig =
            serde_json::from_str(&content).map_err(|source| PipelineError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::reference("no input sources configured"));
        }
        if self.base_currency.len() != 3 {
            return Err(PipelineError::reference(format!(
                "base currency '{}' is not a 3-letter code",
                self.base_currency
            )));
        }
        if self.temporal.start_year > self.temporal.end_year {
            return Err(PipelineError::reference(format!(
                "temporal window {}-{} is empty",
                self.temporal.start_year, self.temporal.end_year
            )));
        }
        if self.temporal.bond_share <= Decimal::ZERO || self.temporal.bond_share > Decimal::ONE {
            return Err(PipelineError::reference(format!(
                "bond share {} must be in (0, 1]",
                self.temporal.bond_share
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.base_currency, "USD");
        assert_eq!(config.temporal.start_year, 2014);
        assert_eq!(config.temporal.end_year, 2024);
        assert_eq!(config.temporal.bond_share, dec!(0.7));
        assert!(config.render_charts);
        // No sources yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "sources": [
                    {{"path": "bonds.csv", "default_instrument": "bond"}},
                    {{"path": "loans.csv", "default_instrument": "loan", "default_currency": "usd"}}
                ],
                "granularity": "quarter",
                "output_dir": "out"
            }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.granularity, Granularity::Quarter);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.base_currency, "USD");

        let options = config.sources[1].load_options();
        assert_eq!(options.default_instrument, Some(InstrumentType::Loan));
        assert_eq!(options.default_currency.as_deref(), Some("USD"));
    }

    #[test]
    fn test_rejects_bad_bond_share() {
        let mut config = PipelineConfig::default();
        config.sources.push(SourceConfig::new("bonds.csv"));
        config.validate().unwrap();

        config.temporal.bond_share = dec!(0);
        assert!(config.validate().is_err());
    }
}
