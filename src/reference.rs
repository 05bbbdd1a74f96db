// 📚 Reference Data - banks, adoption flags, fundamentals, mechanisms
//
// Static tables loaded once per run from JSON. Without a file the built-in
// thesis tables are used.

use crate::entities::{AdoptionFlags, BankIdentity, BankRegistry};
use crate::error::{PipelineError, PipelineResult};
use crate::scores::{MechanismKind, RegulatoryMechanismScore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::info;

/// Per-bank figures the score calculator needs beyond the panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankFundamentals {
    /// Billions of base currency
    #[serde(default)]
    pub total_assets_bn: Option<f64>,

    /// Share of sustainability-linked KPIs met, 0-1
    pub kpi_achievement: f64,

    /// Persistence of the green pricing premium, 0-1
    pub premium_persistence: f64,

    /// Overrides the adoption score as the policy component when present
    #[serde(default)]
    pub policy_completeness: Option<f64>,

    pub regime: MechanismKind,

    /// Fossil-fuel financing from the bank's own reporting, billions.
    /// Takes precedence over the tag-derived fossil total in the NZBA figures.
    #[serde(default)]
    pub reported_fossil_bn: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankEntry {
    pub name: String,
    pub country: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub adoption: AdoptionFlags,
    #[serde(default)]
    pub fundamentals: Option<BankFundamentals>,
}

impl BankEntry {
    fn new(name: &str, country: &str, adoption: AdoptionFlags, aliases: &[&str]) -> Self {
        BankEntry {
            name: name.to_string(),
            country: country.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            adoption,
            fundamentals: None,
        }
    }

    fn with_fundamentals(
        mut self,
        total_assets_bn: f64,
        iai_level: f64,
        regime: MechanismKind,
    ) -> Self {
        self.fundamentals = Some(BankFundamentals {
            total_assets_bn: Some(total_assets_bn),
            kpi_achievement: iai_level,
            premium_persistence: iai_level,
            policy_completeness: None,
            regime,
            reported_fossil_bn: None,
        });
        self
    }

    fn with_reported_fossil(mut self, fossil_bn: f64) -> Self {
        if let Some(fundamentals) = self.fundamentals.as_mut() {
            fundamentals.reported_fossil_bn = Some(fossil_bn);
        }
        self
    }

    pub fn identity(&self) -> BankIdentity {
        let mut bank = BankIdentity::new(&self.name, &self.country, self.adoption);
        for alias in &self.aliases {
            bank.add_alias(alias);
        }
        bank
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceData {
    pub banks: Vec<BankEntry>,
    #[serde(default)]
    pub mechanisms: Vec<RegulatoryMechanismScore>,
}

impl ReferenceData {
    /// Load reference tables from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;

        let reference: ReferenceData =
            serde_json::from_str(&content).map_err(|source| PipelineError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        reference.validate()?;

        info!(
            "Loaded reference data: {} banks, {} mechanisms from {}",
            reference.banks.len(),
            reference.mechanisms.len(),
            path.display()
        );
        Ok(reference)
    }

    /// Structural checks; score-range checks happen when scoring
    pub fn validate(&self) -> PipelineResult<()> {
        let mut seen = HashSet::new();
        for bank in &self.banks {
            if bank.name.trim().is_empty() {
                return Err(PipelineError::reference("bank with empty name"));
            }
            if bank.country.trim().len() != 2 {
                return Err(PipelineError::reference(format!(
                    "{}: country '{}' is not a 2-letter code",
                    bank.name, bank.country
                )));
            }
            if !seen.insert(bank.name.as_str()) {
                return Err(PipelineError::reference(format!(
                    "bank '{}' listed twice",
                    bank.name
                )));
            }
        }
        Ok(())
    }

    /// Registry of every listed bank, in file order
    pub fn registry(&self) -> BankRegistry {
        let mut registry = BankRegistry::new();
        for bank in &self.banks {
            registry.register(bank.identity());
        }
        registry
    }

    pub fn fundamentals(&self, bank_name: &str) -> Option<&BankFundamentals> {
        self.banks
            .iter()
            .find(|b| b.name == bank_name)
            .and_then(|b| b.fundamentals.as_ref())
    }

    /// The ten banks and nine jurisdictions of the thesis analysis, with
    /// aliases as they appear in Refinitiv issuer names. Bank of America
    /// matches "BofA" only, never "BOA".
    ///
    /// Chinese total assets are the study's figures; the others are 2023
    /// annual-report values. KPI achievement and premium persistence use the
    /// jurisdiction's authenticity level (CN 0.76, EU 0.71, US 0.68).
    /// Reported fossil financing is the 2023 figure for the NZBA members that
    /// disclose it.
    pub fn thesis_defaults() -> Self {
        use MechanismKind::{Directive, Hybrid, MarketBased};
        let flags = AdoptionFlags::new;

        let banks = vec![
            BankEntry::new("ICBC", "CN", flags(false, false, true, false), &["Industrial and Commercial Bank"])
                .with_fundamentals(4200.0, 0.76, Directive),
            BankEntry::new("CCB", "CN", flags(false, false, false, true), &["China Construction", "Construction Bank"])
                .with_fundamentals(3600.0, 0.76, Directive),
            BankEntry::new("ABC", "CN", AdoptionFlags::default(), &["Agricultural Bank"])
                .with_fundamentals(3500.0, 0.76, Directive),
            BankEntry::new("Bank of China", "CN", flags(false, false, true, true), &["BOC"])
                .with_fundamentals(3400.0, 0.76, Directive),
            BankEntry::new("HSBC", "GB", AdoptionFlags::all(), &[])
                .with_fundamentals(3000.0, 0.71, MarketBased)
                .with_reported_fossil(22.6),
            BankEntry::new("BNP Paribas", "FR", AdoptionFlags::all(), &["BNPP"])
                .with_fundamentals(2900.0, 0.71, MarketBased),
            BankEntry::new("JPMorgan", "US", AdoptionFlags::all(), &["JP Morgan", "Chase"])
                .with_fundamentals(3900.0, 0.68, MarketBased)
                .with_reported_fossil(40.8),
            BankEntry::new("Bank of America", "US", AdoptionFlags::all(), &["BofA"])
                .with_fundamentals(3200.0, 0.68, MarketBased)
                .with_reported_fossil(32.2),
            BankEntry::new("Citigroup", "US", flags(false, true, true, true), &["Citi"])
                .with_fundamentals(2400.0, 0.68, MarketBased)
                .with_reported_fossil(28.9),
            BankEntry::new("Wells Fargo", "US", flags(false, true, true, true), &[])
                .with_fundamentals(1900.0, 0.68, MarketBased)
                .with_reported_fossil(24.5),
        ];

        let mechanisms = vec![
            RegulatoryMechanismScore::new("China", Directive, 82.5),
            RegulatoryMechanismScore::new("India", Directive, 68.3),
            RegulatoryMechanismScore::new("Brazil", Directive, 65.7),
            RegulatoryMechanismScore::new("EU", MarketBased, 57.9),
            RegulatoryMechanismScore::new("UK", MarketBased, 61.2),
            RegulatoryMechanismScore::new("US", MarketBased, 52.4),
            RegulatoryMechanismScore::new("Japan", MarketBased, 59.3),
            RegulatoryMechanismScore::new("South Korea", Hybrid, 71.8),
            RegulatoryMechanismScore::new("Singapore", Hybrid, 64.5),
        ];

        ReferenceData { banks, mechanisms }
    }
}

impl Default for ReferenceData {
    fn default() -> Self {
        ReferenceData::thesis_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let reference = ReferenceData::thesis_defaults();
        reference.validate().unwrap();

        let registry = reference.registry();
        assert_eq!(registry.count(), 10);
        assert_eq!(registry.by_country("CN").len(), 4);
        assert_eq!(registry.resolve("BofA Finance LLC").unwrap().canonical_name, "Bank of America");
        assert!(registry.resolve("BOA").is_none());
        assert_eq!(reference.mechanisms.len(), 9);
    }

    #[test]
    fn test_reported_fossil_for_disclosing_members() {
        let reference = ReferenceData::thesis_defaults();
        let reported = |name: &str| reference.fundamentals(name).and_then(|f| f.reported_fossil_bn);
        assert_eq!(reported("JPMorgan"), Some(40.8));
        assert_eq!(reported("HSBC"), Some(22.6));
        assert_eq!(reported("BNP Paribas"), None);
        assert_eq!(reported("ICBC"), None);

        let total: f64 = reference
            .banks
            .iter()
            .filter_map(|b| b.fundamentals.as_ref()?.reported_fossil_bn)
            .sum();
        assert!((total - 149.0).abs() < 1e-9);
    }

    #[test]
    fn test_fundamentals_lookup() {
        let reference = ReferenceData::thesis_defaults();
        let icbc = reference.fundamentals("ICBC").unwrap();
        assert_eq!(icbc.total_assets_bn, Some(4200.0));
        assert_eq!(icbc.regime, MechanismKind::Directive);
        assert!(reference.fundamentals("Nobody").is_none());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "banks": [
                    {{"name": "Itau", "country": "br", "aliases": ["Itau Unibanco"],
                      "adoption": {{"nzba": true, "prb": true}},
                      "fundamentals": {{"total_assets_bn": 500.0, "kpi_achievement": 0.6,
                                        "premium_persistence": 0.5, "regime": "hybrid"}}}}
                ],
                "mechanisms": [
                    {{"mechanism": "Brazil", "kind": "directive", "effectiveness": 65.7}}
                ]
            }}"#
        )
        .unwrap();

        let reference = ReferenceData::from_file(file.path()).unwrap();
        let registry = reference.registry();
        let itau = registry.resolve("ITAU UNIBANCO HOLDING SA").unwrap();
        assert_eq!(itau.canonical_name, "Itau");
        assert_eq!(itau.country, "BR");
        assert_eq!(itau.adoption.count(), 2);
        assert_eq!(reference.mechanisms.len(), 1);
        assert_eq!(
            reference.fundamentals("Itau").unwrap().regime,
            MechanismKind::Hybrid
        );
    }

    #[test]
    fn test_from_file_rejects_duplicates_and_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"banks": [{{"name": "A", "country": "US"}}, {{"name": "A", "country": "US"}}]}}"#
        )
        .unwrap();
        assert!(matches!(
            ReferenceData::from_file(file.path()),
            Err(PipelineError::Reference { .. })
        ));

        let mut bad = NamedTempFile::new().unwrap();
        write!(bad, "{{ not json").unwrap();
        assert!(matches!(
            ReferenceData::from_file(bad.path()),
            Err(PipelineError::Json { .. })
        ));

        assert!(matches!(
            ReferenceData::from_file("/nonexistent/reference.json"),
            Err(PipelineError::Io { .. })
        ));
    }
}
