// 📄 Transaction Record - one green bond or loan issuance
// Immutable once loaded; everything downstream borrows it

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ============================================================================
// INSTRUMENT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentType {
    Bond,
    Loan,
}

impl InstrumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Bond => "bond",
            InstrumentType::Loan => "loan",
        }
    }

    /// Parse the free-text instrument column
    ///
    /// Accepts "bond", "Green Bond", "B", "loan", "Sustainability-Linked Loan", ...
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.trim().to_lowercase();
        if lower == "b" || lower.contains("bond") || lower.contains("note") {
            return Some(InstrumentType::Bond);
        }
        if lower == "l" || lower.contains("loan") || lower.contains("facility") {
            return Some(InstrumentType::Loan);
        }
        None
    }
}

impl fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// USE OF PROCEEDS
// ============================================================================

/// Bucket a record's amount is summed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProceedsClass {
    Green,
    Fossil,
    Other,
}

const FOSSIL_KEYWORDS: &[&str] = &["coal", "oil", "gas", "fossil", "lng", "petroleum"];

const GREEN_KEYWORDS: &[&str] = &[
    "green",
    "renewable",
    "solar",
    "wind",
    "clean",
    "efficien",
    "climate",
    "sustainab",
    "transition",
    "hydro",
];

impl ProceedsClass {
    /// Classify a use-of-proceeds tag.
    ///
    /// Inputs are green-finance exports, so an untagged record is green.
    /// Keywords match word prefixes ("biogas" is not gas, "efficiency" is green).
    /// Fossil keywords are checked first: "gas-to-green transition" is fossil.
    pub fn classify(tag: Option<&str>) -> Self {
        let tag = match tag.map(str::trim) {
            None | Some("") => return ProceedsClass::Green,
            Some(t) => t.to_lowercase(),
        };

        let words: Vec<&str> = tag
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let has = |keywords: &[&str]| {
            words
                .iter()
                .any(|w| keywords.iter().any(|k| w.starts_with(k)))
        };

        if has(FOSSIL_KEYWORDS) {
            return ProceedsClass::Fossil;
        }
        if has(GREEN_KEYWORDS) {
            return ProceedsClass::Green;
        }
        ProceedsClass::Other
    }
}

// ============================================================================
// TRANSACTION RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Issuer name exactly as it appears in the export
    pub issuer_name: String,

    /// Face amount in `currency`, never negative
    pub amount: Decimal,

    /// Upper-case ISO 4217 code
    pub currency: String,

    pub issue_date: NaiveDate,

    pub instrument: InstrumentType,

    pub use_of_proceeds: Option<String>,

    /// ISO 3166-1 alpha-2 country of the issuer, when the export has it
    pub issuer_country: Option<String>,

    pub isin: Option<String>,

    // Provenance
    pub source_file: String,
    pub line_number: usize,
}

impl TransactionRecord {
    pub fn proceeds_class(&self) -> ProceedsClass {
        ProceedsClass::classify(self.use_of_proceeds.as_deref())
    }

    pub fn is_green(&self) -> bool {
        self.proceeds_class() == ProceedsClass::Green
    }

    /// SHA-256 over the business fields.
    ///
    /// Provenance is left out so the same issuance exported twice hashes equal.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}|{}|{}|{}",
            self.issuer_name.trim().to_lowercase(),
            self.amount.normalize(),
            self.currency,
            self.issue_date,
            self.instrument,
            self.isin.as_deref().unwrap_or(""),
        ));
        format!("{:x}", hasher.finalize())
    }
}
