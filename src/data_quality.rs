// ✅ Data Quality Engine - per-record checks on loaded issuance records
//
// Runs after loading and resolution; failures never drop a record, they only
// feed the quality report printed by `check` and logged by `run`.

use crate::entities::BankRegistry;
use crate::record::TransactionRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The first labelled green bond (EIB Climate Awareness Bond) was issued in 2007
pub const FIRST_GREEN_BOND_YEAR: i32 = 2007;

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub confidence: f64,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str, message: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: 1.0,
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            confidence: if severity == Severity::Critical {
                0.0
            } else {
                0.5
            },
            severity,
        }
    }
}

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// "file:line" of the checked record
    pub record_ref: String,
    pub overall_quality: f64,
    pub overall_confidence: f64,
    pub validations: Vec<ValidationResult>,
    pub issues: Vec<QualityIssue>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub needs_review: bool,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "{}: quality {:.1}%, confidence {:.1}%, {} issues ({} critical)",
            self.record_ref,
            self.overall_quality * 100.0,
            self.overall_confidence * 100.0,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    pub fn is_high_quality(&self) -> bool {
        self.overall_quality >= 0.8 && self.overall_confidence >= 0.7
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == Severity::Critical)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Record is unusable for the analysis
    Warning,  // Record is used but questionable
    Info,
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine<'a> {
    registry: &'a BankRegistry,

    /// Dates before this are implausible for a green instrument
    earliest: NaiveDate,

    /// Dates after this are implausible; defaults to the newest record of the batch
    latest: Option<NaiveDate>,

    /// Minimum confidence threshold for "needs_review"
    review_threshold: f64,
}

impl<'a> DataQualityEngine<'a> {
    pub fn new(registry: &'a BankRegistry) -> Self {
        DataQualityEngine {
            registry,
            earliest: NaiveDate::from_ymd_opt(FIRST_GREEN_BOND_YEAR, 1, 1).unwrap_or(NaiveDate::MIN),
            latest: None,
            review_threshold: 0.7,
        }
    }

    /// Builder pattern: fix the upper bound for plausible issue dates
    pub fn with_latest(mut self, latest: NaiveDate) -> Self {
        self.latest = Some(latest);
        self
    }

    fn add(
        validations: &mut Vec<ValidationResult>,
        issues: &mut Vec<QualityIssue>,
        result: ValidationResult,
        recommendation: &str,
    ) {
        if !result.passed {
            issues.push(QualityIssue {
                severity: result.severity.clone(),
                field: result.field.clone(),
                issue: result.message.clone(),
                recommendation: recommendation.to_string(),
            });
        }
        validations.push(result);
    }

    /// Validate one record and generate its quality report
    pub fn validate(&self, record: &TransactionRecord) -> QualityReport {
        let mut validations = Vec::new();
        let mut issues = Vec::new();

        // Rule 1: Issuer present
        Self::add(
            &mut validations,
            &mut issues,
            self.validate_issuer(&record.issuer_name),
            "Fill in the issuer name in the export",
        );

        // Rule 2: Currency is an ISO 4217 code
        Self::add(
            &mut validations,
            &mut issues,
            self.validate_currency(&record.currency),
            "Use a 3-letter ISO 4217 currency code",
        );

        // Rule 3: Issuer resolves to a known bank
        Self::add(
            &mut validations,
            &mut issues,
            self.validate_resolved(&record.issuer_name),
            "Add the issuer as an alias in the reference file if it is a covered bank",
        );

        // Rule 4: Amount non-zero
        Self::add(
            &mut validations,
            &mut issues,
            self.validate_amount(record.amount),
            "Verify the face amount in the export",
        );

        // Rule 5: Issue date plausible
        Self::add(
            &mut validations,
            &mut issues,
            self.validate_date(record.issue_date),
            "Check the issue date column and its format",
        );

        let passed_count = validations.iter().filter(|v| v.passed).count();
        let failed_count = validations.len() - passed_count;
        let overall_quality = passed_count as f64 / validations.len() as f64;
        let overall_confidence: f64 =
            validations.iter().map(|v| v.confidence).sum::<f64>() / validations.len() as f64;

        QualityReport {
            record_ref: format!("{}:{}", record.source_file, record.line_number),
            overall_quality,
            overall_confidence,
            validations,
            issues,
            passed_count,
            failed_count,
            needs_review: overall_confidence < self.review_threshold,
        }
    }

    /// Batch validate; the newest record bounds the plausible dates unless set
    pub fn validate_batch(&self, records: &[TransactionRecord]) -> Vec<QualityReport> {
        let latest = self
            .latest
            .or_else(|| records.iter().map(|r| r.issue_date).max());
        let engine = DataQualityEngine {
            registry: self.registry,
            earliest: self.earliest,
            latest,
            review_threshold: self.review_threshold,
        };
        records.iter().map(|r| engine.validate(r)).collect()
    }

    /// Generate summary statistics for batch validation
    pub fn batch_summary(&self, reports: &[QualityReport]) -> BatchSummary {
        let total = reports.len();
        if total == 0 {
            return BatchSummary::default();
        }

        let mut rule_failures: Vec<(String, usize)> = Vec::new();
        for validation in reports.iter().flat_map(|r| &r.validations) {
            if validation.passed {
                continue;
            }
            match rule_failures
                .iter_mut()
                .find(|(rule, _)| *rule == validation.rule_name)
            {
                Some((_, count)) => *count += 1,
                None => rule_failures.push((validation.rule_name.clone(), 1)),
            }
        }
        rule_failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        BatchSummary {
            total_records: total,
            high_quality_count: reports.iter().filter(|r| r.is_high_quality()).count(),
            needs_review_count: reports.iter().filter(|r| r.needs_review).count(),
            critical_issues_count: reports.iter().filter(|r| r.has_critical_issues()).count(),
            average_quality: reports.iter().map(|r| r.overall_quality).sum::<f64>() / total as f64,
            average_confidence: reports.iter().map(|r| r.overall_confidence).sum::<f64>()
                / total as f64,
            rule_failures,
        }
    }

    // ========================================================================
    // VALIDATION RULES
    // ========================================================================

    fn validate_issuer(&self, issuer: &str) -> ValidationResult {
        if issuer.trim().is_empty() {
            return ValidationResult::fail(
                "issuer_present",
                "issuer",
                "Issuer name is empty",
                Severity::Critical,
            );
        }
        ValidationResult::pass("issuer_present", "issuer", "Issuer name present")
    }

    fn validate_currency(&self, currency: &str) -> ValidationResult {
        let valid = currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase());
        if !valid {
            return ValidationResult::fail(
                "currency_iso",
                "currency",
                &format!("Currency '{}' is not an ISO 4217 code", currency),
                Severity::Critical,
            );
        }
        ValidationResult::pass("currency_iso", "currency", "Currency code valid")
    }

    fn validate_resolved(&self, issuer: &str) -> ValidationResult {
        match self.registry.resolve(issuer) {
            Some(bank) => ValidationResult::pass(
                "issuer_resolved",
                "issuer",
                &format!("Resolved to {}", bank.canonical_name),
            ),
            None => ValidationResult::fail(
                "issuer_resolved",
                "issuer",
                &format!("'{}' matches no known bank", issuer),
                Severity::Warning,
            ),
        }
    }

    fn validate_amount(&self, amount: Decimal) -> ValidationResult {
        if amount.is_zero() {
            return ValidationResult::fail(
                "amount_zero",
                "amount",
                "Amount is zero",
                Severity::Warning,
            );
        }
        ValidationResult::pass("amount_valid", "amount", &format!("Amount is valid: {}", amount))
    }

    fn validate_date(&self, date: NaiveDate) -> ValidationResult {
        if date < self.earliest {
            return ValidationResult::fail(
                "date_plausible",
                "issue_date",
                &format!("Issue date {} predates the first green bond", date),
                Severity::Warning,
            );
        }
        if let Some(latest) = self.latest {
            if date > latest {
                return ValidationResult::fail(
                    "date_plausible",
                    "issue_date",
                    &format!("Issue date {} is after {}", date, latest),
                    Severity::Warning,
                );
            }
        }
        ValidationResult::pass("date_plausible", "issue_date", "Issue date plausible")
    }
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_records: usize,
    pub high_quality_count: usize,
    pub needs_review_count: usize,
    pub critical_issues_count: usize,
    pub average_quality: f64,
    pub average_confidence: f64,
    /// Failed rule → count, most frequent first
    pub rule_failures: Vec<(String, usize)>,
}

impl BatchSummary {
    pub fn summary(&self) -> String {
        format!(
            "{} records: {:.1}% quality, {:.1}% confidence | {} high quality, {} need review, {} critical",
            self.total_records,
            self.average_quality * 100.0,
            self.average_confidence * 100.0,
            self.high_quality_count,
            self.needs_review_count,
            self.critical_issues_count
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::record;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_clean_record() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry);
        let report = engine.validate(&record("HSBC Holdings plc", dec!(500), "USD", "2021-03-01"));

        assert!(report.is_high_quality());
        assert!(!report.needs_review);
        assert!(!report.has_critical_issues());
        assert_eq!(report.passed_count, 5);
        assert_eq!(report.issues.len(), 0);
        assert_eq!(report.record_ref, "fixture.csv:2");
    }

    #[test]
    fn test_issuer_rule_keeps_one_name() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry);
        let rule = |report: &QualityReport| {
            report
                .validations
                .iter()
                .find(|v| v.field == "issuer" && v.rule_name == "issuer_present")
                .map(|v| v.passed)
        };

        let clean = engine.validate(&record("ICBC", dec!(5), "USD", "2021-03-01"));
        assert_eq!(rule(&clean), Some(true));

        let blank = engine.validate(&record("  ", dec!(5), "USD", "2021-03-01"));
        assert_eq!(rule(&blank), Some(false));
        assert!(blank.has_critical_issues());
    }

    #[test]
    fn test_unresolved_issuer_is_warning() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry);
        let report = engine.validate(&record("Acme Renewables", dec!(5), "USD", "2021-03-01"));

        assert_eq!(report.failed_count, 1);
        assert_eq!(report.issues[0].severity, Severity::Warning);
        assert_eq!(report.issues[0].field, "issuer");
        assert!(!report.has_critical_issues());
    }

    #[test]
    fn test_bad_currency_is_critical() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry);
        let report = engine.validate(&record("ICBC", dec!(5), "US", "2021-03-01"));

        assert!(report.has_critical_issues());
        assert!(report.issues.iter().any(|i| i.field == "currency"));
    }

    #[test]
    fn test_implausible_dates_and_zero_amount() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry)
            .with_latest(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let early = engine.validate(&record("ICBC", dec!(5), "USD", "2003-01-01"));
        assert!(early.issues.iter().any(|i| i.field == "issue_date"));

        let late = engine.validate(&record("ICBC", dec!(5), "USD", "2031-01-01"));
        assert!(late.issues.iter().any(|i| i.field == "issue_date"));

        let zero = engine.validate(&record("ICBC", dec!(0), "USD", "2020-01-01"));
        assert!(zero.issues.iter().any(|i| i.field == "amount"));
    }

    #[test]
    fn test_batch_summary() {
        let registry = BankRegistry::with_default_banks();
        let engine = DataQualityEngine::new(&registry);
        let records = vec![
            record("ICBC", dec!(5), "USD", "2020-01-01"),
            record("Unknown Issuer", dec!(5), "USD", "2020-01-01"),
            record("Unknown Issuer", dec!(0), "USD", "2020-01-01"),
        ];

        let reports = engine.validate_batch(&records);
        let summary = engine.batch_summary(&reports);

        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.critical_issues_count, 0);
        assert_eq!(summary.rule_failures[0], ("issuer_resolved".to_string(), 2));
        assert_eq!(summary.rule_failures[1], ("amount_zero".to_string(), 1));
        assert!(!summary.summary().is_empty());
        assert_eq!(engine.batch_summary(&[]).total_records, 0);
    }
}
