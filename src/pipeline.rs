// 🔄 Pipeline - load → resolve → aggregate → score → statistics → export
//
// `analyze` is the in-memory core and does no I/O; `run` wraps it with
// loading and result export. Single-threaded, one batch per invocation.

use crate::aggregation::{
    aggregate, bank_summaries, temporal_evolution, BankSummary, PortfolioPanel,
    TemporalEvolution, TemporalWindow,
};
use crate::charts::{FossilGreenBar, ScatterPoint};
use crate::config::PipelineConfig;
use crate::data_quality::{BatchSummary, DataQualityEngine};
use crate::entities::BankRegistry;
use crate::error::PipelineResult;
use crate::fx::FxRateTable;
use crate::output::{self, SummaryMetric};
use crate::parser::{load_records, LoadReport};
use crate::period::Granularity;
use crate::record::TransactionRecord;
use crate::reference::ReferenceData;
use crate::scores::{
    adoption_score, score_panel, summarize_mechanisms, MechanismKind, MechanismSummary,
    RegulatoryMechanismScore, ScoreReport,
};
use crate::statistics::{
    fixed_effects_regression, pearson, spearman, two_sample_t_test, variance_decomposition,
    Correlation, Estimate, FixedEffectsFit, PanelObservation, TTest, VarianceDecomposition,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{info, warn};

// ============================================================================
// ANALYSIS
// ============================================================================

/// Inferential statistics over the finished panel and score table
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsReport {
    /// Adoption vs SFI, one point per bank (latest period)
    pub adoption_vs_sfi: Estimate<Correlation>,
    pub adoption_vs_sfi_rank: Estimate<Correlation>,
    /// Adoption vs total green portfolio, one point per bank
    pub adoption_vs_green: Estimate<Correlation>,
    /// SFI of directive-regime banks against market-based ones
    pub sfi_directive_vs_market: Estimate<TTest>,
    /// Effectiveness on green and fossil volume (bn), bank fixed effects
    pub effectiveness_fixed_effects: Estimate<FixedEffectsFit>,
    /// Effectiveness split into between-bank and within-bank variation
    pub effectiveness_by_bank: Estimate<VarianceDecomposition>,
}

pub const FE_GREEN_REGRESSOR: &str = "green_bn";
pub const FE_FOSSIL_REGRESSOR: &str = "fossil_bn";

#[derive(Debug, Clone)]
pub struct Analysis {
    pub registry: BankRegistry,
    pub panel: PortfolioPanel,
    pub summaries: Vec<BankSummary>,
    pub scores: ScoreReport,
    pub mechanisms: Vec<RegulatoryMechanismScore>,
    pub mechanism_summary: MechanismSummary,
    pub temporal: TemporalEvolution,
    pub statistics: StatisticsReport,
    /// Self-reported fossil financing (bn) by bank, where disclosed
    pub reported_fossil: BTreeMap<String, f64>,
    /// Issuer names that matched no bank, most frequent first
    pub unresolved: Vec<(String, usize)>,
    pub unresolved_count: usize,
}

fn billions(value: Decimal) -> f64 {
    (value / Decimal::from(1_000_000_000u64)).to_f64().unwrap_or(0.0)
}

fn compute_statistics(panel: &PortfolioPanel, summaries: &[BankSummary], scores: &ScoreReport) -> StatisticsReport {
    let latest = scores.latest_per_bank();

    let (adoption, sfi): (Vec<f64>, Vec<f64>) = latest
        .iter()
        .filter_map(|s| s.sfi_percent.map(|sfi| (s.adoption, sfi)))
        .unzip();

    let (adoption_by_bank, green_by_bank): (Vec<f64>, Vec<f64>) = summaries
        .iter()
        .filter_map(|summary| {
            latest
                .iter()
                .find(|s| s.bank_name == summary.bank_name)
                .map(|s| (s.adoption, billions(summary.green_portfolio)))
        })
        .unzip();

    let sfi_of = |kind: MechanismKind| -> Vec<f64> {
        latest
            .iter()
            .filter(|s| s.regime == Some(kind))
            .filter_map(|s| s.sfi_percent)
            .collect()
    };

    let observations: Vec<PanelObservation> = scores
        .scores
        .iter()
        .filter_map(|s| {
            let effectiveness = s.effectiveness?;
            let portfolio = panel.get(&s.bank_name, &s.period)?;
            Some(PanelObservation {
                entity: s.bank_name.clone(),
                y: effectiveness,
                x: vec![billions(portfolio.total_green), billions(portfolio.total_fossil)],
            })
        })
        .collect();

    let by_bank: Vec<(&str, f64)> = scores
        .scores
        .iter()
        .filter_map(|s| s.effectiveness.map(|e| (s.bank_name.as_str(), e)))
        .collect();

    StatisticsReport {
        adoption_vs_sfi: pearson(&adoption, &sfi),
        adoption_vs_sfi_rank: spearman(&adoption, &sfi),
        adoption_vs_green: pearson(&adoption_by_bank, &green_by_bank),
        sfi_directive_vs_market: two_sample_t_test(
            &sfi_of(MechanismKind::Directive),
            &sfi_of(MechanismKind::MarketBased),
        ),
        effectiveness_fixed_effects: fixed_effects_regression(
            &observations,
            &[FE_GREEN_REGRESSOR, FE_FOSSIL_REGRESSOR],
        ),
        effectiveness_by_bank: variance_decomposition(&by_bank),
    }
}

/// The in-memory core: resolve, aggregate, score and test. No I/O.
pub fn analyze(
    records: &[TransactionRecord],
    reference: &ReferenceData,
    fx: &FxRateTable,
    granularity: Granularity,
    window: &TemporalWindow,
) -> Analysis {
    let registry = reference.registry();
    let resolution = registry.resolve_all(records);
    let unresolved = resolution.unresolved_issuers();
    let unresolved_count = resolution.unresolved.len();
    if unresolved_count > 0 {
        warn!(
            "{} records from {} issuers matched no bank",
            unresolved_count,
            unresolved.len()
        );
    }

    let panel = aggregate(resolution.resolved, granularity, fx);
    let summaries = bank_summaries(&panel);
    let scores = score_panel(&panel, &registry, reference);
    let mechanism_summary = summarize_mechanisms(&reference.mechanisms);
    let temporal = temporal_evolution(records, &registry, fx, window);
    let statistics = compute_statistics(&panel, &summaries, &scores);
    let reported_fossil = reference
        .banks
        .iter()
        .filter_map(|b| {
            let fossil = b.fundamentals.as_ref()?.reported_fossil_bn?;
            Some((b.name.clone(), fossil))
        })
        .collect();

    Analysis {
        panel,
        summaries,
        scores,
        mechanisms: reference.mechanisms.clone(),
        mechanism_summary,
        temporal,
        statistics,
        reported_fossil,
        unresolved,
        unresolved_count,
        registry,
    }
}

impl Analysis {
    fn green_bn_where(&self, keep: impl Fn(&str) -> bool) -> f64 {
        self.summaries
            .iter()
            .filter(|s| keep(&s.bank_name))
            .map(|s| billions(s.green_portfolio))
            .sum()
    }

    fn country_of(&self, bank_name: &str) -> Option<&str> {
        self.registry
            .find_by_name(bank_name)
            .map(|b| b.country.as_str())
    }

    /// NZBA members: reported fossil financing where disclosed, otherwise the
    /// fossil-tagged total, next to the green portfolio. Members with neither
    /// figure are left out.
    pub fn nzba_bars(&self) -> Vec<FossilGreenBar> {
        self.registry
            .all_banks()
            .iter()
            .filter(|b| b.adoption.nzba)
            .filter_map(|bank| {
                let summary = self.summaries.iter().find(|s| s.bank_name == bank.canonical_name);
                let reported = self.reported_fossil.get(&bank.canonical_name).copied();
                if summary.is_none() && reported.is_none() {
                    return None;
                }
                Some(FossilGreenBar {
                    label: bank.canonical_name.clone(),
                    fossil_bn: reported
                        .or_else(|| summary.map(|s| billions(s.fossil_exposure)))
                        .unwrap_or(0.0),
                    green_bn: summary.map(|s| billions(s.green_portfolio)).unwrap_or(0.0),
                })
            })
            .collect()
    }

    /// Headline figures for `summary_statistics.csv`
    pub fn summary_metrics(&self) -> Vec<SummaryMetric> {
        let stats = &self.statistics;
        let china_green = self.green_bn_where(|name| self.country_of(name) == Some("CN"));
        let nzba = self.nzba_bars();
        let nzba_green: f64 = nzba.iter().map(|b| b.green_bn).sum();
        let nzba_fossil: f64 = nzba.iter().map(|b| b.fossil_bn).sum();

        let first_year = self.temporal.points.first().map(|p| p.year);
        let last_year = self.temporal.points.last().map(|p| p.year);
        let fe_green = stats
            .effectiveness_fixed_effects
            .value()
            .and_then(|fit| fit.coefficient(FE_GREEN_REGRESSOR));

        vec![
            SummaryMetric::new("China Big 4 Green Credit", Some(china_green), "Billion USD"),
            SummaryMetric::new("NZBA Green Finance", Some(nzba_green), "Billion USD"),
            SummaryMetric::new("NZBA Fossil Finance", Some(nzba_fossil), "Billion USD"),
            SummaryMetric::new(
                "Fossil-to-Green Ratio",
                (nzba_green > 0.0).then(|| nzba_fossil / nzba_green),
                "Ratio",
            ),
            SummaryMetric::new(
                "China-to-NZBA Green Ratio",
                (nzba_green > 0.0).then(|| china_green / nzba_green),
                "Ratio",
            ),
            SummaryMetric::new(
                "Implementation Gap",
                self.mechanism_summary.implementation_gap,
                "Percentage Points",
            ),
            SummaryMetric::new(
                "Directive Effectiveness",
                self.mechanism_summary.directive_mean,
                "Percent",
            ),
            SummaryMetric::new(
                "Market-Based Effectiveness",
                self.mechanism_summary.market_based_mean,
                "Percent",
            ),
            SummaryMetric::new(
                "Hybrid Effectiveness",
                self.mechanism_summary.hybrid_mean,
                "Percent",
            ),
            SummaryMetric::new(
                "Framework-SFI Correlation",
                stats.adoption_vs_sfi.value().map(|c| c.coefficient),
                "Correlation",
            ),
            SummaryMetric::new(
                "Framework-SFI Correlation p-value",
                stats.adoption_vs_sfi.value().map(|c| c.p_value),
                "Probability",
            ),
            SummaryMetric::new(
                "Framework-SFI Rank Correlation",
                stats.adoption_vs_sfi_rank.value().map(|c| c.coefficient),
                "Correlation",
            ),
            SummaryMetric::new(
                "Framework-Green Volume Correlation",
                stats.adoption_vs_green.value().map(|c| c.coefficient),
                "Correlation",
            ),
            SummaryMetric::new(
                "Directive vs Market SFI t-statistic",
                stats.sfi_directive_vs_market.value().map(|t| t.t_statistic),
                "t",
            ),
            SummaryMetric::new(
                "Directive vs Market SFI p-value",
                stats.sfi_directive_vs_market.value().map(|t| t.p_value),
                "Probability",
            ),
            SummaryMetric::new(
                "Effectiveness on Green Volume (FE)",
                fe_green.map(|c| c.estimate),
                "Points per Billion",
            ),
            SummaryMetric::new(
                "Effectiveness Within R-squared (FE)",
                stats
                    .effectiveness_fixed_effects
                    .value()
                    .map(|fit| fit.r_squared_within),
                "Share",
            ),
            SummaryMetric::new(
                "Effectiveness Between-Bank Share",
                stats.effectiveness_by_bank.value().map(|d| d.between_share),
                "Share",
            ),
            SummaryMetric::new("CAGR Full Window", self.temporal.cagr(), "Percent"),
            SummaryMetric::new(
                "CAGR Last 5 Years",
                last_year.and_then(|y| self.temporal.cagr_between(y - 5, y)),
                "Percent",
            ),
            SummaryMetric::new(
                "China Market Share First Year",
                first_year.and_then(|y| self.temporal.china_share(y)),
                "Percent",
            ),
            SummaryMetric::new(
                "China Market Share Last Year",
                last_year.and_then(|y| self.temporal.china_share(y)),
                "Percent",
            ),
        ]
    }

    /// One point per bank: latest adoption score against total green portfolio
    pub fn scatter_points(&self) -> Vec<ScatterPoint> {
        self.summaries
            .iter()
            .map(|summary| {
                let bank = self.registry.find_by_name(&summary.bank_name);
                ScatterPoint {
                    label: summary.bank_name.clone(),
                    country: bank.map(|b| b.country.clone()).unwrap_or_default(),
                    adoption: bank
                        .map(|b| adoption_score(&b.adoption))
                        .unwrap_or(0.0),
                    green_bn: billions(summary.green_portfolio),
                }
            })
            .collect()
    }
}

// ============================================================================
// RUN
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub sources: Vec<String>,
    pub rows_loaded: usize,
    pub rows_skipped: usize,
    /// Records sharing a fingerprint with an earlier record, across all sources
    pub duplicate_count: usize,
    pub unresolved_count: usize,
    pub conversion_exclusions: usize,
    pub score_failures: usize,
    pub portfolios: usize,
    pub files_written: Vec<PathBuf>,
    pub panel_digest: String,
    pub quality: BatchSummary,
}

impl RunReport {
    pub fn summary(&self) -> String {
        format!(
            "{} rows loaded, {} skipped, {} duplicates, {} unresolved, {} FX exclusions, {} score failures, {} portfolios",
            self.rows_loaded,
            self.rows_skipped,
            self.duplicate_count,
            self.unresolved_count,
            self.conversion_exclusions,
            self.score_failures,
            self.portfolios
        )
    }
}

/// Records of every source plus their load reports
struct Loaded {
    records: Vec<TransactionRecord>,
    reports: Vec<LoadReport>,
}

fn load_sources(config: &PipelineConfig) -> PipelineResult<Loaded> {
    let mut records = Vec::new();
    let mut reports = Vec::new();
    for source in &config.sources {
        let mut report = load_records(&source.path, &source.load_options())?;
        records.append(&mut report.records);
        reports.push(report);
    }
    Ok(Loaded { records, reports })
}

fn load_reference(config: &PipelineConfig) -> PipelineResult<ReferenceData> {
    match &config.reference {
        Some(path) => ReferenceData::from_file(path),
        None => {
            info!("No reference file configured, using built-in tables");
            Ok(ReferenceData::thesis_defaults())
        }
    }
}

fn load_fx(config: &PipelineConfig) -> PipelineResult<FxRateTable> {
    match &config.fx_rates {
        Some(path) => FxRateTable::from_file(path, &config.base_currency),
        None => Ok(FxRateTable::new(&config.base_currency)),
    }
}

fn count_duplicates(records: &[TransactionRecord]) -> usize {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| !seen.insert(r.fingerprint()))
        .count()
}

/// Outcome of `check`: load and resolution only
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub loads: Vec<String>,
    pub rows_skipped: usize,
    pub quality: BatchSummary,
    pub unresolved: Vec<(String, usize)>,
}

/// Load and resolve every source, then report data quality
pub fn check(config: &PipelineConfig) -> PipelineResult<CheckReport> {
    config.validate()?;
    let loaded = load_sources(config)?;
    let reference = load_reference(config)?;
    let registry = reference.registry();

    let engine = DataQualityEngine::new(&registry);
    let quality = engine.batch_summary(&engine.validate_batch(&loaded.records));
    let unresolved = registry.resolve_all(&loaded.records).unresolved_issuers();

    Ok(CheckReport {
        loads: loaded.reports.iter().map(LoadReport::summary).collect(),
        rows_skipped: loaded.reports.iter().map(LoadReport::skipped_count).sum(),
        quality,
        unresolved,
    })
}

/// Full batch run: load, analyze, export
pub fn run(config: &PipelineConfig) -> PipelineResult<RunReport> {
    config.validate()?;
    let loaded = load_sources(config)?;
    let reference = load_reference(config)?;
    let fx = load_fx(config)?;

    let analysis = analyze(
        &loaded.records,
        &reference,
        &fx,
        config.granularity,
        &config.temporal,
    );

    let engine = DataQualityEngine::new(&analysis.registry);
    let quality = engine.batch_summary(&engine.validate_batch(&loaded.records));
    info!("Data quality: {}", quality.summary());

    let files_written = output::write_results(&config.output_dir, &analysis, config.render_charts)?;

    let report = RunReport {
        sources: loaded.reports.iter().map(|r| r.source_file.clone()).collect(),
        rows_loaded: loaded.records.len(),
        rows_skipped: loaded.reports.iter().map(LoadReport::skipped_count).sum(),
        duplicate_count: count_duplicates(&loaded.records),
        unresolved_count: analysis.unresolved_count,
        conversion_exclusions: analysis.panel.exclusions().len(),
        score_failures: analysis.scores.failures.len(),
        portfolios: analysis.panel.len(),
        files_written,
        panel_digest: analysis.panel.digest(),
        quality,
    };
    info!("Run complete: {}", report.summary());
    Ok(report)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::record::fixtures::record;
    use rust_decimal_macros::dec;
    use std::fs;

    const BONDS_CSV: &str = "\
IssuerCommonName,FaceIssuedTotal,Currency,IssueDate,UseOfProceeds,Country
Bank of China Ltd.,100,USD,2020-03-15,Renewable Energy,CN
ICBC,2000000000,USD,2019-05-01,,CN
ICBC,3000000000,USD,2020-05-01,Green Buildings,CN
ICBC,1000000000,USD,2020-08-01,Clean Transport,CN
JPMorgan Chase & Co.,1500000000,USD,2020-06-01,,US
JP Morgan,500000000,USD,2021-06-01,,US
HSBC Holdings plc,800000000,EUR,2020-02-01,Solar,GB
Some Utility AG,700000000,USD,2020-09-01,Wind,DE
Broken Row,not-a-number,USD,2020-01-01,,US
";

    const LOANS_CSV: &str = "\
Borrower,Amount,Currency,Date
BOC,50,USD,2020-09-01
";

    fn write_inputs(dir: &std::path::Path) -> PipelineConfig {
        fs::write(dir.join("bonds.csv"), BONDS_CSV).unwrap();
        fs::write(dir.join("loans.csv"), LOANS_CSV).unwrap();
        fs::write(dir.join("fx.csv"), "currency,date,rate\nEUR,2020-12-31,1.10\n").unwrap();

        let mut config = PipelineConfig::default();
        config.sources = vec![
            SourceConfig::new(dir.join("bonds.csv"))
                .with_default_instrument(crate::record::InstrumentType::Bond),
            SourceConfig::new(dir.join("loans.csv"))
                .with_default_instrument(crate::record::InstrumentType::Loan),
        ];
        config.fx_rates = Some(dir.join("fx.csv"));
        config.output_dir = dir.join("results");
        config
    }

    #[test]
    fn test_analyze_bank_of_china_bond_and_loan() {
        let mut loan = record("BOC", dec!(50), "USD", "2020-09-01");
        loan.instrument = crate::record::InstrumentType::Loan;
        let records = vec![record("Bank of China Ltd.", dec!(100), "USD", "2020-03-15"), loan];

        let analysis = analyze(
            &records,
            &ReferenceData::thesis_defaults(),
            &FxRateTable::default(),
            Granularity::Year,
            &TemporalWindow::default(),
        );

        assert_eq!(analysis.panel.len(), 1);
        let p = analysis
            .panel
            .get("Bank of China", &crate::period::Period::year(2020))
            .unwrap();
        assert_eq!(p.total_green, dec!(150));
        assert_eq!(analysis.unresolved_count, 0);
        // One bank: correlations are undefined, not errors
        assert!(!analysis.statistics.adoption_vs_sfi.is_defined());
    }

    #[test]
    fn test_nzba_figures_use_reported_fossil() {
        let records = vec![
            record("JPMorgan Chase & Co.", dec!(12000000000), "USD", "2021-05-01"),
            record("ICBC", dec!(30000000000), "USD", "2021-05-01"),
        ];
        let analysis = analyze(
            &records,
            &ReferenceData::thesis_defaults(),
            &FxRateTable::default(),
            Granularity::Year,
            &TemporalWindow::default(),
        );

        let bars = analysis.nzba_bars();
        // Five disclosing members; BNP Paribas has neither figure
        assert_eq!(bars.len(), 5);
        let jpm = bars.iter().find(|b| b.label == "JPMorgan").unwrap();
        assert_eq!(jpm.fossil_bn, 40.8);
        assert_eq!(jpm.green_bn, 12.0);
        assert!(bars.iter().all(|b| b.label != "ICBC"));

        let metrics = analysis.summary_metrics();
        let value = |name: &str| {
            metrics
                .iter()
                .find(|m| m.metric == name)
                .and_then(|m| m.value)
                .unwrap()
        };
        assert!((value("NZBA Fossil Finance") - 149.0).abs() < 1e-9);
        assert!((value("NZBA Green Finance") - 12.0).abs() < 1e-9);
        assert!((value("Fossil-to-Green Ratio") - 149.0 / 12.0).abs() < 1e-9);
        assert!((value("China-to-NZBA Green Ratio") - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_inputs(dir.path());

        let report = run(&config).unwrap();

        assert_eq!(report.rows_loaded, 9);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.unresolved_count, 1);
        assert_eq!(report.conversion_exclusions, 0);
        assert_eq!(report.duplicate_count, 0);
        // BOC 2020, ICBC 2019 + 2020, JPMorgan 2020 + 2021, HSBC 2020
        assert_eq!(report.portfolios, 6);
        assert_eq!(report.panel_digest.len(), 64);

        let results = dir.path().join("results");
        for file in [
            output::BANK_PORTFOLIOS_FILE,
            output::BANK_PANEL_FILE,
            output::TEMPORAL_FILE,
            output::SUMMARY_FILE,
            output::MECHANISMS_FILE,
        ] {
            assert!(results.join(file).exists(), "{} missing", file);
        }
        assert!(results.join("figures").join("temporal_evolution.svg").exists());
        assert!(results.join("figures").join("mechanism_effectiveness.svg").exists());
        assert!(results.join("figures").join("china_share.svg").exists());
        assert!(results.join("figures").join("nzba_fossil_vs_green.svg").exists());

        let panel = fs::read_to_string(results.join(output::BANK_PANEL_FILE)).unwrap();
        assert!(panel.starts_with("Bank,Period,Total_Green"));
        assert!(panel.contains("Bank of China,2020,150,"));
        assert!(panel.contains("HSBC,2020,880000000,"));

        let temporal = fs::read_to_string(results.join(output::TEMPORAL_FILE)).unwrap();
        assert_eq!(temporal.lines().count(), 12);
        assert!(temporal.starts_with("Year,Global_Green_Finance,China_Green_Finance,Count"));

        let summary = fs::read_to_string(results.join(output::SUMMARY_FILE)).unwrap();
        assert!(summary.contains("Implementation Gap,"));
    }

    #[test]
    fn test_run_twice_gives_same_digest() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_inputs(dir.path());

        let first = run(&config).unwrap();
        let second = run(&config).unwrap();
        assert_eq!(first.panel_digest, second.panel_digest);
    }

    #[test]
    fn test_check_reports_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_inputs(dir.path());

        let report = check(&config).unwrap();
        assert_eq!(report.loads.len(), 2);
        assert_eq!(report.rows_skipped, 1);
        assert_eq!(report.unresolved, vec![("Some Utility AG".to_string(), 1)]);
        assert_eq!(report.quality.total_records, 9);
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let mut config = PipelineConfig::default();
        config.sources = vec![SourceConfig::new("/nonexistent/bonds.csv")];
        assert!(matches!(
            run(&config),
            Err(crate::error::PipelineError::Io { .. })
        ));
    }
}
