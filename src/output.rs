// 💾 Result Export - CSV tables and SVG figures into the output directory

use crate::charts;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::Analysis;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const BANK_PORTFOLIOS_FILE: &str = "bank_portfolios.csv";
pub const BANK_PANEL_FILE: &str = "bank_panel.csv";
pub const TEMPORAL_FILE: &str = "temporal_evolution.csv";
pub const SUMMARY_FILE: &str = "summary_statistics.csv";
pub const MECHANISMS_FILE: &str = "mechanisms.csv";
pub const FIGURES_DIR: &str = "figures";

// ============================================================================
// ROWS
// ============================================================================

#[derive(Debug, Serialize)]
struct PortfolioRow<'a> {
    bank: &'a str,
    green_portfolio: String,
    fossil_exposure: String,
    instrument_count: usize,
    avg_size: String,
}

#[derive(Debug, Serialize)]
struct PanelRow<'a> {
    bank: &'a str,
    period: String,
    total_green: String,
    total_fossil: String,
    total_other: String,
    bond_count: usize,
    loan_count: usize,
    adoption: Option<f64>,
    effectiveness: Option<f64>,
    authenticity: Option<f64>,
    sfi_percent: Option<f64>,
    paradox_ratio: Option<f64>,
}

#[derive(Debug, Serialize)]
struct TemporalRow {
    year: i32,
    global: String,
    china: String,
    count: usize,
}

#[derive(Debug, Serialize)]
struct MechanismRow<'a> {
    mechanism: &'a str,
    kind: &'static str,
    effectiveness: f64,
    green_volume_bn: Option<f64>,
}

/// One line of `summary_statistics.csv`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryMetric {
    pub metric: String,
    /// Empty when the statistic is undefined for this run
    pub value: Option<f64>,
    pub unit: String,
}

impl SummaryMetric {
    pub fn new(metric: &str, value: Option<f64>, unit: &str) -> Self {
        SummaryMetric {
            metric: metric.to_string(),
            value,
            unit: unit.to_string(),
        }
    }
}

// ============================================================================
// WRITERS
// ============================================================================

/// Write `header` then one record per row; the header is written even with no rows
fn write_table<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> PipelineResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| PipelineError::csv(path, e))?;
    writer
        .write_record(header)
        .map_err(|e| PipelineError::csv(path, e))?;
    for row in rows {
        writer.serialize(row).map_err(|e| PipelineError::csv(path, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;
    Ok(())
}

/// Write every result table and figure; returns the paths written
pub fn write_results(dir: &Path, analysis: &Analysis, render_charts: bool) -> PipelineResult<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let mut written = Vec::new();

    let portfolios: Vec<PortfolioRow> = analysis
        .summaries
        .iter()
        .map(|s| PortfolioRow {
            bank: &s.bank_name,
            green_portfolio: s.green_portfolio.normalize().to_string(),
            fossil_exposure: s.fossil_exposure.normalize().to_string(),
            instrument_count: s.instrument_count,
            avg_size: s.avg_size.round_dp(2).to_string(),
        })
        .collect();
    let path = dir.join(BANK_PORTFOLIOS_FILE);
    write_table(
        &path,
        &["Bank", "Green_Portfolio", "Fossil_Exposure", "Instrument_Count", "Avg_Size"],
        &portfolios,
    )?;
    written.push(path);

    let panel: Vec<PanelRow> = analysis
        .panel
        .iter()
        .map(|p| {
            let score = analysis.scores.get(&p.bank_name, &p.period);
            PanelRow {
                bank: &p.bank_name,
                period: p.period.to_string(),
                total_green: p.total_green.normalize().to_string(),
                total_fossil: p.total_fossil.normalize().to_string(),
                total_other: p.total_other.normalize().to_string(),
                bond_count: p.bond_count,
                loan_count: p.loan_count,
                adoption: score.map(|s| s.adoption),
                effectiveness: score.and_then(|s| s.effectiveness),
                authenticity: score.and_then(|s| s.authenticity),
                sfi_percent: score.and_then(|s| s.sfi_percent),
                paradox_ratio: score.and_then(|s| s.paradox_ratio),
            }
        })
        .collect();
    let path = dir.join(BANK_PANEL_FILE);
    write_table(
        &path,
        &[
            "Bank",
            "Period",
            "Total_Green",
            "Total_Fossil",
            "Total_Other",
            "Bond_Count",
            "Loan_Count",
            "Adoption_Score",
            "Effectiveness",
            "Authenticity_Index",
            "SFI_Percent",
            "Paradox_Ratio",
        ],
        &panel,
    )?;
    written.push(path);

    let temporal: Vec<TemporalRow> = analysis
        .temporal
        .points
        .iter()
        .map(|p| TemporalRow {
            year: p.year,
            global: p.global_volume.to_string(),
            china: p.china_volume.to_string(),
            count: p.count,
        })
        .collect();
    let path = dir.join(TEMPORAL_FILE);
    write_table(
        &path,
        &["Year", "Global_Green_Finance", "China_Green_Finance", "Count"],
        &temporal,
    )?;
    written.push(path);

    let path = dir.join(SUMMARY_FILE);
    write_table(&path, &["Metric", "Value", "Unit"], &analysis.summary_metrics())?;
    written.push(path);

    let mechanisms: Vec<MechanismRow> = analysis
        .mechanisms
        .iter()
        .map(|m| MechanismRow {
            mechanism: &m.mechanism,
            kind: m.kind.as_str(),
            effectiveness: m.effectiveness,
            green_volume_bn: m.green_volume_bn,
        })
        .collect();
    let path = dir.join(MECHANISMS_FILE);
    write_table(
        &path,
        &["Mechanism", "Kind", "Effectiveness", "Green_Volume_Bn"],
        &mechanisms,
    )?;
    written.push(path);

    if render_charts {
        let figures = dir.join(FIGURES_DIR);
        let rendered = [
            ("portfolio_paradox", charts::paradox_scatter(&analysis.scatter_points())),
            (
                "mechanism_effectiveness",
                charts::mechanism_bars(&analysis.mechanisms, &analysis.mechanism_summary),
            ),
            ("temporal_evolution", charts::temporal_lines(&analysis.temporal)),
            ("china_share", charts::china_share_bars(&analysis.temporal)),
            ("nzba_fossil_vs_green", charts::fossil_green_bars(&analysis.nzba_bars())),
        ];
        for (name, svg) in rendered {
            if let Some(path) = charts::write_chart(&figures, name, &svg)? {
                written.push(path);
            }
        }
    }

    info!("Wrote {} result files to {}", written.len(), dir.display());
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::TemporalWindow;
    use crate::fx::FxRateTable;
    use crate::period::Granularity;
    use crate::record::fixtures::record;
    use crate::reference::ReferenceData;
    use rust_decimal_macros::dec;

    fn analysis(records: &[crate::record::TransactionRecord]) -> Analysis {
        crate::pipeline::analyze(
            records,
            &ReferenceData::thesis_defaults(),
            &FxRateTable::default(),
            Granularity::Year,
            &TemporalWindow::default(),
        )
    }

    #[test]
    fn test_empty_run_still_writes_headers() {
        let dir = tempfile::tempdir().unwrap();
        let written = write_results(dir.path(), &analysis(&[]), false).unwrap();

        assert_eq!(written.len(), 5);
        let portfolios = fs::read_to_string(dir.path().join(BANK_PORTFOLIOS_FILE)).unwrap();
        assert_eq!(
            portfolios.trim_end(),
            "Bank,Green_Portfolio,Fossil_Exposure,Instrument_Count,Avg_Size"
        );
        assert!(!dir.path().join(FIGURES_DIR).exists());
    }

    #[test]
    fn test_portfolio_rows_and_undefined_metrics() {
        let records = vec![
            record("ICBC", dec!(2000000000), "USD", "2020-05-01"),
            record("ICBC", dec!(1000000000), "USD", "2020-08-01"),
        ];
        let dir = tempfile::tempdir().unwrap();
        write_results(dir.path(), &analysis(&records), true).unwrap();

        let portfolios = fs::read_to_string(dir.path().join(BANK_PORTFOLIOS_FILE)).unwrap();
        assert!(portfolios.contains("ICBC,3000000000,0,2,1500000000"));

        // One bank: correlations are undefined and leave the value empty
        let summary = fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap();
        assert!(summary.contains("Framework-SFI Correlation,,Correlation"));
        assert!(summary.contains("China Big 4 Green Credit,3.0,Billion USD")
            || summary.contains("China Big 4 Green Credit,3,Billion USD"));

        let mechanisms = fs::read_to_string(dir.path().join(MECHANISMS_FILE)).unwrap();
        assert_eq!(mechanisms.lines().count(), 10);
        assert!(dir.path().join(FIGURES_DIR).join("mechanism_effectiveness.svg").exists());
    }
}
