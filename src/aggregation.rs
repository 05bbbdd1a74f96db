// 📊 Portfolio Aggregator - (bank, period) → BankPortfolio
//
// Pure reduction over resolved records. Sums are exact Decimal in the base
// currency; nothing is cached between runs.

use crate::entities::{BankIdentity, BankRegistry};
use crate::error::ConversionError;
use crate::fx::FxRateTable;
use crate::period::{Granularity, Period};
use crate::record::{InstrumentType, ProceedsClass, TransactionRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

const BILLION: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);

// ============================================================================
// BANK PORTFOLIO
// ============================================================================

/// Everything one bank issued in one period, in the base currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankPortfolio {
    pub bank_id: Uuid,
    pub bank_name: String,
    pub period: Period,

    pub total_green: Decimal,
    pub total_fossil: Decimal,
    pub total_other: Decimal,

    pub bond_count: usize,
    pub loan_count: usize,
}

impl BankPortfolio {
    pub fn new(bank: &BankIdentity, period: Period) -> Self {
        BankPortfolio {
            bank_id: bank.id,
            bank_name: bank.canonical_name.clone(),
            period,
            total_green: Decimal::ZERO,
            total_fossil: Decimal::ZERO,
            total_other: Decimal::ZERO,
            bond_count: 0,
            loan_count: 0,
        }
    }

    /// Add one converted amount
    fn add(&mut self, class: ProceedsClass, instrument: InstrumentType, amount: Decimal) {
        match class {
            ProceedsClass::Green => self.total_green += amount,
            ProceedsClass::Fossil => self.total_fossil += amount,
            ProceedsClass::Other => self.total_other += amount,
        }
        match instrument {
            InstrumentType::Bond => self.bond_count += 1,
            InstrumentType::Loan => self.loan_count += 1,
        }
    }

    pub fn instrument_count(&self) -> usize {
        self.bond_count + self.loan_count
    }

    pub fn total_volume(&self) -> Decimal {
        self.total_green + self.total_fossil + self.total_other
    }

    pub fn green_billions(&self) -> Decimal {
        self.total_green / BILLION
    }
}

// ============================================================================
// PORTFOLIO PANEL
// ============================================================================

/// A record left out of the panel because it could not be converted
#[derive(Debug, Clone, PartialEq)]
pub struct ExcludedRecord {
    pub source_file: String,
    pub line_number: usize,
    pub issuer_name: String,
    pub error: ConversionError,
}

/// All portfolios of a run, keyed by (canonical bank name, period)
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioPanel {
    pub granularity: Granularity,
    pub base_currency: String,
    portfolios: BTreeMap<(String, Period), BankPortfolio>,
    exclusions: Vec<ExcludedRecord>,
}

impl PortfolioPanel {
    pub fn new(granularity: Granularity, base_currency: &str) -> Self {
        PortfolioPanel {
            granularity,
            base_currency: base_currency.to_string(),
            portfolios: BTreeMap::new(),
            exclusions: Vec::new(),
        }
    }

    pub fn get(&self, bank_name: &str, period: &Period) -> Option<&BankPortfolio> {
        self.portfolios.get(&(bank_name.to_string(), *period))
    }

    /// Portfolios ordered by bank name, then period
    pub fn iter(&self) -> impl Iterator<Item = &BankPortfolio> {
        self.portfolios.values()
    }

    pub fn len(&self) -> usize {
        self.portfolios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.is_empty()
    }

    /// One bank's portfolios in chronological order
    pub fn for_bank(&self, bank_name: &str) -> Vec<&BankPortfolio> {
        self.portfolios
            .values()
            .filter(|p| p.bank_name == bank_name)
            .collect()
    }

    /// Distinct bank names, sorted
    pub fn banks(&self) -> Vec<&str> {
        let mut banks: Vec<&str> = self
            .portfolios
            .keys()
            .map(|(name, _)| name.as_str())
            .collect();
        banks.dedup();
        banks
    }

    /// Distinct periods, sorted
    pub fn periods(&self) -> Vec<Period> {
        let mut periods: Vec<Period> = self.portfolios.keys().map(|(_, p)| *p).collect();
        periods.sort();
        periods.dedup();
        periods
    }

    pub fn exclusions(&self) -> &[ExcludedRecord] {
        &self.exclusions
    }

    /// SHA-256 over the ordered panel contents; equal inputs give equal digests
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!("{}|{:?}\n", self.base_currency, self.granularity));
        for p in self.portfolios.values() {
            hasher.update(format!(
                "{}|{}|{}|{}|{}|{}|{}\n",
                p.bank_name,
                p.period,
                p.total_green.normalize(),
                p.total_fossil.normalize(),
                p.total_other.normalize(),
                p.bond_count,
                p.loan_count,
            ));
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Reduce resolved records into per-(bank, period) portfolios.
///
/// Records without an FX rate for their period, or whose amount would
/// overflow the bank's running total, are excluded and logged; the
/// exclusion is kept on the panel. Each bank's grand total stays within
/// `Decimal` range, so every sum over its portfolios does too.
pub fn aggregate<'a, I>(pairs: I, granularity: Granularity, fx: &FxRateTable) -> PortfolioPanel
where
    I: IntoIterator<Item = (&'a TransactionRecord, &'a BankIdentity)>,
{
    let mut panel = PortfolioPanel::new(granularity, fx.base());
    let mut bank_totals: BTreeMap<&str, Decimal> = BTreeMap::new();

    for (record, bank) in pairs {
        let period = Period::of(record.issue_date, granularity);
        let converted = fx.convert(record.amount, &record.currency, &period).and_then(|amount| {
            let running = bank_totals
                .get(bank.canonical_name.as_str())
                .copied()
                .unwrap_or_default();
            running
                .checked_add(amount)
                .map(|total| (amount, total))
                .ok_or_else(|| ConversionError::Overflow {
                    amount: record.amount.to_string(),
                    currency: record.currency.clone(),
                    period: period.to_string(),
                })
        });
        let amount = match converted {
            Ok((amount, total)) => {
                bank_totals.insert(bank.canonical_name.as_str(), total);
                amount
            }
            Err(error) => {
                warn!(
                    "Excluding {}:{} ({}): {}",
                    record.source_file, record.line_number, record.issuer_name, error
                );
                panel.exclusions.push(ExcludedRecord {
                    source_file: record.source_file.clone(),
                    line_number: record.line_number,
                    issuer_name: record.issuer_name.clone(),
                    error,
                });
                continue;
            }
        };

        panel
            .portfolios
            .entry((bank.canonical_name.clone(), period))
            .or_insert_with(|| BankPortfolio::new(bank, period))
            .add(record.proceeds_class(), record.instrument, amount);
    }

    debug!(
        "Aggregated {} portfolios ({} exclusions)",
        panel.len(),
        panel.exclusions.len()
    );
    panel
}

// ============================================================================
// BANK SUMMARIES
// ============================================================================

/// One bank across every period of the panel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankSummary {
    pub bank_name: String,
    pub green_portfolio: Decimal,
    pub fossil_exposure: Decimal,
    pub instrument_count: usize,
    /// Green total per instrument, zero when the bank issued nothing
    pub avg_size: Decimal,
}

/// Per-bank totals over all periods, ordered by bank name
pub fn bank_summaries(panel: &PortfolioPanel) -> Vec<BankSummary> {
    panel
        .banks()
        .into_iter()
        .map(|bank_name| {
            let portfolios = panel.for_bank(bank_name);
            let green_portfolio: Decimal = portfolios.iter().map(|p| p.total_green).sum();
            let fossil_exposure: Decimal = portfolios.iter().map(|p| p.total_fossil).sum();
            let instrument_count: usize = portfolios.iter().map(|p| p.instrument_count()).sum();
            let avg_size = if instrument_count > 0 {
                green_portfolio / Decimal::from(instrument_count)
            } else {
                Decimal::ZERO
            };
            BankSummary {
                bank_name: bank_name.to_string(),
                green_portfolio,
                fossil_exposure,
                instrument_count,
                avg_size,
            }
        })
        .collect()
}

// ============================================================================
// TEMPORAL EVOLUTION
// ============================================================================

/// Year window and bond-to-total gross-up for the market series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemporalWindow {
    pub start_year: i32,
    pub end_year: i32,
    /// Share of green finance raised as bonds; volumes are divided by it
    pub bond_share: Decimal,
}

impl Default for TemporalWindow {
    fn default() -> Self {
        TemporalWindow {
            start_year: 2014,
            end_year: 2024,
            bond_share: dec!(0.7),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalPoint {
    pub year: i32,
    /// Billions of base currency, grossed up and rounded to 1 dp
    pub global_volume: Decimal,
    pub china_volume: Decimal,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TemporalEvolution {
    /// One point per year of the window, in order
    pub points: Vec<TemporalPoint>,
    /// Records inside the window with no FX rate
    pub excluded: usize,
}

impl TemporalEvolution {
    pub fn point(&self, year: i32) -> Option<&TemporalPoint> {
        self.points.iter().find(|p| p.year == year)
    }

    /// Compound annual growth of the global series between two years, in percent
    pub fn cagr_between(&self, from_year: i32, to_year: i32) -> Option<f64> {
        let years = to_year - from_year;
        if years <= 0 {
            return None;
        }
        let first = self.point(from_year)?.global_volume.to_f64()?;
        let last = self.point(to_year)?.global_volume.to_f64()?;
        if first <= 0.0 || last < 0.0 {
            return None;
        }
        Some(((last / first).powf(1.0 / f64::from(years)) - 1.0) * 100.0)
    }

    /// CAGR over the whole window
    pub fn cagr(&self) -> Option<f64> {
        let first = self.points.first()?.year;
        let last = self.points.last()?.year;
        self.cagr_between(first, last)
    }

    /// Chinese share of global volume in `year`, in percent
    pub fn china_share(&self, year: i32) -> Option<f64> {
        let point = self.point(year)?;
        let global = point.global_volume.to_f64()?;
        if global <= 0.0 {
            return None;
        }
        Some(point.china_volume.to_f64()? / global * 100.0)
    }
}

/// Yearly global and Chinese volumes over every loaded record, resolved or not.
///
/// Each yearly sum is rounded to 1 dp in billions, divided by the bond share,
/// and rounded again. Years without issuance are present with zero.
pub fn temporal_evolution(
    records: &[TransactionRecord],
    registry: &BankRegistry,
    fx: &FxRateTable,
    window: &TemporalWindow,
) -> TemporalEvolution {
    let mut global: BTreeMap<i32, Decimal> = BTreeMap::new();
    let mut china: BTreeMap<i32, Decimal> = BTreeMap::new();
    let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
    let mut excluded = 0;

    for record in records {
        let period = Period::of(record.issue_date, Granularity::Year);
        if period.year < window.start_year || period.year > window.end_year {
            continue;
        }
        let amount = match fx.convert(record.amount, &record.currency, &period) {
            Ok(amount) => amount / BILLION,
            Err(error) => {
                debug!("Temporal series skips {}:{}: {}", record.source_file, record.line_number, error);
                excluded += 1;
                continue;
            }
        };

        *global.entry(period.year).or_default() += amount;
        *counts.entry(period.year).or_default() += 1;
        if registry.is_chinese_issuer(record) {
            *china.entry(period.year).or_default() += amount;
        }
    }

    let gross_up = |volume: Option<&Decimal>| -> Decimal {
        let rounded = volume.copied().unwrap_or_default().round_dp(1);
        rounded
            .checked_div(window.bond_share)
            .unwrap_or(rounded)
            .round_dp(1)
    };

    let points = (window.start_year..=window.end_year)
        .map(|year| TemporalPoint {
            year,
            global_volume: gross_up(global.get(&year)),
            china_volume: gross_up(china.get(&year)),
            count: counts.get(&year).copied().unwrap_or(0),
        })
        .collect();

    if excluded > 0 {
        warn!("{} records excluded from the temporal series (no FX rate)", excluded);
    }

    TemporalEvolution { points, excluded }
}

// ============================================================================
// TESTS
// ============================================================================
