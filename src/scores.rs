// 🎯 Score Calculator - adoption, effectiveness, authenticity, paradox
//
// Every score is computed per (bank, period) from the finalized panel plus
// static reference figures. A rejected input aborts that one score only.

use crate::aggregation::{BankPortfolio, PortfolioPanel};
use crate::entities::{AdoptionFlags, BankRegistry};
use crate::error::ValidationError;
use crate::period::Period;
use crate::reference::{BankFundamentals, ReferenceData};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

// ============================================================================
// CONSTANTS
// ============================================================================

pub const GREEN_RATIO_WEIGHT: f64 = 0.40;
pub const GROWTH_WEIGHT: f64 = 0.20;
pub const CARBON_REDUCTION_WEIGHT: f64 = 0.20;
pub const POLICY_WEIGHT: f64 = 0.20;

/// Green-to-assets ratio that earns the full green-ratio component
pub const GREEN_RATIO_TARGET: f64 = 0.15;

pub const REPEAT_ISSUANCE_WEIGHT: f64 = 0.35;
pub const KPI_ACHIEVEMENT_WEIGHT: f64 = 0.40;
pub const PREMIUM_PERSISTENCE_WEIGHT: f64 = 0.25;

/// Keeps the paradox ratio finite for banks with no framework adopted
pub const PARADOX_EPSILON: f64 = 0.01;

// ============================================================================
// FRAMEWORK ADOPTION
// ============================================================================

/// Mean of the four adoption flags, in [0, 1]
pub fn adoption_score(flags: &AdoptionFlags) -> f64 {
    flags.count() as f64 / 4.0
}

// ============================================================================
// IMPLEMENTATION EFFECTIVENESS
// ============================================================================

/// The four normalized inputs of the effectiveness score, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EffectivenessComponents {
    pub green_ratio: f64,
    pub yoy_growth: f64,
    pub carbon_reduction: f64,
    pub policy_completeness: f64,
}

impl EffectivenessComponents {
    /// Weighted score on a 0-100 scale
    pub fn score(&self) -> f64 {
        100.0
            * (GREEN_RATIO_WEIGHT * self.green_ratio
                + GROWTH_WEIGHT * self.yoy_growth
                + CARBON_REDUCTION_WEIGHT * self.carbon_reduction
                + POLICY_WEIGHT * self.policy_completeness)
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn check_unit(
    bank: &str,
    period: &Period,
    component: &str,
    value: f64,
) -> Result<f64, ValidationError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::OutOfRange {
            bank: bank.to_string(),
            period: period.to_string(),
            component: component.to_string(),
            value,
            min: 0.0,
            max: 1.0,
        })
    }
}

fn total_assets(
    portfolio: &BankPortfolio,
    fundamentals: Option<&BankFundamentals>,
) -> Result<f64, ValidationError> {
    let assets = fundamentals
        .and_then(|f| f.total_assets_bn)
        .ok_or_else(|| ValidationError::MissingInput {
            bank: portfolio.bank_name.clone(),
            period: portfolio.period.to_string(),
            field: "total_assets_bn".to_string(),
        })?;
    if !assets.is_finite() || assets <= 0.0 {
        return Err(ValidationError::OutOfRange {
            bank: portfolio.bank_name.clone(),
            period: portfolio.period.to_string(),
            component: "total_assets_bn".to_string(),
            value: assets,
            min: 0.0,
            max: f64::MAX,
        });
    }
    Ok(assets)
}

/// Growth of the green total against the same period one year earlier
fn yoy_growth(current: &BankPortfolio, prior: Option<&BankPortfolio>) -> f64 {
    let Some(prior) = prior else {
        return 0.0;
    };
    if prior.total_green.is_zero() {
        return if current.total_green > Decimal::ZERO { 1.0 } else { 0.0 };
    }
    let growth = (current.total_green - prior.total_green) / prior.total_green;
    to_f64(growth).clamp(0.0, 1.0)
}

/// Relative fall in fossil exposure against the year-earlier period
fn carbon_reduction(current: &BankPortfolio, prior: Option<&BankPortfolio>) -> f64 {
    let prior_fossil = prior.map(|p| p.total_fossil).unwrap_or_default();
    match (prior_fossil.is_zero(), current.total_fossil.is_zero()) {
        (true, true) => 1.0,
        (true, false) => 0.0,
        _ => to_f64((prior_fossil - current.total_fossil) / prior_fossil).clamp(0.0, 1.0),
    }
}

/// Implementation effectiveness components for one portfolio.
///
/// `prior` is the same bank one year earlier, if it issued anything then.
pub fn effectiveness_components(
    current: &BankPortfolio,
    prior: Option<&BankPortfolio>,
    fundamentals: Option<&BankFundamentals>,
    adoption: f64,
) -> Result<EffectivenessComponents, ValidationError> {
    let assets = total_assets(current, fundamentals)?;
    let green_ratio = (to_f64(current.green_billions()) / assets / GREEN_RATIO_TARGET).min(1.0);

    let policy = fundamentals
        .and_then(|f| f.policy_completeness)
        .unwrap_or(adoption);
    let policy_completeness = check_unit(
        &current.bank_name,
        &current.period,
        "policy_completeness",
        policy,
    )?;

    Ok(EffectivenessComponents {
        green_ratio,
        yoy_growth: yoy_growth(current, prior),
        carbon_reduction: carbon_reduction(current, prior),
        policy_completeness,
    })
}

/// Implementation effectiveness on a 0-100 scale
pub fn effectiveness_score(
    current: &BankPortfolio,
    prior: Option<&BankPortfolio>,
    fundamentals: Option<&BankFundamentals>,
    adoption: f64,
) -> Result<f64, ValidationError> {
    effectiveness_components(current, prior, fundamentals, adoption).map(|c| c.score())
}

// ============================================================================
// IMPLEMENTATION AUTHENTICITY
// ============================================================================

/// IAI = 0.35 repeat issuance + 0.40 KPI achievement + 0.25 premium persistence.
///
/// Every component must be a finite value in [0, 1].
pub fn implementation_authenticity(
    bank: &str,
    period: &Period,
    repeat_issuance: f64,
    kpi_achievement: f64,
    premium_persistence: f64,
) -> Result<f64, ValidationError> {
    let repeat = check_unit(bank, period, "repeat_issuance", repeat_issuance)?;
    let kpi = check_unit(bank, period, "kpi_achievement", kpi_achievement)?;
    let premium = check_unit(bank, period, "premium_persistence", premium_persistence)?;

    Ok(REPEAT_ISSUANCE_WEIGHT * repeat
        + KPI_ACHIEVEMENT_WEIGHT * kpi
        + PREMIUM_PERSISTENCE_WEIGHT * premium)
}

/// Share of a bank's active periods, up to and including `period`, with more
/// than one instrument issued
pub fn repeat_issuance(panel: &PortfolioPanel, bank_name: &str, period: &Period) -> f64 {
    let active: Vec<&BankPortfolio> = panel
        .for_bank(bank_name)
        .into_iter()
        .filter(|p| p.period <= *period && p.instrument_count() > 0)
        .collect();
    if active.is_empty() {
        return 0.0;
    }
    let repeated = active.iter().filter(|p| p.instrument_count() > 1).count();
    repeated as f64 / active.len() as f64
}

// ============================================================================
// SFI & PARADOX RATIO
// ============================================================================

/// Sustainable finance intensity: green volume as a percentage of total assets
pub fn sfi_percent(green_bn: f64, total_assets_bn: f64) -> Option<f64> {
    (total_assets_bn > 0.0 && total_assets_bn.is_finite()).then(|| green_bn / total_assets_bn * 100.0)
}

/// High SFI with low adoption gives a high ratio
pub fn paradox_ratio(sfi_percent: f64, adoption: f64) -> f64 {
    sfi_percent / (adoption + PARADOX_EPSILON)
}

// ============================================================================
// REGULATORY MECHANISMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MechanismKind {
    Directive,
    #[serde(alias = "market", alias = "market-based")]
    MarketBased,
    #[serde(alias = "mixed")]
    Hybrid,
}

impl MechanismKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MechanismKind::Directive => "directive",
            MechanismKind::MarketBased => "market_based",
            MechanismKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for MechanismKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How effective one jurisdiction's regulatory regime is at moving capital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryMechanismScore {
    pub mechanism: String,
    pub kind: MechanismKind,
    /// Percent, 0-100
    pub effectiveness: f64,
    #[serde(default)]
    pub green_volume_bn: Option<f64>,
}

impl RegulatoryMechanismScore {
    pub fn new(mechanism: &str, kind: MechanismKind, effectiveness: f64) -> Self {
        RegulatoryMechanismScore {
            mechanism: mechanism.to_string(),
            kind,
            effectiveness,
            green_volume_bn: None,
        }
    }

    pub fn with_volume(mut self, green_volume_bn: f64) -> Self {
        self.green_volume_bn = Some(green_volume_bn);
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.effectiveness.is_finite() && (0.0..=100.0).contains(&self.effectiveness) {
            return Ok(());
        }
        Err(ValidationError::OutOfRange {
            bank: self.mechanism.clone(),
            period: "all".to_string(),
            component: "effectiveness".to_string(),
            value: self.effectiveness,
            min: 0.0,
            max: 100.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MechanismSummary {
    pub directive_mean: Option<f64>,
    pub market_based_mean: Option<f64>,
    pub hybrid_mean: Option<f64>,
    /// Directive mean minus market-based mean, in percentage points
    pub implementation_gap: Option<f64>,
    #[serde(skip)]
    pub rejected: Vec<ValidationError>,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Mean effectiveness per kind; invalid entries are rejected and left out
pub fn summarize_mechanisms(mechanisms: &[RegulatoryMechanismScore]) -> MechanismSummary {
    let mut summary = MechanismSummary::default();
    let by_kind = |kind: MechanismKind| -> Vec<f64> {
        mechanisms
            .iter()
            .filter(|m| m.kind == kind && m.validate().is_ok())
            .map(|m| m.effectiveness)
            .collect()
    };

    let directive = by_kind(MechanismKind::Directive);
    let market = by_kind(MechanismKind::MarketBased);
    let hybrid = by_kind(MechanismKind::Hybrid);

    summary.rejected = mechanisms.iter().filter_map(|m| m.validate().err()).collect();
    for error in &summary.rejected {
        warn!("Mechanism rejected: {}", error);
    }

    summary.directive_mean = mean(&directive);
    summary.market_based_mean = mean(&market);
    summary.hybrid_mean = mean(&hybrid);
    summary.implementation_gap = match (summary.directive_mean, summary.market_based_mean) {
        (Some(d), Some(m)) => Some(d - m),
        _ => None,
    };
    summary
}

// ============================================================================
// PANEL SCORING
// ============================================================================

/// Scores for one (bank, period); a `None` score failed validation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BankScore {
    pub bank_name: String,
    pub country: String,
    pub period: Period,
    pub adoption: f64,
    pub effectiveness: Option<f64>,
    pub authenticity: Option<f64>,
    pub sfi_percent: Option<f64>,
    pub paradox_ratio: Option<f64>,
    pub regime: Option<MechanismKind>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreReport {
    /// Same order as the panel: bank name, then period
    pub scores: Vec<BankScore>,
    pub failures: Vec<ValidationError>,
}

impl ScoreReport {
    pub fn get(&self, bank_name: &str, period: &Period) -> Option<&BankScore> {
        self.scores
            .iter()
            .find(|s| s.bank_name == bank_name && s.period == *period)
    }

    /// Latest scored period per bank
    pub fn latest_per_bank(&self) -> Vec<&BankScore> {
        let mut latest: Vec<&BankScore> = Vec::new();
        for score in &self.scores {
            match latest.last_mut() {
                Some(last) if last.bank_name == score.bank_name => *last = score,
                _ => latest.push(score),
            }
        }
        latest
    }
}

/// Score every portfolio of the panel
pub fn score_panel(
    panel: &PortfolioPanel,
    registry: &BankRegistry,
    reference: &ReferenceData,
) -> ScoreReport {
    let mut report = ScoreReport::default();

    for portfolio in panel.iter() {
        let bank = registry.find_by_name(&portfolio.bank_name);
        let adoption = bank.map(|b| adoption_score(&b.adoption)).unwrap_or(0.0);
        let fundamentals = reference.fundamentals(&portfolio.bank_name);
        let prior = panel.get(&portfolio.bank_name, &portfolio.period.year_earlier());

        let effectiveness = match effectiveness_score(portfolio, prior, fundamentals, adoption) {
            Ok(score) => Some(score),
            Err(error) => {
                warn!("Effectiveness not scored: {}", error);
                report.failures.push(error);
                None
            }
        };

        let authenticity = match fundamentals {
            Some(f) => {
                let repeat = repeat_issuance(panel, &portfolio.bank_name, &portfolio.period);
                match implementation_authenticity(
                    &portfolio.bank_name,
                    &portfolio.period,
                    repeat,
                    f.kpi_achievement,
                    f.premium_persistence,
                ) {
                    Ok(score) => Some(score),
                    Err(error) => {
                        warn!("Authenticity not scored: {}", error);
                        report.failures.push(error);
                        None
                    }
                }
            }
            None => {
                let error = ValidationError::MissingInput {
                    bank: portfolio.bank_name.clone(),
                    period: portfolio.period.to_string(),
                    field: "fundamentals".to_string(),
                };
                warn!("Authenticity not scored: {}", error);
                report.failures.push(error);
                None
            }
        };

        let sfi = fundamentals
            .and_then(|f| f.total_assets_bn)
            .and_then(|assets| sfi_percent(to_f64(portfolio.green_billions()), assets));

        report.scores.push(BankScore {
            bank_name: portfolio.bank_name.clone(),
            country: bank.map(|b| b.country.clone()).unwrap_or_default(),
            period: portfolio.period,
            adoption,
            effectiveness,
            authenticity,
            sfi_percent: sfi,
            paradox_ratio: sfi.map(|s| paradox_ratio(s, adoption)),
            regime: fundamentals.map(|f| f.regime),
        });
    }

    debug!(
        "Scored {} portfolios, {} failures",
        report.scores.len(),
        report.failures.len()
    );
    report
}

// ============================================================================
// TESTS
// ============================================================================
