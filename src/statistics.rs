// 📈 Statistics - correlations, t-test, fixed-effects panel regression
//
// Pure functions over finished tables. Degenerate input yields
// `Estimate::Undefined` with a reason; nothing here panics.

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::BTreeMap;

// ============================================================================
// ESTIMATE
// ============================================================================

/// A statistic that may not exist for the given input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Estimate<T> {
    Defined(T),
    Undefined { reason: String },
}

impl<T> Estimate<T> {
    pub fn undefined(reason: impl Into<String>) -> Self {
        Estimate::Undefined {
            reason: reason.into(),
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Estimate::Defined(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Estimate::Defined(v) => Some(v),
            Estimate::Undefined { .. } => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Estimate::Defined(v) => Some(v),
            Estimate::Undefined { .. } => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Estimate<U> {
        match self {
            Estimate::Defined(v) => Estimate::Defined(f(v)),
            Estimate::Undefined { reason } => Estimate::Undefined { reason },
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Estimate::Defined(_) => None,
            Estimate::Undefined { reason } => Some(reason),
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator)
fn sample_variance(values: &[f64]) -> f64 {
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0)
}

/// Two-sided p-value of `t` under Student's t with `df` degrees of freedom
fn two_sided_p(t: f64, df: f64) -> Option<f64> {
    if t.is_infinite() {
        return Some(0.0);
    }
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0))
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Average ranks, 1-based; ties share the mean of their positions
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

// ============================================================================
// CORRELATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Correlation {
    pub coefficient: f64,
    /// Two-sided, Student's t with n - 2 degrees of freedom
    pub p_value: f64,
    pub n: usize,
}

/// Pearson product-moment correlation.
///
/// Needs at least 3 paired observations and non-zero variance on both sides.
pub fn pearson(x: &[f64], y: &[f64]) -> Estimate<Correlation> {
    if x.len() != y.len() {
        return Estimate::undefined(format!("length mismatch: {} vs {}", x.len(), y.len()));
    }
    let n = x.len();
    if n < 3 {
        return Estimate::undefined(format!("{} observations, need at least 3", n));
    }
    if !all_finite(x) || !all_finite(y) {
        return Estimate::undefined("non-finite observation");
    }

    let (mx, my) = (mean(x), mean(y));
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        cov += (a - mx) * (b - my);
        var_x += (a - mx).powi(2);
        var_y += (b - my).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return Estimate::undefined("zero variance");
    }

    let r = (cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0);
    let df = (n - 2) as f64;
    let denom = 1.0 - r * r;
    let t = if denom <= 0.0 {
        f64::INFINITY
    } else {
        r * (df / denom).sqrt()
    };

    match two_sided_p(t, df) {
        Some(p_value) => Estimate::Defined(Correlation {
            coefficient: r,
            p_value,
            n,
        }),
        None => Estimate::undefined("t distribution unavailable"),
    }
}

/// Spearman rank correlation (Pearson over average ranks)
pub fn spearman(x: &[f64], y: &[f64]) -> Estimate<Correlation> {
    if x.len() != y.len() {
        return Estimate::undefined(format!("length mismatch: {} vs {}", x.len(), y.len()));
    }
    if !all_finite(x) || !all_finite(y) {
        return Estimate::undefined("non-finite observation");
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

// ============================================================================
// TWO-SAMPLE T-TEST
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TTest {
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    pub mean_a: f64,
    pub mean_b: f64,
}

/// Independent two-sample t-test with pooled variance
pub fn two_sample_t_test(a: &[f64], b: &[f64]) -> Estimate<TTest> {
    if a.len() < 2 || b.len() < 2 {
        return Estimate::undefined(format!(
            "groups of {} and {}, need at least 2 each",
            a.len(),
            b.len()
        ));
    }
    if !all_finite(a) || !all_finite(b) {
        return Estimate::undefined("non-finite observation");
    }

    let (na, nb) = (a.len() as f64, b.len() as f64);
    let df = na + nb - 2.0;
    let pooled = ((na - 1.0) * sample_variance(a) + (nb - 1.0) * sample_variance(b)) / df;
    if pooled == 0.0 {
        return Estimate::undefined("zero variance in both groups");
    }

    let (mean_a, mean_b) = (mean(a), mean(b));
    let t = (mean_a - mean_b) / (pooled * (1.0 / na + 1.0 / nb)).sqrt();

    match two_sided_p(t, df) {
        Some(p_value) => Estimate::Defined(TTest {
            t_statistic: t,
            degrees_of_freedom: df,
            p_value,
            mean_a,
            mean_b,
        }),
        None => Estimate::undefined("t distribution unavailable"),
    }
}

// ============================================================================
// FIXED-EFFECTS PANEL REGRESSION
// ============================================================================

/// One row of a panel: entity, outcome and regressors
#[derive(Debug, Clone, PartialEq)]
pub struct PanelObservation {
    pub entity: String,
    pub y: f64,
    pub x: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    pub t_statistic: f64,
    pub p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixedEffectsFit {
    pub coefficients: Vec<Coefficient>,
    pub r_squared_within: f64,
    pub observations: usize,
    pub entities: usize,
    pub degrees_of_freedom: usize,
}

impl FixedEffectsFit {
    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// Relative pivot size below which X'X is treated as rank deficient
const RANK_TOLERANCE: f64 = 1e-12;

/// Within estimator: demean y and every regressor by entity, then OLS
/// without intercept. Degrees of freedom are N - entities - k.
pub fn fixed_effects_regression(
    observations: &[PanelObservation],
    regressors: &[&str],
) -> Estimate<FixedEffectsFit> {
    let k = regressors.len();
    if k == 0 {
        return Estimate::undefined("no regressors");
    }
    if let Some(bad) = observations.iter().find(|o| o.x.len() != k) {
        return Estimate::undefined(format!(
            "entity {} has {} regressors, expected {}",
            bad.entity,
            bad.x.len(),
            k
        ));
    }
    if observations
        .iter()
        .any(|o| !o.y.is_finite() || !all_finite(&o.x))
    {
        return Estimate::undefined("non-finite observation");
    }

    // Entity means
    let mut groups: BTreeMap<&str, (usize, f64, Vec<f64>)> = BTreeMap::new();
    for obs in observations {
        let entry = groups
            .entry(obs.entity.as_str())
            .or_insert_with(|| (0, 0.0, vec![0.0; k]));
        entry.0 += 1;
        entry.1 += obs.y;
        for (sum, x) in entry.2.iter_mut().zip(&obs.x) {
            *sum += x;
        }
    }

    let n = observations.len();
    let entities = groups.len();
    if n <= entities + k {
        return Estimate::undefined(format!(
            "{} observations over {} entities leave no degrees of freedom for {} regressors",
            n, entities, k
        ));
    }
    let df = n - entities - k;

    let x = DMatrix::from_fn(n, k, |row, col| {
        let obs = &observations[row];
        let (count, _, x_sums) = &groups[obs.entity.as_str()];
        obs.x[col] - x_sums[col] / *count as f64
    });
    let y = DVector::from_fn(n, |row, _| {
        let obs = &observations[row];
        let (count, y_sum, _) = &groups[obs.entity.as_str()];
        obs.y - y_sum / *count as f64
    });

    // Normal equations
    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;

    let scale = xtx.amax();
    let lu = xtx.clone().lu();
    if scale == 0.0 || lu.u().diagonal().amin() <= scale * RANK_TOLERANCE {
        return Estimate::undefined("singular design: a regressor has no within-entity variation");
    }
    let (Some(beta), Some(xtx_inv)) = (lu.solve(&xty), xtx.try_inverse()) else {
        return Estimate::undefined("singular design");
    };

    let residuals = &y - &x * &beta;
    let ssr = residuals.norm_squared();
    let sst = y.norm_squared();
    if sst == 0.0 {
        return Estimate::undefined("outcome has no within-entity variation");
    }

    let sigma2 = ssr / df as f64;
    let mut coefficients = Vec::with_capacity(k);
    for (j, name) in regressors.iter().enumerate() {
        let std_error = (sigma2 * xtx_inv[(j, j)]).max(0.0).sqrt();
        let estimate = beta[j];
        let t_statistic = if std_error > 0.0 {
            estimate / std_error
        } else if estimate == 0.0 {
            0.0
        } else {
            f64::INFINITY.copysign(estimate)
        };
        let p_value = two_sided_p(t_statistic, df as f64).unwrap_or(f64::NAN);
        coefficients.push(Coefficient {
            name: name.to_string(),
            estimate,
            std_error,
            t_statistic,
            p_value,
        });
    }

    Estimate::Defined(FixedEffectsFit {
        coefficients,
        r_squared_within: 1.0 - ssr / sst,
        observations: n,
        entities,
        degrees_of_freedom: df,
    })
}

// ============================================================================
// VARIANCE DECOMPOSITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VarianceDecomposition {
    pub total_ss: f64,
    pub between_ss: f64,
    pub within_ss: f64,
    /// between / total
    pub between_share: f64,
    pub groups: usize,
}

/// Split the total sum of squares into between-group and within-group parts
pub fn variance_decomposition(observations: &[(&str, f64)]) -> Estimate<VarianceDecomposition> {
    if observations.iter().any(|(_, v)| !v.is_finite()) {
        return Estimate::undefined("non-finite observation");
    }

    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for (group, value) in observations {
        groups.entry(*group).or_default().push(*value);
    }
    if groups.len() < 2 {
        return Estimate::undefined(format!("{} groups, need at least 2", groups.len()));
    }

    let values: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
    let grand = mean(&values);
    let total_ss: f64 = values.iter().map(|v| (v - grand).powi(2)).sum();
    if total_ss == 0.0 {
        return Estimate::undefined("zero variance");
    }

    let mut between_ss = 0.0;
    let mut within_ss = 0.0;
    for members in groups.values() {
        let m = mean(members);
        between_ss += members.len() as f64 * (m - grand).powi(2);
        within_ss += members.iter().map(|v| (v - m).powi(2)).sum::<f64>();
    }

    Estimate::Defined(VarianceDecomposition {
        total_ss,
        between_ss,
        within_ss,
        between_share: between_ss / total_ss,
        groups: groups.len(),
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pearson() {
        let r = pearson(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0])
            .into_option()
            .unwrap();
        assert_relative_eq!(r.coefficient, 0.774_596_669, epsilon = 1e-8);
        assert_relative_eq!(r.p_value, 0.124_027, epsilon = 1e-5);
        assert_eq!(r.n, 5);
    }

    #[test]
    fn test_pearson_perfect_and_negative() {
        let r = pearson(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]).into_option().unwrap();
        assert_relative_eq!(r.coefficient, -1.0, epsilon = 1e-12);
        assert_eq!(r.p_value, 0.0);
    }

    #[test]
    fn test_pearson_degenerate_inputs() {
        assert!(!pearson(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).is_defined());
        assert!(!pearson(&[1.0, 2.0], &[1.0, 2.0]).is_defined());
        assert!(!pearson(&[1.0, 2.0, 3.0], &[1.0, 2.0]).is_defined());
        assert!(!pearson(&[], &[]).is_defined());
        assert!(!pearson(&[1.0, f64::NAN, 3.0], &[1.0, 2.0, 3.0]).is_defined());
        assert_eq!(
            pearson(&[1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).reason(),
            Some("zero variance")
        );
    }

    #[test]
    fn test_spearman_with_ties() {
        let r = spearman(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 5.0, 4.0, 5.0])
            .into_option()
            .unwrap();
        assert_relative_eq!(r.coefficient, 0.737_864_787, epsilon = 1e-8);
        assert_relative_eq!(r.p_value, 0.154_619, epsilon = 1e-5);

        // Monotone but non-linear: rank correlation is exactly 1
        let r = spearman(&[1.0, 2.0, 3.0, 4.0], &[1.0, 8.0, 27.0, 64.0])
            .into_option()
            .unwrap();
        assert_relative_eq!(r.coefficient, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_average_ranks() {
        assert_eq!(
            average_ranks(&[2.0, 4.0, 5.0, 4.0, 5.0]),
            vec![1.0, 2.5, 4.5, 2.5, 4.5]
        );
    }

    #[test]
    fn test_two_sample_t_test() {
        let t = two_sample_t_test(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 4.0, 6.0, 8.0, 10.0])
            .into_option()
            .unwrap();
        assert_relative_eq!(t.t_statistic, -1.897_366_596, epsilon = 1e-8);
        assert_eq!(t.degrees_of_freedom, 8.0);
        assert_relative_eq!(t.p_value, 0.094_350, epsilon = 1e-5);
        assert_eq!(t.mean_a, 3.0);
        assert_eq!(t.mean_b, 6.0);
    }

    #[test]
    fn test_t_test_degenerate() {
        assert!(!two_sample_t_test(&[1.0], &[2.0, 3.0]).is_defined());
        assert!(!two_sample_t_test(&[1.0, 1.0], &[2.0, 2.0]).is_defined());
    }

    fn panel_row(entity: &str, y: f64, x: f64) -> PanelObservation {
        PanelObservation {
            entity: entity.to_string(),
            y,
            x: vec![x],
        }
    }

    #[test]
    fn test_fixed_effects_recovers_slope() {
        let noise = [0.1, -0.1, 0.1, -0.1];
        let mut rows = Vec::new();
        for (entity, alpha) in [("A", 10.0), ("B", -5.0), ("C", 0.0)] {
            for (i, e) in noise.iter().enumerate() {
                let x = (i + 1) as f64;
                rows.push(panel_row(entity, alpha + 2.0 * x + e, x));
            }
        }

        let fit = fixed_effects_regression(&rows, &["x"]).into_option().unwrap();
        let beta = fit.coefficient("x").unwrap();
        assert_relative_eq!(beta.estimate, 1.96, epsilon = 1e-9);
        // sqrt((0.096 / 8) / 15)
        assert_relative_eq!(beta.std_error, 0.0008_f64.sqrt(), epsilon = 1e-9);
        assert!(beta.p_value < 0.001);
        assert_eq!(fit.observations, 12);
        assert_eq!(fit.entities, 3);
        assert_eq!(fit.degrees_of_freedom, 8);
        assert!(fit.r_squared_within > 0.99);
    }

    #[test]
    fn test_fixed_effects_degenerate() {
        // Regressor constant within each entity: absorbed by the fixed effect
        let rows = vec![
            panel_row("A", 1.0, 1.0),
            panel_row("A", 2.0, 1.0),
            panel_row("B", 3.0, 2.0),
            panel_row("B", 5.0, 2.0),
        ];
        assert!(!fixed_effects_regression(&rows, &["x"]).is_defined());

        // One observation per entity leaves nothing to estimate
        let rows = vec![panel_row("A", 1.0, 1.0), panel_row("B", 2.0, 3.0)];
        assert!(!fixed_effects_regression(&rows, &["x"]).is_defined());

        let rows = vec![panel_row("A", 1.0, 1.0)];
        assert!(!fixed_effects_regression(&rows, &["x", "z"]).is_defined());
    }

    #[test]
    fn test_fixed_effects_collinear_regressors() {
        let points = [
            ("A", 1.0, 2.0), ("A", 2.0, 3.5), ("A", 3.0, 5.5),
            ("B", 1.0, 0.5), ("B", 4.0, 2.0),
        ];
        let rows: Vec<PanelObservation> = points
            .iter()
            .map(|&(entity, x, y)| PanelObservation {
                entity: entity.to_string(),
                y,
                x: vec![x, 2.0 * x],
            })
            .collect();
        let estimate = fixed_effects_regression(&rows, &["x", "double_x"]);
        assert!(!estimate.is_defined());
        assert!(estimate.reason().unwrap().starts_with("singular design"));
    }

    #[test]
    fn test_fixed_effects_two_regressors() {
        // y = 3·x1 - 1·x2 + entity effect, exact
        let points = [
            ("A", 1.0, 0.0), ("A", 2.0, 1.0), ("A", 4.0, 1.0), ("A", 3.0, 5.0),
            ("B", 0.0, 2.0), ("B", 1.0, 4.0), ("B", 5.0, 0.0), ("B", 2.0, 2.0),
        ];
        let rows: Vec<PanelObservation> = points
            .iter()
            .map(|&(entity, x1, x2)| PanelObservation {
                entity: entity.to_string(),
                y: 3.0 * x1 - x2 + if entity == "A" { 7.0 } else { -2.0 },
                x: vec![x1, x2],
            })
            .collect();

        let fit = fixed_effects_regression(&rows, &["x1", "x2"]).into_option().unwrap();
        assert_relative_eq!(fit.coefficient("x1").unwrap().estimate, 3.0, epsilon = 1e-9);
        assert_relative_eq!(fit.coefficient("x2").unwrap().estimate, -1.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared_within, 1.0, epsilon = 1e-9);
        assert_eq!(fit.degrees_of_freedom, 4);
    }

    #[test]
    fn test_variance_decomposition() {
        let obs = [("A", 1.0), ("A", 3.0), ("B", 5.0), ("B", 7.0)];
        let d = variance_decomposition(&obs).into_option().unwrap();
        assert_relative_eq!(d.total_ss, 20.0, epsilon = 1e-12);
        assert_relative_eq!(d.between_ss, 16.0, epsilon = 1e-12);
        assert_relative_eq!(d.within_ss, 4.0, epsilon = 1e-12);
        assert_relative_eq!(d.between_share, 0.8, epsilon = 1e-12);
        assert_eq!(d.groups, 2);

        assert!(!variance_decomposition(&[("A", 1.0), ("A", 2.0)]).is_defined());
        assert!(!variance_decomposition(&[("A", 1.0), ("B", 1.0)]).is_defined());
    }
}
