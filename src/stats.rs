// ============================================================================
// STATISTICAL KERNEL
// ============================================================================
// Shared numeric routines backing aggregation, insight generation, and
// forecasting. All functions are total: degenerate inputs (empty slices,
// zero variance) produce 0.0 rather than NaN so downstream thresholds
// never have to special-case them.
// ============================================================================

/// Descriptive statistics over plain value slices.
pub struct SeriesStats;

impl SeriesStats {
    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Sample variance (n - 1 denominator).
    pub fn variance(values: &[f64]) -> f64 {
        if values.len() < 2 {
            return 0.0;
        }
        let mean = Self::mean(values);
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64
    }

    pub fn std_dev(values: &[f64]) -> f64 {
        Self::variance(values).sqrt()
    }

    /// Coefficient of variation (stddev / mean). Zero when the mean is zero.
    pub fn coefficient_of_variation(values: &[f64]) -> f64 {
        let mean = Self::mean(values);
        if mean.abs() < f64::EPSILON {
            return 0.0;
        }
        Self::std_dev(values) / mean.abs()
    }

    pub fn covariance(x: &[f64], y: &[f64]) -> f64 {
        if x.len() != y.len() || x.len() < 2 {
            return 0.0;
        }
        let mean_x = Self::mean(x);
        let mean_y = Self::mean(y);
        x.iter()
            .zip(y.iter())
            .map(|(xi, yi)| (xi - mean_x) * (yi - mean_y))
            .sum::<f64>()
            / (x.len() - 1) as f64
    }

    /// Pearson correlation coefficient. Zero for constant series.
    pub fn correlation(x: &[f64], y: &[f64]) -> f64 {
        let cov = Self::covariance(x, y);
        let std_x = Self::std_dev(x);
        let std_y = Self::std_dev(y);

        if std_x == 0.0 || std_y == 0.0 {
            0.0
        } else {
            (cov / (std_x * std_y)).clamp(-1.0, 1.0)
        }
    }

    /// Nearest-rank percentile over an unsorted slice. `p` in [0, 1].
    pub fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let idx = (p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

// ----------------------------------------------------------------------------
// Regression
// ----------------------------------------------------------------------------

/// A fitted ordinary least squares line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    /// Standard deviation of the fit residuals
    pub residual_std: f64,
}

impl LinearFit {
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// A fitted degree-2 polynomial: c0 + c1*x + c2*x^2.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticFit {
    pub coefficients: [f64; 3],
    pub r_squared: f64,
    pub residual_std: f64,
}

impl QuadraticFit {
    #[inline]
    pub fn predict(&self, x: f64) -> f64 {
        let [c0, c1, c2] = self.coefficients;
        c0 + c1 * x + c2 * x * x
    }
}

/// Least-squares regression over (x, y) pairs.
pub struct Regression;

impl Regression {
    /// Ordinary least squares line. Requires at least 2 points.
    pub fn linear(x: &[f64], y: &[f64]) -> Option<LinearFit> {
        if x.len() != y.len() || x.len() < 2 {
            return None;
        }

        let n = x.len() as f64;
        let sum_x: f64 = x.iter().sum();
        let sum_y: f64 = y.iter().sum();
        let sum_xy: f64 = x.iter().zip(y.iter()).map(|(xi, yi)| xi * yi).sum();
        let sum_xx: f64 = x.iter().map(|xi| xi * xi).sum();

        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < f64::EPSILON {
            return None;
        }

        let slope = (n * sum_xy - sum_x * sum_y) / denom;
        let intercept = (sum_y - slope * sum_x) / n;

        let (r_squared, residual_std) =
            Self::fit_quality(y, |i| slope * x[i] + intercept);

        Some(LinearFit {
            slope,
            intercept,
            r_squared,
            residual_std,
        })
    }

    /// Least-squares degree-2 polynomial via the 3x3 normal equations.
    /// Requires at least 3 points.
    pub fn quadratic(x: &[f64], y: &[f64]) -> Option<QuadraticFit> {
        if x.len() != y.len() || x.len() < 3 {
            return None;
        }

        let n = x.len() as f64;
        let s1: f64 = x.iter().sum();
        let s2: f64 = x.iter().map(|v| v.powi(2)).sum();
        let s3: f64 = x.iter().map(|v| v.powi(3)).sum();
        let s4: f64 = x.iter().map(|v| v.powi(4)).sum();
        let ty: f64 = y.iter().sum();
        let txy: f64 = x.iter().zip(y.iter()).map(|(xi, yi)| xi * yi).sum();
        let txxy: f64 = x.iter().zip(y.iter()).map(|(xi, yi)| xi * xi * yi).sum();

        let mut matrix = [
            [n, s1, s2, ty],
            [s1, s2, s3, txy],
            [s2, s3, s4, txxy],
        ];

        let coefficients = Self::solve_3x3(&mut matrix)?;
        let (r_squared, residual_std) = Self::fit_quality(y, |i| {
            coefficients[0] + coefficients[1] * x[i] + coefficients[2] * x[i] * x[i]
        });

        Some(QuadraticFit {
            coefficients,
            r_squared,
            residual_std,
        })
    }

    /// Gaussian elimination with partial pivoting on an augmented 3x4 matrix.
    fn solve_3x3(m: &mut [[f64; 4]; 3]) -> Option<[f64; 3]> {
        for col in 0..3 {
            let pivot_row = (col..3)
                .max_by(|&a, &b| {
                    m[a][col]
                        .abs()
                        .partial_cmp(&m[b][col].abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })?;
            if m[pivot_row][col].abs() < 1e-12 {
                return None;
            }
            m.swap(col, pivot_row);

            for row in (col + 1)..3 {
                let factor = m[row][col] / m[col][col];
                for k in col..4 {
                    m[row][k] -= factor * m[col][k];
                }
            }
        }

        let mut out = [0.0; 3];
        for row in (0..3).rev() {
            let mut acc = m[row][3];
            for k in (row + 1)..3 {
                acc -= m[row][k] * out[k];
            }
            out[row] = acc / m[row][row];
        }
        Some(out)
    }

    /// R-squared and residual standard deviation for a fitted predictor.
    fn fit_quality<F: Fn(usize) -> f64>(y: &[f64], predict: F) -> (f64, f64) {
        let n = y.len() as f64;
        let mean_y = SeriesStats::mean(y);
        let ss_tot: f64 = y.iter().map(|yi| (yi - mean_y).powi(2)).sum();
        let ss_res: f64 = y
            .iter()
            .enumerate()
            .map(|(i, yi)| (yi - predict(i)).powi(2))
            .sum();

        let r_squared = if ss_tot.abs() < f64::EPSILON {
            1.0
        } else {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        };
        let residual_std = (ss_res / n).sqrt();
        (r_squared, residual_std)
    }
}

/// Index sequence 0, 1, 2, ... as f64 for regression against positions.
pub fn index_axis(len: usize) -> Vec<f64> {
    (0..len).map(|i| i as f64).collect()
}

// ----------------------------------------------------------------------------
// Summaries & Aggregate Functions
// ----------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::constants::PERCENTILE_LEVEL;

/// Five-number summary of one value group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
}

impl SummaryStats {
    /// Summarize a non-empty slice. Empty input yields the zero summary.
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::empty();
        }
        let sum: f64 = values.iter().sum();
        let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        Self {
            count: values.len(),
            min,
            max,
            sum,
            avg: sum / values.len() as f64,
        }
    }

    pub fn empty() -> Self {
        Self {
            count: 0,
            min: 0.0,
            max: 0.0,
            sum: 0.0,
            avg: 0.0,
        }
    }
}

/// The statistic a rule or grouped query reduces each group to.
///
/// Percentile is fixed at p95; the rule format deliberately has no
/// configurable level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Percentile,
}

impl AggregateFunction {
    /// Reduce a group of raw values to the function's representative value.
    pub fn apply(&self, values: &[f64]) -> f64 {
        match self {
            AggregateFunction::Sum => values.iter().sum(),
            AggregateFunction::Avg => SeriesStats::mean(values),
            AggregateFunction::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggregateFunction::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggregateFunction::Count => values.len() as f64,
            AggregateFunction::Percentile => SeriesStats::percentile(values, PERCENTILE_LEVEL),
        }
    }

    /// Representative value when a five-number summary is already at hand.
    /// Percentile still needs the raw group.
    pub fn from_summary(&self, summary: &SummaryStats, values: &[f64]) -> f64 {
        match self {
            AggregateFunction::Sum => summary.sum,
            AggregateFunction::Avg => summary.avg,
            AggregateFunction::Min => summary.min,
            AggregateFunction::Max => summary.max,
            AggregateFunction::Count => summary.count as f64,
            AggregateFunction::Percentile => SeriesStats::percentile(values, PERCENTILE_LEVEL),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
            AggregateFunction::Count => "count",
            AggregateFunction::Percentile => "percentile",
        }
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptive_stats() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((SeriesStats::mean(&values) - 3.0).abs() < 1e-9);
        assert!((SeriesStats::variance(&values) - 2.5).abs() < 1e-9);
        assert!((SeriesStats::std_dev(&values) - 1.5811).abs() < 1e-3);
        assert!((SeriesStats::percentile(&values, 0.5) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn degenerate_inputs_produce_zero() {
        assert_eq!(SeriesStats::mean(&[]), 0.0);
        assert_eq!(SeriesStats::variance(&[1.0]), 0.0);
        assert_eq!(SeriesStats::correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(SeriesStats::percentile(&[], 0.95), 0.0);
    }

    #[test]
    fn correlation_of_identical_series_is_one() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((SeriesStats::correlation(&x, &x) - 1.0).abs() < 1e-9);

        let inverted: Vec<f64> = x.iter().map(|v| -v).collect();
        assert!((SeriesStats::correlation(&x, &inverted) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn linear_fit_recovers_line() {
        let x = index_axis(10);
        let y: Vec<f64> = x.iter().map(|xi| 2.0 * xi + 1.0).collect();

        let fit = Regression::linear(&x, &y).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 1.0).abs() < 1e-9);
        assert!(fit.r_squared > 0.999);
        assert!(fit.residual_std < 1e-9);
    }

    #[test]
    fn quadratic_fit_recovers_parabola() {
        let x = index_axis(12);
        let y: Vec<f64> = x.iter().map(|xi| 3.0 + 0.5 * xi + 0.25 * xi * xi).collect();

        let fit = Regression::quadratic(&x, &y).unwrap();
        assert!((fit.coefficients[0] - 3.0).abs() < 1e-6);
        assert!((fit.coefficients[1] - 0.5).abs() < 1e-6);
        assert!((fit.coefficients[2] - 0.25).abs() < 1e-6);
        assert!(fit.r_squared > 0.999);
    }

    #[test]
    fn quadratic_fit_rejects_degenerate_input() {
        assert!(Regression::quadratic(&[1.0, 1.0, 1.0], &[2.0, 2.0, 2.0]).is_none());
        assert!(Regression::linear(&[1.0], &[2.0]).is_none());
    }

    #[test]
    fn summary_stats_describe_the_group() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let summary = SummaryStats::from_values(&values);

        assert_eq!(summary.count, 5);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(summary.sum, 15.0);
        assert!((summary.avg - 3.0).abs() < 1e-9);
    }

    #[rstest::rstest]
    #[case(AggregateFunction::Sum, 15.0)]
    #[case(AggregateFunction::Avg, 3.0)]
    #[case(AggregateFunction::Min, 1.0)]
    #[case(AggregateFunction::Max, 5.0)]
    #[case(AggregateFunction::Count, 5.0)]
    fn aggregate_functions_reduce(#[case] function: AggregateFunction, #[case] expected: f64) {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(function.apply(&values), expected);
        assert_eq!(
            function.from_summary(&SummaryStats::from_values(&values), &values),
            expected
        );
    }

    #[test]
    fn percentile_function_uses_p95() {
        let values: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        let p95 = AggregateFunction::Percentile.apply(&values);
        assert!((p95 - 95.0).abs() <= 1.0);
    }
}
