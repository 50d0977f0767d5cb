use serde::{Deserialize, Serialize};

use crate::utility::Utility;

/// Minimal sigma (in pixels) of robust estimators, avoids degenerate weights for perfect data.
const MINIMAL_SIGMA: f64 = 1.0;

/// Robust estimator applied to squared residuals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorType {
    /// Plain least squares, every residual has the same weight.
    Square,
    /// L1 norm.
    Linear,
    #[default]
    Huber,
    Tukey,
    Cauchy,
}

impl EstimatorType {
    /// Whether the estimator down-weights large residuals.
    pub fn is_robust(self) -> bool {
        !matches!(self, EstimatorType::Square)
    }

    fn tuning_constant(self) -> f64 {
        match self {
            EstimatorType::Square | EstimatorType::Linear => 1.0,
            EstimatorType::Huber => 1.345,
            EstimatorType::Tukey => 4.6851,
            EstimatorType::Cauchy => 2.3849,
        }
    }

    /// Scale of the residuals, derived from the median of the squared residuals.
    pub fn determine_sigma(self, sqr_errors: &[f64]) -> f64 {
        if !self.is_robust() {
            return 1.0;
        }
        let mut values = sqr_errors.to_vec();
        let median = Utility::median(&mut values).unwrap_or(0.0);
        (1.4826 * median.sqrt()).max(MINIMAL_SIGMA)
    }

    /// IRLS weight of a residual.
    pub fn robust_weight(self, sqr_error: f64, sigma: f64) -> f64 {
        let error = sqr_error.sqrt();
        let c = self.tuning_constant() * sigma;
        match self {
            EstimatorType::Square => 1.0,
            EstimatorType::Linear => 1.0 / error.max(1e-6),
            EstimatorType::Huber => {
                if error <= c {
                    1.0
                } else {
                    c / error
                }
            }
            EstimatorType::Tukey => {
                if error <= c {
                    let t = 1.0 - sqr_error / (c * c);
                    t * t
                } else {
                    0.0
                }
            }
            EstimatorType::Cauchy => 1.0 / (1.0 + sqr_error / (c * c)),
        }
    }

    /// Robust error (rho) of a residual, equals the squared error for small residuals.
    pub fn robust_error(self, sqr_error: f64, sigma: f64) -> f64 {
        let error = sqr_error.sqrt();
        let c = self.tuning_constant() * sigma;
        match self {
            EstimatorType::Square => sqr_error,
            EstimatorType::Linear => 2.0 * error,
            EstimatorType::Huber => {
                if error <= c {
                    sqr_error
                } else {
                    c * (2.0 * error - c)
                }
            }
            EstimatorType::Tukey => {
                let c2 = c * c;
                if error <= c {
                    let t = 1.0 - sqr_error / c2;
                    c2 / 3.0 * (1.0 - t * t * t)
                } else {
                    c2 / 3.0
                }
            }
            EstimatorType::Cauchy => {
                let c2 = c * c;
                c2 * (1.0 + sqr_error / c2).ln()
            }
        }
    }
}
