use ndarray::{Array1, Array2};
use tracing::{debug, trace};

use crate::calibration::CalibrationState;
use crate::math::outer_product;
use crate::moments::MomentSet;
use crate::{Error, Result, Value, SYSTEMS};

/// Covariances of the calibrated systems, corrected for representativeness
#[derive(Clone, Debug, PartialEq)]
pub struct Covariance<E> {
    matrix: Array2<E>,
}

impl<E: Value> Covariance<E> {
    /// Form `C = M2 - M1 M1^T` and remove the representativeness error variance
    ///
    /// Systems 0 and 1 are assumed to share a measurement footprint which the reference system 2
    /// does not resolve. The variance this adds is subtracted from `C[0][0]`, `C[0][1]`,
    /// `C[1][0]` and `C[1][1]`; a zero `representativeness_error` leaves `C` untouched.
    ///
    /// # Errors
    /// Returns an error if the moment vectors have an unexpected shape.
    pub fn from_moments(moments: &MomentSet<E>, representativeness_error: E) -> Result<Self> {
        let first = moments.first();
        let mut matrix = moments.second() - &outer_product(first, first)?;
        for ii in 0..2 {
            for jj in 0..2 {
                matrix[[ii, jj]] -= representativeness_error;
            }
        }
        Ok(Self { matrix })
    }

    pub const fn matrix(&self) -> &Array2<E> {
        &self.matrix
    }

    /// Fetch an entry used as a denominator, which must be finite and non-zero.
    fn denominator(&self, row: usize, column: usize) -> Result<E> {
        let value = self.matrix[[row, column]];
        if !value.is_finite() {
            return Err(Error::NonFinite {
                quantity: "covariance",
            });
        }
        if value.is_zero() {
            return Err(Error::DegenerateCovariance { row, column });
        }
        Ok(value)
    }
}

/// Result of solving the triple collocation covariance equations once
#[derive(Clone, Debug, PartialEq)]
pub struct Solution<E> {
    /// Calibration after applying this step's increments
    pub calibration: CalibrationState<E>,
    pub covariance: Covariance<E>,
    /// Multiplicative scaling increments `da`, `da[0] = 1`
    pub scale_increment: Array1<E>,
    /// Additive bias increments `db`, `db[0] = 0`
    pub bias_increment: Array1<E>,
    /// Random error variance of each system, in the units of the calibrated reference
    pub error_variance: Array1<E>,
    /// Common variance `t2` of the true quantity
    pub common_variance: E,
    /// Whether every increment of systems 1 and 2 lies within the requested precision
    pub converged: bool,
}

impl<E: Value> Solution<E> {
    /// Solve the covariance equations and compose the increments with `calibration`
    ///
    /// With `C` the corrected covariance and `M1` the first moments the step computes
    /// $$
    ///     t^2 = \frac{C_{10} C_{20}}{C_{21}}, \quad
    ///     \delta a_1 = \frac{C_{21}}{C_{20}}, \quad
    ///     \delta a_2 = \frac{C_{21}}{C_{10}}, \quad
    ///     \delta b_i = M_{1,i} - \delta a_i M_{1,0}
    /// $$
    /// and error variances from the cross-covariance ratios
    /// $$
    ///     \sigma_0^2 = C_{00} - \frac{C_{10} C_{20}}{C_{21}}, \quad
    ///     \sigma_1^2 = C_{11} - \frac{C_{10} C_{21}}{C_{20}}, \quad
    ///     \sigma_2^2 = C_{22} - \frac{C_{20} C_{21}}{C_{10}}.
    /// $$
    ///
    /// # Errors
    /// - [`Error::DegenerateCovariance`] if `C[2][0]`, `C[2][1]` or `C[1][0]` vanishes
    /// - [`Error::NonFinite`] if any estimate overflows or is not a number
    pub fn solve(
        moments: &MomentSet<E>,
        calibration: &CalibrationState<E>,
        representativeness_error: E,
        precision: E,
    ) -> Result<Self> {
        let covariance = Covariance::from_moments(moments, representativeness_error)?;
        trace!(covariance = ?covariance.matrix, "covariance matrix");

        let c20 = covariance.denominator(2, 0)?;
        let c21 = covariance.denominator(2, 1)?;
        let c10 = covariance.denominator(1, 0)?;
        let c = covariance.matrix();
        let m1 = moments.first();

        let common_variance = c10 * c20 / c21;

        let mut scale_increment: Array1<E> = Array1::ones(SYSTEMS);
        scale_increment[1] = c21 / c20;
        scale_increment[2] = c21 / c10;

        let mut bias_increment: Array1<E> = Array1::zeros(SYSTEMS);
        for ii in 1..SYSTEMS {
            bias_increment[ii] = m1[ii] - scale_increment[ii] * m1[0];
        }

        let mut error_variance: Array1<E> = Array1::zeros(SYSTEMS);
        error_variance[0] = c[[0, 0]] - c10 * c20 / c21;
        error_variance[1] = c[[1, 1]] - c10 * c21 / c20;
        error_variance[2] = c[[2, 2]] - c20 * c21 / c10;

        if !common_variance.is_finite() {
            return Err(Error::NonFinite {
                quantity: "common variance",
            });
        }
        if !scale_increment.iter().all(|v: &E| v.is_finite()) {
            return Err(Error::NonFinite {
                quantity: "scaling increment",
            });
        }
        if !bias_increment.iter().all(|v: &E| v.is_finite()) {
            return Err(Error::NonFinite {
                quantity: "bias increment",
            });
        }
        if !error_variance.iter().all(|v: &E| v.is_finite()) {
            return Err(Error::NonFinite {
                quantity: "error variance",
            });
        }

        let converged = (1..SYSTEMS).all(|ii| {
            (scale_increment[ii] - E::one()).abs() <= precision
                && bias_increment[ii].abs() <= precision
        });

        debug!(
            scale_increment = ?scale_increment,
            bias_increment = ?bias_increment,
            converged,
            "solved covariance equations"
        );

        let calibration = calibration.advance(&scale_increment, &bias_increment);

        Ok(Self {
            calibration,
            covariance,
            scale_increment,
            bias_increment,
            error_variance,
            common_variance,
            converged,
        })
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array;
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_isaac::Isaac64Rng;

    use super::{Covariance, Solution};
    use crate::calibration::CalibrationState;
    use crate::collocation::Collocation;
    use crate::moments::MomentSet;
    use crate::threshold::RejectionThreshold;
    use crate::{Error, Result};

    fn exact_collocations(scale: [f64; 3], bias: [f64; 3]) -> Vec<Collocation<f64>> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        Array::random_using(500, Uniform::new(-1., 1.), &mut rng)
            .iter()
            .map(|t| {
                Collocation([
                    scale[0] * t + bias[0],
                    scale[1] * t + bias[1],
                    scale[2] * t + bias[2],
                ])
            })
            .collect()
    }

    fn accumulate(collocations: &[Collocation<f64>]) -> Result<MomentSet<f64>> {
        MomentSet::accumulate(
            collocations,
            &CalibrationState::default(),
            &RejectionThreshold::initial(4.0),
        )
    }

    #[test]
    fn noise_free_data_is_calibrated_in_one_step() -> Result<()> {
        let scale = [1.0, 1.2, 0.8];
        let bias = [0.0, 0.1, -0.2];
        let collocations = exact_collocations(scale, bias);
        let moments = accumulate(&collocations)?;

        let solution = Solution::solve(&moments, &CalibrationState::default(), 0.0, 1e-5)?;

        for ii in 0..3 {
            approx::assert_relative_eq!(solution.calibration.scale()[ii], scale[ii], max_relative = 1e-10);
            approx::assert_relative_eq!(
                solution.calibration.bias()[ii],
                bias[ii],
                epsilon = 1e-10
            );
            approx::assert_abs_diff_eq!(solution.error_variance[ii], 0.0, epsilon = 1e-10);
        }
        // The first step moves the calibration, so it cannot have converged yet
        assert!(!solution.converged);

        let t2 = solution.covariance.matrix()[[0, 0]];
        approx::assert_relative_eq!(solution.common_variance, t2, max_relative = 1e-10);
        Ok(())
    }

    #[test]
    fn calibrated_noise_free_data_has_converged() -> Result<()> {
        let scale = [1.0, 1.2, 0.8];
        let bias = [0.0, 0.1, -0.2];
        let collocations = exact_collocations(scale, bias);
        let calibration = CalibrationState::new(scale, bias)?;
        let moments = MomentSet::accumulate(
            &collocations,
            &calibration,
            &RejectionThreshold::initial(4.0),
        )?;

        let solution = Solution::solve(&moments, &calibration, 0.0, 1e-5)?;

        assert!(solution.converged);
        approx::assert_relative_eq!(solution.scale_increment[1], 1.0, max_relative = 1e-10);
        approx::assert_abs_diff_eq!(solution.bias_increment[2], 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn representativeness_error_is_removed_from_the_shared_block() -> Result<()> {
        let collocations = exact_collocations([1.0, 1.2, 0.8], [0.0, 0.1, -0.2]);
        let moments = accumulate(&collocations)?;

        let plain = Covariance::from_moments(&moments, 0.0)?;
        let corrected = Covariance::from_moments(&moments, 0.05)?;

        for ii in 0..3 {
            for jj in 0..3 {
                let expected = if ii < 2 && jj < 2 { 0.05 } else { 0.0 };
                approx::assert_abs_diff_eq!(
                    plain.matrix()[[ii, jj]] - corrected.matrix()[[ii, jj]],
                    expected,
                    epsilon = 1e-12
                );
            }
        }
        Ok(())
    }

    #[test]
    fn constant_reference_system_is_degenerate() -> Result<()> {
        let collocations = exact_collocations([1.0, 1.2, 0.0], [0.0, 0.1, 0.0]);
        let moments = accumulate(&collocations)?;

        let result = Solution::solve(&moments, &CalibrationState::default(), 0.0, 1e-5);

        assert!(matches!(
            result,
            Err(Error::DegenerateCovariance { row: 2, column: 0 })
        ));
        Ok(())
    }
}
