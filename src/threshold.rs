use itertools::Itertools;
use ndarray::Array2;
use tracing::trace;

use crate::calibration::CalibrationState;
use crate::collocation::{Collocation, CollocationSource};
use crate::config::SigmaTest;
use crate::math::{cast_constant, update_mean};
use crate::moments::MomentSet;
use crate::{Result, Value, SYSTEMS};

/// Residual variance assumed for every pair before any collocation has been accepted.
const INITIAL_RESIDUAL_VARIANCE: f64 = 9.0;

/// Pairwise bound on the squared calibrated distance used by the sigma test
///
/// Element `[i, j]` is the largest admissible `(t_i - t_j)^2` for systems `i` and `j`. The matrix
/// is symmetric and its diagonal is not used.
#[derive(Clone, Debug, PartialEq)]
pub struct RejectionThreshold<E> {
    bound: Array2<E>,
}

impl<E: Value> RejectionThreshold<E> {
    fn from_spread(spread: &Array2<E>, f_sigma: E) -> Self {
        let mut bound = Array2::zeros((SYSTEMS, SYSTEMS));
        for (ii, jj) in (0..SYSTEMS).tuple_combinations() {
            let value = f_sigma * f_sigma * spread[[ii, jj]];
            bound[[ii, jj]] = value;
            bound[[jj, ii]] = value;
        }
        Self { bound }
    }

    /// Bound used for the first iteration of the residual variance test
    pub fn initial(f_sigma: E) -> Self {
        let spread = Array2::from_elem(
            (SYSTEMS, SYSTEMS),
            cast_constant::<E>(INITIAL_RESIDUAL_VARIANCE),
        );
        Self::from_spread(&spread, f_sigma)
    }

    /// Scale the mean squared calibrated distance of each pair, taken over every collocation in
    /// `source`, by `f_sigma^2`
    ///
    /// No collocation is excluded from the mean, so this needs its own pass over `source`.
    ///
    /// # Errors
    /// Returns an error if the calibration has a zero scaling or `source` cannot be read.
    pub fn from_mean_squared_distance<S>(
        source: &S,
        calibration: &CalibrationState<E>,
        f_sigma: E,
    ) -> Result<Self>
    where
        S: CollocationSource<E> + ?Sized,
    {
        calibration.validate()?;

        let mut mean_distance2: Array2<E> = Array2::zeros((SYSTEMS, SYSTEMS));
        let mut n = 0;
        source.visit(|collocation: &Collocation<E>| {
            let calibrated = calibration.apply(collocation);
            n += 1;
            for (ii, jj) in (0..SYSTEMS).tuple_combinations() {
                let distance = calibrated[ii] - calibrated[jj];
                mean_distance2[[ii, jj]] =
                    update_mean(mean_distance2[[ii, jj]], distance * distance, n);
            }
        })?;

        let threshold = Self::from_spread(&mean_distance2, f_sigma);
        trace!(collocations = n, bound = ?threshold.bound, "sigma test bound from mean squared distance");
        Ok(threshold)
    }

    /// Scale the variance of the signed calibrated differences of the collocations accepted into
    /// `moments` by `f_sigma^2`
    ///
    /// Variances which round to below zero are clamped to zero.
    pub fn from_residual_variance(moments: &MomentSet<E>, f_sigma: E) -> Self {
        let first = moments.difference_first();
        let second = moments.difference_second();
        let variance = (second - &first.mapv(|d| d * d)).mapv(|v| v.max(E::zero()));

        let threshold = Self::from_spread(&variance, f_sigma);
        trace!(bound = ?threshold.bound, "sigma test bound from residual variance");
        threshold
    }

    /// The bound on the squared distance between systems `ii` and `jj`
    pub fn bound(&self, ii: usize, jj: usize) -> E {
        self.bound[[ii, jj]]
    }

    /// A calibrated collocation passes the sigma test when every pair lies within its bound
    pub fn accepts(&self, calibrated: &[E; SYSTEMS]) -> bool {
        (0..SYSTEMS).tuple_combinations().all(|(ii, jj)| {
            let distance = calibrated[ii] - calibrated[jj];
            distance * distance <= self.bound[[ii, jj]]
        })
    }
}

/// Produces the sigma test bound for each iteration according to the configured [`SigmaTest`]
///
/// The residual variance test derives the next bound from the moments of the current iteration,
/// which are handed over through [`ThresholdEstimator::observe`].
#[derive(Clone, Debug)]
pub struct ThresholdEstimator<E> {
    sigma_test: SigmaTest,
    f_sigma: E,
    carried: RejectionThreshold<E>,
}

impl<E: Value> ThresholdEstimator<E> {
    pub fn new(sigma_test: SigmaTest, f_sigma: E) -> Self {
        Self {
            sigma_test,
            f_sigma,
            carried: RejectionThreshold::initial(f_sigma),
        }
    }

    /// Bound to apply in the coming accumulation pass
    ///
    /// # Errors
    /// Returns an error if the estimate needs a pass over `source` and that pass fails.
    pub fn estimate<S>(
        &self,
        source: &S,
        calibration: &CalibrationState<E>,
    ) -> Result<RejectionThreshold<E>>
    where
        S: CollocationSource<E> + ?Sized,
    {
        match self.sigma_test {
            SigmaTest::MeanSquaredDistance => {
                RejectionThreshold::from_mean_squared_distance(source, calibration, self.f_sigma)
            }
            SigmaTest::ResidualVariance => Ok(self.carried.clone()),
        }
    }

    /// Record the moments accumulated under the latest bound
    pub fn observe(&mut self, moments: &MomentSet<E>) {
        if self.sigma_test == SigmaTest::ResidualVariance {
            self.carried = RejectionThreshold::from_residual_variance(moments, self.f_sigma);
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use rand_isaac::Isaac64Rng;

    use super::{RejectionThreshold, ThresholdEstimator};
    use crate::calibration::CalibrationState;
    use crate::collocation::Collocation;
    use crate::config::SigmaTest;
    use crate::moments::MomentSet;
    use crate::{Result, SYSTEMS};

    #[test]
    fn initial_bound_is_nine_variances() {
        let threshold: RejectionThreshold<f64> = RejectionThreshold::initial(4.0);
        for (ii, jj) in (0..SYSTEMS).tuple_combinations() {
            approx::assert_relative_eq!(threshold.bound(ii, jj), 144.0);
            approx::assert_relative_eq!(threshold.bound(jj, ii), 144.0);
        }
    }

    #[test]
    fn mean_squared_distance_bound_matches_direct_computation() -> Result<()> {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let collocations = (0..500)
            .map(|_| {
                Collocation([
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                ])
            })
            .collect::<Vec<Collocation<f64>>>();
        let calibration = CalibrationState::new([1.0, 1.5, 0.5], [0.0, 0.2, -0.1])?;
        let f_sigma = 3.0;

        let threshold =
            RejectionThreshold::from_mean_squared_distance(&collocations, &calibration, f_sigma)?;

        for (ii, jj) in (0..SYSTEMS).tuple_combinations() {
            let mean = collocations
                .iter()
                .map(|collocation| {
                    let calibrated = calibration.apply(collocation);
                    (calibrated[ii] - calibrated[jj]).powi(2)
                })
                .sum::<f64>()
                / 500.0;
            approx::assert_relative_eq!(
                threshold.bound(ii, jj),
                f_sigma * f_sigma * mean,
                max_relative = 1e-10
            );
            approx::assert_relative_eq!(threshold.bound(ii, jj), threshold.bound(jj, ii));
        }
        Ok(())
    }

    #[test]
    fn collocations_outside_any_pair_bound_are_rejected() {
        let threshold: RejectionThreshold<f64> = RejectionThreshold::initial(1.0);
        // Every pair may differ by up to 3
        assert!(threshold.accepts(&[0.0, 3.0, 1.5]));
        assert!(!threshold.accepts(&[0.0, 3.1, 1.5]));
        assert!(!threshold.accepts(&[0.0, 1.0, -3.5]));
    }

    #[test]
    fn residual_variance_bound_follows_accepted_differences() -> Result<()> {
        let collocations = vec![
            Collocation([0.0, 0.5, 0.0]),
            Collocation([1.0, 0.5, 1.0]),
            Collocation([2.0, 2.5, 2.0]),
            Collocation([3.0, 2.5, 3.0]),
        ];
        let calibration = CalibrationState::default();
        let mut estimator = ThresholdEstimator::new(SigmaTest::ResidualVariance, 2.0);

        let first = estimator.estimate(&collocations, &calibration)?;
        assert_eq!(first, RejectionThreshold::initial(2.0));

        let moments = MomentSet::accumulate(&collocations, &calibration, &first)?;
        estimator.observe(&moments);
        let second = estimator.estimate(&collocations, &calibration)?;

        // x0 - x1 alternates between -0.5 and +0.5, x0 - x2 is always zero
        approx::assert_relative_eq!(second.bound(0, 1), 4.0 * 0.25, max_relative = 1e-12);
        approx::assert_relative_eq!(second.bound(1, 2), 4.0 * 0.25, max_relative = 1e-12);
        approx::assert_abs_diff_eq!(second.bound(0, 2), 0.0);
        Ok(())
    }

    #[test]
    fn mean_squared_distance_estimator_ignores_observed_moments() -> Result<()> {
        let collocations = vec![
            Collocation([0.0, 1.0, 0.0]),
            Collocation([1.0, 2.0, 1.0]),
            Collocation([2.0, 3.0, 2.0]),
        ];
        let calibration = CalibrationState::default();
        let mut estimator = ThresholdEstimator::new(SigmaTest::MeanSquaredDistance, 4.0);

        let before = estimator.estimate(&collocations, &calibration)?;
        let moments = MomentSet::accumulate(&collocations, &calibration, &before)?;
        estimator.observe(&moments);
        let after = estimator.estimate(&collocations, &calibration)?;

        assert_eq!(before, after);
        approx::assert_relative_eq!(before.bound(0, 1), 16.0);
        Ok(())
    }
}
