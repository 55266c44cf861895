use ndarray::{Array1, Array2};
use tracing::trace;

use crate::calibration::CalibrationState;
use crate::collocation::{Collocation, CollocationSource};
use crate::math::update_mean;
use crate::threshold::RejectionThreshold;
use crate::{Error, Result, Value, SYSTEMS};

/// Statistics of the calibrated collocations which passed the sigma test in one pass
#[derive(Clone, Debug, PartialEq)]
pub struct MomentSet<E> {
    /// First-order moments `M1[i]`, the mean of each calibrated system
    first: Array1<E>,
    /// Second-order moments `M2[i][j]`, the mean of each pairwise product
    second: Array2<E>,
    /// Mean of the signed calibrated differences `t_i - t_j`
    difference_first: Array2<E>,
    /// Mean of the squared calibrated differences
    difference_second: Array2<E>,
    accepted: usize,
    rejected: usize,
}

impl<E: Value> MomentSet<E> {
    fn empty() -> Self {
        Self {
            first: Array1::zeros(SYSTEMS),
            second: Array2::zeros((SYSTEMS, SYSTEMS)),
            difference_first: Array2::zeros((SYSTEMS, SYSTEMS)),
            difference_second: Array2::zeros((SYSTEMS, SYSTEMS)),
            accepted: 0,
            rejected: 0,
        }
    }

    /// Fold one accepted calibrated collocation into the running means.
    fn add(&mut self, calibrated: &[E; SYSTEMS]) {
        self.accepted += 1;
        let n = self.accepted;
        for ii in 0..SYSTEMS {
            self.first[ii] = update_mean(self.first[ii], calibrated[ii], n);
            for jj in 0..SYSTEMS {
                self.second[[ii, jj]] =
                    update_mean(self.second[[ii, jj]], calibrated[ii] * calibrated[jj], n);
                let difference = calibrated[ii] - calibrated[jj];
                self.difference_first[[ii, jj]] =
                    update_mean(self.difference_first[[ii, jj]], difference, n);
                self.difference_second[[ii, jj]] =
                    update_mean(self.difference_second[[ii, jj]], difference * difference, n);
            }
        }
    }

    /// Calibrate every collocation in `source`, apply the sigma test and accumulate the moments
    /// of those accepted
    ///
    /// # Errors
    /// - [`Error::ZeroScale`] if the calibration cannot be inverted
    /// - [`Error::InsufficientCollocations`] if fewer than two collocations pass the sigma test,
    ///   in which case the covariances are undetermined
    /// - any error raised while reading `source`
    pub fn accumulate<S>(
        source: &S,
        calibration: &CalibrationState<E>,
        threshold: &RejectionThreshold<E>,
    ) -> Result<Self>
    where
        S: CollocationSource<E> + ?Sized,
    {
        calibration.validate()?;

        let mut moments = Self::empty();
        source.visit(|collocation: &Collocation<E>| {
            let calibrated = calibration.apply(collocation);
            if threshold.accepts(&calibrated) {
                moments.add(&calibrated);
            } else {
                moments.rejected += 1;
            }
        })?;

        if moments.accepted < 2 {
            return Err(Error::InsufficientCollocations {
                accepted: moments.accepted,
                rejected: moments.rejected,
            });
        }

        trace!(
            accepted = moments.accepted,
            rejected = moments.rejected,
            first = ?moments.first,
            second = ?moments.second,
            "accumulated moments"
        );
        Ok(moments)
    }

    pub const fn first(&self) -> &Array1<E> {
        &self.first
    }

    pub const fn second(&self) -> &Array2<E> {
        &self.second
    }

    pub const fn difference_first(&self) -> &Array2<E> {
        &self.difference_first
    }

    pub const fn difference_second(&self) -> &Array2<E> {
        &self.difference_second
    }

    pub const fn accepted(&self) -> usize {
        self.accepted
    }

    pub const fn rejected(&self) -> usize {
        self.rejected
    }
}
