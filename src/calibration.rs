use ndarray::Array1;

use crate::collocation::Collocation;
use crate::{Error, Result, Value, SYSTEMS};

/// Affine calibration of the three systems
///
/// A raw measurement `x` of system `i` is mapped to its estimate of the true quantity through
/// $$
///     t = \frac{x - b_i}{a_i}
/// $$
/// System 0 anchors the calibration, so `a[0] = 1` and `b[0] = 0` always.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationState<E> {
    /// Calibration scalings `a`
    scale: Array1<E>,
    /// Calibration biases `b`
    bias: Array1<E>,
}

impl<E: Value> Default for CalibrationState<E> {
    fn default() -> Self {
        Self {
            scale: Array1::ones(SYSTEMS),
            bias: Array1::zeros(SYSTEMS),
        }
    }
}

impl<E: Value> CalibrationState<E> {
    /// Build a calibration from explicit scalings and biases of the three systems
    ///
    /// # Errors
    /// Returns [`Error::ZeroScale`] if any scaling is zero.
    pub fn new(scale: [E; SYSTEMS], bias: [E; SYSTEMS]) -> Result<Self> {
        let state = Self {
            scale: Array1::from(scale.to_vec()),
            bias: Array1::from(bias.to_vec()),
        };
        state.validate()?;
        Ok(state)
    }

    pub const fn scale(&self) -> &Array1<E> {
        &self.scale
    }

    pub const fn bias(&self) -> &Array1<E> {
        &self.bias
    }

    /// Every scaling must be non-zero before the calibration can be inverted.
    ///
    /// # Errors
    /// Returns [`Error::ZeroScale`] for the first system with a zero scaling.
    pub fn validate(&self) -> Result<()> {
        match self.scale.iter().position(|a| a.is_zero()) {
            Some(system) => Err(Error::ZeroScale { system }),
            None => Ok(()),
        }
    }

    /// Apply the inverse calibration to a raw collocation
    ///
    /// The error model is `x = a t + b + delta`, so the calibrated estimate of `t` is
    /// `(x - b) / a`. Callers are expected to have run [`Self::validate`].
    pub fn apply(&self, collocation: &Collocation<E>) -> [E; SYSTEMS] {
        let mut calibrated = [E::zero(); SYSTEMS];
        for (ii, value) in calibrated.iter_mut().enumerate() {
            *value = (collocation.0[ii] - self.bias[ii]) / self.scale[ii];
        }
        calibrated
    }

    /// Compose the current calibration with multiplicative scaling increments `da` and additive
    /// bias increments `db`
    ///
    /// The anchor system 0 is reset to `a = 1`, `b = 0` whatever the increments hold.
    pub(crate) fn advance(&self, da: &Array1<E>, db: &Array1<E>) -> Self {
        let mut scale = &self.scale * da;
        let mut bias = &self.bias + db;
        scale[0] = E::one();
        bias[0] = E::zero();
        Self { scale, bias }
    }
}
