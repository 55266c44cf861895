use std::fs;
use std::path::Path;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::math::cast_constant;
use crate::{Error, Result, Value};

/// How the rejection bound of the sigma test is estimated each iteration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigmaTest {
    /// Mean squared calibrated distance over every collocation, in a dedicated pass.
    #[default]
    MeanSquaredDistance,
    /// Variance of the signed calibrated differences over the collocations accepted in the
    /// previous iteration.
    ResidualVariance,
}

/// Settings for a triple collocation run
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config<E> {
    /// Number of standard deviations a calibrated distance may span before a collocation is
    /// rejected.
    pub f_sigma: E,
    pub max_iterations: usize,
    /// Variance shared by systems 0 and 1 but not by the reference system 2.
    pub representativeness_error: E,
    /// Largest calibration increment still counted as converged.
    pub precision: E,
    /// Amount of diagnostic output. Has no effect on the computation.
    pub verbosity: u8,
    pub sigma_test: SigmaTest,
    /// Skip unparseable input lines with a warning instead of aborting.
    pub skip_malformed: bool,
}

impl<E: Value> Default for Config<E> {
    fn default() -> Self {
        Self {
            f_sigma: cast_constant(4.0),
            max_iterations: 20,
            representativeness_error: E::zero(),
            precision: cast_constant(1e-5),
            verbosity: 1,
            sigma_test: SigmaTest::default(),
            skip_malformed: false,
        }
    }
}

impl<E: Value> Config<E> {
    /// Check every setting lies in its admissible range
    ///
    /// # Errors
    /// Returns [`Error::InvalidParameter`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        if !(self.f_sigma.is_finite() && self.f_sigma > E::zero()) {
            return Err(Error::InvalidParameter {
                name: "f_sigma",
                reason: "must be a finite number greater than zero",
            });
        }
        if self.max_iterations == 0 {
            return Err(Error::InvalidParameter {
                name: "max_iterations",
                reason: "must be at least one",
            });
        }
        if !(self.representativeness_error.is_finite()
            && self.representativeness_error >= E::zero())
        {
            return Err(Error::InvalidParameter {
                name: "representativeness_error",
                reason: "must be a finite, non-negative variance",
            });
        }
        if !(self.precision.is_finite() && self.precision > E::zero()) {
            return Err(Error::InvalidParameter {
                name: "precision",
                reason: "must be a finite number greater than zero",
            });
        }
        Ok(())
    }
}

impl<E: Value + DeserializeOwned> Config<E> {
    /// Read settings from a TOML file, missing keys keep their defaults
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not valid TOML, or holds settings outside
    /// their admissible range.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}
