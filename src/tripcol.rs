use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::calibration::CalibrationState;
use crate::collocation::CollocationSource;
use crate::config::Config;
use crate::moments::MomentSet;
use crate::solver::Solution;
use crate::threshold::ThresholdEstimator;
use crate::{Result, Value};

/// How a completed run ended. Runs which abort return an [`Error`](crate::Error) instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The calibration increments fell within the precision
    Converged,
    /// The iteration limit was reached first. The estimates are those of the final iteration.
    Exhausted,
}

/// Summary of a single iteration
#[derive(Clone, Debug, PartialEq)]
pub struct IterationResult<E> {
    /// One-based iteration number
    pub iteration: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Calibration scalings after this iteration
    pub scale: Array1<E>,
    /// Calibration biases after this iteration
    pub bias: Array1<E>,
    pub error_variance: Array1<E>,
    pub common_variance: E,
    pub converged: bool,
}

impl<E: Value> IterationResult<E> {
    fn new(iteration: usize, moments: &MomentSet<E>, solution: &Solution<E>) -> Self {
        Self {
            iteration,
            accepted: moments.accepted(),
            rejected: moments.rejected(),
            scale: solution.calibration.scale().clone(),
            bias: solution.calibration.bias().clone(),
            error_variance: solution.error_variance.clone(),
            common_variance: solution.common_variance,
            converged: solution.converged,
        }
    }
}

/// Estimates of a completed triple collocation run
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome<E> {
    /// Final calibration, `t = (x - b) / a`
    pub calibration: CalibrationState<E>,
    /// Error variances on the calibrated scale of the reference system 0
    pub error_variance: Array1<E>,
    /// Common variance `t2` of the true quantity
    pub common_variance: E,
    /// Collocations accepted in the final iteration
    pub accepted: usize,
    /// Collocations rejected by the sigma test in the final iteration
    pub rejected: usize,
    pub converged: bool,
    /// Number of iterations carried out
    pub iterations: usize,
    pub history: Vec<IterationResult<E>>,
}

impl<E: Value> Outcome<E> {
    pub const fn termination(&self) -> Termination {
        if self.converged {
            Termination::Converged
        } else {
            Termination::Exhausted
        }
    }

    /// Error standard deviations
    ///
    /// Sampling noise can drive an estimated variance below zero, in which case the standard
    /// deviation is reported as zero.
    pub fn standard_deviations(&self) -> Array1<E> {
        self.error_variance
            .mapv(|variance| if variance > E::zero() { variance.sqrt() } else { E::zero() })
    }

    /// Error variances expressed in each system's own units
    ///
    /// [`Outcome::error_variance`] refers to the calibrated scale shared with system 0. Scaling
    /// by `a_i^2` gives the variance of the random error in the raw measurements of system `i`.
    pub fn system_error_variance(&self) -> Array1<E> {
        &self.error_variance * &self.calibration.scale().mapv(|a| a * a)
    }

    pub const fn total(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// Run triple collocation on `source`
///
/// Starting from the identity calibration each iteration estimates the sigma test bound,
/// accumulates the moments of the collocations which pass it and solves the covariance equations
/// for new calibration increments. The run stops as soon as the increments of systems 1 and 2
/// fall within `config.precision`, or after `config.max_iterations` iterations.
///
/// # Errors
/// - [`Error::InvalidParameter`](crate::Error::InvalidParameter) for settings out of range
/// - [`Error::InsufficientCollocations`](crate::Error::InsufficientCollocations) when fewer than
///   two collocations pass the sigma test in some iteration
/// - [`Error::DegenerateCovariance`](crate::Error::DegenerateCovariance) or
///   [`Error::NonFinite`](crate::Error::NonFinite) when the covariance equations cannot be
///   solved
/// - any error raised while reading `source`
pub fn run<E, S>(source: &S, config: &Config<E>) -> Result<Outcome<E>>
where
    E: Value,
    S: CollocationSource<E> + ?Sized,
{
    config.validate()?;
    info!(
        f_sigma = %config.f_sigma,
        max_iterations = config.max_iterations,
        precision = %config.precision,
        representativeness_error = %config.representativeness_error,
        sigma_test = ?config.sigma_test,
        "starting triple collocation"
    );

    let mut estimator = ThresholdEstimator::new(config.sigma_test, config.f_sigma);
    let mut calibration = CalibrationState::default();
    let mut history = Vec::with_capacity(config.max_iterations);
    let mut iteration = 0;

    let (moments, solution) = loop {
        iteration += 1;

        let threshold = estimator.estimate(source, &calibration)?;
        let moments = MomentSet::accumulate(source, &calibration, &threshold)?;
        estimator.observe(&moments);

        let solution = Solution::solve(
            &moments,
            &calibration,
            config.representativeness_error,
            config.precision,
        )?;
        calibration = solution.calibration.clone();

        debug!(
            iteration,
            accepted = moments.accepted(),
            rejected = moments.rejected(),
            scale = ?calibration.scale(),
            bias = ?calibration.bias(),
            error_variance = ?solution.error_variance,
            common_variance = %solution.common_variance,
            "iteration complete"
        );
        history.push(IterationResult::new(iteration, &moments, &solution));

        if solution.converged || iteration >= config.max_iterations {
            break (moments, solution);
        }
    };

    if solution.converged {
        info!(iteration, "triple collocation converged");
    } else {
        warn!(
            iterations = iteration,
            "triple collocation did not converge, reporting the last estimates"
        );
    }

    Ok(Outcome {
        calibration: solution.calibration,
        error_variance: solution.error_variance,
        common_variance: solution.common_variance,
        accepted: moments.accepted(),
        rejected: moments.rejected(),
        converged: solution.converged,
        iterations: iteration,
        history,
    })
}
