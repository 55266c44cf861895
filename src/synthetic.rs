//! Collocations drawn from a known linear error model
//!
//! Each system observes a common standard-normal truth `t` through
//! $$
//!     x_i = a_i t + b_i + \delta_i, \quad \delta_i \sim N(0, \sigma_i^2)
//! $$
//! which is the model triple collocation inverts. Useful for checking a run recovers `a`, `b` and
//! `sigma^2`.
use ndarray::Array1;
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::{Distribution, StandardNormal};
use ndarray_rand::RandomExt;
use rand_isaac::Isaac64Rng;

use crate::collocation::Collocation;
use crate::{Value, SYSTEMS};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearModel<E> {
    pub scale: [E; SYSTEMS],
    pub bias: [E; SYSTEMS],
    /// Variance of the random error of each system
    pub noise_variance: [E; SYSTEMS],
}

impl<E> LinearModel<E>
where
    E: Value,
    StandardNormal: Distribution<E>,
{
    pub const fn new(
        scale: [E; SYSTEMS],
        bias: [E; SYSTEMS],
        noise_variance: [E; SYSTEMS],
    ) -> Self {
        Self {
            scale,
            bias,
            noise_variance,
        }
    }

    pub fn noise_free(scale: [E; SYSTEMS], bias: [E; SYSTEMS]) -> Self {
        Self::new(scale, bias, [E::zero(); SYSTEMS])
    }

    /// Draw `num_samples` collocations
    pub fn generate<R: Rng>(&self, num_samples: usize, rng: &mut R) -> Vec<Collocation<E>> {
        let truth: Array1<E> = Array1::random_using(num_samples, StandardNormal, rng);
        let mut measurements = Vec::with_capacity(SYSTEMS);
        for ii in 0..SYSTEMS {
            let noise: Array1<E> = Array1::random_using(num_samples, StandardNormal, rng)
                * self.noise_variance[ii].sqrt();
            measurements.push(truth.mapv(|t| self.scale[ii] * t + self.bias[ii]) + noise);
        }

        (0..num_samples)
            .map(|nn| Collocation([measurements[0][nn], measurements[1][nn], measurements[2][nn]]))
            .collect()
    }

    /// Draw `num_samples` collocations from an [`Isaac64Rng`] seeded with `seed`
    pub fn generate_seeded(&self, num_samples: usize, seed: u64) -> Vec<Collocation<E>> {
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        self.generate(num_samples, &mut rng)
    }
}
