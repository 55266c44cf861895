use ndarray::{Array1, Array2, LinalgScalar, NdFloat};
use num_traits::NumCast;

use crate::Result;

/// Compute the outer product of two one-dimensional vectors of length (m x 1) and (n x 1)
///
/// The outer product is the (m x n) matrix whose elements are products of elements in the first
/// vector with those in the second.
///
/// # Examples
///
/// ```
/// use tripcol::math::outer_product;
/// use ndarray::{arr1, arr2, Array1};
///
/// let u: Array1<f64> = arr1(&[1., 2., 3.]);
/// let v = arr1(&[4., 5., 6.]);
/// let outer_product = outer_product(&u, &v).unwrap();
///
/// let expected = arr2(&[[4., 5., 6.], [8., 10., 12.], [12., 15., 18.]]);
/// assert_eq!(outer_product, expected);
///```
///
/// # Errors
/// Returns an error if either vector cannot be reshaped into a column or row.
pub fn outer_product<T: LinalgScalar>(u: &Array1<T>, v: &Array1<T>) -> Result<Array2<T>> {
    let u: Array2<T> = u.clone().into_shape((u.len(), 1))?;
    let v: Array2<T> = v.clone().into_shape((1, v.len()))?;

    Ok(ndarray::linalg::kron(&u, &v))
}

/// Advance a running mean by one sample
///
/// With `n` the number of samples seen including `value` this computes
/// $$
///     \bar{x}_n = \bar{x}_{n-1} + \frac{1}{n} \left(x_n - \bar{x}_{n-1}\right)
/// $$
/// which never forms the full sum, so long streams do not lose precision to a growing total.
///
/// # Examples
///
/// ```
/// use tripcol::math::update_mean;
///
/// let mut mean = 0.0_f64;
/// for (n, value) in [1.0, 3.0].into_iter().enumerate() {
///     mean = update_mean(mean, value, n + 1);
/// }
/// assert_eq!(mean, 2.0);
/// ```
pub fn update_mean<E: NdFloat>(mean: E, value: E, n: usize) -> E {
    let weight = E::one() / cast_count::<E>(n);
    mean + weight * (value - mean)
}

pub(crate) fn cast_count<E: NdFloat>(n: usize) -> E {
    <E as NumCast>::from(n).expect("sample count must be representable as a float")
}

pub(crate) fn cast_constant<E: NdFloat>(value: f64) -> E {
    <E as NumCast>::from(value).expect("constant must be representable as a float")
}
