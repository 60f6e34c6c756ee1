//Copyright 2024 Felix Engl
//
//Licensed under the Apache License, Version 2.0 (the "License");
//you may not use this file except in compliance with the License.
//You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
//Unless required by applicable law or agreed to in writing, software
//distributed under the License is distributed on an "AS IS" BASIS,
//WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//See the License for the specific language governing permissions and
//limitations under the License.

use itertools::Itertools;
use statrs::function::gamma::digamma;

/// For a vector `theta ~ Dir(alpha)`, computes `E[log(theta)] = psi(alpha) - psi(sum(alpha))`.
pub fn dirichlet_expectation_1d(alphas: &[f64]) -> impl Iterator<Item = f64> + '_ {
    let psi_sum_alpha = digamma(alphas.iter().sum());
    alphas.iter().map(move |alpha| digamma(*alpha) - psi_sum_alpha)
}

/// Row-wise [dirichlet_expectation_1d] for a matrix: `psi(x) - psi(sum_row(x))` broadcast over rows.
pub fn dirichlet_expectation_2d<'a>(alphas: &'a [Vec<f64>]) -> impl Iterator<Item = Vec<f64>> + 'a {
    alphas.iter().map(|values| dirichlet_expectation_1d(values).collect_vec())
}

/// `log(sum(exp(values)))`, shifted by the maximum to avoid overflow.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|value| (value - max).exp()).sum::<f64>().ln()
}

/// The trigamma function `psi'(x)` for `x > 0`.
///
/// Uses the recurrence `psi'(x) = psi'(x + 1) + 1/x^2` to push the argument into
/// the asymptotic regime, then the Bernoulli-number expansion.
pub fn trigamma(x: f64) -> f64 {
    debug_assert!(x > 0.0);
    let mut x = x;
    let mut value = 0.0;
    while x < 6.0 {
        value += 1.0 / (x * x);
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    value
        + inv
            * (1.0
                + inv
                    * (0.5
                        + inv
                            * (1.0 / 6.0
                                + inv2 * (-1.0 / 30.0 + inv2 * (1.0 / 42.0 - inv2 / 30.0)))))
}

pub(crate) fn dot<'a>(a: &'a [f64], b: &'a [Vec<f64>]) -> impl Iterator<Item = f64> + 'a {
    assert!(!b.is_empty());
    (0..b[0].len()).map(move |pos| {
        a.iter()
            .zip_eq(b.iter().map(|row| row[pos]))
            .map(|(x, y)| y * x)
            .sum::<f64>()
    })
}

pub(crate) fn transpose<'a>(v: &'a [Vec<f64>]) -> impl Iterator<Item = Vec<f64>> + 'a {
    assert!(!v.is_empty());
    (0..v[0].len()).map(move |i| v.iter().map(|inner| inner[i]).collect_vec())
}

pub(crate) fn mean_abs_difference(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip_eq(b.iter())
        .map(|(x, y)| (x - y).abs())
        .sum::<f64>()
        / (a.len() as f64)
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use itertools::Itertools;

    use super::*;

    #[test]
    fn dirichlet_expectation_of_uniform_pair() {
        // psi(1) - psi(2) == -1 because psi(x + 1) = psi(x) + 1/x
        let values = dirichlet_expectation_1d(&[1.0, 1.0]).collect_vec();
        assert_relative_eq!(values[0], -1.0, epsilon = 1e-12);
        assert_relative_eq!(values[1], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn dirichlet_expectation_rows_are_independent() {
        let matrix = vec![vec![1.0, 1.0], vec![2.0, 4.0, 8.0]];
        let rows = dirichlet_expectation_2d(&matrix).collect_vec();
        let first = dirichlet_expectation_1d(&matrix[0]).collect_vec();
        let second = dirichlet_expectation_1d(&matrix[1]).collect_vec();
        assert_eq!(rows[0], first);
        assert_eq!(rows[1], second);
    }

    #[test]
    fn logsumexp_matches_naive_sum() {
        let values = [1f64.ln(), 2f64.ln(), 3f64.ln()];
        assert_relative_eq!(logsumexp(&values), 6f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn logsumexp_survives_extreme_values() {
        let values = [-1000.0, -1000.5];
        let expected = -1000.0 + (1.0 + (-0.5f64).exp()).ln();
        assert_relative_eq!(logsumexp(&values), expected, epsilon = 1e-12);
        assert_eq!(logsumexp(&[f64::NEG_INFINITY]), f64::NEG_INFINITY);
    }

    #[test]
    fn trigamma_golden_values() {
        assert_relative_eq!(
            trigamma(1.0),
            std::f64::consts::PI.powi(2) / 6.0,
            epsilon = 1e-10
        );
        assert_relative_eq!(
            trigamma(0.5),
            std::f64::consts::PI.powi(2) / 2.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn trigamma_recurrence_holds() {
        for x in [0.1, 0.9, 2.5, 7.3] {
            assert_relative_eq!(
                trigamma(x + 1.0),
                trigamma(x) - 1.0 / (x * x),
                epsilon = 1e-10
            );
        }
    }

    #[test]
    fn dot_multiplies_columns() {
        let a = [1.0, 2.0];
        let b = vec![vec![1.0, 0.0, 2.0], vec![0.0, 1.0, 3.0]];
        assert_eq!(dot(&a, &b).collect_vec(), vec![1.0, 2.0, 8.0]);
    }

    #[test]
    fn transpose_swaps_axes() {
        let v = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(
            transpose(&v).collect_vec(),
            vec![vec![1.0, 3.0], vec![2.0, 4.0]]
        );
    }

    #[test]
    fn mean_abs_difference_is_averaged() {
        assert_relative_eq!(
            mean_abs_difference(&[1.0, 2.0], &[2.0, 4.0]),
            1.5,
            epsilon = 1e-12
        );
    }
}
