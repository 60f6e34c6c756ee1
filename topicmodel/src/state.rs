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
use serde::{Deserialize, Serialize};

use crate::math::dirichlet_expectation_2d;
use crate::prior::Eta;
use crate::{TopicTo, WordTo};

/// The sufficient statistics collected between two M-steps.
///
/// `sstats[k][w]` holds the expected `n_{dw} * phi_{dwk}` summed over all
/// documents seen since the last reset. States from different workers combine
/// by exact summation, so they can be shipped around and merged in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdaState {
    eta: Eta,
    sstats: TopicTo<WordTo<f64>>,
    numdocs: usize,
}

impl LdaState {
    pub fn new(eta: Eta, num_topics: usize, num_terms: usize) -> Self {
        Self {
            eta,
            sstats: vec![vec![0.0; num_terms]; num_topics],
            numdocs: 0,
        }
    }

    pub fn num_topics(&self) -> usize {
        self.sstats.len()
    }

    pub fn num_terms(&self) -> usize {
        self.sstats.first().map(|row| row.len()).unwrap_or(0)
    }

    pub fn numdocs(&self) -> usize {
        self.numdocs
    }

    pub fn sstats(&self) -> &TopicTo<WordTo<f64>> {
        &self.sstats
    }

    /// Prepare the state for a new accumulation window.
    pub fn reset(&mut self) {
        for row in self.sstats.iter_mut() {
            row.iter_mut().for_each(|value| *value = 0.0);
        }
        self.numdocs = 0;
    }

    /// Merge the E-step result of another node into this one by summing the
    /// sufficient statistics. After merging all nodes the result is exactly
    /// the single-node outcome (no approximation).
    pub fn merge(&mut self, other: &LdaState) {
        for (row, other_row) in self.sstats.iter_mut().zip_eq(other.sstats.iter()) {
            for (value, other_value) in row.iter_mut().zip_eq(other_row.iter()) {
                *value += other_value;
            }
        }
        self.numdocs += other.numdocs;
    }

    /// The stochastic gradient update: stretch both summaries to `targetsize`
    /// documents so they are of comparable magnitude, then interpolate with
    /// weight `rho` (`rho = 0` keeps this state, `rho = 1` keeps `other`).
    pub fn blend(&mut self, rho: f64, other: &LdaState, targetsize: Option<usize>) {
        let targetsize = targetsize.unwrap_or(self.numdocs);

        let scale = if self.numdocs == 0 || targetsize == self.numdocs {
            1.0
        } else {
            targetsize as f64 / self.numdocs as f64
        };
        for row in self.sstats.iter_mut() {
            row.iter_mut().for_each(|value| *value *= (1.0 - rho) * scale);
        }

        let scale = if other.numdocs == 0 || targetsize == other.numdocs {
            1.0
        } else {
            log::info!(
                "merging changes from {} documents into a model of {} documents",
                other.numdocs,
                targetsize
            );
            targetsize as f64 / other.numdocs as f64
        };
        for (row, other_row) in self.sstats.iter_mut().zip_eq(other.sstats.iter()) {
            for (value, other_value) in row.iter_mut().zip_eq(other_row.iter()) {
                *value += rho * scale * other_value;
            }
        }

        self.numdocs = targetsize;
    }

    pub fn get_lambda(&self) -> TopicTo<WordTo<f64>> {
        self.eta.lambda(&self.sstats)
    }

    pub fn get_elog_beta(&self) -> TopicTo<WordTo<f64>> {
        let lambda = self.get_lambda();
        dirichlet_expectation_2d(&lambda).collect_vec()
    }

    pub(crate) fn set_eta(&mut self, eta: Eta) {
        self.eta = eta;
    }

    pub(crate) fn add_docs(&mut self, count: usize) {
        self.numdocs += count;
    }

    pub(crate) fn add_sstats(&mut self, other: &TopicTo<WordTo<f64>>) {
        for (row, other_row) in self.sstats.iter_mut().zip_eq(other.iter()) {
            for (value, other_value) in row.iter_mut().zip_eq(other_row.iter()) {
                *value += other_value;
            }
        }
    }

    pub(crate) fn sstats_mut(&mut self) -> &mut TopicTo<WordTo<f64>> {
        &mut self.sstats
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use super::*;

    fn state_with(sstats: Vec<Vec<f64>>, numdocs: usize) -> LdaState {
        let mut state = LdaState::new(Eta::Scalar(0.5), sstats.len(), sstats[0].len());
        *state.sstats_mut() = sstats;
        state.add_docs(numdocs);
        state
    }

    #[test]
    fn lambda_is_eta_plus_sstats() {
        let state = state_with(vec![vec![1.0, 2.0], vec![0.0, 3.0]], 2);
        assert_eq!(state.get_lambda(), vec![vec![1.5, 2.5], vec![0.5, 3.5]]);
    }

    #[test]
    fn reset_clears_everything() {
        let mut state = state_with(vec![vec![1.0, 2.0]], 7);
        state.reset();
        assert_eq!(state.sstats(), &vec![vec![0.0, 0.0]]);
        assert_eq!(state.numdocs(), 0);
    }

    #[test]
    fn merge_is_an_exact_sum() {
        let a = state_with(vec![vec![1.0, 2.0]], 3);
        let b = state_with(vec![vec![0.25, 4.0]], 5);

        let mut ab = a.clone();
        ab.merge(&b);
        assert_eq!(ab.sstats(), &vec![vec![1.25, 6.0]]);
        assert_eq!(ab.numdocs(), 8);

        // commutative
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ba.sstats(), ab.sstats());

        // associative
        let c = state_with(vec![vec![8.0, 0.5]], 1);
        let mut left = ab.clone();
        left.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);
        assert_eq!(left.sstats(), right.sstats());
        assert_eq!(left.numdocs(), right.numdocs());
    }

    #[test]
    fn blend_stretches_to_the_target_size() {
        // fresh state, incoming summary of 5 documents, stretched to 10
        let mut state = LdaState::new(Eta::Scalar(0.5), 2, 3);
        let other = state_with(vec![vec![10.0; 3], vec![10.0; 3]], 5);
        state.blend(0.5, &other, Some(10));

        for row in state.sstats() {
            for value in row {
                assert_relative_eq!(*value, 10.0, epsilon = 1e-12);
            }
        }
        assert_eq!(state.numdocs(), 10);
    }

    #[test]
    fn blend_extremes() {
        // rho = 0 keeps the rescaled current summary
        let mut state = state_with(vec![vec![4.0, 8.0]], 2);
        let other = state_with(vec![vec![100.0, 100.0]], 2);
        state.blend(0.0, &other, Some(4));
        assert_eq!(state.sstats(), &vec![vec![8.0, 16.0]]);
        assert_eq!(state.numdocs(), 4);

        // rho = 1 replaces it with the rescaled incoming summary
        let mut state = state_with(vec![vec![4.0, 8.0]], 2);
        state.blend(1.0, &other, Some(4));
        assert_eq!(state.sstats(), &vec![vec![200.0, 200.0]]);
    }

    #[test]
    fn blend_without_target_keeps_own_count() {
        let mut state = state_with(vec![vec![6.0, 0.0]], 3);
        let other = state_with(vec![vec![3.0, 3.0]], 3);
        state.blend(0.5, &other, None);
        assert_eq!(state.sstats(), &vec![vec![4.5, 1.5]]);
        assert_eq!(state.numdocs(), 3);
    }

    #[test]
    fn elog_beta_matches_the_lambda_view() {
        let state = state_with(vec![vec![1.0, 3.0]], 1);
        let elog = state.get_elog_beta();
        let lambda = state.get_lambda();
        let expected =
            crate::math::dirichlet_expectation_1d(&lambda[0]).collect::<Vec<_>>();
        assert_eq!(elog[0], expected);
    }
}
