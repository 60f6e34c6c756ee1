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

use itertools::{multizip, Itertools};
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Gamma;
use rayon::prelude::*;

use crate::corpus::Document;
use crate::math::{dirichlet_expectation_1d, dirichlet_expectation_2d, dot, mean_abs_difference, transpose};
use crate::state::LdaState;
use crate::{Probability, TopicTo, WordTo};

use super::OnlineLda;

/// Keeps the phi normalizer away from zero when a document's words have
/// vanishing mass under every topic.
const PHINORM_GUARD: f64 = 1e-100;

impl OnlineLda {
    /// Estimates the variational topic weights `gamma` for every document in
    /// `chunk`, given the current topics.
    ///
    /// Does not modify the model; the whole chunk is assumed to fit in RAM.
    /// With `collect_sstats` the sufficient statistics
    /// `sstats[k][w] = sum_d n_{dw} * phi_{dwk}` for the M-step are returned
    /// as well. The per-token `phi` is never materialized; substituting its
    /// optimum back into the `gamma` update gives the multiplicative form of
    /// Lee, Seung: Algorithms for non-negative matrix factorization, NIPS 2001.
    pub fn inference(
        &self,
        chunk: &[Document],
        collect_sstats: bool,
    ) -> (Vec<Vec<Probability>>, Option<TopicTo<WordTo<Probability>>>) {
        fn calculate_phinorm(
            exp_elog_theta_d: &[f64],
            exp_elog_beta_d: &[Vec<f64>],
        ) -> Vec<f64> {
            dot(exp_elog_theta_d, exp_elog_beta_d)
                .map(|value| value + PHINORM_GUARD)
                .collect_vec()
        }

        fn calculate_gamma_d(
            alpha: &[f64],
            exp_elog_theta_d: &[f64],
            exp_elog_beta_d: &[Vec<f64>],
            counts: &[f64],
            phinorm: &[f64],
        ) -> Vec<f64> {
            let a = counts
                .iter()
                .zip_eq(phinorm.iter())
                .map(|(ct, phi)| ct / phi)
                .collect_vec();
            let b = transpose(exp_elog_beta_d).collect_vec();
            dot(&a, &b)
                .zip_eq(exp_elog_theta_d.iter())
                .zip_eq(alpha.iter())
                .map(|((dot, theta), alpha)| dot * theta + alpha)
                .collect_vec()
        }

        if chunk.len() > 1 {
            log::debug!("performing inference on a chunk of {} documents", chunk.len());
        }

        // Initialize the variational distribution q(theta|gamma) for the
        // whole chunk up front, so the per-document loop stays deterministic.
        let distribution = Gamma::new(100.0, 1.0 / 100.0).unwrap();
        let mut rng = StdRng::seed_from_u64(self.seed);
        let gamma_init = distribution
            .sample_iter(&mut rng)
            .take(self.num_topics * chunk.len())
            .chunks(self.num_topics)
            .into_iter()
            .map(|values| values.collect_vec())
            .collect_vec();
        let exp_elog_theta_init = dirichlet_expectation_2d(&gamma_init)
            .map(|values| values.into_iter().map(f64::exp).collect_vec())
            .collect_vec();

        // Every document's fixed point is independent of the others.
        let results = multizip((chunk.iter(), gamma_init, exp_elog_theta_init))
            .collect_vec()
            .into_par_iter()
            .map(|(doc, mut gamma_d, mut exp_elog_theta_d)| {
                if doc.is_empty() {
                    // nothing to explain, the prior is the fixed point
                    let factors = collect_sstats.then(|| (vec![0.0; self.num_topics], Vec::new()));
                    return (self.alpha.clone(), true, factors);
                }

                let ids = doc.ids();
                let cts = doc
                    .counts()
                    .iter()
                    .map(|count| f64::from(*count))
                    .collect_vec();
                let exp_elog_beta_d = self
                    .exp_elog_beta
                    .iter()
                    .map(|topic| ids.iter().map(|id| topic[*id as usize]).collect_vec())
                    .collect_vec();
                let mut phinorm = calculate_phinorm(&exp_elog_theta_d, &exp_elog_beta_d);

                let mut converged = false;
                for _ in 0..self.iterations {
                    let last_gamma = std::mem::replace(
                        &mut gamma_d,
                        calculate_gamma_d(
                            &self.alpha,
                            &exp_elog_theta_d,
                            &exp_elog_beta_d,
                            &cts,
                            &phinorm,
                        ),
                    );
                    exp_elog_theta_d = dirichlet_expectation_1d(&gamma_d)
                        .map(f64::exp)
                        .collect_vec();
                    phinorm = calculate_phinorm(&exp_elog_theta_d, &exp_elog_beta_d);
                    if mean_abs_difference(&gamma_d, &last_gamma) < self.gamma_threshold {
                        converged = true;
                        break;
                    }
                }

                let factors = collect_sstats.then(|| {
                    let ratios = cts
                        .iter()
                        .zip_eq(phinorm.iter())
                        .map(|(ct, phi)| ct / phi)
                        .collect_vec();
                    (exp_elog_theta_d, ratios)
                });
                (gamma_d, converged, factors)
            })
            .collect::<Vec<_>>();

        let mut sstats =
            collect_sstats.then(|| vec![vec![0.0; self.num_terms]; self.num_topics]);
        let mut gamma = Vec::with_capacity(chunk.len());
        let mut converged_count = 0usize;
        for (doc, (gamma_d, converged, factors)) in chunk.iter().zip_eq(results) {
            if converged {
                converged_count += 1;
            }
            if let (Some(sstats), Some((exp_elog_theta_d, ratios))) = (sstats.as_mut(), factors)
            {
                // contribution of this document: outer(expElogtheta_d, cts/phinorm)
                for (topic_row, theta) in sstats.iter_mut().zip_eq(exp_elog_theta_d.iter()) {
                    for (id, ratio) in doc.ids().iter().zip_eq(ratios.iter()) {
                        topic_row[*id as usize] += theta * ratio;
                    }
                }
            }
            gamma.push(gamma_d);
        }

        if chunk.len() > 1 {
            log::debug!(
                "{}/{} documents converged within {} iterations",
                converged_count,
                chunk.len(),
                self.iterations
            );
        }

        if let Some(sstats) = sstats.as_mut() {
            // finishes sstats[k][w] = sum_d n_{dw} * phi_{dwk}
            //                       = sum_d n_{dw} * exp(Elogtheta_{dk} + Elogbeta_{kw}) / phinorm_{dw}
            for (row, beta_row) in sstats.iter_mut().zip_eq(self.exp_elog_beta.iter()) {
                for (value, beta) in row.iter_mut().zip_eq(beta_row.iter()) {
                    *value *= beta;
                }
            }
        }

        (gamma, sstats)
    }

    /// Runs inference on `chunk` and accumulates the collected sufficient
    /// statistics into `state`. Returns the inferred `gamma`.
    pub fn do_estep(&self, chunk: &[Document], state: &mut LdaState) -> Vec<Vec<Probability>> {
        let (gamma, sstats) = self.inference(chunk, true);
        if let Some(sstats) = sstats {
            state.add_sstats(&sstats);
        }
        state.add_docs(gamma.len());
        gamma
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use crate::corpus::Document;
    use crate::model::LdaOptions;
    use crate::prior::AlphaConfig;
    use crate::state::LdaState;
    use crate::vocabulary::Vocabulary;

    use super::super::OnlineLda;

    fn model(num_topics: usize, seed: u64) -> OnlineLda {
        let options = LdaOptions::builder()
            .num_topics(num_topics)
            .seed(seed)
            .build()
            .unwrap();
        OnlineLda::new(options, Vocabulary::from_words(["a", "b", "c", "d"])).unwrap()
    }

    #[test]
    fn inference_is_pure_and_deterministic() {
        let model = model(2, 5);
        let chunk = vec![
            Document::from_pairs(vec![(0, 2.0), (1, 1.0)]),
            Document::from_pairs(vec![(2, 4.0)]),
        ];
        let lambda_before = model.state().get_lambda();
        let (first, stats) = model.inference(&chunk, false);
        let (second, _) = model.inference(&chunk, false);
        assert_eq!(first, second);
        assert!(stats.is_none());
        assert_eq!(model.state().get_lambda(), lambda_before);
    }

    #[test]
    fn gamma_mass_is_alpha_plus_token_count() {
        // each fixed-point update gives sum(gamma) = sum(alpha) + sum(counts)
        let model = model(3, 1);
        let chunk = vec![Document::from_pairs(vec![(0, 2.0), (3, 5.0)])];
        let (gamma, _) = model.inference(&chunk, false);
        let alpha_sum = model.alpha().iter().sum::<f64>();
        assert_relative_eq!(
            gamma[0].iter().sum::<f64>(),
            alpha_sum + 7.0,
            epsilon = 1e-8
        );
    }

    #[test]
    fn single_term_document_stays_finite() {
        let model = model(2, 9);
        let chunk = vec![Document::from_pairs(vec![(1, 1.0)])];
        let (gamma, sstats) = model.inference(&chunk, true);
        assert!(gamma[0].iter().all(|value| value.is_finite() && *value > 0.0));
        let sstats = sstats.unwrap();
        // all collected mass sits in the single observed column
        let total: f64 = sstats.iter().flatten().sum();
        let observed: f64 = sstats.iter().map(|row| row[1]).sum();
        assert_relative_eq!(total, observed, epsilon = 1e-12);
        assert_relative_eq!(observed, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn empty_document_keeps_the_prior() {
        let model = model(2, 2);
        let chunk = vec![Document::empty()];
        let (gamma, sstats) = model.inference(&chunk, true);
        assert_eq!(gamma[0], model.alpha().to_vec());
        assert!(sstats.unwrap().iter().flatten().all(|value| *value == 0.0));
    }

    #[test]
    fn one_topic_explains_everything() {
        let options = LdaOptions::builder()
            .num_topics(1)
            .alpha(AlphaConfig::Scalar(1.0))
            .seed(4)
            .build()
            .unwrap();
        let model =
            OnlineLda::new(options, Vocabulary::from_words(["a", "b", "c", "d"])).unwrap();
        let doc = Document::from_pairs(vec![(0, 2.0), (2, 3.0)]);
        let topics = model.get_document_topics(&doc, None);
        assert_eq!(topics.len(), 1);
        assert_relative_eq!(topics[0].1, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn do_estep_accumulates_into_the_state() {
        let model = model(2, 3);
        let chunk = vec![
            Document::from_pairs(vec![(0, 1.0), (1, 2.0)]),
            Document::from_pairs(vec![(3, 1.0)]),
        ];
        let mut state = LdaState::new(model.eta().clone(), 2, 4);
        let gamma = model.do_estep(&chunk, &mut state);
        assert_eq!(gamma.len(), 2);
        assert_eq!(state.numdocs(), 2);
        let (_, sstats) = model.inference(&chunk, true);
        assert_eq!(state.sstats(), &sstats.unwrap());
    }

    #[test]
    fn vocabulary_holes_are_indexed_safely() {
        let vocabulary = Vocabulary::from_entries(vec![(0, "a".to_string()), (3, "d".to_string())]);
        let options = LdaOptions::builder().num_topics(2).seed(6).build().unwrap();
        let mut model = OnlineLda::new(options, vocabulary).unwrap();
        assert_eq!(model.num_terms(), 4);

        let corpus = vec![
            Document::from_pairs(vec![(0, 2.0)]),
            Document::from_pairs(vec![(3, 1.0)]),
        ];
        model.update(&corpus).unwrap();
        let lambda = model.state().get_lambda();
        assert_eq!(lambda.len(), 2);
        assert!(lambda.iter().all(|row| row.len() == 4));
        assert!(lambda.iter().flatten().all(|value| value.is_finite()));
    }

    #[test]
    fn sstats_total_mass_equals_token_count() {
        let model = model(2, 8);
        let chunk = vec![
            Document::from_pairs(vec![(0, 3.0), (1, 3.0)]),
            Document::from_pairs(vec![(2, 3.0), (3, 3.0)]),
        ];
        let (_, sstats) = model.inference(&chunk, true);
        let total: f64 = sstats.unwrap().iter().flatten().sum();
        assert_relative_eq!(total, 12.0, epsilon = 1e-6);
    }
}
