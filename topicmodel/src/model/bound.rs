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
use statrs::function::gamma::ln_gamma;

use crate::corpus::Document;
use crate::math::{dirichlet_expectation_1d, dirichlet_expectation_2d, logsumexp};
use crate::Probability;

use super::OnlineLda;

impl OnlineLda {
    /// Estimates the variational bound `E_q[log p(docs)] - E_q[log q(docs)]`.
    ///
    /// `gamma` are the variational topic weights per document as produced by
    /// [OnlineLda::inference]; when absent they are inferred on the fly.
    /// `subsample_ratio` compensates the document terms when `docs` is only a
    /// sample of the conceptual corpus.
    pub fn bound(
        &self,
        docs: &[Document],
        gamma: Option<&[Vec<Probability>]>,
        subsample_ratio: f64,
    ) -> f64 {
        let mut score = 0.0;
        let lambda = self.state.get_lambda();
        let elog_beta = dirichlet_expectation_2d(&lambda).collect_vec();
        let sum_alpha = self.alpha.iter().sum::<f64>();

        for (d, doc) in docs.iter().enumerate() {
            let gamma_d = match gamma {
                Some(gamma) => gamma[d].clone(),
                None => {
                    let (mut inferred, _) = self.inference(std::slice::from_ref(doc), false);
                    inferred.swap_remove(0)
                }
            };
            let elog_theta_d = dirichlet_expectation_1d(&gamma_d).collect_vec();

            // E[log p(doc | theta, beta)]
            score += doc
                .ids()
                .iter()
                .zip_eq(doc.counts().iter())
                .map(|(id, count)| {
                    let terms = elog_theta_d
                        .iter()
                        .zip(elog_beta.iter())
                        .map(|(theta, beta_row)| theta + beta_row[*id as usize])
                        .collect_vec();
                    f64::from(*count) * logsumexp(&terms)
                })
                .sum::<f64>();

            // E[log p(theta | alpha) - log q(theta | gamma)]
            score += self
                .alpha
                .iter()
                .zip_eq(gamma_d.iter())
                .zip_eq(elog_theta_d.iter())
                .map(|((alpha, gamma), theta)| (alpha - gamma) * theta)
                .sum::<f64>();
            score += gamma_d
                .iter()
                .zip_eq(self.alpha.iter())
                .map(|(gamma, alpha)| ln_gamma(*gamma) - ln_gamma(*alpha))
                .sum::<f64>();
            score += ln_gamma(sum_alpha) - ln_gamma(gamma_d.iter().sum());
        }

        // compensate for when `docs` is only a sample of the whole corpus
        score *= subsample_ratio;

        // E[log p(beta | eta) - log q(beta | lambda)]
        for (k, (lambda_row, beta_row)) in lambda.iter().zip_eq(elog_beta.iter()).enumerate() {
            for (w, (lambda_kw, beta_kw)) in
                lambda_row.iter().zip_eq(beta_row.iter()).enumerate()
            {
                let eta_kw = self.eta.at(k, w);
                score += (eta_kw - lambda_kw) * beta_kw;
                score += ln_gamma(*lambda_kw) - ln_gamma(eta_kw);
            }
        }
        score += self
            .eta
            .sum_per_topic(self.num_topics, self.num_terms)
            .into_iter()
            .zip_eq(lambda.iter())
            .map(|(sum_eta, lambda_row)| ln_gamma(sum_eta) - ln_gamma(lambda_row.iter().sum()))
            .sum::<f64>();

        score
    }

    /// The per-word likelihood bound of `chunk`, treated as a sample of a
    /// corpus of `total_docs` documents. Logs the bound together with the
    /// `2^(-bound)` perplexity estimate.
    pub fn log_perplexity(&self, chunk: &[Document], total_docs: Option<usize>) -> f64 {
        let total_docs = total_docs.unwrap_or(chunk.len());
        let corpus_words = chunk.iter().map(Document::word_count).sum::<f64>();
        let subsample_ratio = total_docs as f64 / chunk.len() as f64;
        let bound = self.bound(chunk, None, subsample_ratio);
        let perword_bound = bound / (subsample_ratio * corpus_words);
        log::info!(
            "{:.3} per-word bound, {:.1} perplexity estimate based on a held-out corpus of {} documents with {} words",
            perword_bound,
            (-perword_bound).exp2(),
            chunk.len(),
            corpus_words
        );
        perword_bound
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;

    use crate::corpus::Document;
    use crate::model::LdaOptions;
    use crate::prior::{AlphaConfig, EtaConfig};
    use crate::vocabulary::Vocabulary;

    use super::super::OnlineLda;

    fn corpus() -> Vec<Document> {
        vec![
            Document::from_pairs(vec![(0, 3.0), (1, 3.0)]),
            Document::from_pairs(vec![(2, 3.0), (3, 3.0)]),
        ]
    }

    fn model_with_eta(eta: EtaConfig) -> OnlineLda {
        let options = LdaOptions::builder()
            .num_topics(2)
            .eta(eta)
            .seed(6)
            .build()
            .unwrap();
        OnlineLda::new(options, Vocabulary::from_words(["a", "b", "c", "d"])).unwrap()
    }

    #[test]
    fn bound_is_finite_for_every_eta_shape() {
        let docs = corpus();
        for eta in [
            EtaConfig::Symmetric,
            EtaConfig::Auto,
            EtaConfig::Scalar(0.3),
            EtaConfig::Topic(vec![0.2, 0.4]),
            EtaConfig::Matrix(vec![vec![0.25; 4], vec![0.5; 4]]),
        ] {
            let model = model_with_eta(eta);
            let bound = model.bound(&docs, None, 1.0);
            assert!(bound.is_finite());
            assert!(bound < 0.0);
        }
    }

    #[test]
    fn supplied_gamma_matches_inferred_gamma() {
        let model = model_with_eta(EtaConfig::Symmetric);
        let docs = corpus();
        let mut gamma = Vec::new();
        for doc in &docs {
            let (mut inferred, _) = model.inference(std::slice::from_ref(doc), false);
            gamma.push(inferred.swap_remove(0));
        }
        let explicit = model.bound(&docs, Some(&gamma), 1.0);
        let implicit = model.bound(&docs, None, 1.0);
        assert_relative_eq!(explicit, implicit, epsilon = 1e-9);
    }

    #[test]
    fn subsampling_scales_only_the_document_terms() {
        let model = model_with_eta(EtaConfig::Symmetric);
        let docs = corpus();
        let empty = model.bound(&[], None, 1.0);
        let full = model.bound(&docs, None, 1.0);
        let scaled = model.bound(&docs, None, 2.0);
        // doubling the subsample ratio adds the document score exactly once
        // more on top of the shared topic prior terms
        assert_relative_eq!(scaled - full, full - empty, epsilon = 1e-9);
    }

    #[test]
    fn one_topic_bound_reduces_to_a_unigram_likelihood() {
        // with K = 1 the topic weights are degenerate: Elogtheta = 0 and the
        // document score is a unigram log likelihood under beta
        let options = LdaOptions::builder()
            .num_topics(1)
            .alpha(AlphaConfig::Scalar(1.0))
            .seed(2)
            .build()
            .unwrap();
        let model =
            OnlineLda::new(options, Vocabulary::from_words(["a", "b", "c", "d"])).unwrap();

        let docs = vec![Document::from_pairs(vec![(0, 2.0), (1, 1.0)])];
        let lambda = model.state().get_lambda();
        let elog_beta =
            crate::math::dirichlet_expectation_1d(&lambda[0]).collect::<Vec<_>>();
        let expected_doc_score = 2.0 * elog_beta[0] + 1.0 * elog_beta[1];

        let with_docs = model.bound(&docs, None, 1.0);
        let without_docs = model.bound(&[], None, 1.0);
        assert_relative_eq!(with_docs - without_docs, expected_doc_score, epsilon = 1e-6);
    }

    #[test]
    fn log_perplexity_is_per_word() {
        let model = model_with_eta(EtaConfig::Symmetric);
        let docs = corpus();
        let perword = model.log_perplexity(&docs, None);
        let bound = model.bound(&docs, None, 1.0);
        assert_relative_eq!(perword, bound / 12.0, epsilon = 1e-12);
        assert!((-perword).exp2() > 1.0);
    }
}
