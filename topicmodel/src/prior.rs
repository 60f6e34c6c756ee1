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
use statrs::function::gamma::digamma;

use crate::enums::ConfigError;
use crate::math::trigamma;
use crate::{TopicTo, WordTo};

/// How the document-topic prior `alpha` is chosen.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AlphaConfig {
    /// `1/num_topics` for every topic.
    #[default]
    Symmetric,
    /// The fixed normalized `1/(topic_id + sqrt(num_topics))` prior.
    Asymmetric,
    /// Start symmetric and learn an asymmetric prior from the data.
    Auto,
    /// A scalar broadcast over all topics.
    Scalar(f64),
    /// An explicit prior of length `num_topics`.
    Explicit(Vec<f64>),
}

impl AlphaConfig {
    /// Resolves to `(alpha, optimize_alpha)`.
    pub(crate) fn resolve(&self, num_topics: usize) -> Result<(Vec<f64>, bool), ConfigError> {
        match self {
            AlphaConfig::Symmetric => {
                let value = 1.0 / num_topics as f64;
                log::info!("using symmetric alpha at {}", value);
                Ok((vec![value; num_topics], false))
            }
            AlphaConfig::Asymmetric => {
                let root = (num_topics as f64).sqrt();
                let mut alpha = (0..num_topics)
                    .map(|topic_id| 1.0 / (topic_id as f64 + root))
                    .collect_vec();
                let sum = alpha.iter().sum::<f64>();
                alpha.iter_mut().for_each(|value| *value /= sum);
                log::info!("using asymmetric alpha {:?}", alpha);
                Ok((alpha, false))
            }
            AlphaConfig::Auto => {
                let alpha = vec![1.0 / num_topics as f64; num_topics];
                log::info!("using autotuned alpha, starting with {:?}", alpha);
                Ok((alpha, true))
            }
            AlphaConfig::Scalar(value) => {
                if *value <= 0.0 {
                    return Err(ConfigError::NonPositiveAlpha);
                }
                Ok((vec![*value; num_topics], false))
            }
            AlphaConfig::Explicit(values) => {
                if values.len() != num_topics {
                    return Err(ConfigError::AlphaShape {
                        expected: num_topics,
                        got: values.len(),
                    });
                }
                if values.iter().any(|value| *value <= 0.0) {
                    return Err(ConfigError::NonPositiveAlpha);
                }
                Ok((values.clone(), false))
            }
        }
    }
}

/// How the topic-word prior `eta` is chosen.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EtaConfig {
    /// The scalar `1/num_topics`.
    #[default]
    Symmetric,
    /// Start with a symmetric per-topic column and learn it from the data.
    Auto,
    Scalar(f64),
    /// An explicit per-topic column of length `num_topics`.
    Topic(Vec<f64>),
    /// An explicit `num_topics x num_terms` matrix, e.g. to seed topics with
    /// boosted words.
    Matrix(Vec<Vec<f64>>),
}

impl EtaConfig {
    /// Resolves to `(eta, optimize_eta)`.
    pub(crate) fn resolve(
        &self,
        num_topics: usize,
        num_terms: usize,
    ) -> Result<(Eta, bool), ConfigError> {
        match self {
            EtaConfig::Symmetric => Ok((Eta::Scalar(1.0 / num_topics as f64), false)),
            EtaConfig::Auto => {
                let eta = vec![1.0 / num_topics as f64; num_topics];
                log::info!("using autotuned eta, starting with {:?}", eta);
                Ok((Eta::Topic(eta), true))
            }
            EtaConfig::Scalar(value) => {
                if *value <= 0.0 {
                    return Err(ConfigError::NonPositiveEta);
                }
                Ok((Eta::Scalar(*value), false))
            }
            EtaConfig::Topic(values) => {
                if values.len() != num_topics {
                    return Err(ConfigError::EtaShape {
                        expected: format!("{num_topics} rows"),
                        got: format!("{} rows", values.len()),
                    });
                }
                if values.iter().any(|value| *value <= 0.0) {
                    return Err(ConfigError::NonPositiveEta);
                }
                Ok((Eta::Topic(values.clone()), false))
            }
            EtaConfig::Matrix(rows) => {
                if rows.len() != num_topics
                    || rows.iter().any(|row| row.len() != num_terms)
                {
                    // report the first offending row so a ragged matrix is
                    // distinguishable from a plain dimension mismatch
                    let columns = rows
                        .iter()
                        .map(|row| row.len())
                        .find(|len| *len != num_terms)
                        .or_else(|| rows.first().map(|row| row.len()))
                        .unwrap_or(0);
                    return Err(ConfigError::EtaShape {
                        expected: format!("{num_topics} x {num_terms}"),
                        got: format!("{} x {}", rows.len(), columns),
                    });
                }
                if rows.iter().flatten().any(|value| *value <= 0.0) {
                    return Err(ConfigError::NonPositiveEta);
                }
                Ok((Eta::Matrix(rows.clone()), false))
            }
        }
    }
}

/// The resolved topic-word prior. Every consumer pattern-matches the shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Eta {
    Scalar(f64),
    /// One symmetric value per topic (`num_topics x 1`).
    Topic(Vec<f64>),
    /// A full `num_topics x num_terms` matrix.
    Matrix(TopicTo<WordTo<f64>>),
}

impl Eta {
    /// `lambda = eta + sstats`, the variational topic-word parameters.
    pub fn lambda(&self, sstats: &TopicTo<WordTo<f64>>) -> TopicTo<WordTo<f64>> {
        match self {
            Eta::Scalar(eta) => sstats
                .iter()
                .map(|row| row.iter().map(|value| eta + value).collect_vec())
                .collect_vec(),
            Eta::Topic(etas) => etas
                .iter()
                .zip_eq(sstats.iter())
                .map(|(eta, row)| row.iter().map(|value| eta + value).collect_vec())
                .collect_vec(),
            Eta::Matrix(rows) => rows
                .iter()
                .zip_eq(sstats.iter())
                .map(|(eta_row, row)| {
                    eta_row
                        .iter()
                        .zip_eq(row.iter())
                        .map(|(eta, value)| eta + value)
                        .collect_vec()
                })
                .collect_vec(),
        }
    }

    /// The prior value for topic `k` and word `w`.
    pub fn at(&self, k: usize, w: usize) -> f64 {
        match self {
            Eta::Scalar(eta) => *eta,
            Eta::Topic(etas) => etas[k],
            Eta::Matrix(rows) => rows[k][w],
        }
    }

    /// `sum_w eta_{kw}` for every topic.
    pub fn sum_per_topic(&self, num_topics: usize, num_terms: usize) -> Vec<f64> {
        match self {
            Eta::Scalar(eta) => vec![eta * num_terms as f64; num_topics],
            Eta::Topic(etas) => etas.iter().map(|eta| eta * num_terms as f64).collect_vec(),
            Eta::Matrix(rows) => rows.iter().map(|row| row.iter().sum()).collect_vec(),
        }
    }
}

/// Huang's Newton step for the maximum-likelihood estimate of a Dirichlet
/// parameter, using the diagonal-plus-rank-one structure of the Hessian.
///
/// `logphat` is the averaged `E[log(theta)]` over the batch, `n` the batch size.
pub(crate) fn dirichlet_prior_step(prior: &[f64], logphat: &[f64], n: f64) -> Vec<f64> {
    let sum_prior = prior.iter().sum::<f64>();
    let psi_sum = digamma(sum_prior);
    let gradf = prior
        .iter()
        .zip_eq(logphat.iter())
        .map(|(p, lp)| n * (psi_sum - digamma(*p) + lp))
        .collect_vec();

    let c = n * trigamma(sum_prior);
    let q = prior.iter().map(|p| -n * trigamma(*p)).collect_vec();

    let b = gradf
        .iter()
        .zip_eq(q.iter())
        .map(|(g, q)| g / q)
        .sum::<f64>()
        / (1.0 / c + q.iter().map(|q| 1.0 / q).sum::<f64>());

    gradf
        .iter()
        .zip_eq(q.iter())
        .map(|(g, q)| -(g - b) / q)
        .collect_vec()
}

/// Applies the `rho`-scaled Newton step when it keeps the prior strictly
/// positive; otherwise the prior stays untouched and a warning is logged.
pub(crate) fn apply_prior_step(prior: &mut [f64], step: &[f64], rho: f64, name: &str) -> bool {
    if prior
        .iter()
        .zip_eq(step.iter())
        .all(|(p, d)| p + rho * d > 0.0)
    {
        for (p, d) in prior.iter_mut().zip_eq(step.iter()) {
            *p += rho * d;
        }
        true
    } else {
        log::warn!("updated {} not positive", name);
        false
    }
}
