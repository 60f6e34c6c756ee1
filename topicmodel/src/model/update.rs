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

use crate::corpus::{ChunkSize, Corpus};
use crate::enums::{ConfigError, TrainingError};
use crate::math::dirichlet_expectation_1d;
use crate::prior::{apply_prior_step, dirichlet_prior_step, Eta};
use crate::state::LdaState;
use crate::Probability;

use super::OnlineLda;

/// Per-call overrides of the training schedule chosen at construction.
#[derive(Debug, Clone, Default)]
pub struct UpdateOverrides {
    pub chunksize: Option<ChunkSize>,
    pub decay: Option<f64>,
    pub offset: Option<f64>,
    pub passes: Option<usize>,
    pub update_every: Option<usize>,
    pub eval_every: Option<usize>,
    pub iterations: Option<usize>,
    pub gamma_threshold: Option<f64>,
    pub max_bound_iterations: Option<usize>,
    pub bound_improvement_threshold: Option<f64>,
}

/// What a training run observed; mainly useful to judge bound convergence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Bound-iterations executed in the final pass.
    pub bound_iterations: usize,
    /// Every per-word bound computed by the evaluation cadence, in order.
    pub perword_bounds: Vec<f64>,
}

impl OnlineLda {
    /// Trains the model on `corpus` with the schedule chosen at construction.
    ///
    /// The corpus is EM-iterated `passes` times; in batch mode the pass may
    /// additionally repeat as bound-iterations until the evidence lower bound
    /// plateaus. Updating an already trained model merges old and new
    /// documents in proportion to their counts.
    pub fn update(&mut self, corpus: &dyn Corpus) -> Result<UpdateOutcome, TrainingError> {
        self.update_with(corpus, UpdateOverrides::default())
    }

    /// [OnlineLda::update] with per-call schedule overrides.
    pub fn update_with(
        &mut self,
        corpus: &dyn Corpus,
        overrides: UpdateOverrides,
    ) -> Result<UpdateOutcome, TrainingError> {
        let decay = overrides.decay.unwrap_or(self.decay);
        let offset = overrides.offset.unwrap_or(self.offset);
        let passes = overrides.passes.unwrap_or(self.passes);
        let update_every = overrides.update_every.unwrap_or(self.update_every);
        let eval_every = overrides.eval_every.unwrap_or(self.eval_every);
        let iterations = overrides.iterations.unwrap_or(self.iterations);
        let gamma_threshold = overrides.gamma_threshold.unwrap_or(self.gamma_threshold);
        let max_bound_iterations = overrides
            .max_bound_iterations
            .unwrap_or(self.max_bound_iterations);
        let bound_improvement_threshold = overrides
            .bound_improvement_threshold
            .unwrap_or(self.bound_improvement_threshold);
        let chunksize = overrides.chunksize.unwrap_or(self.chunksize);

        let lencorpus = match corpus.doc_count() {
            Some(count) => count,
            None => {
                log::warn!("input corpus stream has no len(); counting documents");
                corpus.iter_docs().count()
            }
        };
        if lencorpus == 0 {
            log::warn!("update() called with an empty corpus");
            return Ok(UpdateOutcome::default());
        }
        let chunksize = chunksize.resolve(lencorpus);

        self.state.add_docs(lencorpus);

        let num_workers = self.num_workers();
        let update_after;
        let update_type;
        if update_every > 0 {
            update_type = "online";
            update_after = lencorpus.min(update_every * num_workers * chunksize);
            if max_bound_iterations > 1 {
                return Err(ConfigError::MaxBoundIterationsOnline.into());
            }
        } else {
            update_type = "batch";
            update_after = lencorpus;
        }
        let eval_after = lencorpus.min(eval_every * num_workers * chunksize);

        if max_bound_iterations < 1 {
            return Err(ConfigError::BoundIterationsTooFew.into());
        }
        if max_bound_iterations > 1 && eval_every == 0 {
            return Err(ConfigError::BoundIterationsNeedEval.into());
        }
        if max_bound_iterations > 1 && chunksize < lencorpus {
            log::warn!(
                "using multiple chunks with max_bound_iterations > 1 isn't proven to converge"
            );
        }
        if max_bound_iterations > 1 && passes > 1 {
            log::warn!(
                "using multiple passes with max_bound_iterations > 1 is probably useless, decrease bound_improvement_threshold instead"
            );
        }

        if max_bound_iterations > 1 {
            log::info!(
                "running {} LDA training, {} topics, on a corpus of {} documents, updating the model every {} documents, evaluating perplexity every {} documents, iterating {}x with a convergence threshold of {}, until the bound improves by less than {} times the previous bound or the corpus has been passed over {} times",
                update_type, self.num_topics, lencorpus, update_after, eval_after,
                iterations, gamma_threshold, bound_improvement_threshold,
                passes * max_bound_iterations
            );
        } else {
            log::info!(
                "running {} LDA training, {} topics, {} passes over a corpus of {} documents, updating the model every {} documents, evaluating perplexity every {} documents, iterating {}x with a convergence threshold of {}",
                update_type, self.num_topics, passes, lencorpus, update_after,
                eval_after, iterations, gamma_threshold
            );
        }

        let updates_per_pass = (lencorpus / update_after).max(1);
        if updates_per_pass * passes < 10 && max_bound_iterations == 1 {
            log::warn!(
                "too few updates, training might not converge; consider increasing the number of passes or iterations to improve accuracy"
            );
        }

        let mut outcome = UpdateOutcome::default();
        for pass in 0..passes {
            let base_updates = self.num_updates;
            let mut last_perword_bound = 1e99;
            let mut bound_iterations_run = 0;

            for bound_iteration in 0..max_bound_iterations {
                bound_iterations_run = bound_iteration + 1;
                if bound_iteration > 0 {
                    // every bound-iteration replays the same rho trajectory
                    self.num_updates = base_updates;
                }

                let mut other = LdaState::new(self.eta.clone(), self.num_topics, self.num_terms);
                if let Some(dispatcher) = self.dispatcher.as_mut() {
                    log::info!("initializing {} workers", num_workers);
                    dispatcher.reset(&self.state)?;
                }
                let mut dirty = false;
                let mut reallen = 0usize;
                let mut perword_bound = f64::NAN;
                let mut bound_updated = false;

                let docs = corpus.iter_docs();
                let chunk_groups = docs.chunks(chunksize);
                for (chunk_no, chunk) in (&chunk_groups).into_iter().enumerate() {
                    let chunk = chunk.collect_vec();
                    reallen += chunk.len();

                    if eval_every > 0
                        && (reallen == lencorpus
                            || (chunk_no + 1) % (eval_every * num_workers) == 0)
                    {
                        perword_bound = self.log_perplexity(&chunk, Some(lencorpus));
                        bound_updated = true;
                        outcome.perword_bounds.push(perword_bound);
                    }

                    if let Some(dispatcher) = self.dispatcher.as_mut() {
                        // this blocks once the dispatcher's queue fills up
                        log::info!(
                            "PROGRESS: pass {}, dispatching documents up to #{}/{}",
                            pass,
                            chunk_no * chunksize + chunk.len(),
                            lencorpus
                        );
                        dispatcher.put_job(chunk)?;
                    } else {
                        log::info!(
                            "PROGRESS: pass {}, at document #{}/{}",
                            pass,
                            chunk_no * chunksize + chunk.len(),
                            lencorpus
                        );
                        let gammat = self.do_estep(&chunk, &mut other);
                        if self.optimize_alpha {
                            let rho = self.rho_at(pass, chunksize, decay, offset);
                            self.update_alpha(&gammat, rho);
                        }
                    }
                    dirty = true;

                    if update_every > 0 && (chunk_no + 1) % (update_every * num_workers) == 0 {
                        if let Some(dispatcher) = self.dispatcher.as_mut() {
                            log::info!("reached an update boundary; waiting for all remaining jobs to finish");
                            other = dispatcher.get_state()?;
                        }
                        let rho = self.rho_at(pass, chunksize, decay, offset);
                        self.do_mstep(rho, &other, pass > 0);
                        other.reset();
                        if let Some(dispatcher) = self.dispatcher.as_mut() {
                            dispatcher.reset(&self.state)?;
                        }
                        dirty = false;
                    }
                }

                if reallen != lencorpus {
                    return Err(TrainingError::CorpusMutated {
                        expected: lencorpus,
                        seen: reallen,
                    });
                }

                if dirty {
                    // finish any remaining updates
                    if let Some(dispatcher) = self.dispatcher.as_mut() {
                        log::info!(
                            "reached the end of input; waiting for all remaining jobs to finish"
                        );
                        other = dispatcher.get_state()?;
                    }
                    let rho = self.rho_at(pass, chunksize, decay, offset);
                    self.do_mstep(rho, &other, pass > 0);
                }

                // when eval_every > 1 the bound may be stale; terminating on a
                // stale bound would be spurious, so only a fresh one counts
                if bound_updated {
                    let relative_improvement =
                        (last_perword_bound - perword_bound) / last_perword_bound;
                    log::info!(
                        "EM iteration {}: {:.3} per-word bound, {:.6} improvement",
                        bound_iteration,
                        perword_bound,
                        relative_improvement
                    );
                    if relative_improvement < bound_improvement_threshold {
                        break;
                    }
                    last_perword_bound = perword_bound;
                }
            }
            outcome.bound_iterations = bound_iterations_run;
        }

        Ok(outcome)
    }

    /// M-step: fold the sufficient statistics collected in `other` into the
    /// topics by natural-gradient interpolation, then republish the
    /// `exp(E[log beta])` snapshot.
    pub fn do_mstep(&mut self, rho: f64, other: &LdaState, extra_pass: bool) {
        log::debug!("updating topics");
        let mut diff = self
            .exp_elog_beta
            .iter()
            .map(|row| row.iter().map(|value| value.ln()).collect_vec())
            .collect_vec();
        self.state.blend(rho, other, None);
        for (diff_row, beta_row) in diff.iter_mut().zip_eq(self.state.get_elog_beta().iter()) {
            for (diff_value, beta) in diff_row.iter_mut().zip_eq(beta_row.iter()) {
                *diff_value -= beta;
            }
        }
        self.sync_state();

        if log::log_enabled!(log::Level::Debug) {
            for (topic_id, topic) in self.show_topics(5, 5) {
                log::debug!("topic #{}: {}", topic_id, topic);
            }
        }
        let element_count = (self.num_topics * self.num_terms) as f64;
        let diff_norm =
            diff.iter().flatten().map(|value| value.abs()).sum::<f64>() / element_count;
        log::info!("topic diff={}, rho={}", diff_norm, rho);

        if self.optimize_eta {
            if let Err(error) = self.update_eta(rho) {
                log::warn!("{}", error);
            }
        }

        if !extra_pass {
            // only count documents from the first pass over a corpus
            self.num_updates += other.numdocs();
        }
    }

    /// One Newton update of the document-topic prior `alpha` from the last
    /// batch of `gamma`, following Huang: Maximum Likelihood Estimation of
    /// Dirichlet Distribution Parameters.
    pub fn update_alpha(&mut self, gammat: &[Vec<Probability>], rho: f64) {
        if gammat.is_empty() {
            return;
        }
        let n = gammat.len() as f64;
        let mut logphat = vec![0.0; self.num_topics];
        for gamma_d in gammat {
            for (sum, value) in logphat.iter_mut().zip_eq(dirichlet_expectation_1d(gamma_d)) {
                *sum += value;
            }
        }
        logphat.iter_mut().for_each(|value| *value /= n);

        let step = dirichlet_prior_step(&self.alpha, &logphat, n);
        apply_prior_step(&mut self.alpha, &step, rho, "alpha");
        log::info!("optimized alpha {:?}", self.alpha);
    }

    /// One Newton update of the topic-word prior `eta` from the current
    /// `lambda`. Requires the per-topic column form of `eta`.
    pub fn update_eta(&mut self, rho: f64) -> Result<(), ConfigError> {
        let lambda = self.state.get_lambda();
        let n = self.num_terms as f64;

        let mut logphat = vec![0.0; self.num_topics];
        let mut column = vec![0.0; self.num_topics];
        for w in 0..self.num_terms {
            for (value, row) in column.iter_mut().zip_eq(lambda.iter()) {
                *value = row[w];
            }
            for (sum, value) in logphat.iter_mut().zip_eq(dirichlet_expectation_1d(&column)) {
                *sum += value;
            }
        }
        logphat.iter_mut().for_each(|value| *value /= n);

        let eta = match &mut self.eta {
            Eta::Topic(eta) => eta,
            _ => return Err(ConfigError::EtaNotOptimizable),
        };
        let step = dirichlet_prior_step(eta, &logphat, n);
        apply_prior_step(eta, &step, rho, "eta");
        log::info!("optimized eta {:?}", eta);

        // the state carries its own eta for the lambda view; keep it in step
        self.state.set_eta(self.eta.clone());
        Ok(())
    }

    fn rho_at(&self, pass: usize, chunksize: usize, decay: f64, offset: f64) -> f64 {
        (offset + pass as f64 + self.num_updates as f64 / chunksize as f64).powf(-decay)
    }
}
