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

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::Compression;
use itertools::Itertools;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Gamma;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumString};

use crate::corpus::{ChunkSize, Document};
use crate::dispatch::Dispatcher;
use crate::enums::{ConfigError, ReadError, WriteError};
use crate::prior::{AlphaConfig, Eta, EtaConfig};
use crate::state::LdaState;
use crate::vocabulary::Vocabulary;
use crate::{Probability, TopicId, TopicTo, WordTo};

mod bound;
mod inference;
mod update;

pub use update::{UpdateOutcome, UpdateOverrides};

/// The preset macro choosing between the two variational Bayes schedules.
#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    StrumDisplay,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Algorithm {
    /// One chunk per pass, M-step at the end, bound-iterations allowed.
    Batch,
    /// Mini-batch updates with the stochastic natural-gradient schedule.
    Online,
}

/// The construction-time options of an [OnlineLda].
///
/// Fields the [Algorithm] presets may default are optional; they resolve at
/// construction, and contradictions with a chosen preset are rejected there.
#[derive(Debug, Clone, derive_builder::Builder)]
pub struct LdaOptions {
    pub num_topics: usize,
    #[builder(default)]
    pub alpha: AlphaConfig,
    #[builder(default)]
    pub eta: EtaConfig,
    #[builder(default, setter(strip_option))]
    pub algorithm: Option<Algorithm>,
    #[builder(default, setter(strip_option))]
    pub chunksize: Option<ChunkSize>,
    #[builder(default, setter(strip_option))]
    pub passes: Option<usize>,
    /// `0` defers the M-step to the end of each pass (batch updates).
    #[builder(default, setter(strip_option))]
    pub update_every: Option<usize>,
    /// `0` disables bound evaluation.
    #[builder(default, setter(strip_option))]
    pub eval_every: Option<usize>,
    #[builder(default = "50")]
    pub iterations: usize,
    #[builder(default = "0.001")]
    pub gamma_threshold: f64,
    #[builder(default = "0.5")]
    pub decay: f64,
    #[builder(default = "1.0")]
    pub offset: f64,
    #[builder(default = "0.01")]
    pub minimum_probability: f64,
    #[builder(default, setter(strip_option))]
    pub max_bound_iterations: Option<usize>,
    #[builder(default = "0.001")]
    pub bound_improvement_threshold: f64,
    #[builder(default = "0")]
    pub seed: u64,
}

impl LdaOptions {
    pub fn builder() -> LdaOptionsBuilder {
        LdaOptionsBuilder::default()
    }
}

struct ResolvedSchedule {
    chunksize: ChunkSize,
    passes: usize,
    update_every: usize,
    eval_every: usize,
    max_bound_iterations: usize,
}

fn resolve_schedule(options: &LdaOptions) -> Result<ResolvedSchedule, ConfigError> {
    let mut chunksize = options.chunksize;
    let mut passes = options.passes;
    let mut update_every = options.update_every;
    let mut eval_every = options.eval_every;
    let mut max_bound_iterations = options.max_bound_iterations;

    match options.algorithm {
        Some(Algorithm::Batch) => {
            match update_every {
                None => update_every = Some(0),
                Some(0) => {}
                Some(_) => return Err(ConfigError::BatchUpdateEvery),
            }
            match eval_every {
                None => eval_every = Some(1),
                Some(0) => return Err(ConfigError::BatchEvalEvery),
                Some(_) => {}
            }
            match chunksize {
                None => chunksize = Some(ChunkSize::All),
                Some(ChunkSize::All) => {}
                Some(ChunkSize::Docs(_)) => return Err(ConfigError::BatchChunked),
            }
            match passes {
                None => passes = Some(1),
                Some(p) if p > 1 => return Err(ConfigError::BatchPasses),
                Some(_) => {}
            }
            match max_bound_iterations {
                None => max_bound_iterations = Some(1000),
                Some(m) if m <= 1 => return Err(ConfigError::BatchBoundIterations),
                Some(_) => {}
            }
        }
        Some(Algorithm::Online) => {
            match update_every {
                None => update_every = Some(1),
                Some(0) => return Err(ConfigError::OnlineUpdateEvery),
                Some(_) => {}
            }
            match max_bound_iterations {
                None => max_bound_iterations = Some(1),
                Some(1) => {}
                Some(_) => return Err(ConfigError::OnlineBoundIterations),
            }
        }
        None => {}
    }

    Ok(ResolvedSchedule {
        chunksize: chunksize.unwrap_or_default(),
        passes: passes.unwrap_or(1),
        update_every: update_every.unwrap_or(1),
        eval_every: eval_every.unwrap_or(10),
        max_bound_iterations: max_bound_iterations.unwrap_or(1),
    })
}

/// An online/batch variational Bayes estimator for Latent Dirichlet
/// Allocation over a fixed vocabulary.
///
/// Training is streamed: documents arrive in chunks, the per-document E-step
/// infers variational topic weights `gamma`, and the M-step folds the
/// collected sufficient statistics into the topic-word parameters `lambda`
/// with the stochastic schedule of Hoffman, Blei, Bach: Online Learning for
/// Latent Dirichlet Allocation, NIPS 2010. Memory stays constant in the
/// corpus size.
#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineLda {
    vocabulary: Vocabulary,
    num_topics: usize,
    num_terms: usize,
    alpha: Vec<f64>,
    eta: Eta,
    optimize_alpha: bool,
    optimize_eta: bool,
    chunksize: ChunkSize,
    passes: usize,
    update_every: usize,
    eval_every: usize,
    iterations: usize,
    gamma_threshold: f64,
    decay: f64,
    offset: f64,
    minimum_probability: f64,
    max_bound_iterations: usize,
    bound_improvement_threshold: f64,
    seed: u64,
    num_updates: usize,
    state: LdaState,
    /// Denormalized cache of `exp(E[log beta])`, re-synced after every M-step
    /// and read-only inside a chunk's E-step.
    #[serde(skip)]
    exp_elog_beta: TopicTo<WordTo<Probability>>,
    #[serde(skip)]
    dispatcher: Option<Box<dyn Dispatcher>>,
}

impl OnlineLda {
    /// Creates a single-node model. The variational `lambda` starts from a
    /// seeded `Gamma(100, 1/100)` draw; call [OnlineLda::update] to train.
    pub fn new(options: LdaOptions, vocabulary: Vocabulary) -> Result<Self, ConfigError> {
        Self::construct(options, vocabulary, None)
    }

    /// Creates a model whose E-steps run on a cluster behind `dispatcher`.
    pub fn with_dispatcher(
        options: LdaOptions,
        vocabulary: Vocabulary,
        dispatcher: Box<dyn Dispatcher>,
    ) -> Result<Self, ConfigError> {
        Self::construct(options, vocabulary, Some(dispatcher))
    }

    fn construct(
        options: LdaOptions,
        vocabulary: Vocabulary,
        mut dispatcher: Option<Box<dyn Dispatcher>>,
    ) -> Result<Self, ConfigError> {
        let num_terms = vocabulary.num_terms();
        if num_terms == 0 {
            return Err(ConfigError::EmptyVocabulary);
        }
        if options.num_topics == 0 {
            return Err(ConfigError::NoTopics);
        }
        let num_topics = options.num_topics;

        let schedule = resolve_schedule(&options)?;
        let (alpha, optimize_alpha) = options.alpha.resolve(num_topics)?;
        let (eta, optimize_eta) = options.eta.resolve(num_topics, num_terms)?;

        if let Some(dispatcher) = dispatcher.as_mut() {
            if optimize_alpha {
                return Err(ConfigError::AutoAlphaDistributed);
            }
            dispatcher.initialize(&vocabulary, num_topics, schedule.chunksize, &alpha, &eta)?;
            log::info!(
                "using distributed version with {} workers",
                dispatcher.worker_count()
            );
        } else {
            log::info!("using serial LDA version on this node");
        }

        let mut state = LdaState::new(eta.clone(), num_topics, num_terms);
        let gamma = Gamma::new(100.0, 1.0 / 100.0).unwrap();
        let mut rng = StdRng::seed_from_u64(options.seed);
        *state.sstats_mut() = gamma
            .sample_iter(&mut rng)
            .take(num_topics * num_terms)
            .chunks(num_terms)
            .into_iter()
            .map(|row| row.collect_vec())
            .collect_vec();

        let mut model = Self {
            vocabulary,
            num_topics,
            num_terms,
            alpha,
            eta,
            optimize_alpha,
            optimize_eta,
            chunksize: schedule.chunksize,
            passes: schedule.passes,
            update_every: schedule.update_every,
            eval_every: schedule.eval_every,
            iterations: options.iterations,
            gamma_threshold: options.gamma_threshold,
            decay: options.decay,
            offset: options.offset,
            minimum_probability: options.minimum_probability,
            max_bound_iterations: schedule.max_bound_iterations,
            bound_improvement_threshold: options.bound_improvement_threshold,
            seed: options.seed,
            num_updates: 0,
            state,
            exp_elog_beta: Vec::new(),
            dispatcher,
        };
        model.sync_state();
        Ok(model)
    }

    /// Recomputes the `exp(E[log beta])` cache from the current `lambda`.
    /// Must run after every change to the state; the E-step reads only this
    /// snapshot.
    pub fn sync_state(&mut self) {
        self.exp_elog_beta = self
            .state
            .get_elog_beta()
            .into_iter()
            .map(|row| row.into_iter().map(f64::exp).collect_vec())
            .collect_vec();
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    pub fn num_terms(&self) -> usize {
        self.num_terms
    }

    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    pub fn eta(&self) -> &Eta {
        &self.eta
    }

    pub fn state(&self) -> &LdaState {
        &self.state
    }

    pub fn num_updates(&self) -> usize {
        self.num_updates
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    delegate::delegate! {
        to self.vocabulary {
            pub fn get_word(&self, id: usize) -> Option<&str>;
        }
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.dispatcher
            .as_ref()
            .map(|dispatcher| dispatcher.worker_count())
            .unwrap_or(1)
    }

    /// The `num_words` most probable words of topic `topic_id`, with their
    /// normalized probabilities.
    pub fn show_topic(&self, topic_id: TopicId, num_words: usize) -> Vec<(Probability, &str)> {
        let lambda = self.state.get_lambda();
        let topic = &lambda[topic_id];
        let sum = topic.iter().sum::<f64>();
        topic
            .iter()
            .enumerate()
            .map(|(word_id, value)| (value / sum, word_id))
            .sorted_by(|a, b| b.0.total_cmp(&a.0))
            .take(num_words)
            .map(|(probability, word_id)| {
                (
                    probability,
                    self.vocabulary.get_word(word_id).unwrap_or("<unknown>"),
                )
            })
            .collect_vec()
    }

    /// [OnlineLda::show_topic], formatted as a single string.
    pub fn print_topic(&self, topic_id: TopicId, num_words: usize) -> String {
        self.show_topic(topic_id, num_words)
            .into_iter()
            .map(|(probability, word)| format!("{:.3}*{}", probability, word))
            .join(" + ")
    }

    /// Formats up to `num_topics` topics. When fewer than all topics are
    /// requested, the topics with the smallest and largest `alpha` are chosen
    /// (there is no natural ordering between LDA topics).
    pub fn show_topics(&self, num_topics: usize, num_words: usize) -> Vec<(TopicId, String)> {
        let chosen: Vec<TopicId> = if num_topics >= self.num_topics {
            (0..self.num_topics).collect_vec()
        } else {
            let sorted = self
                .alpha
                .iter()
                .enumerate()
                .sorted_by(|a, b| a.1.total_cmp(b.1))
                .map(|(topic_id, _)| topic_id)
                .collect_vec();
            let head = num_topics / 2;
            let tail = num_topics - head;
            sorted[..head]
                .iter()
                .chain(sorted[sorted.len() - tail..].iter())
                .copied()
                .collect_vec()
        };

        chosen
            .into_iter()
            .map(|topic_id| (topic_id, self.print_topic(topic_id, num_words)))
            .collect_vec()
    }

    /// The topic distribution of `doc`, as `(topic_id, probability)` pairs
    /// with probabilities below the filter threshold dropped.
    pub fn get_document_topics(
        &self,
        doc: &Document,
        minimum_probability: Option<f64>,
    ) -> Vec<(TopicId, Probability)> {
        let minimum_probability = minimum_probability.unwrap_or(self.minimum_probability);
        let (gamma, _) = self.inference(std::slice::from_ref(doc), false);
        let sum = gamma[0].iter().sum::<f64>();
        gamma[0]
            .iter()
            .enumerate()
            .map(|(topic_id, value)| (topic_id, value / sum))
            .filter(|(_, probability)| *probability >= minimum_probability)
            .collect_vec()
    }

    /// Writes the model (including the state with its `sstats` matrix) as a
    /// deflate-compressed bincode stream.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WriteError> {
        let file = File::create(path)?;
        let mut writer =
            flate2::write::DeflateEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut writer, self)?;
        writer.finish()?;
        Ok(())
    }

    /// Loads a model written by [OnlineLda::save]. The `exp(E[log beta])`
    /// cache is rebuilt; a dispatcher is never restored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReadError> {
        let file = File::open(path)?;
        let reader = flate2::read::DeflateDecoder::new(BufReader::new(file));
        let mut model: OnlineLda = bincode::deserialize_from(reader)?;
        model.sync_state();
        Ok(model)
    }
}

impl Display for OnlineLda {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "OnlineLda(num_terms={}, num_topics={}, decay={}, chunksize={:?})",
            self.num_terms, self.num_topics, self.decay, self.chunksize
        )
    }
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use itertools::Itertools;

    use crate::corpus::{ChunkSize, Document};
    use crate::enums::ConfigError;
    use crate::math::dirichlet_expectation_2d;
    use crate::prior::{AlphaConfig, Eta, EtaConfig};
    use crate::vocabulary::Vocabulary;

    use super::{Algorithm, LdaOptions, OnlineLda};

    fn small_vocabulary() -> Vocabulary {
        Vocabulary::from_words(["a", "b", "c", "d"])
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        let options = LdaOptions::builder().num_topics(2).build().unwrap();
        assert_eq!(
            OnlineLda::new(options, Vocabulary::new()).unwrap_err(),
            ConfigError::EmptyVocabulary
        );
    }

    #[test]
    fn batch_preset_fills_defaults() {
        let options = LdaOptions::builder()
            .num_topics(2)
            .algorithm(Algorithm::Batch)
            .build()
            .unwrap();
        let model = OnlineLda::new(options, small_vocabulary()).unwrap();
        assert_eq!(model.update_every, 0);
        assert_eq!(model.eval_every, 1);
        assert_eq!(model.chunksize, ChunkSize::All);
        assert_eq!(model.passes, 1);
        assert_eq!(model.max_bound_iterations, 1000);
    }

    #[test]
    fn batch_preset_rejects_contradictions() {
        let cases = [
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Batch)
                    .update_every(1)
                    .build()
                    .unwrap(),
                ConfigError::BatchUpdateEvery,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Batch)
                    .eval_every(0)
                    .build()
                    .unwrap(),
                ConfigError::BatchEvalEvery,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Batch)
                    .chunksize(ChunkSize::Docs(16))
                    .build()
                    .unwrap(),
                ConfigError::BatchChunked,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Batch)
                    .passes(3)
                    .build()
                    .unwrap(),
                ConfigError::BatchPasses,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Batch)
                    .max_bound_iterations(1)
                    .build()
                    .unwrap(),
                ConfigError::BatchBoundIterations,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Online)
                    .update_every(0)
                    .build()
                    .unwrap(),
                ConfigError::OnlineUpdateEvery,
            ),
            (
                LdaOptions::builder()
                    .num_topics(2)
                    .algorithm(Algorithm::Online)
                    .max_bound_iterations(5)
                    .build()
                    .unwrap(),
                ConfigError::OnlineBoundIterations,
            ),
        ];
        for (options, expected) in cases {
            assert_eq!(
                OnlineLda::new(options, small_vocabulary()).unwrap_err(),
                expected
            );
        }
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("batch".parse::<Algorithm>().unwrap(), Algorithm::Batch);
        assert_eq!("online".parse::<Algorithm>().unwrap(), Algorithm::Online);
        assert!("gibbs".parse::<Algorithm>().is_err());
    }

    #[test]
    fn alpha_and_eta_are_resolved_at_construction() {
        let options = LdaOptions::builder()
            .num_topics(2)
            .alpha(AlphaConfig::Explicit(vec![0.3, 0.7]))
            .eta(EtaConfig::Scalar(0.25))
            .build()
            .unwrap();
        let model = OnlineLda::new(options, small_vocabulary()).unwrap();
        assert_eq!(model.alpha(), &[0.3, 0.7]);
        assert_eq!(model.eta(), &Eta::Scalar(0.25));
    }

    #[test]
    fn initial_state_is_synced_and_positive() {
        let options = LdaOptions::builder().num_topics(3).seed(11).build().unwrap();
        let model = OnlineLda::new(options, small_vocabulary()).unwrap();

        let lambda = model.state().get_lambda();
        assert!(lambda.iter().flatten().all(|value| *value > 0.0));

        let expected = dirichlet_expectation_2d(&lambda)
            .map(|row| row.into_iter().map(f64::exp).collect_vec())
            .collect_vec();
        for (cached, fresh) in model.exp_elog_beta.iter().zip_eq(expected.iter()) {
            for (a, b) in cached.iter().zip_eq(fresh.iter()) {
                assert_relative_eq!(a, b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn construction_is_deterministic_under_a_seed() {
        let build = || {
            let options = LdaOptions::builder().num_topics(2).seed(7).build().unwrap();
            OnlineLda::new(options, small_vocabulary()).unwrap()
        };
        assert_eq!(build().state().sstats(), build().state().sstats());
    }

    #[test]
    fn topic_printing_uses_the_vocabulary() {
        let options = LdaOptions::builder().num_topics(2).build().unwrap();
        let model = OnlineLda::new(options, small_vocabulary()).unwrap();
        let shown = model.show_topic(0, 2);
        assert_eq!(shown.len(), 2);
        assert!(shown[0].0 >= shown[1].0);
        assert!(["a", "b", "c", "d"].contains(&shown[0].1));
        let formatted = model.print_topic(0, 2);
        assert!(formatted.contains('*'));

        let all = model.show_topics(5, 2);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.lda");

        let options = LdaOptions::builder()
            .num_topics(2)
            .seed(3)
            .eta(EtaConfig::Auto)
            .build()
            .unwrap();
        let mut model = OnlineLda::new(options, small_vocabulary()).unwrap();
        let corpus = vec![
            Document::from_pairs(vec![(0, 3.0), (1, 3.0)]),
            Document::from_pairs(vec![(2, 3.0), (3, 3.0)]),
        ];
        model.update(&corpus).unwrap();
        model.save(&path).unwrap();

        let loaded = OnlineLda::load(&path).unwrap();
        assert_eq!(loaded.alpha(), model.alpha());
        assert_eq!(loaded.eta(), model.eta());
        assert_eq!(loaded.num_updates(), model.num_updates());
        assert_eq!(loaded.state().sstats(), model.state().sstats());
        assert_eq!(loaded.state().get_lambda(), model.state().get_lambda());
        assert_eq!(loaded.exp_elog_beta, model.exp_elog_beta);
        assert_eq!(loaded.vocabulary(), model.vocabulary());
    }
}
