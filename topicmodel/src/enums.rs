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

use thiserror::Error;

/// Contradictory or malformed model options, rejected before any training happens.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("cannot compute LDA over an empty vocabulary (no terms)")]
    EmptyVocabulary,
    #[error("at least one topic is required")]
    NoTopics,
    #[error("invalid alpha shape (must match the number of topics: expected {expected}, got {got})")]
    AlphaShape { expected: usize, got: usize },
    #[error("alpha must be strictly positive")]
    NonPositiveAlpha,
    #[error("invalid eta shape (expected {expected}, got {got})")]
    EtaShape { expected: String, got: String },
    #[error("eta must be strictly positive")]
    NonPositiveEta,
    #[error("the batch algorithm requires update_every = 0")]
    BatchUpdateEvery,
    #[error("the batch algorithm requires eval_every > 0")]
    BatchEvalEvery,
    #[error("the batch algorithm does not use multiple chunks")]
    BatchChunked,
    #[error("the batch algorithm does not use multiple passes")]
    BatchPasses,
    #[error("the batch algorithm uses multiple bound iterations")]
    BatchBoundIterations,
    #[error("the online algorithm requires update_every > 0")]
    OnlineUpdateEvery,
    #[error("the online algorithm does not use multiple bound iterations")]
    OnlineBoundIterations,
    #[error("max_bound_iterations must be at least 1")]
    BoundIterationsTooFew,
    #[error("max_bound_iterations > 1 requires batch updates (update_every = 0)")]
    MaxBoundIterationsOnline,
    #[error("eval_every must be enabled (usually 1) for max_bound_iterations > 1")]
    BoundIterationsNeedEval,
    #[error("auto-optimizing alpha is not supported in distributed mode")]
    AutoAlphaDistributed,
    #[error("eta optimization requires a per-topic eta column, not a scalar or matrix")]
    EtaNotOptimizable,
    #[error("failed to initialize distributed LDA: {0}")]
    DispatcherInit(#[from] DispatcherError),
}

/// The errors surfaced by a training run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("input corpus size changed during training (expected {expected} documents, saw {seen}); don't use one-shot generators as input")]
    CorpusMutated { expected: usize, seen: usize },
    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),
}

/// A failure reported by the remote dispatcher. Always fatal for the running update.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatcherError {
    #[error("remote dispatcher failure: {0}")]
    Remote(String),
}

/// The errors while writing a model.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] bincode::Error),
}

/// The errors while reading a model.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Decode(#[from] bincode::Error),
}
