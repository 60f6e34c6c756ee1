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

use std::fmt::Debug;

use crate::corpus::{ChunkSize, Document};
use crate::enums::DispatcherError;
use crate::prior::Eta;
use crate::state::LdaState;
use crate::vocabulary::Vocabulary;

/// A facade over a remote job queue of E-step workers.
///
/// The trainer pushes chunks with [Dispatcher::put_job] and eventually pulls
/// the merged sufficient statistics with [Dispatcher::get_state]. Workers run
/// local E-steps; their states combine by exact summation, so the order in
/// which chunks are absorbed does not matter.
pub trait Dispatcher: Debug + Send + Sync {
    /// Prepares the workers for a new model.
    fn initialize(
        &mut self,
        vocabulary: &Vocabulary,
        num_topics: usize,
        chunksize: ChunkSize,
        alpha: &[f64],
        eta: &Eta,
    ) -> Result<(), DispatcherError>;

    /// Publishes the current state snapshot to all workers and clears their
    /// accumulators.
    fn reset(&mut self, state: &LdaState) -> Result<(), DispatcherError>;

    /// Enqueues a chunk for the workers. May block while the remote queue is
    /// full; that blocking is the trainer's backpressure.
    fn put_job(&mut self, chunk: Vec<Document>) -> Result<(), DispatcherError>;

    /// Blocks until every outstanding job has been absorbed, then returns the
    /// merged state of all workers.
    fn get_state(&mut self) -> Result<LdaState, DispatcherError>;

    /// The number of live workers.
    fn worker_count(&self) -> usize;
}
