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

pub mod corpus;
pub mod dispatch;
pub mod enums;
pub mod math;
pub mod model;
pub mod prior;
pub mod state;
pub mod vocabulary;

pub type TopicTo<T> = Vec<T>;
pub type WordTo<T> = Vec<T>;
pub type DocumentTo<T> = Vec<T>;
pub type Probability = f64;
pub type TopicId = usize;
pub type WordId = usize;

pub use crate::corpus::{ChunkSize, Corpus, Document};
pub use crate::dispatch::Dispatcher;
pub use crate::enums::{ConfigError, DispatcherError, ReadError, TrainingError, WriteError};
pub use crate::model::{Algorithm, LdaOptions, LdaOptionsBuilder, OnlineLda, UpdateOutcome, UpdateOverrides};
pub use crate::prior::{AlphaConfig, Eta, EtaConfig};
pub use crate::state::LdaState;
pub use crate::vocabulary::Vocabulary;
