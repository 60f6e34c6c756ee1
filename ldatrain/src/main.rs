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

use std::error::Error;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::process::ExitCode;

use ldatrain_topicmodel::{Algorithm, Document, LdaOptions, OnlineLda, Vocabulary};

const USAGE: &str = "usage: ldatrain <corpus.json> [options]

The corpus is a JSON array of documents, each an array of [term_id, count]
pairs.

options:
    --topics N              number of latent topics (default 100)
    --passes N              passes over the corpus
    --algorithm batch|online
    --seed N                seed for the variational initialization
    --vocabulary FILE       JSON array of words, indexed by term id
    --top-words N           words to print per topic (default 10)
    --save FILE             write the trained model to FILE";

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ldatrain: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut corpus_path: Option<PathBuf> = None;
    let mut vocabulary_path: Option<PathBuf> = None;
    let mut save_path: Option<PathBuf> = None;
    let mut num_topics = 100usize;
    let mut passes: Option<usize> = None;
    let mut algorithm: Option<Algorithm> = None;
    let mut seed = 0u64;
    let mut top_words = 10usize;

    fn value_of(
        args: &mut impl Iterator<Item = String>,
        name: &str,
    ) -> Result<String, Box<dyn Error>> {
        args.next().ok_or_else(|| format!("{name} needs a value").into())
    }

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--topics" => num_topics = value_of(&mut args, "--topics")?.parse()?,
            "--passes" => passes = Some(value_of(&mut args, "--passes")?.parse()?),
            "--algorithm" => algorithm = Some(value_of(&mut args, "--algorithm")?.parse()?),
            "--seed" => seed = value_of(&mut args, "--seed")?.parse()?,
            "--vocabulary" => vocabulary_path = Some(value_of(&mut args, "--vocabulary")?.into()),
            "--top-words" => top_words = value_of(&mut args, "--top-words")?.parse()?,
            "--save" => save_path = Some(value_of(&mut args, "--save")?.into()),
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            _ if corpus_path.is_none() && !arg.starts_with('-') => {
                corpus_path = Some(arg.into());
            }
            _ => return Err(format!("unknown argument {arg:?}\n{USAGE}").into()),
        }
    }
    let Some(corpus_path) = corpus_path else {
        return Err(USAGE.into());
    };

    let reader = BufReader::new(File::open(&corpus_path)?);
    let bows: Vec<Vec<(u32, f32)>> = serde_json::from_reader(reader)?;
    let corpus: Vec<Document> = bows.into_iter().map(Document::from_pairs).collect();
    log::info!(
        "loaded {} documents from {}",
        corpus.len(),
        corpus_path.display()
    );

    let vocabulary = match vocabulary_path {
        Some(path) => {
            let words: Vec<String> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
            Vocabulary::from_words(words)
        }
        None => Vocabulary::from_corpus(&corpus),
    };

    let mut builder = LdaOptions::builder();
    builder.num_topics(num_topics).seed(seed);
    if let Some(passes) = passes {
        builder.passes(passes);
    }
    if let Some(algorithm) = algorithm {
        builder.algorithm(algorithm);
    }
    let options = builder.build()?;

    let mut model = OnlineLda::new(options, vocabulary)?;
    model.update(&corpus)?;

    let perword_bound = model.log_perplexity(&corpus, None);
    println!(
        "per-word bound {perword_bound:.4}, perplexity {:.1}",
        (-perword_bound).exp2()
    );
    for (topic_id, topic) in model.show_topics(model.num_topics(), top_words) {
        println!("topic #{topic_id}: {topic}");
    }

    if let Some(path) = save_path {
        model.save(&path)?;
        println!("model written to {}", path.display());
    }

    Ok(())
}
