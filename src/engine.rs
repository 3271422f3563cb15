use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::Array2;
use rayon::prelude::*;

use crate::alias::AliasSlice;
use crate::config::LdaConfig;
use crate::data_block::DataBlock;
use crate::doc_counter::DocCounter;
use crate::error::{LdaError, Result};
use crate::likelihood;
use crate::model::{DeltaLog, DeltaOverlay, DirectModel, ModelStore, SummaryRow};
use crate::rng::Xorshift;
use crate::sampler::{CyclicSampler, SamplerStats};
use crate::vocab::LocalVocab;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LogLikelihood {
    pub doc: f64,
    pub word: f64,
    pub total: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct IterationReport {
    pub iteration: usize,
    pub seconds: f64,
    pub num_tokens: usize,
    pub stats: SamplerStats,
    pub log_likelihood: Option<LogLikelihood>,
}

/// What a finished run looks like, written as JSON by the binary.
#[derive(Serialize, Deserialize, Debug)]
pub struct ModelSummary {
    pub config: LdaConfig,
    pub num_docs: usize,
    pub num_tokens: usize,
    pub summary: SummaryRow,
    /// Document-topic mixtures, one row per document.
    pub theta: Array2<f64>,
    /// Most frequent `(word, count)` pairs of each topic.
    pub topics: Vec<Vec<(u32, i32)>>,
}

pub struct LdaEngine {
    config: LdaConfig,
    vocab: LocalVocab,
    store: ModelStore,
    block: DataBlock,
    samplers: Vec<CyclicSampler>,
    iteration: usize,
    output_prefix: Option<PathBuf>,
}

fn seed_rng(seed: Option<u64>) -> Xorshift {
    match seed {
        Some(s) => Xorshift::new((s ^ (s >> 32)) as u32),
        None => Xorshift::from_rng(&mut rand::thread_rng()),
    }
}

impl LdaEngine {
    /// Validate the run, lay out the vocabulary slices and count the
    /// block's initial assignments.
    pub fn new(mut config: LdaConfig, block: DataBlock) -> Result<LdaEngine> {
        if config.num_vocabs == 0 {
            config.num_vocabs = block.num_vocabs();
        }
        if config.num_vocabs == 0 || block.num_tokens() == 0 {
            return Err(LdaError::Config("the corpus has no tokens".into()));
        }
        config.validate()?;
        block.validate(config.num_vocabs, config.num_topics)?;

        let mut vocab = LocalVocab::from_documents(block.documents(), config.num_topics, config.load_factor);
        vocab.generate_slices(config.model_max_capacity, config.alias_max_capacity);
        let store = ModelStore::from_documents(&vocab, block.documents())?;

        let mut seeder = seed_rng(config.seed);
        let samplers = (0..config.num_worker_threads)
            .map(|_| CyclicSampler::new(&config, Xorshift::from_rng(&mut seeder)))
            .collect();

        info!(
            "K = {}, V = {}, docs = {}, tokens = {}, words = {}, workers = {}",
            config.num_topics,
            config.num_vocabs,
            block.len(),
            block.num_tokens(),
            vocab.num_words(),
            config.num_worker_threads
        );
        Ok(LdaEngine {
            config,
            vocab,
            store,
            block,
            samplers,
            iteration: 0,
            output_prefix: None,
        })
    }

    /// Periodic model dumps go to `<prefix>.word_topic.<iteration>`.
    pub fn set_output_prefix<P: AsRef<Path>>(&mut self, prefix: P) {
        self.output_prefix = Some(prefix.as_ref().to_path_buf());
    }

    pub fn config(&self) -> &LdaConfig {
        &self.config
    }

    pub fn vocab(&self) -> &LocalVocab {
        &self.vocab
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn block(&self) -> &DataBlock {
        &self.block
    }

    pub fn into_block(self) -> DataBlock {
        self.block
    }

    /// Run `num_iterations` passes, calling `on_iteration` after each.
    pub fn train<F>(&mut self, mut on_iteration: F) -> Result<Vec<IterationReport>>
        where F: FnMut(&IterationReport)
    {
        let mut reports = Vec::with_capacity(self.config.num_iterations);
        for _ in 0..self.config.num_iterations {
            let report = self.run_iteration()?;
            on_iteration(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    /// One pass over every slice and every document.
    pub fn run_iteration(&mut self) -> Result<IterationReport> {
        let timer = Instant::now();
        for sampler in self.samplers.iter_mut() {
            sampler.zero_statistics();
        }
        for slice_id in 0..self.vocab.num_slices() {
            self.sample_slice(slice_id)?;
        }
        if cfg!(debug_assertions) {
            self.store.check_invariants(&self.vocab)?;
        }

        let mut stats = SamplerStats::default();
        for sampler in &self.samplers {
            stats.merge(&sampler.statistics());
        }
        let seconds = timer.elapsed().as_secs_f64();
        let iteration = self.iteration;
        self.iteration += 1;
        info!(
            "Iter = {}, elapsed = {:.3}s, tokens = {}, throughput = {:.0} tokens/s",
            iteration,
            seconds,
            stats.num_sampled,
            stats.num_sampled as f64 / seconds.max(1e-9)
        );
        info!(
            "Sampled = {}, changed = {}, accept ratio = {:.4}",
            stats.num_sampled,
            stats.num_changed,
            stats.acceptance_rate()
        );

        let log_likelihood = match self.config.compute_ll_interval {
            Some(interval) if iteration % interval == 0 => Some(self.log_likelihood()?),
            _ => None,
        };
        if let (Some(interval), Some(prefix)) = (self.config.dump_model_interval, self.output_prefix.as_ref()) {
            if (iteration + 1) % interval == 0 {
                let mut name = prefix.clone().into_os_string();
                name.push(format!(".word_topic.{}", iteration));
                self.dump_word_topic(PathBuf::from(name))?;
            }
        }

        Ok(IterationReport {
            iteration,
            seconds,
            num_tokens: self.block.num_tokens(),
            stats,
            log_likelihood,
        })
    }

    fn sample_slice(&mut self, slice_id: usize) -> Result<()> {
        let LdaEngine { config, vocab, store, block, samplers, .. } = self;
        let timer = Instant::now();
        let alias = AliasSlice::build(vocab, store.slice(slice_id), store.summary(), config.beta, config.beta_sum());
        let meta = vocab.slice(slice_id);
        debug!(
            "Slice {}: {} words, alias built in {:.3}s",
            slice_id,
            meta.len(),
            timer.elapsed().as_secs_f64()
        );

        let docs = block.documents_mut();
        if samplers.len() == 1 {
            let (slice, summary) = store.slice_and_summary_mut(slice_id);
            let mut model = DirectModel::new(slice, summary);
            let sampler = &mut samplers[0];
            for doc in docs.iter_mut() {
                sampler.sample_one_doc(doc, meta, &alias, &mut model)?;
            }
            return Ok(());
        }

        // Workers see the slice as of the pass start plus their own commits.
        let chunk_size = ((docs.len() + samplers.len() - 1) / samplers.len()).max(1);
        let logs: Vec<DeltaLog> = {
            let slice = store.slice(slice_id);
            let summary = store.summary();
            docs.par_chunks_mut(chunk_size)
                .zip(samplers.par_iter_mut())
                .map(|(docs, sampler)| -> Result<DeltaLog> {
                    let mut overlay = DeltaOverlay::new(slice, summary);
                    for doc in docs.iter_mut() {
                        sampler.sample_one_doc(doc, meta, &alias, &mut overlay)?;
                    }
                    Ok(overlay.into_log())
                })
                .collect::<Result<Vec<DeltaLog>>>()?
        };
        let (slice, summary) = store.slice_and_summary_mut(slice_id);
        for log in &logs {
            log.merge_into(slice, summary)?;
        }
        Ok(())
    }

    /// Resample the topics of `block` against the trained model, which is
    /// left unchanged. Words unknown to the model are skipped.
    pub fn infer(&mut self, block: &mut DataBlock, num_iterations: usize) -> Result<()> {
        let LdaEngine { config, vocab, store, samplers, .. } = self;
        block.validate(config.num_vocabs, config.num_topics)?;
        let sampler = &mut samplers[0];
        for _ in 0..num_iterations {
            for slice_id in 0..vocab.num_slices() {
                let alias = AliasSlice::build(vocab, store.slice(slice_id), store.summary(), config.beta, config.beta_sum());
                let frozen = DeltaOverlay::new(store.slice(slice_id), store.summary());
                for doc in block.documents_mut() {
                    sampler.infer_one_doc(doc, vocab.slice(slice_id), &alias, &frozen)?;
                }
            }
        }
        Ok(())
    }

    pub fn log_likelihood(&self) -> Result<LogLikelihood> {
        let num_topics = self.config.num_topics;
        let doc_llhs = self
            .block
            .documents()
            .par_iter()
            .map_init(DocCounter::default, |counter, doc| likelihood::doc_log_likelihood(doc, num_topics, counter))
            .collect::<Result<Vec<f64>>>()?;
        let doc: f64 = doc_llhs.iter().sum();

        let mut word = 0.0;
        for slice in self.store.slices() {
            word += likelihood::word_log_likelihood(slice, self.config.beta)?;
        }
        word += likelihood::normalize_word_log_likelihood(self.store.summary(), self.config.beta, self.config.num_vocabs)?;

        let llh = LogLikelihood { doc, word, total: doc + word };
        info!("doc likelihood = {:.6e}, word likelihood = {:.6e}, total = {:.6e}", llh.doc, llh.word, llh.total);
        Ok(llh)
    }

    /// One line per word with counts: `word t:c t:c ...`, topics ascending.
    pub fn dump_word_topic<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut out = BufWriter::new(File::create(path.as_ref())?);
        self.write_word_topic(&mut out)?;
        out.flush()?;
        info!("Dumped word-topic table to {}", path.as_ref().display());
        Ok(())
    }

    pub fn write_word_topic<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut pairs = Vec::new();
        for slice in self.store.slices() {
            for (word, row) in slice.rows() {
                pairs.clear();
                pairs.extend(row.iter());
                if pairs.is_empty() {
                    continue;
                }
                pairs.sort();
                write!(out, "{}", word)?;
                for &(topic, count) in &pairs {
                    write!(out, " {}:{}", topic, count)?;
                }
                writeln!(out)?;
            }
        }
        Ok(())
    }

    /// Word ids of each topic with their counts, most frequent first.
    pub fn top_words(&self, top_n: usize) -> Vec<Vec<(u32, i32)>> {
        let mut topics: Vec<Vec<(u32, i32)>> = vec![Vec::new(); self.config.num_topics];
        for slice in self.store.slices() {
            for (word, row) in slice.rows() {
                for (topic, count) in row.iter() {
                    topics[topic as usize].push((word, count));
                }
            }
        }
        for words in topics.iter_mut() {
            words.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            words.truncate(top_n);
        }
        topics
    }

    /// Smoothed `θ_dk = (n_dk + α) / (N_d + αK)`.
    pub fn doc_topic_matrix(&self) -> Array2<f64> {
        let num_topics = self.config.num_topics;
        let mut theta = Array2::zeros((self.block.len(), num_topics));
        for (d, doc) in self.block.documents().iter().enumerate() {
            let denom = doc.len() as f64 + self.config.alpha_sum();
            for k in 0..num_topics {
                theta[[d, k]] = self.config.alpha / denom;
            }
            for token in doc.tokens() {
                theta[[d, token.topic as usize]] += 1.0 / denom;
            }
        }
        theta
    }

    pub fn summary(&self, top_n: usize) -> ModelSummary {
        ModelSummary {
            config: self.config.clone(),
            num_docs: self.block.len(),
            num_tokens: self.block.num_tokens(),
            summary: self.store.summary().clone(),
            theta: self.doc_topic_matrix(),
            topics: self.top_words(top_n),
        }
    }

    /// `Topic k: p*word ...` with `p = (n_kw + β) / (n_k + βV)`.
    pub fn print_topics_by<W, T, F>(&self, out: &mut W, top_n: usize, mut f: F) -> io::Result<()>
        where W: Write, T: fmt::Display, F: FnMut(u32) -> T
    {
        let summary = self.store.summary();
        for (k, words) in self.top_words(top_n).into_iter().enumerate() {
            write!(out, "Topic {}:", k)?;
            let denom = summary.get(k as u32) as f64 + self.config.beta_sum();
            for (word, count) in words {
                write!(out, " {:.6}*{}", (count as f64 + self.config.beta) / denom, f(word))?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Token};

    fn block() -> DataBlock {
        DataBlock::new(vec![
            Document::new(vec![Token { word: 0, topic: 0 }, Token { word: 1, topic: 1 }, Token { word: 1, topic: 1 }]),
            Document::new(vec![Token { word: 2, topic: 1 }, Token { word: 0, topic: 0 }]),
        ])
    }

    fn config() -> LdaConfig {
        LdaConfig { num_topics: 2, num_iterations: 3, seed: Some(1), ..LdaConfig::default() }
    }

    #[test]
    fn vocab_size_is_derived_from_block() {
        let engine = LdaEngine::new(config(), block()).unwrap();
        assert_eq!(engine.config().num_vocabs, 3);
        assert_eq!(engine.store().summary().total(), 5);
    }

    #[test]
    fn empty_corpus_is_rejected() {
        match LdaEngine::new(config(), DataBlock::new(vec![Document::new(vec![])])) {
            Err(LdaError::Config(_)) => {}
            Err(e) => panic!("unexpected error {}", e),
            Ok(_) => panic!("an empty corpus was accepted"),
        }
    }

    #[test]
    fn out_of_range_topics_are_rejected_at_load() {
        let bad = DataBlock::new(vec![Document::new(vec![Token { word: 0, topic: 5 }])]);
        assert!(LdaEngine::new(config(), bad).is_err());
    }

    #[test]
    fn dump_lists_each_word_with_counts() {
        let engine = LdaEngine::new(config(), block()).unwrap();
        let mut out = Vec::new();
        engine.write_word_topic(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "0 0:2\n1 1:2\n2 1:1\n");
    }

    #[test]
    fn theta_rows_are_distributions() {
        let mut engine = LdaEngine::new(config(), block()).unwrap();
        engine.train(|_| {}).unwrap();
        let theta = engine.doc_topic_matrix();
        assert_eq!(theta.shape(), &[2, 2]);
        for row in theta.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
        let summary = engine.summary(5);
        assert_eq!(summary.topics.len(), 2);
        assert_eq!(summary.summary.total(), 5);
    }

    #[test]
    fn print_topics_uses_given_labels() {
        let engine = LdaEngine::new(config(), block()).unwrap();
        let mut out = Vec::new();
        engine.print_topics_by(&mut out, 1, |w| format!("w{}", w)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Topic 0: "));
        assert!(text.contains("*w0"));
        assert_eq!(text.lines().count(), 2);
    }
}
