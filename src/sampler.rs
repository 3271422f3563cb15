//! Cyclic Metropolis-Hastings sampler alternating word and doc proposals.

use crate::alias::AliasSlice;
use crate::config::LdaConfig;
use crate::doc_counter::DocCounter;
use crate::document::Document;
use crate::error::Result;
use crate::model::TopicCounts;
use crate::rng::Xorshift;
use crate::vocab::SliceMeta;

/// Counts accumulated since the last `zero_statistics`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct SamplerStats {
    pub num_sampled: u64,
    pub num_changed: u64,
    pub num_accepted: u64,
    pub num_proposed: u64,
}

impl SamplerStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.num_proposed == 0 {
            0.0
        } else {
            self.num_accepted as f64 / self.num_proposed as f64
        }
    }

    pub fn merge(&mut self, other: &SamplerStats) {
        self.num_sampled += other.num_sampled;
        self.num_changed += other.num_changed;
        self.num_accepted += other.num_accepted;
        self.num_proposed += other.num_proposed;
    }
}

/// Removes the token being resampled from a count that includes it.
#[inline]
fn adjusted(is_old_topic: bool, raw: i64) -> f64 {
    (if is_old_topic { raw - 1 } else { raw }) as f64
}

pub struct CyclicSampler {
    rng: Xorshift,
    doc_counter: DocCounter,
    num_topics: usize,
    mh_step: usize,
    alpha: f64,
    beta: f64,
    alpha_sum: f64,
    beta_sum: f64,
    stats: SamplerStats,
}

impl CyclicSampler {
    pub fn new(config: &LdaConfig, rng: Xorshift) -> CyclicSampler {
        CyclicSampler {
            rng,
            doc_counter: DocCounter::new(config.doc_counter_capacity),
            num_topics: config.num_topics,
            mh_step: config.mh_step,
            alpha: config.alpha,
            beta: config.beta,
            alpha_sum: config.alpha_sum(),
            beta_sum: config.beta_sum(),
            stats: SamplerStats::default(),
        }
    }

    pub fn zero_statistics(&mut self) {
        self.stats = SamplerStats::default();
    }

    pub fn statistics(&self) -> SamplerStats {
        self.stats
    }

    pub fn rng_mut(&mut self) -> &mut Xorshift {
        &mut self.rng
    }

    /// Resample the tokens of `doc` that fall into `slice`, starting at the
    /// document's cursor. Returns the number of tokens visited.
    pub fn sample_one_doc<M: TopicCounts>(
        &mut self,
        doc: &mut Document,
        slice: &SliceMeta,
        alias: &AliasSlice,
        model: &mut M,
    ) -> Result<usize> {
        if slice.id == 0 {
            doc.reset_cursor();
        }
        self.doc_counter.rebuild(doc, self.num_topics)?;

        let begin = doc.cursor();
        let mut cursor = begin;
        while cursor < doc.len() {
            let word = doc.word(cursor);
            if word > slice.last_word {
                break;
            }
            let old_topic = doc.topic(cursor);
            let new_topic = self.sample(doc, word, old_topic, alias, model);
            if new_topic != old_topic {
                model.commit(word, old_topic, new_topic)?;
                self.doc_counter.inc(old_topic, -1)?;
                self.doc_counter.inc(new_topic, 1)?;
                doc.set_topic(cursor, new_topic);
                self.stats.num_changed += 1;
            }
            cursor += 1;
        }
        doc.set_cursor(cursor);
        self.stats.num_sampled += (cursor - begin) as u64;
        Ok(cursor - begin)
    }

    /// Doc proposal: the topic of a random token of `doc` with probability
    /// `len / (len + αK)`, a uniform topic otherwise.
    #[inline]
    fn propose_from_doc(&mut self, doc: &Document) -> u32 {
        let doc_len = doc.len() as f64;
        let n_td_or_alpha = self.rng.rand_double() * (doc_len + self.alpha_sum);
        if n_td_or_alpha < doc_len {
            let index = self.rng.rand_k(doc.len() as u32) as usize;
            doc.topic(index)
        } else {
            self.rng.rand_k(self.num_topics as u32)
        }
    }

    /// `mh_step` rounds of word proposal followed by doc proposal.
    fn sample<M: TopicCounts>(&mut self, doc: &Document, word: u32, old_topic: u32, alias: &AliasSlice, model: &M) -> u32 {
        let mut s = old_topic;
        for _ in 0..self.mh_step {
            // word proposal
            let t = alias.propose_topic(word, &mut self.rng);
            let rejection = self.rng.rand_double();
            let pi = self.acceptance(word, old_topic, s, t, model, |m, topic| self.word_proposal(m, word, topic));
            s = self.accept(s, t, rejection, pi);

            // doc proposal
            let t = self.propose_from_doc(doc);
            let rejection = self.rng.rand_double();
            let pi = self.acceptance(word, old_topic, s, t, model, |_, topic| self.doc_proposal(topic));
            s = self.accept(s, t, rejection, pi);
        }
        s
    }

    /// `(n_wt + β) / (n_t + βV)` from raw live counts.
    #[inline]
    fn word_proposal<M: TopicCounts>(&self, model: &M, word: u32, topic: u32) -> f64 {
        (model.word_topic_count(word, topic) as f64 + self.beta) / (model.summary_count(topic) as f64 + self.beta_sum)
    }

    #[inline]
    fn doc_proposal(&self, topic: u32) -> f64 {
        self.doc_counter.get(topic) as f64 + self.alpha
    }

    /// MH acceptance probability of moving from `s` to `t`. Counts of
    /// whichever topic equals `old_topic` exclude the token itself; the
    /// proposal weights use the raw counts.
    #[inline]
    fn acceptance<M, Q>(&self, word: u32, old_topic: u32, s: u32, t: u32, model: &M, proposal: Q) -> f64
        where M: TopicCounts, Q: Fn(&M, u32) -> f64
    {
        if s == t {
            return 1.0;
        }
        let (s_old, t_old) = (s == old_topic, t == old_topic);
        let n_td_alpha = adjusted(t_old, self.doc_counter.get(t) as i64) + self.alpha;
        let n_sd_alpha = adjusted(s_old, self.doc_counter.get(s) as i64) + self.alpha;
        let n_tw_beta = adjusted(t_old, model.word_topic_count(word, t)) + self.beta;
        let n_sw_beta = adjusted(s_old, model.word_topic_count(word, s)) + self.beta;
        let n_t_beta_sum = adjusted(t_old, model.summary_count(t)) + self.beta_sum;
        let n_s_beta_sum = adjusted(s_old, model.summary_count(s)) + self.beta_sum;

        let nominator = n_td_alpha * n_tw_beta * n_s_beta_sum * proposal(model, s);
        let denominator = n_sd_alpha * n_sw_beta * n_t_beta_sum * proposal(model, t);
        (nominator / denominator).min(1.0)
    }

    #[inline]
    fn accept(&mut self, s: u32, t: u32, rejection: f64, pi: f64) -> u32 {
        self.stats.num_proposed += 1;
        if rejection < pi {
            self.stats.num_accepted += 1;
            t
        } else {
            s
        }
    }

    /// Resample `doc` against a frozen model. Word proposals are accepted by
    /// the document ratio, doc proposals by the word ratio; only the
    /// document's assignments change.
    pub fn infer_one_doc<M: TopicCounts>(
        &mut self,
        doc: &mut Document,
        slice: &SliceMeta,
        alias: &AliasSlice,
        model: &M,
    ) -> Result<usize> {
        if slice.id == 0 {
            doc.reset_cursor();
        }
        self.doc_counter.rebuild(doc, self.num_topics)?;

        let begin = doc.cursor();
        let mut cursor = begin;
        while cursor < doc.len() {
            let word = doc.word(cursor);
            if word > slice.last_word {
                break;
            }
            let old_topic = doc.topic(cursor);
            let mut s = old_topic;
            for _ in 0..self.mh_step {
                let t = alias.propose_topic(word, &mut self.rng);
                let rejection = self.rng.rand_double();
                let n_td_alpha = adjusted(t == old_topic, self.doc_counter.get(t) as i64) + self.alpha;
                let n_sd_alpha = adjusted(s == old_topic, self.doc_counter.get(s) as i64) + self.alpha;
                s = self.accept(s, t, rejection, (n_td_alpha / n_sd_alpha).min(1.0));

                let t = self.propose_from_doc(doc);
                let rejection = self.rng.rand_double();
                let n_tw_beta = model.word_topic_count(word, t) as f64 + self.beta;
                let n_sw_beta = model.word_topic_count(word, s) as f64 + self.beta;
                let n_t_beta_sum = model.summary_count(t) as f64 + self.beta_sum;
                let n_s_beta_sum = model.summary_count(s) as f64 + self.beta_sum;
                let pi = (n_tw_beta * n_s_beta_sum) / (n_sw_beta * n_t_beta_sum);
                s = self.accept(s, t, rejection, pi.min(1.0));
            }
            if s != old_topic {
                self.doc_counter.inc(old_topic, -1)?;
                self.doc_counter.inc(s, 1)?;
                doc.set_topic(cursor, s);
                self.stats.num_changed += 1;
            }
            cursor += 1;
        }
        doc.set_cursor(cursor);
        self.stats.num_sampled += (cursor - begin) as u64;
        Ok(cursor - begin)
    }
}
