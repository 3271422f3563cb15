//! Alias tables for O(1) draws from the word proposal q(t|w).
//!
//! Probabilities are quantised to integers summing to `ALIAS_MASS` and laid
//! out with Vose's method. Bucket `i` owns the range
//! `[start(i), start(i) + capacity(i))` of `[0, ALIAS_MASS)`; capacities are
//! `ALIAS_MASS / size`, plus one for the first `ALIAS_MASS % size` buckets.
//! A draw `u` lands in a bucket and returns the bucket's own entry when `u`
//! is below its threshold, the alias entry otherwise.
//!
//! The tables of one slice are built once per pass and then only read, so
//! the proposal lags behind the live counts by up to one pass. The MH test in
//! the sampler corrects for that.

use std::mem;

use rayon::prelude::*;

use crate::model::{ModelSlice, SummaryRow};
use crate::rng::Xorshift;
use crate::row::Row;
use crate::vocab::LocalVocab;

pub const ALIAS_MASS: u32 = 0x7FFF_FFFF;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Bucket {
    alias: u32,
    /// Absolute position in `[0, ALIAS_MASS]` where the alias range begins.
    threshold: u32,
}

#[derive(Default)]
struct VoseScratch {
    masses: Vec<u64>,
    low: Vec<usize>,
    high: Vec<usize>,
}

#[derive(Default)]
struct BuildScratch {
    weights: Vec<f64>,
    vose: VoseScratch,
}

#[inline]
fn capacity(index: usize, size: usize) -> u64 {
    let height = ALIAS_MASS as u64 / size as u64;
    let residue = ALIAS_MASS as u64 % size as u64;
    if (index as u64) < residue { height + 1 } else { height }
}

#[inline]
fn start(index: usize, size: usize) -> u64 {
    let height = ALIAS_MASS as u64 / size as u64;
    let residue = ALIAS_MASS as u64 % size as u64;
    index as u64 * height + (index as u64).min(residue)
}

#[inline]
fn bucket_of(u: u64, size: usize) -> usize {
    let height = ALIAS_MASS as u64 / size as u64;
    let residue = ALIAS_MASS as u64 % size as u64;
    let tall = residue * (height + 1);
    let index = if u < tall { u / (height + 1) } else { residue + (u - tall) / height };
    (index as usize).min(size - 1)
}

/// Scale `weights` to integers summing to exactly `ALIAS_MASS`. Truncation
/// residue is handed out one unit at a time, round robin, over the entries
/// with positive weight. Non-positive totals fall back to uniform.
fn quantize(weights: &[f64], masses: &mut Vec<u64>) {
    masses.clear();
    let total: f64 = weights.iter().sum();
    let uniform = !(total > 0.0 && total.is_finite());
    let weight = |i: usize| if uniform { 1.0 } else { weights[i].max(0.0) };
    let total = if uniform { weights.len() as f64 } else { total };

    let mut assigned = 0i64;
    for i in 0..weights.len() {
        let m = ((weight(i) / total) * ALIAS_MASS as f64).floor().min(ALIAS_MASS as f64) as u64;
        masses.push(m);
        assigned += m as i64;
    }
    let mut residue = ALIAS_MASS as i64 - assigned;
    let mut i = 0;
    while residue != 0 {
        if weight(i) > 0.0 {
            if residue > 0 {
                masses[i] += 1;
                residue -= 1;
            } else if masses[i] > 0 {
                masses[i] -= 1;
                residue += 1;
            }
        }
        i = (i + 1) % masses.len();
    }
}

/// Vose's two-worklist construction on integer masses.
fn build_buckets(weights: &[f64], buckets: &mut [Bucket], scratch: &mut VoseScratch) {
    let size = buckets.len();
    if size == 0 {
        return;
    }
    debug_assert_eq!(weights.len(), size);
    let VoseScratch { masses, low, high } = scratch;
    quantize(weights, masses);

    let full = |i: usize| Bucket {
        alias: i as u32,
        threshold: (start(i, size) + capacity(i, size)) as u32,
    };
    low.clear();
    high.clear();
    for i in 0..size {
        let cap = capacity(i, size);
        if masses[i] < cap {
            low.push(i);
        } else if masses[i] > cap {
            high.push(i);
        } else {
            buckets[i] = full(i);
        }
    }
    // An overfull bucket holds at least capacity + 1 >= any deficit, so the
    // subtraction below cannot underflow.
    while !low.is_empty() && !high.is_empty() {
        let (l, g) = match (low.pop(), high.pop()) {
            (Some(l), Some(g)) => (l, g),
            _ => break,
        };
        buckets[l] = Bucket {
            alias: g as u32,
            threshold: (start(l, size) + masses[l]) as u32,
        };
        masses[g] -= capacity(l, size) - masses[l];
        let cap = capacity(g, size);
        if masses[g] < cap {
            low.push(g);
        } else if masses[g] > cap {
            high.push(g);
        } else {
            buckets[g] = full(g);
        }
    }
    // Masses and capacities both sum to ALIAS_MASS, so both lists drain
    // together; this only guards against a broken quantisation.
    for &i in low.iter().chain(high.iter()) {
        buckets[i] = full(i);
    }
}

#[inline]
fn draw(buckets: &[Bucket], rng: &mut Xorshift) -> u32 {
    let u = rng.rand() % ALIAS_MASS;
    let i = bucket_of(u as u64, buckets.len());
    let bucket = buckets[i];
    if u < bucket.threshold { i as u32 } else { bucket.alias }
}

/// A standalone alias table over `0..weights.len()`.
#[derive(Clone, Debug)]
pub struct AliasTable {
    buckets: Vec<Bucket>,
    mass: f64,
}

impl AliasTable {
    pub fn build(weights: &[f64]) -> AliasTable {
        let mut buckets = vec![Bucket::default(); weights.len()];
        build_buckets(weights, &mut buckets, &mut VoseScratch::default());
        AliasTable { buckets, mass: weights.iter().sum() }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Unnormalised total of the input weights.
    pub fn mass(&self) -> f64 {
        self.mass
    }

    #[inline]
    pub fn sample(&self, rng: &mut Xorshift) -> u32 {
        draw(&self.buckets, rng)
    }
}

/// The smoothing part of q(t|w) shared by all sparse words:
/// `β / (n_t + βV)` over every topic.
#[derive(Clone, Debug)]
pub struct BetaAliasTable {
    table: AliasTable,
}

impl BetaAliasTable {
    pub fn build(summary: &SummaryRow, beta: f64, beta_sum: f64) -> BetaAliasTable {
        let weights: Vec<f64> = summary.iter().map(|n_t| beta / (n_t as f64 + beta_sum)).collect();
        BetaAliasTable { table: AliasTable::build(&weights) }
    }

    pub fn mass(&self) -> f64 {
        self.table.mass()
    }

    #[inline]
    pub fn sample(&self, rng: &mut Xorshift) -> u32 {
        self.table.sample(rng)
    }
}

#[derive(Clone, Debug)]
struct AliasRow {
    offset: usize,
    size: usize,
    /// Start of the bucket-to-topic map; unused for dense rows.
    index_offset: usize,
    dense: bool,
    mass: f64,
}

/// Alias rows for every word of one model slice, in two flat arenas.
#[derive(Clone, Debug)]
pub struct AliasSlice {
    slice_id: usize,
    words: Vec<u32>,
    rows: Vec<AliasRow>,
    buckets: Vec<Bucket>,
    topics: Vec<u32>,
    beta_table: BetaAliasTable,
}

fn carve<'a, T>(mut data: &'a mut [T], sizes: &[usize]) -> Vec<&'a mut [T]> {
    let mut parts = Vec::with_capacity(sizes.len());
    for &size in sizes {
        let (head, tail) = mem::take(&mut data).split_at_mut(size);
        parts.push(head);
        data = tail;
    }
    parts
}

fn build_row(
    row: Row<'_>,
    summary: &SummaryRow,
    beta: f64,
    beta_sum: f64,
    dense: bool,
    buckets: &mut [Bucket],
    topics: &mut [u32],
    scratch: &mut BuildScratch,
) -> f64 {
    let BuildScratch { weights, vose } = scratch;
    weights.clear();
    if dense {
        for k in 0..summary.num_topics() as u32 {
            weights.push((row.get(k) as f64 + beta) / (summary.get(k) as f64 + beta_sum));
        }
    } else {
        for (j, (topic, count)) in row.iter().enumerate() {
            topics[j] = topic;
            weights.push(count as f64 / (summary.get(topic) as f64 + beta_sum));
        }
    }
    build_buckets(weights, buckets, vose);
    weights.iter().sum()
}

impl AliasSlice {
    /// Build every alias row of `slice` from the current counts. Rows are
    /// built in parallel; the beta table once.
    pub fn build(vocab: &LocalVocab, slice: &ModelSlice, summary: &SummaryRow, beta: f64, beta_sum: f64) -> AliasSlice {
        let num_topics = slice.num_topics();
        let metas = vocab.slice_words(slice.id());
        debug_assert_eq!(metas.len(), slice.len());

        let mut rows = Vec::with_capacity(metas.len());
        let mut num_buckets = 0;
        let mut num_indices = 0;
        for (i, meta) in metas.iter().enumerate() {
            let dense = meta.alias_dense;
            let size = if dense { num_topics } else { slice.row_at(i).nonzero_count() };
            rows.push(AliasRow { offset: num_buckets, size, index_offset: num_indices, dense, mass: 0.0 });
            num_buckets += size;
            if !dense {
                num_indices += size;
            }
        }

        let mut buckets = vec![Bucket::default(); num_buckets];
        let mut topics = vec![0u32; num_indices];
        {
            let bucket_sizes: Vec<usize> = rows.iter().map(|r| r.size).collect();
            let index_sizes: Vec<usize> = rows.iter().map(|r| if r.dense { 0 } else { r.size }).collect();
            let bucket_parts = carve(&mut buckets, &bucket_sizes);
            let index_parts = carve(&mut topics, &index_sizes);
            rows.par_iter_mut()
                .zip(bucket_parts.into_par_iter())
                .zip(index_parts.into_par_iter())
                .enumerate()
                .for_each_init(BuildScratch::default, |scratch, (i, ((row, buckets), topics))| {
                    row.mass = build_row(slice.row_at(i), summary, beta, beta_sum, row.dense, buckets, topics, scratch);
                });
        }

        AliasSlice {
            slice_id: slice.id(),
            words: slice.words().to_vec(),
            rows,
            buckets,
            topics,
            beta_table: BetaAliasTable::build(summary, beta, beta_sum),
        }
    }

    pub fn slice_id(&self) -> usize {
        self.slice_id
    }

    pub fn beta_table(&self) -> &BetaAliasTable {
        &self.beta_table
    }

    pub fn contains(&self, word: u32) -> bool {
        self.words.binary_search(&word).is_ok()
    }

    /// Draw a topic from the (stale) word proposal of `word`.
    ///
    /// Sparse rows first choose between their own entries and the shared
    /// beta table in proportion to the two masses. Words outside the slice
    /// fall back to the beta table.
    #[inline]
    pub fn propose_topic(&self, word: u32, rng: &mut Xorshift) -> u32 {
        let row = match self.words.binary_search(&word) {
            Ok(i) => &self.rows[i],
            Err(_) => return self.beta_table.sample(rng),
        };
        let buckets = &self.buckets[row.offset..row.offset + row.size];
        if row.dense {
            return draw(buckets, rng);
        }
        let sample = rng.rand_double() * (row.mass + self.beta_table.mass());
        if row.size > 0 && sample < row.mass {
            let j = draw(buckets, rng) as usize;
            self.topics[row.index_offset + j]
        } else {
            self.beta_table.sample(rng)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Token};
    use crate::model::ModelStore;

    /// Mass each index receives from the buckets, own part plus alias parts.
    fn covered_mass(buckets: &[Bucket]) -> Vec<u64> {
        let size = buckets.len();
        let mut mass = vec![0u64; size];
        for (i, b) in buckets.iter().enumerate() {
            let lo = start(i, size);
            let hi = lo + capacity(i, size);
            let t = b.threshold as u64;
            assert!(t >= lo && t <= hi);
            mass[i] += t - lo;
            mass[b.alias as usize] += hi - t;
        }
        mass
    }

    #[test]
    fn capacities_and_masses_sum_to_alias_mass() {
        for &size in &[1usize, 2, 3, 7, 50, 1000, 12345] {
            let total: u64 = (0..size).map(|i| capacity(i, size)).sum();
            assert_eq!(total, ALIAS_MASS as u64);
            assert_eq!(start(size - 1, size) + capacity(size - 1, size), ALIAS_MASS as u64);

            let weights: Vec<f64> = (0..size).map(|i| 1.0 + (i % 7) as f64 * 0.37).collect();
            let mut masses = Vec::new();
            quantize(&weights, &mut masses);
            assert_eq!(masses.iter().sum::<u64>(), ALIAS_MASS as u64);
        }
    }

    #[test]
    fn buckets_reproduce_quantised_masses_exactly() {
        let weights = [0.5, 0.3, 0.2, 1e-9, 4.0, 0.0, 2.5];
        let mut expected = Vec::new();
        quantize(&weights, &mut expected);
        let table = AliasTable::build(&weights);
        assert_eq!(covered_mass(&table.buckets), expected);
        assert_eq!(expected[5], 0);
    }

    #[test]
    fn bucket_lookup_matches_ranges() {
        for &size in &[1usize, 3, 10, 1 << 20] {
            for &i in &[0usize, size / 2, size - 1] {
                assert_eq!(bucket_of(start(i, size), size), i);
                assert_eq!(bucket_of(start(i, size) + capacity(i, size) - 1, size), i);
            }
        }
    }

    #[test]
    fn empirical_frequencies_follow_proportions() {
        let table = AliasTable::build(&[0.5, 0.3, 0.2]);
        let mut rng = Xorshift::new(2024);
        let n = 1_000_000;
        let mut counts = [0usize; 3];
        for _ in 0..n {
            counts[table.sample(&mut rng) as usize] += 1;
        }
        for (&c, &p) in counts.iter().zip(&[0.5, 0.3, 0.2]) {
            let freq = c as f64 / n as f64;
            assert!((freq - p).abs() < 0.01, "freq = {}, p = {}", freq, p);
        }
    }

    #[test]
    fn zero_weights_are_never_drawn() {
        let table = AliasTable::build(&[0.0, 1.0, 0.0, 3.0]);
        let mut rng = Xorshift::new(77);
        for _ in 0..100_000 {
            let t = table.sample(&mut rng);
            assert!(t == 1 || t == 3);
        }
    }

    fn mixed_row_store() -> (LocalVocab, ModelStore) {
        // word 0: three tokens on topics 0, 1, 2; word 1 spreads 100 tokens over all 50 topics.
        let mut tokens = vec![
            Token { word: 0, topic: 0 },
            Token { word: 0, topic: 1 },
            Token { word: 0, topic: 2 },
        ];
        tokens.extend((0..100u32).map(|i| Token { word: 1, topic: i % 50 }));
        let docs = vec![Document::new(tokens)];
        let vocab = LocalVocab::from_documents(&docs, 50, 2);
        let store = ModelStore::from_documents(&vocab, &docs).unwrap();
        (vocab, store)
    }

    #[test]
    fn sparse_row_with_beta_table_reaches_every_topic() {
        let (vocab, store) = mixed_row_store();
        assert!(!vocab.meta(0).unwrap().alias_dense);
        assert!(!store.slice(0).row(0).unwrap().is_dense());
        let beta = 0.01;
        let alias = AliasSlice::build(&vocab, store.slice(0), store.summary(), beta, beta * 2.0);
        let mut rng = Xorshift::new(99);
        let mut seen = vec![0usize; 50];
        for _ in 0..200_000 {
            let t = alias.propose_topic(0, &mut rng);
            assert!(t < 50);
            seen[t as usize] += 1;
        }
        assert!(seen.iter().all(|&c| c > 0), "unreached topics: {:?}", seen);
        // own topics dominate
        assert!(seen[0] > seen[10] * 10);
    }

    #[test]
    fn dense_row_follows_word_proposal() {
        let (vocab, store) = mixed_row_store();
        assert!(vocab.meta(1).unwrap().alias_dense);
        let beta = 0.5;
        let beta_sum = beta * 2.0;
        let alias = AliasSlice::build(&vocab, store.slice(0), store.summary(), beta, beta_sum);
        let summary = store.summary();
        let row = store.slice(0).row(1).unwrap();
        let weights: Vec<f64> = (0..50u32)
            .map(|k| (row.get(k) as f64 + beta) / (summary.get(k) as f64 + beta_sum))
            .collect();
        let total: f64 = weights.iter().sum();
        let mut rng = Xorshift::new(5);
        let n = 500_000;
        let mut counts = vec![0usize; 50];
        for _ in 0..n {
            counts[alias.propose_topic(1, &mut rng) as usize] += 1;
        }
        for k in 0..50 {
            let freq = counts[k] as f64 / n as f64;
            assert!((freq - weights[k] / total).abs() < 0.01, "topic {}", k);
        }
    }
}
