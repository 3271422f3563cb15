//! Word-topic and summary counts, and the views the sampler reads them through.

use std::collections::HashMap;

use ndarray::Array1;

use crate::document::Document;
use crate::error::{LdaError, Result};
use crate::row::{Row, RowArena, RowKind, RowMut};
use crate::vocab::LocalVocab;

/// Per-topic totals over every word.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SummaryRow {
    counts: Array1<i64>,
}

impl SummaryRow {
    pub fn new(num_topics: usize) -> SummaryRow {
        SummaryRow { counts: Array1::zeros(num_topics) }
    }

    pub fn num_topics(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn get(&self, topic: u32) -> i64 {
        self.counts.get(topic as usize).cloned().unwrap_or(0)
    }

    pub fn inc(&mut self, topic: u32, delta: i64) -> Result<()> {
        let num_topics = self.counts.len();
        let cell = self.counts.get_mut(topic as usize).ok_or(LdaError::TopicOutOfRange {
            topic: topic as i64,
            num_topics,
        })?;
        let count = *cell + delta;
        if count < 0 {
            return Err(LdaError::NegativeCount { topic, count });
        }
        *cell = count;
        Ok(())
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = i64> + 'a {
        self.counts.iter().cloned()
    }

    pub fn total(&self) -> i64 {
        self.counts.sum()
    }

    pub fn as_array(&self) -> &Array1<i64> {
        &self.counts
    }
}

/// The rows of one vocabulary slice, in word id order.
#[derive(Clone, Debug)]
pub struct ModelSlice {
    id: usize,
    words: Vec<u32>,
    arena: RowArena,
}

impl ModelSlice {
    /// Lay out zeroed rows for every word of slice `slice_id`.
    pub fn new(vocab: &LocalVocab, slice_id: usize) -> ModelSlice {
        let metas = vocab.slice_words(slice_id);
        let kinds: Vec<RowKind> = metas.iter().map(|m| m.row_kind).collect();
        ModelSlice {
            id: slice_id,
            words: metas.iter().map(|m| m.word).collect(),
            arena: RowArena::with_kinds(vocab.num_topics(), &kinds),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_topics(&self) -> usize {
        self.arena.num_topics()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn index_of(&self, word: u32) -> Option<usize> {
        self.words.binary_search(&word).ok()
    }

    pub fn contains(&self, word: u32) -> bool {
        self.index_of(word).is_some()
    }

    pub fn row(&self, word: u32) -> Option<Row<'_>> {
        self.index_of(word).map(|i| self.arena.row(i))
    }

    pub fn row_mut(&mut self, word: u32) -> Option<RowMut<'_>> {
        let index = self.index_of(word)?;
        Some(self.arena.row_mut(index))
    }

    pub fn row_at(&self, index: usize) -> Row<'_> {
        self.arena.row(index)
    }

    /// `(word, row)` pairs in word order.
    pub fn rows<'a>(&'a self) -> impl Iterator<Item = (u32, Row<'a>)> + 'a {
        self.words.iter().enumerate().map(move |(i, &w)| (w, self.arena.row(i)))
    }

    #[inline]
    pub fn word_topic_count(&self, word: u32, topic: u32) -> i32 {
        self.row(word).map_or(0, |row| row.get(topic))
    }

    pub fn inc(&mut self, word: u32, topic: u32, delta: i32) -> Result<()> {
        let slice = self.id;
        match self.row_mut(word) {
            Some(mut row) => row.inc(topic, delta),
            None => Err(LdaError::UnknownWord { word, slice }),
        }
    }

    pub fn clear(&mut self) {
        self.arena.clear();
    }
}

/// Every slice of the run plus the summary row.
#[derive(Clone, Debug)]
pub struct ModelStore {
    slices: Vec<ModelSlice>,
    summary: SummaryRow,
}

impl ModelStore {
    pub fn new(vocab: &LocalVocab) -> ModelStore {
        ModelStore {
            slices: (0..vocab.num_slices()).map(|id| ModelSlice::new(vocab, id)).collect(),
            summary: SummaryRow::new(vocab.num_topics()),
        }
    }

    /// Count the documents' current assignments into fresh rows.
    pub fn from_documents<'a, I>(vocab: &LocalVocab, docs: I) -> Result<ModelStore>
        where I: IntoIterator<Item = &'a Document>
    {
        let mut store = ModelStore::new(vocab);
        for doc in docs {
            for token in doc.tokens() {
                let slice = store.slice_of(token.word).ok_or(LdaError::WordOutOfRange {
                    word: token.word as i64,
                    num_vocabs: vocab.num_words(),
                })?;
                store.slices[slice].inc(token.word, token.topic, 1)?;
                store.summary.inc(token.topic, 1)?;
            }
        }
        Ok(store)
    }

    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn slice(&self, id: usize) -> &ModelSlice {
        &self.slices[id]
    }

    pub fn slices(&self) -> &[ModelSlice] {
        &self.slices
    }

    pub fn summary(&self) -> &SummaryRow {
        &self.summary
    }

    /// Split borrow of one slice and the summary row.
    pub fn slice_and_summary_mut(&mut self, id: usize) -> (&mut ModelSlice, &mut SummaryRow) {
        (&mut self.slices[id], &mut self.summary)
    }

    /// Index of the slice holding `word`.
    pub fn slice_of(&self, word: u32) -> Option<usize> {
        let i = match self.slices.binary_search_by_key(&word, |s| s.words.last().cloned().unwrap_or(0)) {
            Ok(i) => i,
            Err(i) => i,
        };
        if i < self.slices.len() && self.slices[i].contains(word) { Some(i) } else { None }
    }

    pub fn word_topic_count(&self, word: u32, topic: u32) -> i32 {
        self.slice_of(word).map_or(0, |s| self.slices[s].word_topic_count(word, topic))
    }

    /// Verify that every row sums to its word's term frequency and that the
    /// summary row equals the column sums of all rows.
    pub fn check_invariants(&self, vocab: &LocalVocab) -> Result<()> {
        let mut column_sums = vec![0i64; self.summary.num_topics()];
        for slice in &self.slices {
            for (word, row) in slice.rows() {
                let mut total = 0i64;
                for (topic, count) in row.iter() {
                    if count < 0 {
                        return Err(LdaError::NegativeCount { topic, count: count as i64 });
                    }
                    total += count as i64;
                    column_sums[topic as usize] += count as i64;
                }
                let tf = vocab.tf(word) as i64;
                if total != tf {
                    return Err(LdaError::CountMismatch {
                        what: format!("row sum of word {}", word),
                        expected: tf,
                        actual: total,
                    });
                }
            }
        }
        for (topic, (&expected, actual)) in column_sums.iter().zip(self.summary.iter()).enumerate() {
            if expected != actual {
                return Err(LdaError::CountMismatch {
                    what: format!("summary count of topic {}", topic),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// One accepted topic change of one token.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommitEvent {
    pub word: u32,
    pub old_topic: u32,
    pub new_topic: u32,
}

/// What the sampler sees of the model: live counts that reflect its own
/// commits immediately.
pub trait TopicCounts {
    fn word_topic_count(&self, word: u32, topic: u32) -> i64;
    fn summary_count(&self, topic: u32) -> i64;
    fn commit(&mut self, word: u32, old_topic: u32, new_topic: u32) -> Result<()>;
}

/// Single-worker view that updates the slice and summary in place.
pub struct DirectModel<'a> {
    slice: &'a mut ModelSlice,
    summary: &'a mut SummaryRow,
    events: Option<Vec<CommitEvent>>,
}

impl<'a> DirectModel<'a> {
    pub fn new(slice: &'a mut ModelSlice, summary: &'a mut SummaryRow) -> DirectModel<'a> {
        DirectModel { slice, summary, events: None }
    }

    /// Also keep every commit for an external consumer.
    pub fn recording(slice: &'a mut ModelSlice, summary: &'a mut SummaryRow) -> DirectModel<'a> {
        DirectModel { slice, summary, events: Some(Vec::new()) }
    }

    pub fn events(&self) -> &[CommitEvent] {
        match self.events {
            Some(ref events) => events,
            None => &[],
        }
    }

    pub fn into_events(self) -> Vec<CommitEvent> {
        self.events.unwrap_or_default()
    }
}

impl<'a> TopicCounts for DirectModel<'a> {
    #[inline]
    fn word_topic_count(&self, word: u32, topic: u32) -> i64 {
        self.slice.word_topic_count(word, topic) as i64
    }

    #[inline]
    fn summary_count(&self, topic: u32) -> i64 {
        self.summary.get(topic)
    }

    fn commit(&mut self, word: u32, old_topic: u32, new_topic: u32) -> Result<()> {
        self.slice.inc(word, old_topic, -1)?;
        self.slice.inc(word, new_topic, 1)?;
        self.summary.inc(old_topic, -1)?;
        self.summary.inc(new_topic, 1)?;
        if let Some(ref mut events) = self.events {
            events.push(CommitEvent { word, old_topic, new_topic });
        }
        Ok(())
    }
}

/// A worker's pending changes, applied to the shared model at the pass boundary.
#[derive(Clone, Debug, Default)]
pub struct DeltaLog {
    events: Vec<CommitEvent>,
    word_deltas: HashMap<(u32, u32), i64>,
    summary_deltas: HashMap<u32, i64>,
}

impl DeltaLog {
    pub fn new() -> DeltaLog {
        DeltaLog::default()
    }

    pub fn record(&mut self, event: CommitEvent) {
        *self.word_deltas.entry((event.word, event.old_topic)).or_insert(0) -= 1;
        *self.word_deltas.entry((event.word, event.new_topic)).or_insert(0) += 1;
        *self.summary_deltas.entry(event.old_topic).or_insert(0) -= 1;
        *self.summary_deltas.entry(event.new_topic).or_insert(0) += 1;
        self.events.push(event);
    }

    #[inline]
    pub fn word_delta(&self, word: u32, topic: u32) -> i64 {
        self.word_deltas.get(&(word, topic)).cloned().unwrap_or(0)
    }

    #[inline]
    pub fn summary_delta(&self, topic: u32) -> i64 {
        self.summary_deltas.get(&topic).cloned().unwrap_or(0)
    }

    /// Commit stream in the order the sampler produced it.
    pub fn events(&self) -> &[CommitEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Apply the aggregated deltas. Decrements go first so a sparse row never
    /// holds more live topics than its word has tokens.
    pub fn merge_into(&self, slice: &mut ModelSlice, summary: &mut SummaryRow) -> Result<()> {
        let mut word_deltas: Vec<((u32, u32), i64)> =
            self.word_deltas.iter().filter(|&(_, &d)| d != 0).map(|(&k, &d)| (k, d)).collect();
        word_deltas.sort_by_key(|&((word, topic), delta)| (delta, word, topic));
        for ((word, topic), delta) in word_deltas {
            slice.inc(word, topic, delta as i32)?;
        }
        let mut summary_deltas: Vec<(u32, i64)> =
            self.summary_deltas.iter().filter(|&(_, &d)| d != 0).map(|(&t, &d)| (t, d)).collect();
        summary_deltas.sort_by_key(|&(topic, delta)| (delta, topic));
        for (topic, delta) in summary_deltas {
            summary.inc(topic, delta)?;
        }
        Ok(())
    }
}

/// Multi-worker view: shared counts as of the pass start plus this worker's
/// own pending log. Never writes to shared state.
pub struct DeltaOverlay<'a> {
    slice: &'a ModelSlice,
    summary: &'a SummaryRow,
    log: DeltaLog,
}

impl<'a> DeltaOverlay<'a> {
    pub fn new(slice: &'a ModelSlice, summary: &'a SummaryRow) -> DeltaOverlay<'a> {
        DeltaOverlay { slice, summary, log: DeltaLog::new() }
    }

    pub fn log(&self) -> &DeltaLog {
        &self.log
    }

    pub fn into_log(self) -> DeltaLog {
        self.log
    }
}

impl<'a> TopicCounts for DeltaOverlay<'a> {
    #[inline]
    fn word_topic_count(&self, word: u32, topic: u32) -> i64 {
        self.slice.word_topic_count(word, topic) as i64 + self.log.word_delta(word, topic)
    }

    #[inline]
    fn summary_count(&self, topic: u32) -> i64 {
        self.summary.get(topic) + self.log.summary_delta(topic)
    }

    fn commit(&mut self, word: u32, old_topic: u32, new_topic: u32) -> Result<()> {
        if !self.slice.contains(word) {
            return Err(LdaError::UnknownWord { word, slice: self.slice.id() });
        }
        let remaining = self.word_topic_count(word, old_topic);
        if remaining < 1 {
            return Err(LdaError::NegativeCount { topic: old_topic, count: remaining - 1 });
        }
        self.log.record(CommitEvent { word, old_topic, new_topic });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Token;

    fn corpus() -> (LocalVocab, Vec<Document>) {
        let docs = vec![
            Document::new(vec![
                Token { word: 0, topic: 1 },
                Token { word: 0, topic: 1 },
                Token { word: 2, topic: 0 },
            ]),
            Document::new(vec![Token { word: 2, topic: 2 }, Token { word: 5, topic: 1 }]),
        ];
        let mut vocab = LocalVocab::from_documents(&docs, 3, 2);
        vocab.generate_slices(3, 0);
        (vocab, docs)
    }

    #[test]
    fn store_counts_initial_assignments() {
        let (vocab, docs) = corpus();
        let store = ModelStore::from_documents(&vocab, &docs).unwrap();
        assert!(store.num_slices() > 1);
        assert_eq!(store.word_topic_count(0, 1), 2);
        assert_eq!(store.word_topic_count(2, 0), 1);
        assert_eq!(store.word_topic_count(2, 2), 1);
        assert_eq!(store.word_topic_count(4, 0), 0);
        assert_eq!(store.summary().get(1), 3);
        assert_eq!(store.summary().total(), 5);
        store.check_invariants(&vocab).unwrap();
    }

    #[test]
    fn direct_model_reads_its_own_writes() {
        let (vocab, docs) = corpus();
        let mut store = ModelStore::from_documents(&vocab, &docs).unwrap();
        let id = store.slice_of(0).unwrap();
        {
            let (slice, summary) = store.slice_and_summary_mut(id);
            let mut model = DirectModel::recording(slice, summary);
            model.commit(0, 1, 2).unwrap();
            assert_eq!(model.word_topic_count(0, 1), 1);
            assert_eq!(model.word_topic_count(0, 2), 1);
            assert_eq!(model.summary_count(2), 2);
            assert_eq!(model.events().len(), 1);
        }
        store.check_invariants(&vocab).unwrap();
    }

    #[test]
    fn invariant_check_detects_drift() {
        let (vocab, docs) = corpus();
        let mut store = ModelStore::from_documents(&vocab, &docs).unwrap();
        let id = store.slice_of(5).unwrap();
        store.slice_and_summary_mut(id).0.inc(5, 0, 1).unwrap();
        match store.check_invariants(&vocab) {
            Err(LdaError::CountMismatch { expected: 1, actual: 2, .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn overlay_defers_writes_until_merge() {
        let (vocab, docs) = corpus();
        let mut store = ModelStore::from_documents(&vocab, &docs).unwrap();
        let id = store.slice_of(0).unwrap();
        let log = {
            let mut overlay = DeltaOverlay::new(store.slice(id), store.summary());
            overlay.commit(0, 1, 0).unwrap();
            overlay.commit(0, 1, 2).unwrap();
            assert_eq!(overlay.word_topic_count(0, 1), 0);
            assert_eq!(overlay.summary_count(1), 1);
            // a third move out of topic 1 would go negative
            assert!(overlay.commit(0, 1, 0).is_err());
            overlay.into_log()
        };
        assert_eq!(store.word_topic_count(0, 1), 2);
        assert_eq!(log.events().len(), 2);
        {
            let (slice, summary) = store.slice_and_summary_mut(id);
            log.merge_into(slice, summary).unwrap();
        }
        assert_eq!(store.word_topic_count(0, 1), 0);
        assert_eq!(store.word_topic_count(0, 0), 1);
        assert_eq!(store.word_topic_count(0, 2), 1);
        store.check_invariants(&vocab).unwrap();
    }

    #[test]
    fn summary_row_rejects_negative_counts() {
        let mut summary = SummaryRow::new(2);
        summary.inc(0, 1).unwrap();
        assert!(summary.inc(0, -2).is_err());
        assert!(summary.inc(2, 1).is_err());
        assert_eq!(summary.get(0), 1);
    }
}
