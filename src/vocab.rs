//! Local vocabulary: the words of the corpus, their term frequencies, and the
//! partition of those words into model slices.

use std::collections::{BTreeMap, HashMap};

use crate::document::Document;
use crate::row::RowKind;

/// Layout decisions for one word.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct WordMeta {
    pub word: u32,
    pub tf: usize,
    pub row_kind: RowKind,
    /// Whether the alias row covers all K topics.
    pub alias_dense: bool,
}

impl WordMeta {
    fn alias_cells(&self, num_topics: usize) -> usize {
        if self.alias_dense {
            2 * num_topics
        } else {
            // alias, threshold and topic index per nonzero entry
            3 * self.tf
        }
    }
}

/// A contiguous run of words processed together.
#[derive(Clone, Debug, PartialEq)]
pub struct SliceMeta {
    pub id: usize,
    pub first_word: u32,
    pub last_word: u32,
    begin: usize,
    end: usize,
}

impl SliceMeta {
    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }
}

#[derive(Clone, Debug)]
pub struct LocalVocab {
    num_topics: usize,
    words: Vec<WordMeta>,
    index_of: HashMap<u32, usize>,
    slices: Vec<SliceMeta>,
}

impl LocalVocab {
    /// Collect term frequencies from the documents' tokens.
    pub fn from_documents<'a, I>(docs: I, num_topics: usize, load_factor: usize) -> LocalVocab
        where I: IntoIterator<Item = &'a Document>
    {
        let mut tf: BTreeMap<u32, usize> = BTreeMap::new();
        for doc in docs {
            for token in doc.tokens() {
                *tf.entry(token.word).or_insert(0) += 1;
            }
        }
        LocalVocab::from_term_frequencies(tf, num_topics, load_factor)
    }

    /// `tf` yields `(word, term frequency)` pairs in any order.
    pub fn from_term_frequencies<I>(tf: I, num_topics: usize, load_factor: usize) -> LocalVocab
        where I: IntoIterator<Item = (u32, usize)>
    {
        let alias_hot_threshold = (num_topics * 2) / 3;
        let mut words: Vec<WordMeta> = tf
            .into_iter()
            .filter(|&(_, tf)| tf > 0)
            .map(|(word, tf)| WordMeta {
                word,
                tf,
                row_kind: RowKind::for_term_frequency(tf, num_topics, load_factor),
                alias_dense: tf >= alias_hot_threshold,
            })
            .collect();
        words.sort_by_key(|m| m.word);
        words.dedup_by_key(|m| m.word);
        let index_of = words.iter().enumerate().map(|(i, m)| (m.word, i)).collect();
        let mut vocab = LocalVocab {
            num_topics,
            words,
            index_of,
            slices: Vec::new(),
        };
        vocab.generate_slices(0, 0);
        vocab
    }

    /// Re-partition the words so no slice exceeds the given cell budgets
    /// (0 = unbounded). A single word larger than a budget gets a slice of its own.
    pub fn generate_slices(&mut self, model_max_capacity: usize, alias_max_capacity: usize) {
        let model_budget = if model_max_capacity == 0 { usize::max_value() } else { model_max_capacity };
        let alias_budget = if alias_max_capacity == 0 { usize::max_value() } else { alias_max_capacity };

        self.slices.clear();
        let mut begin = 0;
        let mut model_cells = 0usize;
        let mut alias_cells = 0usize;
        for i in 0..self.words.len() {
            let meta = self.words[i];
            let m = meta.row_kind.cells(self.num_topics);
            let a = meta.alias_cells(self.num_topics);
            let overflow = model_cells.saturating_add(m) > model_budget || alias_cells.saturating_add(a) > alias_budget;
            if overflow && i > begin {
                self.push_slice(begin, i);
                begin = i;
                model_cells = 0;
                alias_cells = 0;
            }
            model_cells += m;
            alias_cells += a;
        }
        if begin < self.words.len() {
            self.push_slice(begin, self.words.len());
        }
        info!("Finish to generate meta information. Num of slice = {}", self.slices.len());
    }

    fn push_slice(&mut self, begin: usize, end: usize) {
        let id = self.slices.len();
        self.slices.push(SliceMeta {
            id,
            first_word: self.words[begin].word,
            last_word: self.words[end - 1].word,
            begin,
            end,
        });
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    pub fn num_words(&self) -> usize {
        self.words.len()
    }

    pub fn num_slices(&self) -> usize {
        self.slices.len()
    }

    pub fn slice(&self, slice_id: usize) -> &SliceMeta {
        &self.slices[slice_id]
    }

    pub fn slices(&self) -> &[SliceMeta] {
        &self.slices
    }

    /// Word metadata of one slice, in word id order.
    pub fn slice_words(&self, slice_id: usize) -> &[WordMeta] {
        let s = &self.slices[slice_id];
        &self.words[s.begin..s.end]
    }

    pub fn meta(&self, word: u32) -> Option<&WordMeta> {
        self.index_of.get(&word).map(|&i| &self.words[i])
    }

    pub fn tf(&self, word: u32) -> usize {
        self.meta(word).map_or(0, |m| m.tf)
    }

    /// Position of `word` inside its slice's tables.
    pub fn word_to_index(&self, slice_id: usize, word: u32) -> Option<usize> {
        let s = &self.slices[slice_id];
        match self.index_of.get(&word) {
            Some(&i) if i >= s.begin && i < s.end => Some(i - s.begin),
            _ => None,
        }
    }

    pub fn index_to_word(&self, slice_id: usize, index: usize) -> u32 {
        self.words[self.slices[slice_id].begin + index].word
    }

    pub fn global_tf_sum(&self, slice_id: usize) -> usize {
        self.slice_words(slice_id).iter().map(|m| m.tf).sum()
    }

    pub fn words(&self) -> &[WordMeta] {
        &self.words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab(tfs: &[(u32, usize)], k: usize) -> LocalVocab {
        LocalVocab::from_term_frequencies(tfs.iter().cloned(), k, 2)
    }

    #[test]
    fn words_are_sorted_and_indexed() {
        let v = vocab(&[(9, 1), (2, 5), (4, 0), (7, 3)], 10);
        let words: Vec<u32> = v.words().iter().map(|m| m.word).collect();
        assert_eq!(words, vec![2, 7, 9]);
        assert_eq!(v.num_slices(), 1);
        assert_eq!(v.word_to_index(0, 7), Some(1));
        assert_eq!(v.word_to_index(0, 4), None);
        assert_eq!(v.index_to_word(0, 2), 9);
        assert_eq!(v.global_tf_sum(0), 9);
    }

    #[test]
    fn layout_follows_term_frequency() {
        let v = vocab(&[(0, 1000), (1, 2)], 100);
        assert_eq!(v.meta(0).unwrap().row_kind, RowKind::Dense);
        assert!(v.meta(0).unwrap().alias_dense);
        assert_eq!(v.meta(1).unwrap().row_kind, RowKind::Sparse { capacity: 4 });
        assert!(!v.meta(1).unwrap().alias_dense);
    }

    #[test]
    fn slices_respect_model_budget() {
        // K = 8, every word dense: 8 cells each.
        let tfs: Vec<(u32, usize)> = (0..10).map(|w| (w, 50)).collect();
        let mut v = vocab(&tfs, 8);
        v.generate_slices(24, 0);
        assert_eq!(v.num_slices(), 4);
        assert_eq!(v.slice(0).first_word, 0);
        assert_eq!(v.slice(0).last_word, 2);
        assert_eq!(v.slice(3).len(), 1);
        let covered: usize = v.slices().iter().map(|s| s.len()).sum();
        assert_eq!(covered, 10);
        for s in v.slices() {
            for meta in v.slice_words(s.id) {
                assert_eq!(v.word_to_index(s.id, meta.word).map(|i| v.index_to_word(s.id, i)), Some(meta.word));
            }
        }
    }

    #[test]
    fn oversized_word_gets_its_own_slice() {
        let mut v = vocab(&[(0, 50), (1, 50)], 8);
        v.generate_slices(4, 0);
        assert_eq!(v.num_slices(), 2);
    }
}
