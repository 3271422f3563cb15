use crate::document::Document;
use crate::error::Result;
use crate::table::{self, Slot};

pub const DEFAULT_CAPACITY: usize = 1024;

/// Topic counts of the document currently being sampled.
///
/// Rebuilt from the document's assignments before sampling it and thrown
/// away afterwards. Uses the same table technology as sparse rows.
#[derive(Clone, Debug)]
pub struct DocCounter {
    slots: Vec<Slot>,
    tombstones: usize,
    scratch: Vec<(u32, i32)>,
}

impl DocCounter {
    pub fn new(capacity: usize) -> DocCounter {
        DocCounter {
            slots: vec![Slot::Empty; table::next_pow2(capacity)],
            tombstones: 0,
            scratch: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = Slot::Empty;
        }
        self.tombstones = 0;
    }

    /// Grow so that `distinct` topics fill at most half the table.
    pub fn reserve(&mut self, distinct: usize) {
        let needed = table::next_pow2(2 * distinct);
        if needed > self.slots.len() {
            debug!("Growing document counter from {} to {} slots", self.slots.len(), needed);
            self.slots = vec![Slot::Empty; needed];
            self.tombstones = 0;
        }
    }

    /// Reset and count the topics currently assigned in `doc`.
    pub fn rebuild(&mut self, doc: &Document, num_topics: usize) -> Result<()> {
        self.reserve(doc.len().min(num_topics));
        self.clear();
        for token in doc.tokens() {
            self.inc(token.topic, 1)?;
        }
        Ok(())
    }

    #[inline]
    pub fn inc(&mut self, topic: u32, delta: i32) -> Result<()> {
        table::inc(&mut self.slots, &mut self.tombstones, &mut self.scratch, topic, delta)
    }

    #[inline]
    pub fn get(&self, topic: u32) -> i32 {
        table::get(&self.slots, topic)
    }

    pub fn nonzero_count(&self) -> usize {
        table::nonzero_count(&self.slots)
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (u32, i32)> + 'a {
        table::live(&self.slots)
    }

    pub fn total(&self) -> i64 {
        self.iter().map(|(_, c)| c as i64).sum()
    }
}

impl Default for DocCounter {
    fn default() -> DocCounter {
        DocCounter::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Token;

    #[test]
    fn rebuild_counts_assignments() {
        let doc = Document::new(vec![
            Token { word: 1, topic: 3 },
            Token { word: 0, topic: 3 },
            Token { word: 2, topic: 0 },
        ]);
        let mut counter = DocCounter::default();
        counter.inc(9, 4).unwrap();
        counter.rebuild(&doc, 10).unwrap();
        assert_eq!(counter.get(3), 2);
        assert_eq!(counter.get(0), 1);
        assert_eq!(counter.get(9), 0);
        assert_eq!(counter.total(), 3);
        assert_eq!(counter.nonzero_count(), 2);
    }

    #[test]
    fn grows_for_documents_with_many_topics() {
        let tokens: Vec<Token> = (0..3000u32).map(|i| Token { word: i, topic: i }).collect();
        let doc = Document::new(tokens);
        let mut counter = DocCounter::default();
        counter.rebuild(&doc, 5000).unwrap();
        assert!(counter.capacity() >= 6000);
        assert_eq!(counter.nonzero_count(), 3000);
    }

    #[test]
    fn capacity_is_bounded_by_topic_count() {
        let tokens: Vec<Token> = (0..3000u32).map(|i| Token { word: i, topic: i % 4 }).collect();
        let mut counter = DocCounter::default();
        counter.rebuild(&Document::new(tokens), 4).unwrap();
        assert_eq!(counter.capacity(), DEFAULT_CAPACITY);
        assert_eq!(counter.get(2), 750);
    }
}
