//! Per-word topic counts.
//!
//! Frequent words get a dense array of K counts, rare words a small open
//! addressing table sized from their term frequency. All rows of a slice live
//! in one `RowArena`, which hands out ranges of two flat buffers.

use std::iter::Enumerate;
use std::slice;

use crate::error::{LdaError, Result};
use crate::table::{self, Slot};

/// Representation chosen for a row when its slice is laid out.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowKind {
    Dense,
    Sparse { capacity: usize },
}

impl RowKind {
    /// Dense when `tf >= K / (2 * load_factor)`, otherwise a table with
    /// `next_pow2(load_factor * tf)` slots.
    pub fn for_term_frequency(tf: usize, num_topics: usize, load_factor: usize) -> RowKind {
        let hot_threshold = num_topics / (2 * load_factor);
        if tf >= hot_threshold {
            RowKind::Dense
        } else {
            RowKind::Sparse {
                capacity: table::next_pow2(load_factor * tf),
            }
        }
    }

    /// Memory cost in 32-bit cells, a key and a value per sparse slot.
    pub fn cells(&self, num_topics: usize) -> usize {
        match *self {
            RowKind::Dense => num_topics,
            RowKind::Sparse { capacity } => 2 * capacity,
        }
    }

    pub fn is_dense(&self) -> bool {
        *self == RowKind::Dense
    }
}

#[derive(Clone, Debug)]
enum Layout {
    Dense { offset: usize },
    Sparse { offset: usize, capacity: usize, tombstones: usize },
}

/// Flat storage for every row of one model slice.
#[derive(Clone, Debug)]
pub struct RowArena {
    num_topics: usize,
    dense: Vec<i32>,
    sparse: Vec<Slot>,
    layouts: Vec<Layout>,
    // shared rehash buffer
    scratch: Vec<(u32, i32)>,
}

impl RowArena {
    pub fn new(num_topics: usize) -> RowArena {
        RowArena {
            num_topics,
            dense: Vec::new(),
            sparse: Vec::new(),
            layouts: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn with_kinds(num_topics: usize, kinds: &[RowKind]) -> RowArena {
        let mut arena = RowArena::new(num_topics);
        let dense_rows = kinds.iter().filter(|k| k.is_dense()).count();
        let sparse_slots: usize = kinds
            .iter()
            .map(|k| match *k {
                RowKind::Sparse { capacity } => capacity,
                RowKind::Dense => 0,
            })
            .sum();
        arena.dense.reserve_exact(dense_rows * num_topics);
        arena.sparse.reserve_exact(sparse_slots);
        arena.layouts.reserve_exact(kinds.len());
        for &kind in kinds {
            arena.push(kind);
        }
        arena
    }

    /// Append a zeroed row and return its index.
    pub fn push(&mut self, kind: RowKind) -> usize {
        let layout = match kind {
            RowKind::Dense => {
                let offset = self.dense.len();
                self.dense.resize(offset + self.num_topics, 0);
                Layout::Dense { offset }
            }
            RowKind::Sparse { capacity } => {
                debug_assert!(capacity.is_power_of_two());
                let offset = self.sparse.len();
                self.sparse.resize(offset + capacity, Slot::Empty);
                Layout::Sparse { offset, capacity, tombstones: 0 }
            }
        };
        self.layouts.push(layout);
        self.layouts.len() - 1
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    pub fn row(&self, index: usize) -> Row<'_> {
        match self.layouts[index] {
            Layout::Dense { offset } => Row::Dense(&self.dense[offset..offset + self.num_topics]),
            Layout::Sparse { offset, capacity, .. } => Row::Sparse(&self.sparse[offset..offset + capacity]),
        }
    }

    pub fn row_mut(&mut self, index: usize) -> RowMut<'_> {
        let RowArena { num_topics, dense, sparse, layouts, scratch } = self;
        match layouts[index] {
            Layout::Dense { offset } => RowMut::Dense(&mut dense[offset..offset + *num_topics]),
            Layout::Sparse { offset, capacity, ref mut tombstones } => RowMut::Sparse {
                slots: &mut sparse[offset..offset + capacity],
                tombstones,
                scratch,
            },
        }
    }

    /// Zero every row, keeping the layout.
    pub fn clear(&mut self) {
        for c in self.dense.iter_mut() {
            *c = 0;
        }
        for s in self.sparse.iter_mut() {
            *s = Slot::Empty;
        }
        for layout in self.layouts.iter_mut() {
            if let Layout::Sparse { ref mut tombstones, .. } = *layout {
                *tombstones = 0;
            }
        }
    }
}

/// Read-only view of one row.
#[derive(Clone, Copy, Debug)]
pub enum Row<'a> {
    Dense(&'a [i32]),
    Sparse(&'a [Slot]),
}

impl<'a> Row<'a> {
    #[inline]
    pub fn get(&self, topic: u32) -> i32 {
        match *self {
            Row::Dense(counts) => counts.get(topic as usize).cloned().unwrap_or(0),
            Row::Sparse(slots) => table::get(slots, topic),
        }
    }

    pub fn nonzero_count(&self) -> usize {
        match *self {
            Row::Dense(counts) => counts.iter().filter(|&&c| c != 0).count(),
            Row::Sparse(slots) => table::nonzero_count(slots),
        }
    }

    pub fn is_dense(&self) -> bool {
        match *self {
            Row::Dense(_) => true,
            Row::Sparse(_) => false,
        }
    }

    /// Number of topics for a dense row, number of slots for a sparse one.
    pub fn capacity(&self) -> usize {
        match *self {
            Row::Dense(counts) => counts.len(),
            Row::Sparse(slots) => slots.len(),
        }
    }

    /// Sum of all counts, which equals the word's term frequency.
    pub fn total(&self) -> i64 {
        self.iter().map(|(_, c)| c as i64).sum()
    }

    /// Nonzero `(topic, count)` pairs; dense rows in topic order.
    pub fn iter(&self) -> RowIter<'a> {
        match *self {
            Row::Dense(counts) => RowIter::Dense(counts.iter().enumerate()),
            Row::Sparse(slots) => RowIter::Sparse(slots.iter()),
        }
    }
}

pub enum RowIter<'a> {
    Dense(Enumerate<slice::Iter<'a, i32>>),
    Sparse(slice::Iter<'a, Slot>),
}

impl<'a> Iterator for RowIter<'a> {
    type Item = (u32, i32);

    fn next(&mut self) -> Option<(u32, i32)> {
        match *self {
            RowIter::Dense(ref mut it) => it.find(|&(_, &c)| c != 0).map(|(k, &c)| (k as u32, c)),
            RowIter::Sparse(ref mut it) => it
                .filter_map(|slot| match *slot {
                    Slot::Occupied { topic, count } => Some((topic, count)),
                    _ => None,
                })
                .next(),
        }
    }
}

/// Mutable view of one row.
pub enum RowMut<'a> {
    Dense(&'a mut [i32]),
    Sparse {
        slots: &'a mut [Slot],
        tombstones: &'a mut usize,
        scratch: &'a mut Vec<(u32, i32)>,
    },
}

impl<'a> RowMut<'a> {
    pub fn inc(&mut self, topic: u32, delta: i32) -> Result<()> {
        match *self {
            RowMut::Dense(ref mut counts) => {
                let num_topics = counts.len();
                let cell = counts.get_mut(topic as usize).ok_or(LdaError::TopicOutOfRange {
                    topic: topic as i64,
                    num_topics,
                })?;
                let count = *cell as i64 + delta as i64;
                if count < 0 {
                    return Err(LdaError::NegativeCount { topic, count });
                }
                *cell = count as i32;
                Ok(())
            }
            RowMut::Sparse { ref mut slots, ref mut tombstones, ref mut scratch } => {
                table::inc(slots, tombstones, scratch, topic, delta)
            }
        }
    }

    pub fn as_row(&self) -> Row<'_> {
        match *self {
            RowMut::Dense(ref counts) => Row::Dense(counts),
            RowMut::Sparse { ref slots, .. } => Row::Sparse(slots),
        }
    }

    pub fn get(&self, topic: u32) -> i32 {
        self.as_row().get(topic)
    }

    /// Tombstones currently held; always 0 for dense rows.
    pub fn tombstones(&self) -> usize {
        match *self {
            RowMut::Dense(_) => 0,
            RowMut::Sparse { ref tombstones, .. } => **tombstones,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: usize = 100;
    const LOAD_FACTOR: usize = 2;

    #[test]
    fn kind_follows_term_frequency() {
        assert_eq!(RowKind::for_term_frequency(1000, K, LOAD_FACTOR), RowKind::Dense);
        assert_eq!(RowKind::for_term_frequency(25, K, LOAD_FACTOR), RowKind::Dense);
        assert_eq!(RowKind::for_term_frequency(24, K, LOAD_FACTOR), RowKind::Sparse { capacity: 64 });
        assert_eq!(RowKind::for_term_frequency(2, K, LOAD_FACTOR), RowKind::Sparse { capacity: 4 });
        assert_eq!(RowKind::for_term_frequency(3, K, 5), RowKind::Sparse { capacity: 16 });
    }

    #[test]
    fn dense_and_sparse_rows_agree() {
        let dense_kind = RowKind::for_term_frequency(1000, K, LOAD_FACTOR);
        let sparse_kind = RowKind::for_term_frequency(2, K, LOAD_FACTOR);
        let mut arena = RowArena::with_kinds(K, &[dense_kind, sparse_kind]);
        assert!(arena.row(0).is_dense());
        assert!(!arena.row(1).is_dense());

        let ops: &[(u32, i32)] = &[(0, 1), (99, 1), (0, -1), (42, 1), (99, 1), (42, -1), (7, 1), (99, -1)];
        for &(topic, delta) in ops {
            arena.row_mut(0).inc(topic, delta).unwrap();
            arena.row_mut(1).inc(topic, delta).unwrap();
        }
        for topic in 0..K as u32 {
            assert_eq!(arena.row(0).get(topic), arena.row(1).get(topic), "topic {}", topic);
        }
        assert_eq!(arena.row(0).nonzero_count(), arena.row(1).nonzero_count());
        assert_eq!(arena.row(0).total(), 2);
        assert_eq!(arena.row(1).total(), 2);
    }

    #[test]
    fn sparse_row_capacity_matches_term_frequency() {
        for tf in 1..25usize {
            let kind = RowKind::for_term_frequency(tf, K, LOAD_FACTOR);
            let mut arena = RowArena::with_kinds(K, &[kind]);
            assert_eq!(arena.row(0).capacity(), (LOAD_FACTOR * tf).next_power_of_two());
            for t in 0..tf as u32 {
                arena.row_mut(0).inc(t * 3, 1).unwrap();
            }
            assert_eq!(arena.row(0).nonzero_count(), tf);
            assert!(arena.row(0).nonzero_count() <= tf);
        }
    }

    #[test]
    fn forced_rehash_round_trips_live_entries() {
        let mut arena = RowArena::with_kinds(1000, &[RowKind::Sparse { capacity: 128 }]);
        let mut expected = vec![0i32; 1000];
        for t in 0..60u32 {
            let topic = t * 13 % 1000;
            arena.row_mut(0).inc(topic, (t % 5 + 1) as i32).unwrap();
            expected[topic as usize] += (t % 5 + 1) as i32;
        }
        let victims = [0u32, 13, 26, 39];
        for &topic in &victims {
            let count = arena.row(0).get(topic);
            arena.row_mut(0).inc(topic, -count).unwrap();
            expected[topic as usize] = 0;
        }
        assert_eq!(arena.row_mut(0).tombstones(), 1);
        for topic in 0..1000u32 {
            assert_eq!(arena.row(0).get(topic), expected[topic as usize]);
        }
        let mut live: Vec<(u32, i32)> = arena.row(0).iter().collect();
        live.sort();
        let want: Vec<(u32, i32)> = expected
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c != 0)
            .map(|(t, &c)| (t as u32, c))
            .collect();
        assert_eq!(live, want);
    }

    #[test]
    fn dense_row_rejects_negative_and_out_of_range() {
        let mut arena = RowArena::with_kinds(4, &[RowKind::Dense]);
        assert!(arena.row_mut(0).inc(1, -1).is_err());
        assert!(arena.row_mut(0).inc(4, 1).is_err());
        assert_eq!(arena.row(0).total(), 0);
    }

    #[test]
    fn clear_zeroes_all_rows() {
        let mut arena = RowArena::with_kinds(8, &[RowKind::Dense, RowKind::Sparse { capacity: 4 }]);
        arena.row_mut(0).inc(3, 2).unwrap();
        arena.row_mut(1).inc(5, 1).unwrap();
        arena.clear();
        assert_eq!(arena.row(0).total(), 0);
        assert_eq!(arena.row(1).total(), 0);
        assert_eq!(arena.len(), 2);
    }
}
