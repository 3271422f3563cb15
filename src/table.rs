//! Fixed-capacity open addressing over topic ids.
//!
//! The functions here work on borrowed slot slices so that the same probing
//! logic backs both arena-allocated sparse rows and the per-document counter.
//! Capacity must be a power of two. Probing is quadratic (triangular steps),
//! which visits every slot of a power-of-two table exactly once.

use crate::error::{LdaError, Result};

/// Rehash once more than 1/50 of the slots are tombstones.
const TOMBSTONE_RATIO: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Empty,
    /// A topic whose count dropped to zero. Probe chains continue past it.
    Tombstone,
    Occupied { topic: u32, count: i32 },
}

impl Default for Slot {
    fn default() -> Slot {
        Slot::Empty
    }
}

enum Probe {
    Found(usize),
    Vacant(usize),
}

#[inline]
fn home(topic: u32, mask: usize) -> usize {
    (topic as usize + 1) & mask
}

fn probe(slots: &[Slot], topic: u32) -> Result<Probe> {
    let capacity = slots.len();
    if capacity == 0 {
        return Err(LdaError::TableFull { topic, capacity });
    }
    let mask = capacity - 1;
    let mut idx = home(topic, mask);
    let mut insert_at = None;
    for num_probes in 1..=capacity {
        match slots[idx] {
            Slot::Empty => return Ok(Probe::Vacant(insert_at.unwrap_or(idx))),
            Slot::Tombstone => {
                if insert_at.is_none() {
                    insert_at = Some(idx);
                }
            }
            Slot::Occupied { topic: t, .. } if t == topic => return Ok(Probe::Found(idx)),
            Slot::Occupied { .. } => {}
        }
        idx = (idx + num_probes) & mask;
    }
    // Every slot was visited, so the topic is absent.
    match insert_at {
        Some(idx) => Ok(Probe::Vacant(idx)),
        None => Err(LdaError::TableFull { topic, capacity }),
    }
}

/// Count of `topic`, 0 when absent.
pub fn get(slots: &[Slot], topic: u32) -> i32 {
    match probe(slots, topic) {
        Ok(Probe::Found(idx)) => match slots[idx] {
            Slot::Occupied { count, .. } => count,
            _ => 0,
        },
        _ => 0,
    }
}

/// Add `delta` to the count of `topic`, inserting or tombstoning as needed.
///
/// The table is left untouched when an error is returned.
pub fn inc(
    slots: &mut [Slot],
    tombstones: &mut usize,
    scratch: &mut Vec<(u32, i32)>,
    topic: u32,
    delta: i32,
) -> Result<()> {
    match probe(slots, topic)? {
        Probe::Found(idx) => {
            let current = match slots[idx] {
                Slot::Occupied { count, .. } => count,
                _ => 0,
            };
            let count = current as i64 + delta as i64;
            if count < 0 {
                return Err(LdaError::NegativeCount { topic, count });
            }
            if count == 0 {
                slots[idx] = Slot::Tombstone;
                *tombstones += 1;
                if *tombstones * TOMBSTONE_RATIO > slots.len() {
                    rehash(slots, tombstones, scratch)?;
                }
            } else {
                slots[idx] = Slot::Occupied { topic, count: count as i32 };
            }
        }
        Probe::Vacant(idx) => {
            if delta < 0 {
                return Err(LdaError::NegativeCount { topic, count: delta as i64 });
            }
            if delta == 0 {
                return Ok(());
            }
            if slots[idx] == Slot::Tombstone {
                *tombstones -= 1;
            }
            slots[idx] = Slot::Occupied { topic, count: delta };
        }
    }
    Ok(())
}

/// Rebuild the table in place, dropping every tombstone.
pub fn rehash(slots: &mut [Slot], tombstones: &mut usize, scratch: &mut Vec<(u32, i32)>) -> Result<()> {
    scratch.clear();
    scratch.extend(live(slots));
    for slot in slots.iter_mut() {
        *slot = Slot::Empty;
    }
    *tombstones = 0;
    for &(topic, count) in scratch.iter() {
        match probe(slots, topic)? {
            Probe::Vacant(idx) => slots[idx] = Slot::Occupied { topic, count },
            Probe::Found(_) => unreachable!("duplicate topic {} in table", topic),
        }
    }
    Ok(())
}

/// Live `(topic, count)` pairs in slot order.
pub fn live<'a>(slots: &'a [Slot]) -> impl Iterator<Item = (u32, i32)> + 'a {
    slots.iter().filter_map(|slot| match *slot {
        Slot::Occupied { topic, count } => Some((topic, count)),
        _ => None,
    })
}

pub fn nonzero_count(slots: &[Slot]) -> usize {
    live(slots).filter(|&(_, count)| count != 0).count()
}

/// Smallest power of two that is at least `x` (and at least 1).
pub fn next_pow2(x: usize) -> usize {
    x.max(1).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(capacity: usize) -> (Vec<Slot>, usize, Vec<(u32, i32)>) {
        (vec![Slot::Empty; capacity], 0, Vec::new())
    }

    #[test]
    fn topic_zero_is_a_valid_key() {
        let (mut slots, mut tomb, mut scratch) = table(8);
        inc(&mut slots, &mut tomb, &mut scratch, 0, 3).unwrap();
        assert_eq!(get(&slots, 0), 3);
        assert_eq!(get(&slots, 1), 0);
        assert_eq!(nonzero_count(&slots), 1);
    }

    #[test]
    fn zero_count_leaves_tombstone_and_keeps_chain() {
        // All four topics share home bucket 8.
        let (mut slots, mut tomb, mut scratch) = table(64);
        let colliding: Vec<u32> = (0..4).map(|i| 7 + 64 * i).collect();
        for &t in &colliding {
            inc(&mut slots, &mut tomb, &mut scratch, t, 1).unwrap();
        }
        inc(&mut slots, &mut tomb, &mut scratch, colliding[0], -1).unwrap();
        assert_eq!(tomb, 1);
        for &t in &colliding[1..] {
            assert_eq!(get(&slots, t), 1);
        }
        assert_eq!(get(&slots, colliding[0]), 0);
        // Reinsertion reuses the tombstone.
        inc(&mut slots, &mut tomb, &mut scratch, colliding[0], 2).unwrap();
        assert_eq!(tomb, 0);
        assert_eq!(get(&slots, colliding[0]), 2);
    }

    #[test]
    fn negative_count_is_rejected_without_mutation() {
        let (mut slots, mut tomb, mut scratch) = table(8);
        inc(&mut slots, &mut tomb, &mut scratch, 4, 1).unwrap();
        assert!(inc(&mut slots, &mut tomb, &mut scratch, 4, -2).is_err());
        assert!(inc(&mut slots, &mut tomb, &mut scratch, 5, -1).is_err());
        assert_eq!(get(&slots, 4), 1);
        assert_eq!(get(&slots, 5), 0);
    }

    #[test]
    fn full_table_reports_capacity_violation() {
        let (mut slots, mut tomb, mut scratch) = table(4);
        for t in 0..4 {
            inc(&mut slots, &mut tomb, &mut scratch, t, 1).unwrap();
        }
        match inc(&mut slots, &mut tomb, &mut scratch, 99, 1) {
            Err(LdaError::TableFull { topic: 99, capacity: 4 }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn half_full_table_never_exhausts_probes() {
        for &capacity in &[2usize, 4, 16, 128, 1024] {
            let (mut slots, mut tomb, mut scratch) = table(capacity);
            for t in 0..(capacity / 2) as u32 {
                inc(&mut slots, &mut tomb, &mut scratch, t * 31 + 5, 1).unwrap();
            }
            assert_eq!(nonzero_count(&slots), capacity / 2);
        }
    }

    #[test]
    fn rehash_preserves_live_pairs() {
        let (mut slots, mut tomb, mut scratch) = table(128);
        for t in 0..40u32 {
            inc(&mut slots, &mut tomb, &mut scratch, t, (t + 1) as i32).unwrap();
        }
        // The third tombstone pushes past 128 / 50 and triggers a rehash.
        inc(&mut slots, &mut tomb, &mut scratch, 3, -4).unwrap();
        assert_eq!(tomb, 1);
        inc(&mut slots, &mut tomb, &mut scratch, 10, -11).unwrap();
        inc(&mut slots, &mut tomb, &mut scratch, 20, -21).unwrap();
        assert_eq!(tomb, 0);
        assert!(slots.iter().all(|s| *s != Slot::Tombstone));
        for t in 0..40u32 {
            let expected = if t == 3 || t == 10 || t == 20 { 0 } else { (t + 1) as i32 };
            assert_eq!(get(&slots, t), expected, "topic {}", t);
        }
        assert_eq!(nonzero_count(&slots), 37);
    }

    #[test]
    fn next_pow2_rounds_up() {
        assert_eq!(next_pow2(0), 1);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(5), 8);
        assert_eq!(next_pow2(8), 8);
    }
}
