//! Sliding bitmap over the most recent sequence numbers.
//!
//! Bit 0 is the newest sequence number, bit `n` the one `n` steps older.
//! Anything `capacity()` or more steps behind the newest falls off the end.

const WORD_BITS: usize = u32::BITS as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitWindow {
    words: Vec<u32>,
    size: usize,
}

impl BitWindow {
    pub fn new(size: usize) -> Self {
        Self {
            words: vec![0; size.div_ceil(WORD_BITS)],
            size,
        }
    }

    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Mark the sequence number `offset` steps behind the newest one.
    pub fn mark_seen(&mut self, offset: i32) {
        let Ok(offset) = usize::try_from(offset) else {
            return;
        };
        if offset >= self.size {
            return;
        }
        self.words[offset / WORD_BITS] |= 1 << (offset % WORD_BITS);
    }

    fn is_set(&self, offset: usize) -> bool {
        offset < self.size && self.words[offset / WORD_BITS] & (1 << (offset % WORD_BITS)) != 0
    }

    /// Whether `seqno` was recorded, relative to `last_seqno` being bit 0.
    pub fn test_seen(&self, last_seqno: u16, seqno: u16) -> bool {
        let diff = last_seqno.wrapping_sub(seqno) as i16;
        match usize::try_from(diff) {
            Ok(offset) => self.is_set(offset),
            Err(_) => false,
        }
    }

    /// Move the window `delta` sequence numbers forward. Vacated slots at the
    /// newest end are empty.
    pub fn advance(&mut self, delta: i32) {
        let Ok(delta) = usize::try_from(delta) else {
            return;
        };
        if delta == 0 {
            return;
        }
        if delta >= self.size {
            self.clear();
            return;
        }

        let word_shift = delta / WORD_BITS;
        let bit_shift = delta % WORD_BITS;
        for i in (0..self.words.len()).rev() {
            let mut value = match i.checked_sub(word_shift) {
                Some(src) => self.words[src] << bit_shift,
                None => 0,
            };
            if bit_shift > 0 {
                if let Some(src) = i.checked_sub(word_shift + 1) {
                    value |= self.words[src] >> (WORD_BITS - bit_shift);
                }
            }
            self.words[i] = value;
        }
        self.trim();
    }

    /// Record a sequence number `seq_diff` steps newer than the current
    /// newest one (negative for older). Returns false when the number falls
    /// inside the window behind the newest; the window does not move and
    /// the old slot is marked only with `mark_current`. A jump of more than
    /// the window size in either direction is taken as a restart of the
    /// remote host and resets the window.
    pub fn observe(&mut self, seq_diff: i32, mark_current: bool) -> bool {
        let size = self.size as i32;
        if (-size..0).contains(&seq_diff) {
            if mark_current {
                self.mark_seen(-seq_diff);
            }
            return false;
        }

        if seq_diff > size || seq_diff < -size {
            tracing::trace!(seq_diff, "sequence jump, probable restart of remote host");
            self.clear();
        } else {
            self.advance(seq_diff);
        }
        if mark_current {
            self.mark_seen(0);
        }
        true
    }

    pub fn popcount(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    fn trim(&mut self) {
        let used = self.size % WORD_BITS;
        if used != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u32 << used) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn mark_outside_window_is_ignored() {
        let mut window = BitWindow::new(64);
        window.mark_seen(-1);
        window.mark_seen(64);
        assert_eq!(window.popcount(), 0);
        window.mark_seen(63);
        assert_eq!(window.popcount(), 1);
    }

    #[test]
    fn test_seen_relative_to_last() {
        let mut window = BitWindow::new(64);
        window.observe(0, true);
        window.observe(3, true);
        // last = 13, seen 10 and 13
        assert!(window.test_seen(13, 13));
        assert!(window.test_seen(13, 10));
        assert!(!window.test_seen(13, 11));
        assert!(!window.test_seen(13, 14));
        assert!(!window.test_seen(13, 13u16.wrapping_sub(64)));
    }

    #[test]
    fn test_seen_across_wraparound() {
        let mut window = BitWindow::new(32);
        window.observe(0, true);
        window.observe(2, true);
        assert!(window.test_seen(1, u16::MAX));
        assert!(window.test_seen(1, 1));
        assert!(!window.test_seen(1, 0));
    }

    #[test]
    fn older_number_marks_slot_and_is_rejected() {
        let mut window = BitWindow::new(64);
        assert!(window.observe(0, true));
        assert!(window.observe(5, true));
        assert!(!window.observe(-2, true));
        assert_eq!(window.popcount(), 3);
        assert!(window.test_seen(100, 98));
    }

    #[test]
    fn older_number_without_mark_leaves_window_alone() {
        let mut window = BitWindow::new(64);
        assert!(window.observe(0, true));
        assert!(window.observe(5, false));
        assert!(!window.observe(-2, false));
        assert_eq!(window.popcount(), 1);
        assert!(window.test_seen(100, 95));
        assert!(!window.test_seen(100, 98));
    }

    #[test]
    fn large_jump_resets_window() {
        let mut window = BitWindow::new(64);
        for _ in 0..10 {
            window.observe(1, true);
        }
        assert_eq!(window.popcount(), 10);
        assert!(window.observe(65, true));
        assert_eq!(window.popcount(), 1);
        assert!(window.observe(-65, false));
        assert_eq!(window.popcount(), 0);
    }

    #[test]
    fn advance_crosses_word_boundaries() {
        let mut window = BitWindow::new(70);
        window.mark_seen(0);
        window.mark_seen(31);
        window.advance(33);
        assert!(window.is_set(33));
        assert!(window.is_set(64));
        assert_eq!(window.popcount(), 2);
        window.advance(6);
        assert!(window.is_set(39));
        assert_eq!(window.popcount(), 1);
    }

    proptest! {
        #[test]
        fn popcount_matches_marks_inside_window(
            steps in proptest::collection::vec((-80i32..80, any::<bool>()), 1..200),
            size in 1usize..100,
        ) {
            let mut window = BitWindow::new(size);
            // ages of the marked sequence numbers, 0 being the newest
            let mut ages: BTreeSet<usize> = BTreeSet::new();
            let limit = size as i32;
            for (delta, mark) in steps {
                let accepted = window.observe(delta, mark);
                if (-limit..0).contains(&delta) {
                    prop_assert!(!accepted);
                    let age = (-delta) as usize;
                    if mark && age < size {
                        ages.insert(age);
                    }
                } else {
                    prop_assert!(accepted);
                    ages = if delta < 0 || delta > limit {
                        BTreeSet::new()
                    } else {
                        ages.into_iter()
                            .map(|age| age + delta as usize)
                            .filter(|age| *age < size)
                            .collect()
                    };
                    if mark {
                        ages.insert(0);
                    }
                }
                prop_assert_eq!(window.popcount() as usize, ages.len());
            }
        }
    }
}
