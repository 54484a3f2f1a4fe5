//! Growable bit set over `u64` words.
//!
//! Backs both the free-space bitmap pages and the log's transient undo
//! tracking sets. Bits beyond the allocated words read as clear; setting one
//! grows the word array.

/// A growable set of bit indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BitField {
    words: Vec<u64>,
}

impl BitField {
    /// Creates an empty bit field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty bit field with room for `bits` bits.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
        }
    }

    /// Returns whether bit `i` is set.
    #[inline]
    pub fn get(&self, i: usize) -> bool {
        self.words
            .get(i / 64)
            .is_some_and(|w| w & (1u64 << (i % 64)) != 0)
    }

    /// Sets bit `i`.
    pub fn set(&mut self, i: usize) {
        let word = i / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1u64 << (i % 64);
    }

    /// Clears bit `i`.
    pub fn clear(&mut self, i: usize) {
        if let Some(w) = self.words.get_mut(i / 64) {
            *w &= !(1u64 << (i % 64));
        }
    }

    /// Sets or clears bit `i`.
    pub fn set_value(&mut self, i: usize, value: bool) {
        if value {
            self.set(i);
        } else {
            self.clear(i);
        }
    }

    /// Clears every bit.
    pub fn clear_all(&mut self) {
        self.words.clear();
    }

    /// Index of the first set bit at or after `from`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        let mut word = from / 64;
        if word >= self.words.len() {
            return None;
        }
        let mut bits = self.words[word] & (u64::MAX << (from % 64));
        loop {
            if bits != 0 {
                return Some(word * 64 + bits.trailing_zeros() as usize);
            }
            word += 1;
            bits = *self.words.get(word)?;
        }
    }

    /// Index of the first clear bit at or after `from`.
    ///
    /// Always exists: the set is unbounded.
    pub fn next_clear_bit(&self, from: usize) -> usize {
        let mut word = from / 64;
        if word >= self.words.len() {
            return from;
        }
        let mut bits = !self.words[word] & (u64::MAX << (from % 64));
        loop {
            if bits != 0 {
                return word * 64 + bits.trailing_zeros() as usize;
            }
            word += 1;
            match self.words.get(word) {
                Some(w) => bits = !w,
                None => return word * 64,
            }
        }
    }

    /// One past the highest set bit, or 0 when empty.
    pub fn length(&self) -> usize {
        self.words
            .iter()
            .rposition(|&w| w != 0)
            .map_or(0, |i| i * 64 + 64 - self.words[i].leading_zeros() as usize)
    }

    /// Returns true if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Byte `i` of the set, bits LSB-first.
    pub fn get_byte(&self, i: usize) -> u8 {
        self.words
            .get(i / 8)
            .map_or(0, |w| (w >> ((i % 8) * 8)) as u8)
    }

    /// Overwrites byte `i` of the set, bits LSB-first.
    pub fn set_byte(&mut self, i: usize, value: u8) {
        let word = i / 8;
        if word >= self.words.len() {
            if value == 0 {
                return;
            }
            self.words.resize(word + 1, 0);
        }
        let shift = (i % 8) * 8;
        self.words[word] = (self.words[word] & !(0xFFu64 << shift)) | (u64::from(value) << shift);
    }

    /// Iterates over the set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.next_set_bit(0);
        std::iter::from_fn(move || {
            let current = next?;
            next = self.next_set_bit(current + 1);
            Some(current)
        })
    }
}

impl FromIterator<usize> for BitField {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bits = BitField::new();
        for i in iter {
            bits.set(i);
        }
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_get_clear() {
        let mut bits = BitField::new();
        assert!(!bits.get(100));
        bits.set(100);
        assert!(bits.get(100));
        assert!(!bits.get(99));
        bits.clear(100);
        assert!(!bits.get(100));
        bits.clear(10_000);
    }

    #[test]
    fn next_set_and_clear() {
        let bits: BitField = [0, 1, 2, 64, 130].into_iter().collect();
        assert_eq!(bits.next_set_bit(0), Some(0));
        assert_eq!(bits.next_set_bit(3), Some(64));
        assert_eq!(bits.next_set_bit(65), Some(130));
        assert_eq!(bits.next_set_bit(131), None);
        assert_eq!(bits.next_clear_bit(0), 3);
        assert_eq!(bits.next_clear_bit(64), 65);
        assert_eq!(bits.next_clear_bit(500), 500);
    }

    #[test]
    fn next_clear_bit_past_full_words() {
        let bits: BitField = (0..128).collect();
        assert_eq!(bits.next_clear_bit(0), 128);
    }

    #[test]
    fn length_is_highest_bit_plus_one() {
        let mut bits = BitField::new();
        assert_eq!(bits.length(), 0);
        bits.set(0);
        assert_eq!(bits.length(), 1);
        bits.set(63);
        assert_eq!(bits.length(), 64);
        bits.set(200);
        assert_eq!(bits.length(), 201);
        bits.clear(200);
        assert_eq!(bits.length(), 64);
    }

    #[test]
    fn bytes_are_lsb_first() {
        let mut bits = BitField::new();
        bits.set_byte(1, 0b0000_0101);
        assert!(bits.get(8));
        assert!(!bits.get(9));
        assert!(bits.get(10));
        assert_eq!(bits.get_byte(1), 0b0000_0101);
        assert_eq!(bits.get_byte(0), 0);
        assert_eq!(bits.get_byte(1000), 0);
    }

    #[test]
    fn iter_and_count() {
        let bits: BitField = [5, 70, 3].into_iter().collect();
        assert_eq!(bits.iter().collect::<Vec<_>>(), vec![3, 5, 70]);
        assert_eq!(bits.count_ones(), 3);
        let mut bits = bits;
        bits.clear_all();
        assert!(bits.is_empty());
    }

    proptest! {
        #[test]
        fn next_clear_bit_is_clear(ids in proptest::collection::vec(0usize..512, 0..64), from in 0usize..600) {
            let bits: BitField = ids.iter().copied().collect();
            let clear = bits.next_clear_bit(from);
            prop_assert!(clear >= from);
            prop_assert!(!bits.get(clear));
            prop_assert!((from..clear).all(|i| bits.get(i)));
        }
    }
}
