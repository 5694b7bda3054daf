//! Bitmap: the index-set algebra underlying cpusets and nodesets
//!
//! A [`Bitmap`] represents a potentially infinite set of non-negative
//! integers: a finite prefix of explicit words, plus a single flag saying
//! whether every index beyond the prefix is also set (the "infinite
//! suffix"). [`CpuSet`] and [`NodeSet`] are type-safe aliases used
//! respectively for sets of PU OS indices and NUMA node OS indices.

use derive_more::{From, Into};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    ops::Not,
};

/// Number of bits packed into one storage word
const WORD_BITS: u32 = 32;

/// A single index into a [`Bitmap`]
///
/// Bounded to `u32` because no topology this crate discovers has more than
/// four billion PUs or NUMA nodes; arithmetic on indices is checked rather
/// than wrapping, to catch off-by-one errors in range construction early.
#[derive(Copy, Clone, Debug, Default, Eq, From, Hash, Into, Ord, PartialEq, PartialOrd)]
pub struct BitmapIndex(u32);

impl BitmapIndex {
    /// The zero index
    pub const ZERO: Self = Self(0);

    /// Largest representable index
    pub const MAX: Self = Self(u32::MAX - 1);

    /// Build an index from a `usize`, returning `None` on overflow
    pub fn try_from_usize(value: usize) -> Option<Self> {
        u32::try_from(value).ok().filter(|&v| v != u32::MAX).map(Self)
    }

    /// View this index as a `usize`
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }

    fn word(self) -> usize {
        (self.0 / WORD_BITS) as usize
    }

    fn bit(self) -> u32 {
        self.0 % WORD_BITS
    }

    fn of(word: usize, bit: u32) -> Self {
        Self(word as u32 * WORD_BITS + bit)
    }
}

impl fmt::Display for BitmapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Outcome of comparing two bitmaps for inclusion
///
/// Consumed as an exact five-way contract by the CPU-kinds registration
/// algorithm ([`crate::cpukinds`]).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum BitmapInclusion {
    /// The two bitmaps contain the same elements
    Equal,
    /// `a` contains every element of `b`, and at least one more
    AStrictlyContainsB,
    /// `b` contains every element of `a`, and at least one more
    BStrictlyContainsA,
    /// `a` and `b` share at least one element, but neither contains the other
    Intersects,
    /// `a` and `b` share no elements
    Disjoint,
}

/// An arbitrary-size, immutable-identity, mutable-content set of
/// non-negative integers
///
/// Two bitmaps with the same set of elements compare equal regardless of how
/// many storage words either one happens to have allocated.
#[derive(Clone, Default, From, Into)]
pub struct Bitmap {
    /// Explicit 32-bit words, least significant first
    words: Vec<u32>,
    /// Whether every index beyond `words` is also a member
    infinite: bool,
}

impl Bitmap {
    /// An empty bitmap
    pub fn new() -> Self {
        Self::default()
    }

    /// The "full infinite" bitmap containing every non-negative integer
    pub fn full() -> Self {
        Self {
            words: Vec::new(),
            infinite: true,
        }
    }

    /// A bitmap containing only `index`
    pub fn from_index(index: impl Into<BitmapIndex>) -> Self {
        let mut b = Self::new();
        b.set(index);
        b
    }

    fn ensure_word(&mut self, word: usize) {
        if self.words.len() <= word {
            self.words.resize(word + 1, if self.infinite { u32::MAX } else { 0 });
        }
    }

    /// Trim trailing words that are redundant with the infinite suffix
    fn normalize(&mut self) {
        let filler = if self.infinite { u32::MAX } else { 0 };
        while self.words.last() == Some(&filler) {
            self.words.pop();
        }
    }

    /// Set bit `index`
    pub fn set(&mut self, index: impl Into<BitmapIndex>) {
        let index = index.into();
        self.ensure_word(index.word());
        self.words[index.word()] |= 1 << index.bit();
        self.normalize();
    }

    /// Clear bit `index`
    pub fn clr(&mut self, index: impl Into<BitmapIndex>) {
        let index = index.into();
        if self.infinite || index.word() < self.words.len() {
            self.ensure_word(index.word());
            self.words[index.word()] &= !(1 << index.bit());
            self.normalize();
        }
    }

    /// Truth that bit `index` is set
    pub fn is_set(&self, index: impl Into<BitmapIndex>) -> bool {
        let index = index.into();
        match self.words.get(index.word()) {
            Some(word) => word & (1 << index.bit()) != 0,
            None => self.infinite,
        }
    }

    /// Set every index in `[lo, hi]`
    ///
    /// `hi == BitmapIndex::MAX` is treated as "to infinity".
    pub fn set_range(&mut self, lo: impl Into<BitmapIndex>, hi: impl Into<BitmapIndex>) {
        let lo = lo.into();
        let hi = hi.into();
        if hi == BitmapIndex::MAX {
            self.ensure_word(lo.word());
            for w in &mut self.words[lo.word()..] {
                *w = u32::MAX;
            }
            self.words[lo.word()] |= u32::MAX << lo.bit();
            self.infinite = true;
            self.normalize();
            return;
        }
        self.ensure_word(hi.word());
        for i in lo.word()..=hi.word() {
            let from_bit = if i == lo.word() { lo.bit() } else { 0 };
            let to_bit = if i == hi.word() { hi.bit() } else { WORD_BITS - 1 };
            let mask = bit_range_mask(from_bit, to_bit);
            self.words[i] |= mask;
        }
        self.normalize();
    }

    /// Clear every index in `[lo, hi]`
    pub fn clr_range(&mut self, lo: impl Into<BitmapIndex>, hi: impl Into<BitmapIndex>) {
        let lo = lo.into();
        let hi = hi.into();
        if hi == BitmapIndex::MAX {
            self.ensure_word(lo.word());
            self.words.truncate(lo.word() + 1);
            self.words[lo.word()] &= !(u32::MAX << lo.bit());
            self.infinite = false;
            self.normalize();
            return;
        }
        if lo.word() >= self.words.len() && !self.infinite {
            return;
        }
        self.ensure_word(hi.word());
        for i in lo.word()..=hi.word() {
            let from_bit = if i == lo.word() { lo.bit() } else { 0 };
            let to_bit = if i == hi.word() { hi.bit() } else { WORD_BITS - 1 };
            let mask = bit_range_mask(from_bit, to_bit);
            self.words[i] &= !mask;
        }
        self.normalize();
    }

    /// Keep only the lowest set bit
    ///
    /// Useful before binding so the process cannot migrate between several
    /// logical CPUs in the original set. A no-op on an empty bitmap.
    pub fn singlify(&mut self) {
        if let Some(first) = self.first() {
            *self = Self::from_index(first);
        }
    }

    /// Truth that no bit is set
    pub fn is_empty(&self) -> bool {
        !self.infinite && self.words.iter().all(|&w| w == 0)
    }

    /// Truth that every bit is set
    pub fn is_full(&self) -> bool {
        self.infinite && self.words.is_empty()
    }

    /// Lowest set index, or `None` if empty
    pub fn first(&self) -> Option<BitmapIndex> {
        for (i, &w) in self.words.iter().enumerate() {
            if w != 0 {
                return Some(BitmapIndex::of(i, w.trailing_zeros()));
            }
        }
        self.infinite.then(|| BitmapIndex::of(self.words.len(), 0))
    }

    /// Highest set index, or `None` if empty or infinite
    pub fn last(&self) -> Option<BitmapIndex> {
        if self.infinite {
            return None;
        }
        for (i, &w) in self.words.iter().enumerate().rev() {
            if w != 0 {
                return Some(BitmapIndex::of(i, 31 - w.leading_zeros()));
            }
        }
        None
    }

    /// Next set index strictly above `index`, if any
    ///
    /// Scans the underlying words directly, the same way [`Self::first`] and
    /// [`Self::last`] do, rather than probing one index at a time: a finite
    /// bitmap with nothing left set above `index` would otherwise cost up to
    /// `BitmapIndex::MAX` iterations to establish that.
    pub fn next(&self, index: impl Into<BitmapIndex>) -> Option<BitmapIndex> {
        let start = BitmapIndex(index.into().0.saturating_add(1));
        let start_word = start.word();
        if start_word >= self.words.len() {
            return self.infinite.then(|| start);
        }
        let masked = self.words[start_word] & (u32::MAX << start.bit());
        if masked != 0 {
            return Some(BitmapIndex::of(start_word, masked.trailing_zeros()));
        }
        for (i, &w) in self.words.iter().enumerate().skip(start_word + 1) {
            if w != 0 {
                return Some(BitmapIndex::of(i, w.trailing_zeros()));
            }
        }
        self.infinite.then(|| BitmapIndex::of(self.words.len(), 0))
    }

    /// Cardinality of the set, or `None` if infinite
    pub fn weight(&self) -> Option<u64> {
        if self.infinite {
            return None;
        }
        Some(self.words.iter().map(|w| w.count_ones() as u64).sum())
    }

    /// Truth that the two bitmaps have the same elements
    pub fn is_equal(&self, other: &Self) -> bool {
        self.compare_inclusion(other) == BitmapInclusion::Equal
    }

    /// Truth that `self` is a subset of `other`
    pub fn is_included_in(&self, other: &Self) -> bool {
        matches!(
            self.compare_inclusion(other),
            BitmapInclusion::Equal | BitmapInclusion::BStrictlyContainsA
        )
    }

    /// Truth that `self` and `other` share at least one element
    pub fn intersects(&self, other: &Self) -> bool {
        !matches!(self.compare_inclusion(other), BitmapInclusion::Disjoint)
    }

    /// Exact five-way inclusion relationship between `self` (a) and `other` (b)
    ///
    /// `compare_inclusion(empty, empty) == Equal`; `compare_inclusion(empty,
    /// anything_else) == Disjoint`.
    pub fn compare_inclusion(&self, other: &Self) -> BitmapInclusion {
        let len = self.words.len().max(other.words.len());
        let mut a_extra = self.infinite;
        let mut b_extra = other.infinite;
        let mut any_common = false;
        for i in 0..len {
            let aw = self.words.get(i).copied().unwrap_or(if self.infinite { u32::MAX } else { 0 });
            let bw = other.words.get(i).copied().unwrap_or(if other.infinite { u32::MAX } else { 0 });
            if aw & !bw != 0 {
                a_extra = true;
            }
            if bw & !aw != 0 {
                b_extra = true;
            }
            if aw & bw != 0 {
                any_common = true;
            }
        }
        if self.infinite && other.infinite {
            any_common = true;
        }
        match (a_extra, b_extra) {
            (false, false) => BitmapInclusion::Equal,
            (true, false) => BitmapInclusion::AStrictlyContainsB,
            (false, true) => BitmapInclusion::BStrictlyContainsA,
            (true, true) if any_common => BitmapInclusion::Intersects,
            (true, true) => BitmapInclusion::Disjoint,
        }
    }

    /// Bitwise OR, accepting `self`/`other`/result freely aliasing
    pub fn or(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a | b, self.infinite || other.infinite)
    }

    /// Bitwise AND
    pub fn and(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a & b, self.infinite && other.infinite)
    }

    /// Bitwise AND NOT (`self` minus `other`)
    pub fn andnot(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a & !b, self.infinite && !other.infinite)
    }

    /// Bitwise XOR
    pub fn xor(&self, other: &Self) -> Self {
        self.zip_words(other, |a, b| a ^ b, self.infinite ^ other.infinite)
    }

    fn zip_words(&self, other: &Self, f: impl Fn(u32, u32) -> u32, infinite: bool) -> Self {
        let len = self.words.len().max(other.words.len());
        let mut words = Vec::with_capacity(len);
        for i in 0..len {
            let aw = self.words.get(i).copied().unwrap_or(if self.infinite { u32::MAX } else { 0 });
            let bw = other.words.get(i).copied().unwrap_or(if other.infinite { u32::MAX } else { 0 });
            words.push(f(aw, bw));
        }
        let mut result = Self { words, infinite };
        result.normalize();
        result
    }

    /// Parse the *list* text form: comma-separated hex groups of 32 bits,
    /// most-significant group first, with a `0xf...f,` prefix when the
    /// infinite suffix is set
    pub fn parse_list(text: &str) -> Option<Self> {
        let text = text.trim();
        let (infinite, text) = match text.strip_prefix("0xf...f,") {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        if text == "0x0" && !infinite {
            return Some(Self::new());
        }
        let groups: Vec<&str> = text.split(',').collect();
        let mut words = vec![0u32; groups.len()];
        for (i, group) in groups.iter().rev().enumerate() {
            let group = group.strip_prefix("0x").unwrap_or(group);
            words[i] = u32::from_str_radix(group, 16).ok()?;
        }
        let mut b = Self { words, infinite };
        b.normalize();
        Some(b)
    }

    /// Render the *list* text form
    pub fn to_list_string(&self) -> String {
        if self.is_empty() {
            return "0x0".to_string();
        }
        if self.is_full() {
            return "0xf...f".to_string();
        }
        let mut parts = Vec::new();
        for &w in self.words.iter().rev() {
            parts.push(format!("{w:08x}"));
        }
        if self.infinite {
            format!("0xf...f,{}", parts.join(","))
        } else {
            parts.join(",")
        }
    }

    /// Parse the *taskset* text form: a single unbounded hex integer
    pub fn parse_taskset(text: &str) -> Option<Self> {
        let text = text.strip_prefix("0x").unwrap_or(text);
        if text.is_empty() {
            return None;
        }
        let mut words = Vec::new();
        let bytes = text.as_bytes();
        let mut i = bytes.len();
        while i > 0 {
            let start = i.saturating_sub(8);
            let chunk = std::str::from_utf8(&bytes[start..i]).ok()?;
            words.push(u32::from_str_radix(chunk, 16).ok()?);
            i = start;
        }
        let mut b = Self {
            words,
            infinite: false,
        };
        b.normalize();
        Some(b)
    }

    /// Render the *taskset* text form
    pub fn to_taskset_string(&self) -> String {
        if self.infinite {
            return "0xf...f".to_string();
        }
        if self.words.is_empty() {
            return "0x0".to_string();
        }
        let mut s = String::from("0x");
        for (i, &w) in self.words.iter().rev().enumerate() {
            if i == 0 {
                s.push_str(&format!("{w:x}"));
            } else {
                s.push_str(&format!("{w:08x}"));
            }
        }
        s
    }
}

fn bit_range_mask(from_bit: u32, to_bit: u32) -> u32 {
    if from_bit > to_bit {
        return 0;
    }
    let width = to_bit - from_bit + 1;
    let base = if width >= WORD_BITS { u32::MAX } else { (1u32 << width) - 1 };
    base << from_bit
}

impl Not for Bitmap {
    type Output = Self;

    fn not(self) -> Self {
        let mut words: Vec<u32> = self.words.iter().map(|w| !w).collect();
        let infinite = !self.infinite;
        let mut result = Self {
            words: std::mem::take(&mut words),
            infinite,
        };
        result.normalize();
        result
    }
}

impl Not for &Bitmap {
    type Output = Bitmap;

    fn not(self) -> Bitmap {
        self.clone().not()
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for Bitmap {}

impl Hash for Bitmap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Two equal bitmaps must hash identically regardless of capacity, so
        // hash the canonical (normalized) word slice rather than `words` directly.
        let mut canonical = self.clone();
        canonical.normalize();
        canonical.words.hash(state);
        canonical.infinite.hash(state);
    }
}

impl PartialOrd for Bitmap {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match self.compare_inclusion(other) {
            BitmapInclusion::Equal => Some(Ordering::Equal),
            BitmapInclusion::AStrictlyContainsB => Some(Ordering::Greater),
            BitmapInclusion::BStrictlyContainsA => Some(Ordering::Less),
            BitmapInclusion::Intersects | BitmapInclusion::Disjoint => None,
        }
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_list_string())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({})", self.to_list_string())
    }
}

/// Set of PU OS indices
pub type CpuSet = Bitmap;

/// Set of NUMA node OS indices
pub type NodeSet = Bitmap;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_empty() {
        let b = Bitmap::new();
        assert!(b.is_empty());
        assert_eq!(b.to_list_string(), "0x0");
    }

    #[test]
    fn full_infinite_prints_and_parses() {
        let b = Bitmap::full();
        assert!(b.is_full());
        assert_eq!(b.to_list_string(), "0xf...f");
    }

    #[test]
    fn set_and_unset() {
        let mut b = Bitmap::new();
        b.set(1u32);
        b.set(3u32);
        b.set(8u32);
        assert_eq!(b.to_list_string(), "00000000,0000010a");
        assert!(!b.is_empty());
        b.clr(3u32);
        assert!(b.is_set(1u32));
        assert!(!b.is_set(3u32));
    }

    #[test]
    fn next_finds_set_bit_in_the_same_word() {
        let mut b = Bitmap::new();
        b.set(1u32);
        b.set(5u32);
        assert_eq!(b.next(1u32), Some(BitmapIndex(5)));
    }

    #[test]
    fn next_skips_empty_words_to_find_a_later_one() {
        let mut b = Bitmap::new();
        b.set(200u32);
        assert_eq!(b.next(0u32), Some(BitmapIndex(200)));
    }

    #[test]
    fn next_returns_none_past_the_last_set_bit_of_a_finite_bitmap() {
        let mut b = Bitmap::new();
        b.set(3u32);
        assert_eq!(b.next(3u32), None);
        assert_eq!(b.next(1000u32), None);
    }

    #[test]
    fn next_walks_into_the_infinite_suffix() {
        let mut b = Bitmap::new();
        b.set(3u32);
        b.set_range(64u32, BitmapIndex::MAX);
        assert_eq!(b.next(3u32), Some(BitmapIndex(64)));
        assert_eq!(b.next(1000u32), Some(BitmapIndex(1001)));
    }

    #[test]
    fn weight_tracks_cardinality() {
        let mut b = Bitmap::new();
        assert_eq!(b.weight(), Some(0));
        b.set_range(2u32, 5u32);
        assert_eq!(b.weight(), Some(4));
        b.set(9u32);
        assert_eq!(b.weight(), Some(5));
    }

    #[test]
    fn not_toggles_infinite_suffix() {
        let mut b = Bitmap::new();
        b.set(3u32);
        let inverted = !b.clone();
        assert!(inverted.is_set(0u32));
        assert!(!inverted.is_set(3u32));
        assert!(inverted.is_set(1000u32));
        let back = !inverted;
        assert_eq!(back, b);
    }

    #[test]
    fn singlify_on_empty_is_noop() {
        let mut b = Bitmap::new();
        b.singlify();
        assert!(b.is_empty());
    }

    #[test]
    fn singlify_keeps_lowest() {
        let mut b = Bitmap::new();
        b.set_range(0u32, 127u32);
        let mut inverted = !b;
        inverted.singlify();
        assert_eq!(inverted.weight(), Some(1));
        assert_eq!(inverted.first(), Some(BitmapIndex(128)));
    }

    #[test]
    fn compare_inclusion_empty_cases() {
        let empty = Bitmap::new();
        let mut other = Bitmap::new();
        other.set(0u32);
        assert_eq!(empty.compare_inclusion(&empty), BitmapInclusion::Equal);
        assert_eq!(empty.compare_inclusion(&other), BitmapInclusion::Disjoint);
    }

    #[test]
    fn list_round_trip() {
        let mut b = Bitmap::new();
        b.set_range(0u32, 3u32);
        b.set(7u32);
        b.set(8u32);
        b.set(9u32);
        b.set(64u32);
        b.set(65u32);
        b.set_range(BitmapIndex(66), BitmapIndex::MAX);
        let text = b.to_list_string();
        assert!(text.starts_with("0xf...f,"));
        let parsed = Bitmap::parse_list(&text).unwrap();
        assert_eq!(parsed, b);
    }

    #[test]
    fn taskset_round_trip() {
        let mut b = Bitmap::new();
        b.set_range(2u32, 5u32);
        b.set(9u32);
        let text = b.to_taskset_string();
        let parsed = Bitmap::parse_taskset(&text).unwrap();
        assert_eq!(parsed, b);
    }

    #[test]
    fn restrict_with_full_set_is_noop() {
        let mut b = Bitmap::new();
        b.set_range(0u32, 7u32);
        let restricted = b.and(&Bitmap::full());
        assert_eq!(restricted, b);
    }
}
