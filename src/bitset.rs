//! Compact bitset representation for leaf sets over a taxon universe.
//!
//! # Overview
//! Each bit position corresponds to the index of a label in the
//! [`TaxonUniverse`](crate::taxa::TaxonUniverse). A bitset therefore names the
//! leaves below one node, or one side of a bipartition.
//!
//! # Example
//! For a universe [A, B, C, D] mapped to indices [0, 1, 2, 3]:
//! - Leaf set {A, C} → bitset `0b0101` (bits 0 and 2 set)
//! - Leaf set {B, C, D} → bitset `0b1110` (bits 1, 2, 3 set)

/// A compact bitset over universe indices.
///
/// Internally stores bits in `Vec<u64>` words to support arbitrarily large
/// universes. Each u64 word holds 64 leaf indices.
///
/// The derived `Ord` and `Hash` make bitsets usable as sort and grouping keys
/// inside a [`TopologySignature`](crate::signature::TopologySignature).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Bitset(pub Vec<u64>);

impl Bitset {
    /// Creates a new bitset with all bits set to 0.
    ///
    /// # Parameters
    /// - `words`: Number of u64 words needed. Calculate with [`Bitset::words_for`].
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::bitset::Bitset;
    /// // A universe of 100 labels needs 2 words (128 bits)
    /// let bs = Bitset::zeros(Bitset::words_for(100));
    /// assert_eq!(bs.0.len(), 2);
    /// ```
    pub fn zeros(words: usize) -> Self {
        Bitset(vec![0u64; words])
    }

    /// Number of u64 words needed to hold `num_leaves` bits.
    #[inline]
    pub fn words_for(num_leaves: usize) -> usize {
        num_leaves.div_ceil(64)
    }

    /// Sets the bit at the given index to 1.
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::bitset::Bitset;
    /// let mut bs = Bitset::zeros(1);
    /// bs.set(0);
    /// bs.set(5);
    /// assert_eq!(bs.0[0], 0b00100001);
    /// ```
    #[inline]
    pub fn set(&mut self, idx: usize) {
        let word = idx >> 6;     // Equivalent to idx / 64
        let bit = idx & 63;      // Equivalent to idx % 64
        self.0[word] |= 1u64 << bit;
    }

    /// Returns true if the bit at `idx` is set.
    #[inline]
    pub fn contains(&self, idx: usize) -> bool {
        let word = idx >> 6;
        let bit = idx & 63;
        self.0.get(word).is_some_and(|w| w & (1u64 << bit) != 0)
    }

    /// Performs bitwise OR with another bitset (union operation).
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::bitset::Bitset;
    /// let mut left = Bitset::zeros(1);
    /// left.set(0);   // {0}
    ///
    /// let mut right = Bitset::zeros(1);
    /// right.set(1);  // {1}
    ///
    /// left.or_assign(&right);  // {0} ∪ {1} = {0, 1}
    /// assert_eq!(left.0[0], 0b11);
    /// ```
    #[inline]
    pub fn or_assign(&mut self, other: &Bitset) {
        for (a, b) in self.0.iter_mut().zip(&other.0) {
            *a |= *b;
        }
    }

    /// Counts the number of set bits (population count).
    #[inline]
    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Complement within a universe of `num_leaves` labels.
    ///
    /// Bits at or above `num_leaves` stay 0, so complements of equal leaf
    /// sets compare equal.
    ///
    /// # Example
    /// ```
    /// # use phylo_topology_validator::bitset::Bitset;
    /// let mut ab = Bitset::zeros(1);
    /// ab.set(0);
    /// ab.set(1);
    /// assert_eq!(ab.complement(4).0[0], 0b1100);
    /// ```
    pub fn complement(&self, num_leaves: usize) -> Bitset {
        let mut complement = Bitset::zeros(self.0.len());
        for (out, word) in complement.0.iter_mut().zip(&self.0) {
            *out = !*word;
        }

        // Clear padding above the universe size
        let full_words = num_leaves >> 6;
        let tail = num_leaves & 63;
        for (i, word) in complement.0.iter_mut().enumerate() {
            if i > full_words || (i == full_words && tail == 0) {
                *word = 0;
            } else if i == full_words {
                *word &= (1u64 << tail) - 1;
            }
        }
        complement
    }

    /// Iterates over the indices of set bits in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().enumerate().flat_map(|(w, &word)| {
            (0..64).filter(move |b| word & (1u64 << b) != 0).map(move |b| (w << 6) | b)
        })
    }
}
