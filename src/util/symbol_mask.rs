use ahash::AHashSet;

/// Set of received encoding symbol ids of one source block.
///
/// Ids below the dense limit are kept in a bitmask, sparse high ids
/// (repair symbols of long streams) fall back to a hash set.
#[derive(Debug, Default, Clone)]
pub struct SymbolMask {
    bits: Vec<u64>,
    sparse: AHashSet<u32>,
}

impl SymbolMask {
    /// Creates a mask with a dense range covering twice the number of source symbols
    pub fn with_source_symbols(source_symbols: u32) -> Self {
        let dense = (source_symbols as usize * 2).max(64);
        Self {
            bits: vec![0; (dense + 63) / 64],
            sparse: Default::default(),
        }
    }

    pub fn contains(&self, esi: u32) -> bool {
        let (word, bit) = Self::position(esi);
        match self.bits.get(word) {
            Some(bits) => bits & bit != 0,
            None => self.sparse.contains(&esi),
        }
    }

    /// Returns `false` if the id was already present
    pub fn insert(&mut self, esi: u32) -> bool {
        let (word, bit) = Self::position(esi);
        match self.bits.get_mut(word) {
            Some(bits) if *bits & bit != 0 => false,
            Some(bits) => {
                *bits |= bit;
                true
            }
            None => self.sparse.insert(esi),
        }
    }

    #[inline(always)]
    fn position(esi: u32) -> (usize, u64) {
        (esi as usize / 64, 1 << (esi % 64))
    }
}
