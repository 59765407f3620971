//! ## Decoding engine
//!
//! Splits the object into source blocks as described by the OTI and keeps
//! one block decoder per block. Encoded symbols are routed to their block by
//! the source block number, deduplicated by the encoding symbol id and fed
//! into the RaptorQ solver of that block. The object is available once every
//! block is solved.

pub use self::decoder::BlockProgress;

use self::decoder::BlockDecoder;
use crate::oti::ObjectTransmissionInfo;
use crate::packet::{EncodedSymbol, PayloadId};

mod decoder;

/// Result of feeding one symbol into the engine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Symbol id was already received for this block
    Duplicate,
    /// Block of this symbol is already solved
    BlockAlreadySolved,
    /// Symbol was stored, the block is still unsolved
    Accepted,
    /// Symbol completed its block
    BlockSolved,
    /// Symbol was parsed against another OTI: its block is out of range or
    /// its size differs from the symbol size of this object
    Mismatched,
}

pub struct Engine {
    oti: ObjectTransmissionInfo,
    blocks: Vec<BlockDecoder>,
    solved: usize,
}

impl Engine {
    pub fn new(oti: &ObjectTransmissionInfo) -> Self {
        let config = oti.to_raptorq();
        let blocks = oti
            .block_layout()
            .into_iter()
            .map(|layout| BlockDecoder::new(layout, &config))
            .collect();

        Self {
            oti: *oti,
            blocks,
            solved: 0,
        }
    }

    /// Feeds one symbol into its block.
    ///
    /// Symbols parsed against the OTI of this engine always fit. Others are
    /// left untouched and reported as [`FeedOutcome::Mismatched`].
    pub fn feed(&mut self, symbol: EncodedSymbol<'_>) -> FeedOutcome {
        let index = symbol.id().source_block_number() as usize;
        let block = match self.blocks.get_mut(index) {
            Some(block) if symbol.data().len() == self.oti.symbol_size() as usize => block,
            _ => return FeedOutcome::Mismatched,
        };

        let outcome = block.feed(symbol);
        if outcome == FeedOutcome::BlockSolved {
            self.solved += 1;
            tracing::debug!(
                source_block_number = index,
                solved = self.solved,
                total = self.blocks.len(),
                "source block solved"
            );
        }
        outcome
    }

    /// Whether the symbol was already accepted by its block
    pub fn has_received(&self, id: &PayloadId) -> bool {
        self.blocks
            .get(id.source_block_number() as usize)
            .map_or(false, |block| block.has_symbol(id.encoding_symbol_id()))
    }

    #[inline(always)]
    pub fn is_solved(&self) -> bool {
        self.solved == self.blocks.len()
    }

    #[inline(always)]
    pub fn solved_blocks(&self) -> usize {
        self.solved
    }

    #[inline(always)]
    pub fn total_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Concatenates solved blocks and strips the padding of the last symbol.
    ///
    /// Moves block data out of the engine, so it succeeds at most once.
    /// Returns `None` (leaving the engine unchanged) while any block is unsolved.
    pub fn assemble(&mut self) -> Option<Vec<u8>> {
        if !self.is_solved() {
            return None;
        }

        let transfer_length = self.oti.transfer_length() as usize;
        let available = self
            .blocks
            .iter()
            .map(|block| block.data().map(<[u8]>::len))
            .sum::<Option<usize>>()?;
        // Blocks span `Kt * T >= F` bytes
        debug_assert!(available >= transfer_length);

        let mut result = Vec::with_capacity(available);
        for block in &mut self.blocks {
            result.extend_from_slice(&block.take_data()?);
        }
        result.truncate(transfer_length);
        Some(result)
    }

    pub fn progress(&self) -> impl Iterator<Item = BlockProgress> + '_ {
        self.blocks.iter().map(BlockDecoder::progress)
    }
}
