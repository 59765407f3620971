use raptorq::SourceBlockDecoder;

use super::FeedOutcome;
use crate::oti::SourceBlockLayout;
use crate::packet::EncodedSymbol;
use crate::util::SymbolMask;

/// Decoding state of one source block
pub struct BlockDecoder {
    layout: SourceBlockLayout,
    received: SymbolMask,
    source_received: u32,
    repair_received: u32,
    /// Released once the block is solved
    engine: Option<SourceBlockDecoder>,
    data: Option<Vec<u8>>,
}

impl BlockDecoder {
    pub fn new(layout: SourceBlockLayout, config: &raptorq::ObjectTransmissionInformation) -> Self {
        Self {
            layout,
            received: SymbolMask::with_source_symbols(layout.symbols),
            source_received: 0,
            repair_received: 0,
            engine: Some(SourceBlockDecoder::new(
                layout.number,
                config,
                layout.length,
            )),
            data: None,
        }
    }

    pub fn feed(&mut self, symbol: EncodedSymbol<'_>) -> FeedOutcome {
        let engine = match &mut self.engine {
            Some(engine) => engine,
            None => return FeedOutcome::BlockAlreadySolved,
        };

        let esi = symbol.id().encoding_symbol_id();
        if !self.received.insert(esi) {
            return FeedOutcome::Duplicate;
        }

        if esi < self.layout.symbols {
            self.source_received += 1;
        } else {
            self.repair_received += 1;
        }

        // Fewer symbols than `K` never solve the block, the engine only stores them
        match engine.decode(std::iter::once(symbol.to_packet())) {
            Some(mut data) => {
                data.truncate(self.layout.length as usize);
                self.data = Some(data);
                self.engine = None;
                FeedOutcome::BlockSolved
            }
            None => FeedOutcome::Accepted,
        }
    }

    pub fn has_symbol(&self, encoding_symbol_id: u32) -> bool {
        self.received.contains(encoding_symbol_id)
    }

    #[inline(always)]
    pub fn is_solved(&self) -> bool {
        self.engine.is_none()
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn take_data(&mut self) -> Option<Vec<u8>> {
        self.data.take()
    }

    pub fn progress(&self) -> BlockProgress {
        BlockProgress {
            source_block_number: self.layout.number,
            source_symbols: self.layout.symbols,
            source_received: self.source_received,
            repair_received: self.repair_received,
            solved: self.is_solved(),
        }
    }
}

/// Symbol accounting of one source block
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockProgress {
    pub source_block_number: u8,
    /// Number of source symbols of the block (`K`)
    pub source_symbols: u32,
    /// Distinct source symbols received
    pub source_received: u32,
    /// Distinct repair symbols received
    pub repair_received: u32,
    pub solved: bool,
}

impl BlockProgress {
    /// Distinct symbols received
    pub fn received(&self) -> u32 {
        self.source_received + self.repair_received
    }
}
