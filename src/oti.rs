//! Object Transmission Information (RFC 6330, sections 3.3.2 and 3.3.3)

use std::fmt;

/// Largest transfer length representable by RaptorQ
pub const MAX_TRANSFER_LENGTH: u64 = 942_574_504_275;

/// Largest number of source symbols in one source block (`K'max`)
pub const MAX_SOURCE_SYMBOLS_PER_BLOCK: u32 = 56_403;

/// Length of the serialized OTI
pub const OTI_LEN: usize = 12;

/// `(Al, SS)` for payloads of at least 64 bytes
const DEFAULT_ALIGNMENT: (u8, u16) = (8, 8);
/// `(Al, SS)` for shorter payloads, which keep their exact size
const SHORT_PAYLOAD_ALIGNMENT: (u8, u16) = (1, 1);
const SHORT_PAYLOAD_LIMIT: u16 = 64;
/// Max block size decodable in working memory (`WS`)
const DEFAULT_DECODER_MEMORY: u64 = 10 * 1024 * 1024;

/// Validated object transmission parameters.
///
/// Describes the transfer length of the object and how it is split into
/// source blocks and symbols. Values of this type always describe a layout
/// which the decoding engine is able to handle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectTransmissionInfo {
    transfer_length: u64,
    symbol_size: u16,
    source_blocks: u8,
    sub_blocks: u16,
    alignment: u8,
}

impl ObjectTransmissionInfo {
    /// Validates explicit transmission parameters
    pub fn new(
        transfer_length: u64,
        symbol_size: u16,
        source_blocks: u8,
        sub_blocks: u16,
        alignment: u8,
    ) -> Result<Self, OtiError> {
        if transfer_length == 0 {
            return Err(OtiError::ZeroTransferLength);
        }
        if transfer_length > MAX_TRANSFER_LENGTH {
            return Err(OtiError::TransferLengthTooLarge {
                length: transfer_length,
                max: MAX_TRANSFER_LENGTH,
            });
        }
        if symbol_size == 0 {
            return Err(OtiError::ZeroSymbolSize);
        }
        if alignment == 0 {
            return Err(OtiError::ZeroAlignment);
        }
        if symbol_size % alignment as u16 != 0 {
            return Err(OtiError::MisalignedSymbolSize {
                symbol_size,
                alignment,
            });
        }
        if source_blocks == 0 {
            return Err(OtiError::ZeroSourceBlocks);
        }
        if sub_blocks == 0 {
            return Err(OtiError::ZeroSubBlocks);
        }

        // Each sub-symbol must hold at least one aligned unit
        let max_sub_blocks = symbol_size / alignment as u16;
        if sub_blocks > max_sub_blocks {
            return Err(OtiError::TooManySubBlocks {
                sub_blocks,
                max: max_sub_blocks,
            });
        }

        let source_symbols = div_ceil(transfer_length, symbol_size as u64);
        if source_blocks as u64 > source_symbols {
            return Err(OtiError::TooManySourceBlocks {
                blocks: source_blocks as u64,
                max: source_symbols.min(u8::MAX as u64),
            });
        }

        let block_symbols = div_ceil(source_symbols, source_blocks as u64);
        if block_symbols > MAX_SOURCE_SYMBOLS_PER_BLOCK as u64 {
            return Err(OtiError::BlockTooLarge {
                symbols: block_symbols,
                max: MAX_SOURCE_SYMBOLS_PER_BLOCK,
            });
        }

        Ok(Self {
            transfer_length,
            symbol_size,
            source_blocks,
            sub_blocks,
            alignment,
        })
    }

    /// Derives transmission parameters for an object of `transfer_length` bytes
    /// sent in packets of at most `max_payload_size` symbol bytes.
    ///
    /// Follows the example parameter derivation of RFC 6330, section 4.3, with
    /// `WS = 10 MiB` and `Al = SS = 8`, or `Al = SS = 1` for payloads shorter
    /// than 64 bytes. This is what common encoders use when no explicit OTI
    /// is exchanged.
    pub fn with_defaults(transfer_length: u64, max_payload_size: u16) -> Result<Self, OtiError> {
        if transfer_length == 0 {
            return Err(OtiError::ZeroTransferLength);
        }
        if transfer_length > MAX_TRANSFER_LENGTH {
            return Err(OtiError::TransferLengthTooLarge {
                length: transfer_length,
                max: MAX_TRANSFER_LENGTH,
            });
        }

        if max_payload_size == 0 {
            return Err(OtiError::ZeroPayloadSize);
        }

        let (alignment, sub_symbol_size) = if max_payload_size >= SHORT_PAYLOAD_LIMIT {
            DEFAULT_ALIGNMENT
        } else {
            SHORT_PAYLOAD_ALIGNMENT
        };

        let symbol_size = max_payload_size - max_payload_size % alignment as u16;
        let source_symbols = div_ceil(transfer_length, symbol_size as u64);

        // Always at least 1 since `T >= SS * Al`
        let max_sub_blocks = symbol_size / (sub_symbol_size * alignment as u16);

        let source_blocks = div_ceil(
            source_symbols,
            max_block_symbols(symbol_size, max_sub_blocks, alignment) as u64,
        );
        if source_blocks > u8::MAX as u64 {
            return Err(OtiError::TooManySourceBlocks {
                blocks: source_blocks,
                max: u8::MAX as u64,
            });
        }

        let block_symbols = div_ceil(source_symbols, source_blocks);
        let sub_blocks = (1..=max_sub_blocks)
            .find(|&n| block_symbols <= max_block_symbols(symbol_size, n, alignment) as u64)
            .unwrap_or(max_sub_blocks);

        Self::new(
            transfer_length,
            symbol_size,
            source_blocks as u8,
            sub_blocks,
            alignment,
        )
    }

    /// Parses the 12-byte wire representation
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OtiError> {
        let bytes: &[u8; OTI_LEN] = bytes
            .try_into()
            .map_err(|_| OtiError::InvalidLength { len: bytes.len() })?;

        let transfer_length = ((bytes[0] as u64) << 32)
            | ((bytes[1] as u64) << 24)
            | ((bytes[2] as u64) << 16)
            | ((bytes[3] as u64) << 8)
            | (bytes[4] as u64);
        // bytes[5] is reserved
        let symbol_size = u16::from_be_bytes([bytes[6], bytes[7]]);
        let source_blocks = bytes[8];
        let sub_blocks = u16::from_be_bytes([bytes[9], bytes[10]]);
        let alignment = bytes[11];

        Self::new(
            transfer_length,
            symbol_size,
            source_blocks,
            sub_blocks,
            alignment,
        )
    }

    /// Serializes into the 12-byte wire representation
    pub fn to_bytes(&self) -> [u8; OTI_LEN] {
        let [_, _, _, f0, f1, f2, f3, f4] = self.transfer_length.to_be_bytes();
        let [t0, t1] = self.symbol_size.to_be_bytes();
        let [n0, n1] = self.sub_blocks.to_be_bytes();
        [
            f0,
            f1,
            f2,
            f3,
            f4,
            0,
            t0,
            t1,
            self.source_blocks,
            n0,
            n1,
            self.alignment,
        ]
    }

    /// Object size in bytes (`F`)
    #[inline(always)]
    pub fn transfer_length(&self) -> u64 {
        self.transfer_length
    }

    /// Symbol size in bytes (`T`)
    #[inline(always)]
    pub fn symbol_size(&self) -> u16 {
        self.symbol_size
    }

    /// Number of source blocks (`Z`)
    #[inline(always)]
    pub fn source_blocks(&self) -> u8 {
        self.source_blocks
    }

    /// Number of sub-blocks per source block (`N`)
    #[inline(always)]
    pub fn sub_blocks(&self) -> u16 {
        self.sub_blocks
    }

    /// Symbol alignment (`Al`)
    #[inline(always)]
    pub fn alignment(&self) -> u8 {
        self.alignment
    }

    /// Total number of source symbols of the object (`Kt`)
    pub fn source_symbols(&self) -> u32 {
        // Bounded by `Z * K'max` after validation
        div_ceil(self.transfer_length, self.symbol_size as u64) as u32
    }

    /// Splits the object into source blocks (RFC 6330, section 4.4.1.2)
    pub fn block_layout(&self) -> Vec<SourceBlockLayout> {
        let (long_symbols, short_symbols, long_blocks, _) =
            partition(self.source_symbols(), self.source_blocks as u32);

        let symbol_size = self.symbol_size as u64;
        let mut offset = 0;
        (0..self.source_blocks)
            .map(|number| {
                let symbols = if (number as u32) < long_blocks {
                    long_symbols
                } else {
                    short_symbols
                };
                let layout = SourceBlockLayout {
                    number,
                    symbols,
                    offset,
                    length: symbols as u64 * symbol_size,
                };
                offset += layout.length;
                layout
            })
            .collect()
    }

    /// Engine-side representation
    pub fn to_raptorq(&self) -> raptorq::ObjectTransmissionInformation {
        raptorq::ObjectTransmissionInformation::new(
            self.transfer_length,
            self.symbol_size,
            self.source_blocks,
            self.sub_blocks,
            self.alignment,
        )
    }
}

impl From<ObjectTransmissionInfo> for raptorq::ObjectTransmissionInformation {
    fn from(oti: ObjectTransmissionInfo) -> Self {
        oti.to_raptorq()
    }
}

impl TryFrom<raptorq::ObjectTransmissionInformation> for ObjectTransmissionInfo {
    type Error = OtiError;

    fn try_from(oti: raptorq::ObjectTransmissionInformation) -> Result<Self, Self::Error> {
        Self::new(
            oti.transfer_length(),
            oti.symbol_size(),
            oti.source_blocks(),
            oti.sub_blocks(),
            oti.symbol_alignment(),
        )
    }
}

impl fmt::Display for ObjectTransmissionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "F={} T={} Z={} N={} Al={}",
            self.transfer_length,
            self.symbol_size,
            self.source_blocks,
            self.sub_blocks,
            self.alignment
        )
    }
}

/// Position of one source block inside the object
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SourceBlockLayout {
    /// Source block number (`SBN`)
    pub number: u8,
    /// Number of source symbols (`K`)
    pub symbols: u32,
    /// Byte offset of the block inside the padded object
    pub offset: u64,
    /// Block length in bytes, including padding of the last symbol
    pub length: u64,
}

/// Partition function of RFC 6330, section 4.4.1.2.
///
/// Splits `i` items into `j` parts: `jl` parts of `il` items and
/// `js` parts of `is` items.
pub fn partition(i: u32, j: u32) -> (u32, u32, u32, u32) {
    let il = div_ceil(i as u64, j as u64) as u32;
    let is = i / j;
    let jl = i - is * j;
    let js = j - jl;
    (il, is, jl, js)
}

/// `KL(n)`: the largest `K'` whose sub-symbols of `n` sub-blocks fit into `WS`
fn max_block_symbols(symbol_size: u16, sub_blocks: u16, alignment: u8) -> u32 {
    let alignment = alignment as u64;
    let sub_symbol_size = div_ceil(symbol_size as u64, alignment * sub_blocks as u64);
    let bound = DEFAULT_DECODER_MEMORY / (alignment * sub_symbol_size);
    largest_extended_symbols(bound.min(MAX_SOURCE_SYMBOLS_PER_BLOCK as u64) as u32)
}

/// The largest `K'` of RFC 6330 table 2 not exceeding `bound`
fn largest_extended_symbols(bound: u32) -> u32 {
    let bound = bound.clamp(1, MAX_SOURCE_SYMBOLS_PER_BLOCK);

    let smallest = raptorq::extended_source_block_symbols(1);
    if bound <= smallest {
        return smallest;
    }
    if raptorq::extended_source_block_symbols(bound) == bound {
        return bound;
    }

    // `extended(lo) <= bound < extended(hi)`
    let (mut lo, mut hi) = (1, bound);
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if raptorq::extended_source_block_symbols(mid) <= bound {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    raptorq::extended_source_block_symbols(lo)
}

#[inline(always)]
fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OtiError {
    #[error("Invalid OTI length: expected {OTI_LEN} bytes, got {len}")]
    InvalidLength { len: usize },
    #[error("Transfer length must not be zero")]
    ZeroTransferLength,
    #[error("Transfer length {length} exceeds maximum {max}")]
    TransferLengthTooLarge { length: u64, max: u64 },
    #[error("Max payload size must not be zero")]
    ZeroPayloadSize,
    #[error("Symbol size must not be zero")]
    ZeroSymbolSize,
    #[error("Symbol alignment must not be zero")]
    ZeroAlignment,
    #[error("Symbol size {symbol_size} is not a multiple of alignment {alignment}")]
    MisalignedSymbolSize { symbol_size: u16, alignment: u8 },
    #[error("Number of source blocks must not be zero")]
    ZeroSourceBlocks,
    #[error("Too many source blocks: {blocks}, max {max}")]
    TooManySourceBlocks { blocks: u64, max: u64 },
    #[error("Number of sub-blocks must not be zero")]
    ZeroSubBlocks,
    #[error("Too many sub-blocks: {sub_blocks}, max {max}")]
    TooManySubBlocks { sub_blocks: u16, max: u16 },
    #[error("Source block of {symbols} symbols exceeds maximum {max}")]
    BlockTooLarge { symbols: u64, max: u32 },
}
