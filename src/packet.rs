//! Encoded symbol framing (RFC 6330, section 3.2)

use crate::oti::ObjectTransmissionInfo;

/// Length of the FEC payload id prefix
pub const PAYLOAD_ID_LEN: usize = 4;

/// Largest encoding symbol id (24 bits)
pub const MAX_ENCODING_SYMBOL_ID: u32 = (1 << 24) - 1;

/// FEC payload id: source block number and encoding symbol id
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayloadId {
    source_block_number: u8,
    encoding_symbol_id: u32,
}

impl PayloadId {
    /// Returns `None` if `encoding_symbol_id` does not fit into 24 bits
    pub fn new(source_block_number: u8, encoding_symbol_id: u32) -> Option<Self> {
        (encoding_symbol_id <= MAX_ENCODING_SYMBOL_ID).then_some(Self {
            source_block_number,
            encoding_symbol_id,
        })
    }

    pub fn from_bytes(bytes: [u8; PAYLOAD_ID_LEN]) -> Self {
        Self {
            source_block_number: bytes[0],
            encoding_symbol_id: u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_ID_LEN] {
        let [_, e0, e1, e2] = self.encoding_symbol_id.to_be_bytes();
        [self.source_block_number, e0, e1, e2]
    }

    #[inline(always)]
    pub fn source_block_number(&self) -> u8 {
        self.source_block_number
    }

    #[inline(always)]
    pub fn encoding_symbol_id(&self) -> u32 {
        self.encoding_symbol_id
    }
}

/// Borrowed view of one encoded payload, validated against an OTI
#[derive(Debug, Copy, Clone)]
pub struct EncodedSymbol<'a> {
    id: PayloadId,
    data: &'a [u8],
}

impl<'a> EncodedSymbol<'a> {
    /// Splits `payload` into the payload id and the symbol data.
    ///
    /// The payload must address one of the source blocks of `oti` and carry
    /// exactly one symbol.
    pub fn parse(payload: &'a [u8], oti: &ObjectTransmissionInfo) -> Result<Self, PayloadError> {
        if payload.len() < PAYLOAD_ID_LEN {
            return Err(PayloadError::Truncated { len: payload.len() });
        }

        let (header, data) = payload.split_at(PAYLOAD_ID_LEN);
        let id = PayloadId::from_bytes([header[0], header[1], header[2], header[3]]);

        if id.source_block_number >= oti.source_blocks() {
            return Err(PayloadError::UnknownSourceBlock {
                source_block_number: id.source_block_number,
                source_blocks: oti.source_blocks(),
            });
        }

        let symbol_size = oti.symbol_size() as usize;
        if data.len() != symbol_size {
            return Err(PayloadError::SymbolSizeMismatch {
                expected: symbol_size,
                got: data.len(),
            });
        }

        Ok(Self { id, data })
    }

    #[inline(always)]
    pub fn id(&self) -> &PayloadId {
        &self.id
    }

    #[inline(always)]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Copies the symbol into an engine packet
    pub(crate) fn to_packet(self) -> raptorq::EncodingPacket {
        raptorq::EncodingPacket::new(
            raptorq::PayloadId::new(self.id.source_block_number, self.id.encoding_symbol_id),
            self.data.to_vec(),
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Payload is too short: {len} bytes")]
    Truncated { len: usize },
    #[error("Unknown source block {source_block_number}: object has {source_blocks} blocks")]
    UnknownSourceBlock {
        source_block_number: u8,
        source_blocks: u8,
    },
    #[error("Symbol size mismatch: expected {expected} bytes, got {got}")]
    SymbolSizeMismatch { expected: usize, got: usize },
}
