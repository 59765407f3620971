use serde::{Deserialize, Serialize};

use crate::engine::{BlockProgress, Engine, FeedOutcome};
use crate::oti::{ObjectTransmissionInfo, OtiError, MAX_TRANSFER_LENGTH};
use crate::packet::{EncodedSymbol, PayloadError};

/// Decoding session configuration
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Whether malformed payloads are reported as errors. Otherwise they
    /// are counted and silently ignored.
    ///
    /// Default: `true`
    pub strict_payloads: bool,

    /// Max allowed object size in bytes. Sessions for bigger objects
    /// will not be created.
    ///
    /// Default: `942574504275` (RaptorQ limit)
    pub max_transfer_length: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strict_payloads: true,
            max_transfer_length: MAX_TRANSFER_LENGTH,
        }
    }
}

/// Decoding context of one object.
///
/// Accepts encoded payloads in any order until the object is reconstructed.
/// The reconstructed object is held until taken with [`Session::take_result`].
///
/// # Examples
///
/// ```
/// # use rq_context::Session;
/// let data = b"helloMyFountain";
/// let encoder = raptorq::Encoder::with_defaults(data, 64);
///
/// let mut session = Session::from_oti(&encoder.get_config().serialize()).unwrap();
/// for packet in encoder.get_encoded_packets(0) {
///     if session.push(&packet.serialize()).unwrap() {
///         break;
///     }
/// }
///
/// assert!(session.is_complete());
/// assert_eq!(session.take_result().unwrap(), data);
/// assert!(session.take_result().is_none());
/// ```
pub struct Session {
    oti: ObjectTransmissionInfo,
    engine: Engine,
    result: Option<Vec<u8>>,
    decoded: bool,
    options: SessionOptions,
    counters: SessionCounters,
}

impl Session {
    /// Creates a session for an object of `transfer_length` bytes split into
    /// symbols of at most `max_payload_size` bytes, with default options
    pub fn with_defaults(transfer_length: u64, max_payload_size: u16) -> Result<Self, OtiError> {
        let oti = ObjectTransmissionInfo::with_defaults(transfer_length, max_payload_size)?;
        Self::new(oti, Default::default())
    }

    /// Creates a session from the 12-byte OTI header, with default options
    pub fn from_oti(bytes: &[u8]) -> Result<Self, OtiError> {
        let oti = ObjectTransmissionInfo::from_bytes(bytes)?;
        Self::new(oti, Default::default())
    }

    pub fn new(oti: ObjectTransmissionInfo, options: SessionOptions) -> Result<Self, OtiError> {
        if oti.transfer_length() > options.max_transfer_length {
            return Err(OtiError::TransferLengthTooLarge {
                length: oti.transfer_length(),
                max: options.max_transfer_length,
            });
        }

        tracing::debug!(%oti, "new decoding session");

        Ok(Self {
            engine: Engine::new(&oti),
            oti,
            result: None,
            decoded: false,
            options,
            counters: Default::default(),
        })
    }

    /// Feeds one encoded payload (payload id followed by the symbol).
    ///
    /// Returns `true` iff this call reconstructed the object. Duplicates and
    /// payloads arriving after the object was reconstructed are ignored.
    pub fn push(&mut self, payload: &[u8]) -> Result<bool, PayloadError> {
        if self.decoded {
            self.counters.ignored_symbols += 1;
            return Ok(false);
        }

        let symbol = match EncodedSymbol::parse(payload, &self.oti) {
            Ok(symbol) => symbol,
            Err(e) => {
                self.counters.rejected_payloads += 1;
                if self.options.strict_payloads {
                    return Err(e);
                }
                tracing::debug!("ignoring malformed payload: {e}");
                return Ok(false);
            }
        };

        match self.engine.feed(symbol) {
            FeedOutcome::Duplicate => {
                tracing::trace!(id = ?symbol.id(), "symbol was already received");
                self.counters.duplicate_symbols += 1;
                return Ok(false);
            }
            FeedOutcome::BlockAlreadySolved => {
                self.counters.ignored_symbols += 1;
                return Ok(false);
            }
            FeedOutcome::Mismatched => {
                self.counters.rejected_payloads += 1;
                return Ok(false);
            }
            FeedOutcome::Accepted => {
                self.counters.received_symbols += 1;
                return Ok(false);
            }
            FeedOutcome::BlockSolved => self.counters.received_symbols += 1,
        }

        if !self.engine.is_solved() {
            return Ok(false);
        }

        match self.engine.assemble() {
            Some(data) => {
                tracing::debug!(
                    len = data.len(),
                    received = self.counters.received_symbols,
                    "object decoded"
                );
                self.result = Some(data);
                self.decoded = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whether the reconstructed object is held and not yet taken
    #[inline(always)]
    pub fn is_complete(&self) -> bool {
        self.result.is_some()
    }

    /// Whether the object was reconstructed, even if it was already taken
    #[inline(always)]
    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// Moves the reconstructed object out of the session.
    ///
    /// Returns `None` if decoding is not finished yet or the object was
    /// already taken.
    pub fn take_result(&mut self) -> Option<Vec<u8>> {
        self.result.take()
    }

    #[inline(always)]
    pub fn oti(&self) -> &ObjectTransmissionInfo {
        &self.oti
    }

    #[inline(always)]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn metrics(&self) -> SessionMetrics {
        SessionMetrics {
            received_symbols: self.counters.received_symbols,
            duplicate_symbols: self.counters.duplicate_symbols,
            rejected_payloads: self.counters.rejected_payloads,
            ignored_symbols: self.counters.ignored_symbols,
            solved_blocks: self.engine.solved_blocks(),
            total_blocks: self.engine.total_blocks(),
        }
    }

    /// Per-block symbol accounting
    pub fn progress(&self) -> Vec<BlockProgress> {
        self.engine.progress().collect()
    }
}

#[derive(Default)]
struct SessionCounters {
    received_symbols: u64,
    duplicate_symbols: u64,
    rejected_payloads: u64,
    ignored_symbols: u64,
}

/// Instant session metrics
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionMetrics {
    /// Distinct symbols accepted by the engine
    pub received_symbols: u64,
    pub duplicate_symbols: u64,
    /// Malformed payloads, both reported and ignored
    pub rejected_payloads: u64,
    /// Symbols for solved blocks or for an already decoded object
    pub ignored_symbols: u64,
    pub solved_blocks: usize,
    pub total_blocks: usize,
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::Rng;

    use super::*;

    fn make_data(len: usize) -> Vec<u8> {
        std::iter::repeat_with(|| rand::thread_rng().gen())
            .take(len)
            .collect()
    }

    fn encoder_for(session: &Session, data: &[u8]) -> raptorq::Encoder {
        raptorq::Encoder::new(data, session.oti().to_raptorq())
    }

    fn source_payloads(encoder: &raptorq::Encoder) -> Vec<Vec<u8>> {
        encoder
            .get_block_encoders()
            .iter()
            .flat_map(|block| block.source_packets())
            .map(|packet| packet.serialize())
            .collect()
    }

    fn repair_payloads(encoder: &raptorq::Encoder, count: u32) -> Vec<Vec<u8>> {
        encoder
            .get_block_encoders()
            .iter()
            .flat_map(|block| block.repair_packets(0, count))
            .map(|packet| packet.serialize())
            .collect()
    }

    #[test]
    fn valid_parameters_create_incomplete_session() {
        for (transfer_length, max_payload_size) in
            [(1, 8), (1000, 200), (100_000, 1024), (1 << 30, 1400), (1 << 32, 65535)]
        {
            let mut session = Session::with_defaults(transfer_length, max_payload_size).unwrap();
            assert!(!session.is_complete());
            assert!(!session.is_decoded());
            assert!(session.take_result().is_none());
            assert_eq!(session.metrics().received_symbols, 0);
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(matches!(
            Session::with_defaults(0, 200),
            Err(OtiError::ZeroTransferLength)
        ));
        assert!(matches!(
            Session::with_defaults(1000, 0),
            Err(OtiError::ZeroPayloadSize)
        ));
        assert!(matches!(
            Session::from_oti(&[0; 11]),
            Err(OtiError::InvalidLength { len: 11 })
        ));
        assert!(matches!(
            Session::from_oti(&[0; 12]),
            Err(OtiError::ZeroTransferLength)
        ));

        let options = SessionOptions {
            max_transfer_length: 999,
            ..Default::default()
        };
        let oti = ObjectTransmissionInfo::with_defaults(1000, 200).unwrap();
        assert!(matches!(
            Session::new(oti, options),
            Err(OtiError::TransferLengthTooLarge {
                length: 1000,
                max: 999
            })
        ));
    }

    #[test]
    fn decodes_after_last_source_symbol() {
        let data = make_data(1000);
        let mut session = Session::with_defaults(1000, 200).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));
        assert_eq!(payloads.len(), 5);

        for (i, payload) in payloads.iter().enumerate() {
            let complete = session.push(payload).unwrap();
            assert_eq!(complete, i == payloads.len() - 1);
            assert_eq!(session.is_complete(), complete);
        }

        let result = session.take_result().unwrap();
        assert_eq!(result.len(), 1000);
        assert_eq!(result, data);
    }

    #[test]
    fn completion_does_not_depend_on_order() {
        let data = make_data(1000);
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut session = Session::with_defaults(1000, 200).unwrap();
            let mut payloads = source_payloads(&encoder_for(&session, &data));
            payloads.shuffle(&mut rng);

            let completed_at = payloads
                .iter()
                .position(|payload| session.push(payload).unwrap());
            assert_eq!(completed_at, Some(payloads.len() - 1));
            assert_eq!(session.take_result().unwrap(), data);
        }
    }

    #[test]
    fn decodes_short_payload_streams() {
        for max_payload_size in [1, 4, 7, 40, 63] {
            let data = make_data(500);
            let encoder = raptorq::Encoder::with_defaults(&data, max_payload_size);
            let mut session = Session::with_defaults(500, max_payload_size).unwrap();
            assert_eq!(session.oti().to_bytes(), encoder.get_config().serialize());

            let completed = encoder
                .get_encoded_packets(0)
                .iter()
                .any(|packet| session.push(&packet.serialize()).unwrap());
            assert!(completed, "max_payload_size = {max_payload_size}");
            assert_eq!(session.metrics().rejected_payloads, 0);
            assert_eq!(session.take_result().unwrap(), data);
        }
    }

    #[test]
    fn unsolvable_block_keeps_accepting_symbols() {
        let data = make_data(1000);
        let mut session = Session::with_defaults(1000, 200).unwrap();
        let encoder = encoder_for(&session, &data);

        // This window of repair symbols is rank deficient at exactly K
        let payloads = encoder.get_block_encoders()[0]
            .repair_packets(353, 8)
            .iter()
            .map(raptorq::EncodingPacket::serialize)
            .collect::<Vec<_>>();

        for payload in &payloads[..5] {
            assert!(!session.push(payload).unwrap());
        }
        assert!(!session.is_complete());
        let metrics = session.metrics();
        assert_eq!(metrics.received_symbols, 5);
        assert_eq!(metrics.solved_blocks, 0);
        assert!(!session.progress()[0].solved);

        assert!(session.push(&payloads[5]).unwrap());
        assert!(session.is_complete());
        assert_eq!(session.progress()[0].repair_received, 6);
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn duplicates_are_idempotent() {
        let data = make_data(1000);
        let mut session = Session::with_defaults(1000, 200).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));

        let (last, rest) = payloads.split_last().unwrap();
        for payload in rest {
            assert!(!session.push(payload).unwrap());
            assert!(!session.push(payload).unwrap());
            assert!(!session.is_complete());
        }
        assert_eq!(session.metrics().duplicate_symbols, rest.len() as u64);
        assert_eq!(session.metrics().received_symbols, rest.len() as u64);

        assert!(session.push(last).unwrap());
        assert!(!session.push(last).unwrap());
        assert!(session.is_complete());
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn never_completes_below_threshold() {
        let data = make_data(10_000);
        let mut session = Session::with_defaults(10_000, 256).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));
        let k = payloads.len();
        assert_eq!(k, 40);

        for _ in 0..5 {
            for payload in &payloads[..k - 1] {
                assert!(!session.push(payload).unwrap());
            }
        }
        assert!(!session.is_complete());
        assert_eq!(session.metrics().received_symbols, k as u64 - 1);

        let progress = session.progress();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].received(), k as u32 - 1);
        assert!(!progress[0].solved);
    }

    #[test]
    fn recovers_lost_symbols_with_repair() {
        let data = make_data(10_000);
        let mut session = Session::with_defaults(10_000, 256).unwrap();
        let encoder = encoder_for(&session, &data);

        // Every third source symbol is lost
        let mut stream = source_payloads(&encoder)
            .into_iter()
            .enumerate()
            .filter(|(i, _)| i % 3 != 0)
            .map(|(_, payload)| payload)
            .collect::<Vec<_>>();
        stream.extend(repair_payloads(&encoder, 30));
        stream.shuffle(&mut rand::thread_rng());

        let mut pushed = 0;
        for payload in &stream {
            pushed += 1;
            if session.push(payload).unwrap() {
                break;
            }
        }

        assert!(session.is_complete());
        assert!(pushed >= 40);
        assert!(session.progress()[0].repair_received > 0);
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn multi_block_object_from_oti() {
        let data = make_data(5000);
        let oti = ObjectTransmissionInfo::new(5000, 64, 4, 1, 8).unwrap();
        let mut session = Session::from_oti(&oti.to_bytes()).unwrap();
        let encoder = encoder_for(&session, &data);

        let blocks = encoder
            .get_block_encoders()
            .iter()
            .map(|block| {
                block
                    .source_packets()
                    .iter()
                    .map(raptorq::EncodingPacket::serialize)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        assert_eq!(blocks.len(), 4);

        // Blocks 1..4 first, block 0 last
        for payload in blocks[1..].iter().flatten() {
            assert!(!session.push(payload).unwrap());
        }
        assert_eq!(session.metrics().solved_blocks, 3);
        assert!(!session.is_complete());

        let (last, rest) = blocks[0].split_last().unwrap();
        for payload in rest {
            assert!(!session.push(payload).unwrap());
        }
        assert!(session.push(last).unwrap());

        let metrics = session.metrics();
        assert_eq!(metrics.solved_blocks, 4);
        assert_eq!(metrics.total_blocks, 4);
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn result_is_taken_once() {
        let data = make_data(1000);
        let mut session = Session::with_defaults(1000, 200).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));
        for payload in &payloads {
            session.push(payload).unwrap();
        }

        assert!(session.is_complete());
        assert_eq!(session.take_result().unwrap(), data);

        assert!(!session.is_complete());
        assert!(session.is_decoded());
        assert!(session.take_result().is_none());

        // Nothing is decoded twice
        for payload in &payloads {
            assert!(!session.push(payload).unwrap());
        }
        assert!(session.take_result().is_none());
        assert_eq!(session.metrics().ignored_symbols, payloads.len() as u64);
    }

    #[test]
    fn malformed_payloads_do_not_break_decoding() {
        let data = make_data(1000);
        let mut session = Session::with_defaults(1000, 200).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));

        let mut too_long = payloads[0].clone();
        too_long.push(0);
        let mut wrong_block = payloads[1].clone();
        wrong_block[0] = 1;

        for (i, payload) in payloads.iter().enumerate() {
            assert!(matches!(
                session.push(&payload[..2]),
                Err(PayloadError::Truncated { len: 2 })
            ));
            assert!(matches!(
                session.push(&too_long),
                Err(PayloadError::SymbolSizeMismatch {
                    expected: 200,
                    got: 201
                })
            ));
            assert!(matches!(
                session.push(&wrong_block),
                Err(PayloadError::UnknownSourceBlock {
                    source_block_number: 1,
                    source_blocks: 1
                })
            ));
            assert_eq!(session.push(payload).unwrap(), i == payloads.len() - 1);
        }

        assert_eq!(session.metrics().rejected_payloads, 15);
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn lenient_session_ignores_malformed_payloads() {
        let data = make_data(1000);
        let options = SessionOptions {
            strict_payloads: false,
            ..Default::default()
        };
        let oti = ObjectTransmissionInfo::with_defaults(1000, 200).unwrap();
        let mut session = Session::new(oti, options).unwrap();
        let payloads = source_payloads(&encoder_for(&session, &data));

        assert!(!session.push(&[]).unwrap());
        assert!(!session.push(&payloads[0][..100]).unwrap());
        assert_eq!(session.metrics().rejected_payloads, 2);

        for payload in &payloads {
            session.push(payload).unwrap();
        }
        assert_eq!(session.take_result().unwrap(), data);
    }

    #[test]
    fn options_serialization() {
        let options: SessionOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SessionOptions::default());

        let options: SessionOptions =
            serde_json::from_str(r#"{"strict_payloads":false,"max_transfer_length":1024}"#)
                .unwrap();
        assert!(!options.strict_payloads);
        assert_eq!(options.max_transfer_length, 1024);

        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(serde_json::from_str::<SessionOptions>(&json).unwrap(), options);
    }
}
