//! # RaptorQ decoding sessions
//!
//! Reassembles objects encoded with RaptorQ (RFC 6330) from encoded payloads
//! received in any order, possibly duplicated or partially lost.
//!
//! - [`Session`] decodes one object described by its
//!   [`ObjectTransmissionInfo`].
//! - [`Sessions`] is a thread-safe table of sessions addressed by opaque
//!   [`SessionId`] handles.

pub use engine::{BlockProgress, Engine, FeedOutcome};
pub use oti::{ObjectTransmissionInfo, OtiError, SourceBlockLayout};
pub use packet::{EncodedSymbol, PayloadError, PayloadId};
pub use session::{Session, SessionMetrics, SessionOptions};
pub use sessions::{SessionId, Sessions, SessionsError};

pub mod engine;
pub mod oti;
pub mod packet;
mod session;
mod sessions;
mod util;
