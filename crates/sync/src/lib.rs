//! Sync wire framing.
//!
//! Frames a document-sync exchange and ephemeral awareness state for
//! any bidirectional byte transport (WebSocket, pipe, test harness).
//! The exchange is the classic three steps: a client offers its state
//! vector, the server answers with its own state vector plus the delta
//! the client is missing, and the client replies with the delta the
//! server is missing.
//!
//! Malformed input never takes the connection down: unknown tags,
//! truncated frames and unparsable payloads are dropped with a log
//! entry and no state change.

pub mod awareness;
pub mod protocol;
pub mod session;

mod codec;

pub use awareness::{Awareness, AwarenessEntry, ClientState};
pub use protocol::{FrameError, Message, SyncMessage, MESSAGE_AWARENESS, MESSAGE_SYNC};
pub use session::SyncSession;
