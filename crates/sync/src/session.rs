//! The sync exchange against one document.

use tracing::{debug, warn};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::awareness::Awareness;
use crate::protocol::{FrameError, Message, SyncMessage};

/// Drives the state-vector exchange for one document over any byte
/// transport.
///
/// The session is transport-agnostic: feed incoming frames to
/// [`SyncSession::handle`] and ship whatever frames it returns. A
/// malformed frame produces no replies and no state change.
#[derive(Debug)]
pub struct SyncSession {
    doc: Doc,
}

impl SyncSession {
    #[must_use]
    pub fn new(doc: Doc) -> Self {
        Self { doc }
    }

    #[must_use]
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The opening frame: "here is what I have".
    #[must_use]
    pub fn start(&self) -> Vec<u8> {
        let state_vector = {
            let txn = self.doc.transact();
            txn.state_vector().encode_v1()
        };

        Message::Sync(SyncMessage::StateVectorRequest { state_vector }).encode()
    }

    /// The local awareness broadcast frame.
    #[must_use]
    pub fn awareness_frame(&self, awareness: &Awareness) -> Vec<u8> {
        Message::Awareness(vec![awareness.local_entry()]).encode()
    }

    /// Processes one incoming frame, returning the frames to send back.
    pub fn handle(&self, frame: &[u8], awareness: &mut Awareness) -> Vec<Vec<u8>> {
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(FrameError::Empty) => {
                debug!("dropping empty frame");
                return Vec::new();
            }
            Err(err) => {
                warn!("dropping malformed frame: {err}");
                return Vec::new();
            }
        };

        match message {
            Message::Sync(SyncMessage::StateVectorRequest { state_vector }) => {
                let Ok(remote) = StateVector::decode_v1(&state_vector) else {
                    warn!("dropping sync request with unreadable state vector");
                    return Vec::new();
                };

                let (local_sv, missing) = {
                    let txn = self.doc.transact();
                    (
                        txn.state_vector().encode_v1(),
                        txn.encode_state_as_update_v1(&remote),
                    )
                };

                vec![Message::Sync(SyncMessage::StateVectorWithUpdate {
                    state_vector: local_sv,
                    update: missing,
                })
                .encode()]
            }

            Message::Sync(SyncMessage::StateVectorWithUpdate {
                state_vector,
                update,
            }) => {
                self.apply_update(&update);

                let Ok(remote) = StateVector::decode_v1(&state_vector) else {
                    warn!("dropping reciprocal delta: unreadable state vector");
                    return Vec::new();
                };

                let missing = {
                    let txn = self.doc.transact();
                    txn.encode_state_as_update_v1(&remote)
                };

                vec![Message::Sync(SyncMessage::Update { update: missing }).encode()]
            }

            Message::Sync(SyncMessage::Update { update }) => {
                self.apply_update(&update);
                Vec::new()
            }

            Message::Awareness(entries) => {
                let _ = awareness.apply(&entries);
                Vec::new()
            }
        }
    }

    fn apply_update(&self, update: &[u8]) {
        match Update::decode_v1(update) {
            Ok(update) => {
                if let Err(err) = self.doc.transact_mut().apply_update(update) {
                    warn!("failed to apply remote update: {err}");
                }
            }
            Err(err) => {
                warn!("dropping undecodable remote update: {err}");
            }
        }
    }
}
