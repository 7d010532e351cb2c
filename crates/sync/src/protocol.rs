//! Wire messages.
//!
//! Every frame starts with a varint message tag. Sync frames carry a
//! varint subtype and length-prefixed binary payloads (state vectors
//! and updates, opaque to this layer). Awareness frames carry a counted
//! list of `(client, clock, state-json)` tuples.

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::awareness::AwarenessEntry;
use crate::codec::{read_buf, read_uvar, write_buf, write_uvar};

/// Message tag: document sync.
pub const MESSAGE_SYNC: u64 = 0;
/// Message tag: awareness.
pub const MESSAGE_AWARENESS: u64 = 1;

const SYNC_STATE_VECTOR_REQUEST: u64 = 0;
const SYNC_UPDATE: u64 = 1;
const SYNC_STATE_VECTOR_WITH_UPDATE: u64 = 2;

/// Awareness state flag: no state (client going offline).
const STATE_ABSENT: u64 = 0;
/// Awareness state flag: a JSON state buffer follows.
const STATE_PRESENT: u64 = 1;

/// Why a frame was rejected. Callers drop the frame and keep the
/// connection; nothing here is fatal.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    #[error("empty message")]
    Empty,

    #[error("truncated message")]
    Truncated,

    #[error("malformed message")]
    Malformed,

    #[error("unknown message tag {0}")]
    UnknownTag(u64),

    #[error("unknown sync subtype {0}")]
    UnknownSubtype(u64),
}

/// A document-sync payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncMessage {
    /// Step 1: "here is what I have, send me the rest".
    StateVectorRequest { state_vector: Vec<u8> },
    /// A bare delta.
    Update { update: Vec<u8> },
    /// Step 2: the responder's state vector plus the delta the
    /// requester is missing.
    StateVectorWithUpdate {
        state_vector: Vec<u8>,
        update: Vec<u8>,
    },
}

/// One wire frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Sync(SyncMessage),
    Awareness(Vec<AwarenessEntry>),
}

impl Message {
    /// Encodes the frame for the transport.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Self::Sync(sync) => {
                write_uvar(&mut buf, MESSAGE_SYNC);
                match sync {
                    SyncMessage::StateVectorRequest { state_vector } => {
                        write_uvar(&mut buf, SYNC_STATE_VECTOR_REQUEST);
                        write_buf(&mut buf, state_vector);
                    }
                    SyncMessage::Update { update } => {
                        write_uvar(&mut buf, SYNC_UPDATE);
                        write_buf(&mut buf, update);
                    }
                    SyncMessage::StateVectorWithUpdate {
                        state_vector,
                        update,
                    } => {
                        write_uvar(&mut buf, SYNC_STATE_VECTOR_WITH_UPDATE);
                        write_buf(&mut buf, state_vector);
                        write_buf(&mut buf, update);
                    }
                }
            }
            Self::Awareness(entries) => {
                write_uvar(&mut buf, MESSAGE_AWARENESS);
                write_uvar(&mut buf, entries.len() as u64);
                for entry in entries {
                    write_uvar(&mut buf, entry.client_id);
                    write_uvar(&mut buf, entry.clock);
                    match &entry.state {
                        Some(state) => {
                            write_uvar(&mut buf, STATE_PRESENT);
                            write_buf(&mut buf, state.to_string().as_bytes());
                        }
                        None => write_uvar(&mut buf, STATE_ABSENT),
                    }
                }
            }
        }

        buf
    }

    /// Decodes one frame.
    ///
    /// Awareness entries whose JSON does not parse are skipped with a
    /// log entry; the rest of the frame still decodes. Structural
    /// problems (truncation, unknown tags) reject the whole frame.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.is_empty() {
            return Err(FrameError::Empty);
        }

        let mut pos = 0;
        let tag = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;

        match tag {
            MESSAGE_SYNC => {
                let subtype = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;
                let sync = match subtype {
                    SYNC_STATE_VECTOR_REQUEST => SyncMessage::StateVectorRequest {
                        state_vector: read_buf(data, &mut pos)
                            .ok_or(FrameError::Truncated)?
                            .to_vec(),
                    },
                    SYNC_UPDATE => SyncMessage::Update {
                        update: read_buf(data, &mut pos)
                            .ok_or(FrameError::Truncated)?
                            .to_vec(),
                    },
                    SYNC_STATE_VECTOR_WITH_UPDATE => {
                        let state_vector = read_buf(data, &mut pos)
                            .ok_or(FrameError::Truncated)?
                            .to_vec();
                        let update = read_buf(data, &mut pos)
                            .ok_or(FrameError::Truncated)?
                            .to_vec();
                        SyncMessage::StateVectorWithUpdate {
                            state_vector,
                            update,
                        }
                    }
                    other => return Err(FrameError::UnknownSubtype(other)),
                };
                Ok(Self::Sync(sync))
            }
            MESSAGE_AWARENESS => {
                let count = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;
                let mut entries = Vec::new();

                for _ in 0..count {
                    let client_id = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;
                    let clock = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;
                    let flag = read_uvar(data, &mut pos).ok_or(FrameError::Truncated)?;

                    let state = match flag {
                        STATE_ABSENT => None,
                        STATE_PRESENT => {
                            let raw = read_buf(data, &mut pos).ok_or(FrameError::Truncated)?;
                            match serde_json::from_slice::<Value>(raw) {
                                Ok(state) => Some(state),
                                Err(err) => {
                                    warn!(
                                        client_id,
                                        "skipping awareness entry with unparsable state: {err}"
                                    );
                                    continue;
                                }
                            }
                        }
                        _ => return Err(FrameError::Malformed),
                    };

                    entries.push(AwarenessEntry {
                        client_id,
                        clock,
                        state,
                    });
                }

                Ok(Self::Awareness(entries))
            }
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use claims::assert_ok_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn sync_messages_round_trip() {
        for message in [
            Message::Sync(SyncMessage::StateVectorRequest {
                state_vector: vec![1, 2, 3],
            }),
            Message::Sync(SyncMessage::Update {
                update: vec![9; 300],
            }),
            Message::Sync(SyncMessage::StateVectorWithUpdate {
                state_vector: vec![],
                update: vec![4, 5],
            }),
        ] {
            assert_ok_eq!(Message::decode(&message.encode()), message.clone());
        }
    }

    #[test]
    fn awareness_messages_round_trip() {
        let message = Message::Awareness(vec![
            AwarenessEntry {
                client_id: 7,
                clock: 3,
                state: Some(json!({"cursor": [1, 2]})),
            },
            AwarenessEntry {
                client_id: 9,
                clock: 1,
                state: None,
            },
        ]);

        assert_ok_eq!(Message::decode(&message.encode()), message.clone());
    }

    #[test]
    fn empty_frames_are_rejected_as_empty() {
        assert_eq!(Message::decode(&[]), Err(FrameError::Empty));
    }

    #[test]
    fn unknown_tags_are_rejected() {
        assert_eq!(Message::decode(&[42]), Err(FrameError::UnknownTag(42)));
    }

    #[test]
    fn unknown_sync_subtypes_are_rejected() {
        // tag=sync, subtype=9
        assert_eq!(Message::decode(&[0, 9]), Err(FrameError::UnknownSubtype(9)));
    }

    #[test]
    fn truncated_sync_frames_are_rejected() {
        let encoded = Message::Sync(SyncMessage::Update {
            update: vec![1, 2, 3, 4],
        })
        .encode();

        assert_eq!(
            Message::decode(&encoded[..encoded.len() - 2]),
            Err(FrameError::Truncated)
        );
    }

    #[test]
    fn unparsable_awareness_state_is_skipped_not_fatal() {
        // tag=awareness, count=2: first entry carries broken JSON, the
        // second is fine. All values below 128 encode as single bytes.
        let mut frame = vec![1, 2];
        frame.extend_from_slice(&[5, 1, 1]); // client=5, clock=1, present
        let broken = b"{invalid json";
        frame.push(broken.len() as u8);
        frame.extend_from_slice(broken);
        frame.extend_from_slice(&[6, 2, 1]); // client=6, clock=2, present
        let fine = b"{\"ok\":true}";
        frame.push(fine.len() as u8);
        frame.extend_from_slice(fine);

        let decoded = Message::decode(&frame).unwrap();
        match decoded {
            Message::Awareness(entries) => {
                assert_eq!(entries.len(), 1, "the broken entry is skipped");
                assert_eq!(entries[0].client_id, 6);
                assert_eq!(entries[0].state, Some(json!({"ok": true})));
            }
            Message::Sync(_) => panic!("expected an awareness frame"),
        }
    }
}
