//! Offline mesh messaging over Bluetooth Low Energy
//!
//! Devices advertise and scan a shared GATT service, hold dual-role links
//! to nearby peers, and flood signed, encrypted envelopes hop by hop with a
//! TTL and a seen-cache instead of routing tables. The application plugs in
//! at two seams: a [`BleAdapter`] for the radio and a [`ConversationStore`]
//! for persistence.

pub mod adapter;
pub mod bridge;
pub mod connection;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod router;

pub use adapter::{BleAdapter, BtleplugAdapter, CHARACTERISTIC_UUID, SERVICE_UUID};
pub use bridge::{Contact, ConversationStore};
pub use connection::{Connection, ConnectionManager, ConnectionRole, ConnectionState, PeerId};
pub use dedup::DedupCache;
pub use envelope::{EnvelopeKind, MessageEnvelope, MAX_FRAME_LEN};
pub use error::{MeshError, MeshResult};
pub use router::MeshRouter;
