//! Outward interface to the conversation store
//!
//! The routing engine never touches storage directly; delivered plaintext,
//! read receipts and first-contact handshakes flow out through this trait,
//! and contact lookups flow back in. The application owns the actual store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use identity::UserIdentity;
use uuid::Uuid;

/// A known peer, created when their identity token was imported
#[derive(Debug, Clone)]
pub struct Contact {
    pub identity: UserIdentity,
}

impl Contact {
    pub fn new(identity: UserIdentity) -> Self {
        Self { identity }
    }

    /// Addressing identifier: `name#1234`
    pub fn id(&self) -> String {
        self.identity.id()
    }
}

/// Callbacks from the routing engine into the conversation store
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// A Text envelope addressed to the local user decrypted successfully
    async fn on_message_delivered(&self, sender_id: &str, text: &str, timestamp: DateTime<Utc>);

    /// The recipient of a previously sent Text envelope confirmed delivery
    async fn on_read_receipt(&self, message_id: Uuid);

    /// A Handshake envelope carried a new (or re-announced) identity
    async fn on_handshake(&self, identity: UserIdentity);

    /// Resolve a contact by its `name#1234` identifier
    async fn lookup_contact(&self, id: &str) -> Option<Contact>;
}
