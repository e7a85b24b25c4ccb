//! The routing engine: origination, delivery and flood relay

use crate::bridge::ConversationStore;
use crate::connection::{ConnectionManager, PeerId};
use crate::dedup::DedupCache;
use crate::envelope::{EnvelopeKind, MessageEnvelope};
use crate::error::{MeshError, MeshResult};
use identity::{decode_token, decrypt, encode_token, encrypt, verify, IdentityKeyPair, UserIdentity};
use shared::MeshConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Per-device engine deciding, for every envelope, whether to deliver
/// locally, relay onward, both, or drop
///
/// All inbound frames funnel through one consumer task (`run`), so the
/// seen-check and seen-insert for an envelope id happen atomically with
/// respect to other envelopes. Relay uses no routing tables: every accepted
/// non-local envelope is re-broadcast to all ready peers except its source,
/// with the TTL decremented.
pub struct MeshRouter {
    local: UserIdentity,
    keypair: Arc<IdentityKeyPair>,
    connections: Arc<ConnectionManager>,
    store: Arc<dyn ConversationStore>,
    dedup: Mutex<DedupCache>,
    config: MeshConfig,
    relayed: AtomicU64,
    delivered: AtomicU64,
}

impl MeshRouter {
    pub fn new(
        local: UserIdentity,
        keypair: Arc<IdentityKeyPair>,
        connections: Arc<ConnectionManager>,
        store: Arc<dyn ConversationStore>,
        config: MeshConfig,
    ) -> Self {
        let dedup = DedupCache::new(
            config.seen_cache_size,
            Duration::from_secs(config.seen_expiration_secs),
        );
        Self {
            local,
            keypair,
            connections,
            store,
            dedup: Mutex::new(dedup),
            config,
            relayed: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
        }
    }

    /// Consume inbound frames until the adapter side closes the channel
    pub async fn run(&self, mut inbox: mpsc::Receiver<(PeerId, Vec<u8>)>) {
        info!("Routing engine running as {}", self.local.id());
        while let Some((from, bytes)) = inbox.recv().await {
            match self.handle_frame(&from, &bytes).await {
                Ok(()) => {}
                Err(MeshError::DuplicateEnvelope(id)) => {
                    debug!("Dropped duplicate envelope {} from {}", id, from)
                }
                Err(MeshError::TtlExpired) => debug!("Dropped expired envelope from {}", from),
                Err(e) => warn!("Dropped envelope from {}: {}", from, e),
            }
        }
        info!("Inbound channel closed, routing engine stopping");
    }

    /// Process one raw frame from a connected peer
    ///
    /// Order matters: decode, then dedup, then signature. Recording the
    /// sighting before the signature check means a flood of copies of one
    /// bad envelope costs one verification, not one per copy.
    pub async fn handle_frame(&self, from: &PeerId, bytes: &[u8]) -> MeshResult<()> {
        let envelope = MessageEnvelope::decode_frame(bytes)?;

        if self.dedup.lock().await.observe(envelope.message_id) {
            return Err(MeshError::DuplicateEnvelope(envelope.message_id.to_string()));
        }

        let sender_key = self.resolve_sender_key(&envelope).await?;
        if !verify(&envelope.signing_bytes(), &envelope.signature, &sender_key) {
            return Err(MeshError::SignatureInvalid);
        }

        if envelope.recipient_id == self.local.id() {
            // Addressed envelopes end here; the mesh does not learn whether
            // other copies are still in flight, and dedup kills those.
            self.deliver(&envelope, &sender_key).await?;
            return Ok(());
        }

        self.relay(envelope, from).await
    }

    /// Author and broadcast an encrypted Text envelope
    ///
    /// Returns the assigned message id so the caller can correlate the
    /// eventual read receipt.
    pub async fn send_text(&self, recipient_id: &str, text: &str) -> MeshResult<Uuid> {
        let contact = self
            .store
            .lookup_contact(recipient_id)
            .await
            .ok_or_else(|| MeshError::UnknownContact(recipient_id.to_string()))?;

        let secret = self
            .keypair
            .derive_shared_secret(&contact.identity.public_key)?;
        let payload = encrypt(text.as_bytes(), &secret)?;

        let id = self
            .originate(recipient_id.to_string(), EnvelopeKind::Text, payload)
            .await?;
        debug!("Originated text {} for {}", id, recipient_id);
        Ok(id)
    }

    /// Announce the local identity token to a peer for first contact
    ///
    /// The token travels in plaintext; the signature binds it to the key it
    /// embeds, so the receiver can verify before importing.
    pub async fn send_handshake(&self, recipient_id: &str) -> MeshResult<Uuid> {
        let token = encode_token(&self.local);
        self.originate(
            recipient_id.to_string(),
            EnvelopeKind::Handshake,
            token.into_bytes(),
        )
        .await
    }

    /// Envelopes this device forwarded on behalf of others
    pub fn relayed_count(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Envelopes delivered to the local conversation store
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub async fn ready_connections(&self) -> usize {
        self.connections.ready_count().await
    }

    async fn originate(
        &self,
        recipient_id: String,
        kind: EnvelopeKind,
        payload: Vec<u8>,
    ) -> MeshResult<Uuid> {
        let mut envelope = MessageEnvelope {
            message_id: Uuid::new_v4(),
            sender_id: self.local.id(),
            recipient_id,
            ttl: self.config.message_ttl,
            kind,
            payload,
            signature: Vec::new(),
        };
        envelope.signature = self.keypair.sign(&envelope.signing_bytes());

        // Mark our own id as seen so an echoed copy is dropped, not re-delivered
        self.dedup.lock().await.observe(envelope.message_id);

        let frame = envelope.encode_frame()?;
        let written = self.connections.broadcast_frame(&frame, None).await;
        if written == 0 {
            warn!("No ready peers, envelope {} went nowhere", envelope.message_id);
        }
        Ok(envelope.message_id)
    }

    /// Find the key to verify an envelope against
    ///
    /// Handshakes carry their own key inside the token payload; the claimed
    /// sender id must match the token or the envelope is rejected. Every
    /// other kind requires a known contact.
    async fn resolve_sender_key(&self, envelope: &MessageEnvelope) -> MeshResult<[u8; 32]> {
        if envelope.kind == EnvelopeKind::Handshake {
            let token = std::str::from_utf8(&envelope.payload)
                .map_err(|_| MeshError::MalformedFrame("Handshake token is not UTF-8".into()))?;
            let identity = decode_token(token)?;
            if identity.id() != envelope.sender_id {
                return Err(MeshError::SignatureInvalid);
            }
            return Ok(identity.public_key);
        }

        let contact = self
            .store
            .lookup_contact(&envelope.sender_id)
            .await
            .ok_or_else(|| MeshError::UnknownContact(envelope.sender_id.clone()))?;
        Ok(contact.identity.public_key)
    }

    async fn deliver(&self, envelope: &MessageEnvelope, sender_key: &[u8; 32]) -> MeshResult<()> {
        match envelope.kind {
            EnvelopeKind::Text => {
                let secret = self.keypair.derive_shared_secret(sender_key)?;
                let plaintext = decrypt(&envelope.payload, &secret)?;
                let text = String::from_utf8(plaintext).map_err(|_| {
                    MeshError::MalformedFrame("Decrypted payload is not UTF-8".into())
                })?;

                self.store
                    .on_message_delivered(&envelope.sender_id, &text, chrono::Utc::now())
                    .await;
                self.delivered.fetch_add(1, Ordering::Relaxed);
                info!("Delivered text {} from {}", envelope.message_id, envelope.sender_id);

                if let Err(e) = self.send_read_receipt(envelope, &secret).await {
                    warn!("Read receipt for {} failed: {}", envelope.message_id, e);
                }
            }
            EnvelopeKind::ReadReceipt => {
                let secret = self.keypair.derive_shared_secret(sender_key)?;
                let plaintext = decrypt(&envelope.payload, &secret)?;
                let original = Uuid::from_slice(&plaintext).map_err(|_| {
                    MeshError::MalformedFrame("Receipt payload is not a message id".into())
                })?;

                self.store.on_read_receipt(original).await;
                self.delivered.fetch_add(1, Ordering::Relaxed);
                debug!("Receipt from {} confirms {}", envelope.sender_id, original);
            }
            EnvelopeKind::Handshake => {
                let token = std::str::from_utf8(&envelope.payload)
                    .map_err(|_| MeshError::MalformedFrame("Handshake token is not UTF-8".into()))?;
                let identity = decode_token(token)?;

                info!("Handshake from {}", identity.id());
                self.store.on_handshake(identity).await;
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Confirm delivery of a Text envelope back to its author
    ///
    /// The receipt is a fresh envelope with its own id; the original id
    /// travels encrypted in the payload so relays learn nothing about which
    /// message is being confirmed.
    async fn send_read_receipt(
        &self,
        original: &MessageEnvelope,
        secret: &identity::SharedSecret,
    ) -> MeshResult<()> {
        let payload = encrypt(original.message_id.as_bytes(), secret)?;
        self.originate(
            original.sender_id.clone(),
            EnvelopeKind::ReadReceipt,
            payload,
        )
        .await?;
        Ok(())
    }

    /// Forward an envelope not addressed to this device
    ///
    /// An incoming TTL of zero means the hop budget is spent: the envelope
    /// is dropped, not forwarded with an underflowed counter. Otherwise it
    /// goes back out to every ready peer except the one it arrived from.
    async fn relay(&self, mut envelope: MessageEnvelope, from: &PeerId) -> MeshResult<()> {
        if envelope.ttl == 0 {
            return Err(MeshError::TtlExpired);
        }

        envelope.ttl -= 1;
        let frame = envelope.encode_frame()?;
        let written = self.connections.broadcast_frame(&frame, Some(from)).await;
        self.relayed.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Relayed {} for {} to {} peers (ttl now {})",
            envelope.message_id, envelope.recipient_id, written, envelope.ttl
        );
        Ok(())
    }
}
