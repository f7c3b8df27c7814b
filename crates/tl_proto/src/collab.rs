//! Collaboration channel: encrypted state replication between peers that
//! share a `(session, secret)` pair.
//!
//! # Wire messages (posted on the derived channel)
//! - salt announcement: `{"salt": [u8; 16]}`, sent in the clear once by the
//!   first participant that needs a key
//! - encrypted payload: `{"cipher": [u8...], "iv": [u8; 12]}`, AES-256-GCM
//!   under PBKDF2-HMAC-SHA256(secret, salt, 100 000)
//!
//! Encrypted payloads decrypt to a handshake probe `{"type":"handshake"}`,
//! a handshake reply `{"type":"handshake","ack":true}`, or the replicated
//! collections `{items, notes, messages}`.
//!
//! # Session phases
//! `AwaitingSalt → AwaitingHandshake → Ready`. Collections are only accepted
//! in `Ready`; anything that fails to parse or authenticate is dropped.
//! `Closed` is terminal: the key and secret are gone and nothing is sent or
//! accepted.
//!
//! Peers are not tracked: there is no membership or leave message, and more
//! than two peers may share a channel. A late joiner needs the salt already
//! in use (see [`CollabHandle::salt_hex`]).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info};
use zeroize::Zeroizing;

use tl_crypto::aead::{self, IV_LEN};
use tl_crypto::kdf::{self, DerivedKey, KdfParams, SALT_LEN};
use tl_crypto::{hash, CryptoError};

use crate::bus::{BusSender, LocalBus};
use crate::error::ProtoError;
use crate::models::Collections;

pub const COLLAB_PBKDF2_ITERATIONS: u32 = 100_000;

const HANDSHAKE: &str = "handshake";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollabConfig {
    pub iterations: u32,
}

impl Default for CollabConfig {
    fn default() -> Self {
        Self {
            iterations: COLLAB_PBKDF2_ITERATIONS,
        }
    }
}

/// Frames as they appear on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireMessage {
    Salt { salt: Vec<u8> },
    Cipher { cipher: Vec<u8>, iv: Vec<u8> },
}

impl WireMessage {
    fn into_value(self) -> Value {
        match self {
            Self::Salt { salt } => json!({ "salt": salt }),
            Self::Cipher { cipher, iv } => json!({ "cipher": cipher, "iv": iv }),
        }
    }
}

/// The application side of a channel: where outgoing state comes from and
/// where replicated state goes.
#[async_trait]
pub trait Replica: Send + Sync + 'static {
    /// Current collections, or `None` when there is nothing to share (e.g.
    /// the vault is locked).
    async fn snapshot(&self) -> Option<Collections>;

    /// Replace local collections with a peer's copy.
    async fn replace(&self, incoming: Collections);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollabPhase {
    AwaitingSalt,
    AwaitingHandshake,
    Ready,
    Closed,
}

enum Phase {
    AwaitingSalt,
    AwaitingHandshake { salt: [u8; SALT_LEN], key: DerivedKey },
    Ready { salt: [u8; SALT_LEN], key: DerivedKey },
    Closed,
}

/// Protocol state for one joined channel. Pure state machine over frames;
/// the only side effect is posting on the bus.
pub struct CollabSession {
    secret: Zeroizing<String>,
    iterations: u32,
    phase: Phase,
    tx: BusSender,
}

impl CollabSession {
    pub async fn new(
        tx: BusSender,
        secret: &str,
        salt: Option<[u8; SALT_LEN]>,
        config: &CollabConfig,
    ) -> Result<Self, ProtoError> {
        if secret.is_empty() {
            return Err(ProtoError::Precondition("collaboration secret required".into()));
        }
        let mut session = Self {
            secret: Zeroizing::new(secret.to_string()),
            iterations: config.iterations,
            phase: Phase::AwaitingSalt,
            tx,
        };
        if let Some(salt) = salt {
            session.adopt_salt(salt).await?;
        }
        Ok(session)
    }

    pub fn phase(&self) -> CollabPhase {
        match self.phase {
            Phase::AwaitingSalt => CollabPhase::AwaitingSalt,
            Phase::AwaitingHandshake { .. } => CollabPhase::AwaitingHandshake,
            Phase::Ready { .. } => CollabPhase::Ready,
            Phase::Closed => CollabPhase::Closed,
        }
    }

    /// Drop the session key and secret. The session stays closed.
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
        self.secret = Zeroizing::new(String::new());
    }

    pub fn salt(&self) -> Option<[u8; SALT_LEN]> {
        match &self.phase {
            Phase::AwaitingSalt | Phase::Closed => None,
            Phase::AwaitingHandshake { salt, .. } | Phase::Ready { salt, .. } => Some(*salt),
        }
    }

    fn key(&self) -> Option<&DerivedKey> {
        match &self.phase {
            Phase::AwaitingSalt | Phase::Closed => None,
            Phase::AwaitingHandshake { key, .. } | Phase::Ready { key, .. } => Some(key),
        }
    }

    async fn adopt_salt(&mut self, salt: [u8; SALT_LEN]) -> Result<(), ProtoError> {
        let key = derive_session_key(&self.secret, salt, self.iterations).await?;
        info!("collaboration salt: {}", hex::encode(salt));
        self.phase = Phase::AwaitingHandshake { salt, key };
        Ok(())
    }

    /// First participant to need a key picks the salt and announces it.
    async fn ensure_key(&mut self) -> Result<(), ProtoError> {
        if matches!(self.phase, Phase::AwaitingSalt) {
            let salt = kdf::generate_salt();
            self.tx.post(WireMessage::Salt { salt: salt.to_vec() }.into_value());
            self.adopt_salt(salt).await?;
        }
        Ok(())
    }

    fn promote(&mut self) {
        let phase = std::mem::replace(&mut self.phase, Phase::AwaitingSalt);
        self.phase = match phase {
            Phase::AwaitingHandshake { salt, key } => {
                info!("collaboration handshake complete");
                Phase::Ready { salt, key }
            }
            other => other,
        };
    }

    fn post_encrypted(&self, payload: &Value) -> Result<(), ProtoError> {
        let key = self
            .key()
            .ok_or_else(|| ProtoError::Precondition("no collaboration key yet".into()))?;
        let sealed = aead::seal(key, &serde_json::to_vec(payload)?)?;
        self.tx.post(
            WireMessage::Cipher {
                cipher: sealed.ciphertext,
                iv: sealed.iv.to_vec(),
            }
            .into_value(),
        );
        Ok(())
    }

    async fn send_handshake(&mut self, ack: bool) -> Result<(), ProtoError> {
        self.ensure_key().await?;
        let probe = if ack {
            json!({ "type": HANDSHAKE, "ack": true })
        } else {
            json!({ "type": HANDSHAKE })
        };
        self.post_encrypted(&probe)
    }

    /// Before the handshake completes this only (re)sends a probe; after it,
    /// the full snapshot goes out under a fresh iv.
    pub async fn broadcast(&mut self, snapshot: Option<Collections>) -> Result<(), ProtoError> {
        if matches!(self.phase, Phase::Closed) {
            return Err(ProtoError::Precondition("collaboration channel closed".into()));
        }
        if !matches!(self.phase, Phase::Ready { .. }) {
            return self.send_handshake(false).await;
        }
        match snapshot {
            Some(collections) => self.post_encrypted(&serde_json::to_value(collections)?),
            None => {
                debug!("collaboration broadcast skipped: nothing to share");
                Ok(())
            }
        }
    }

    /// Process one inbound frame. Returns replicated collections to apply.
    pub async fn handle(&mut self, frame: Value) -> Option<Collections> {
        let message = match serde_json::from_value::<WireMessage>(frame) {
            Ok(message) => message,
            Err(_) => {
                debug!("collaboration: dropping unrecognised frame");
                return None;
            }
        };
        match message {
            WireMessage::Salt { salt } => {
                self.on_salt(&salt).await;
                None
            }
            WireMessage::Cipher { cipher, iv } => self.on_cipher(&cipher, &iv).await,
        }
    }

    async fn on_salt(&mut self, salt: &[u8]) {
        if !matches!(self.phase, Phase::AwaitingSalt) {
            return;
        }
        let Ok(salt) = <[u8; SALT_LEN]>::try_from(salt) else {
            debug!("collaboration: dropping salt of length {}", salt.len());
            return;
        };
        if let Err(e) = self.adopt_salt(salt).await {
            debug!("collaboration: cannot adopt salt: {e}");
            return;
        }
        if let Err(e) = self.send_handshake(false).await {
            debug!("collaboration: handshake send failed: {e}");
        }
    }

    async fn on_cipher(&mut self, cipher: &[u8], iv: &[u8]) -> Option<Collections> {
        if cipher.is_empty() || iv.len() != IV_LEN {
            debug!("collaboration: dropping empty or malformed payload");
            return None;
        }
        let payload: Value = {
            let key = self.key()?;
            let plaintext = aead::open(key, iv, cipher).ok()?;
            serde_json::from_slice(&plaintext).ok()?
        };

        if payload.get("type").and_then(Value::as_str) == Some(HANDSHAKE) {
            let ack = payload.get("ack").and_then(Value::as_bool).unwrap_or(false);
            match self.phase {
                Phase::AwaitingHandshake { .. } => {
                    self.promote();
                    if !ack {
                        self.reply_ack().await;
                    }
                }
                Phase::Ready { .. } if !ack => self.reply_ack().await,
                _ => {}
            }
            return None;
        }

        if !matches!(self.phase, Phase::Ready { .. }) {
            debug!("collaboration: dropping data received before handshake");
            return None;
        }
        serde_json::from_value::<Collections>(payload).ok()
    }

    async fn reply_ack(&mut self) {
        if let Err(e) = self.send_handshake(true).await {
            debug!("collaboration: handshake reply failed: {e}");
        }
    }
}

async fn derive_session_key(
    secret: &Zeroizing<String>,
    salt: [u8; SALT_LEN],
    iterations: u32,
) -> Result<DerivedKey, ProtoError> {
    let secret = secret.clone();
    let params = KdfParams::Pbkdf2 { iterations };
    let key = tokio::task::spawn_blocking(move || kdf::derive(&secret, &salt, &params))
        .await
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;
    Ok(key)
}

/// A joined channel. Dropping or closing the handle stops receiving.
pub struct CollabHandle {
    channel: String,
    session: Arc<Mutex<CollabSession>>,
    replica: Arc<dyn Replica>,
    task: JoinHandle<()>,
    closed: Arc<AtomicBool>,
}

/// Closes a [`CollabHandle`] from outside: stops its receive task and drops
/// the session key. Holds no strong reference to the session.
#[derive(Clone)]
pub struct CollabCloser {
    task: AbortHandle,
    session: Weak<Mutex<CollabSession>>,
    closed: Arc<AtomicBool>,
}

impl CollabCloser {
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.task.abort();
        if let Some(session) = self.session.upgrade() {
            // A busy session is closed by the handle on its next use.
            if let Ok(mut session) = session.try_lock() {
                session.close();
            }
        }
    }

    /// False once the handle has been dropped.
    pub fn is_live(&self) -> bool {
        self.session.strong_count() > 0
    }
}

impl CollabHandle {
    /// Join the channel derived from `(session, secret)`.
    pub async fn join(
        bus: &LocalBus,
        session: &str,
        secret: &str,
        replica: Arc<dyn Replica>,
        config: &CollabConfig,
    ) -> Result<Self, ProtoError> {
        if secret.is_empty() {
            return Err(ProtoError::Precondition("collaboration secret required".into()));
        }
        Self::join_channel(bus, &hash::channel_name(session, secret), secret, None, replica, config)
            .await
    }

    /// Join an explicit channel name, optionally with a salt obtained from a
    /// peer that is already in session.
    pub async fn join_channel(
        bus: &LocalBus,
        channel: &str,
        secret: &str,
        salt: Option<[u8; SALT_LEN]>,
        replica: Arc<dyn Replica>,
        config: &CollabConfig,
    ) -> Result<Self, ProtoError> {
        let mut port = bus.port(channel);
        let session = CollabSession::new(port.sender(), secret, salt, config).await?;
        let session = Arc::new(Mutex::new(session));

        let task = {
            let session = Arc::clone(&session);
            let replica = Arc::clone(&replica);
            tokio::spawn(async move {
                while let Some(frame) = port.recv().await {
                    let incoming = session.lock().await.handle(frame).await;
                    if let Some(collections) = incoming {
                        replica.replace(collections).await;
                    }
                }
            })
        };

        info!("joined collaboration channel {channel}");
        Ok(Self {
            channel: channel.to_string(),
            session,
            replica,
            task,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn closer(&self) -> CollabCloser {
        CollabCloser {
            task: self.task.abort_handle(),
            session: Arc::downgrade(&self.session),
            closed: Arc::clone(&self.closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn session(&self) -> tokio::sync::MutexGuard<'_, CollabSession> {
        let mut session = self.session.lock().await;
        if self.is_closed() {
            session.close();
        }
        session
    }

    /// Send the replica's current collections (or a handshake probe while
    /// the handshake is still pending).
    pub async fn broadcast(&self) -> Result<(), ProtoError> {
        let snapshot = self.replica.snapshot().await;
        self.session().await.broadcast(snapshot).await
    }

    pub async fn phase(&self) -> CollabPhase {
        self.session().await.phase()
    }

    pub async fn handshake_complete(&self) -> bool {
        self.phase().await == CollabPhase::Ready
    }

    pub async fn salt(&self) -> Option<[u8; SALT_LEN]> {
        self.session().await.salt()
    }

    /// Salt in hex, for confirming out of band that peers share it.
    pub async fn salt_hex(&self) -> Option<String> {
        self.salt().await.map(hex::encode)
    }

    pub fn close(self) {
        self.closer().close();
        info!("left collaboration channel {}", self.channel);
    }
}

impl Drop for CollabHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: CollabConfig = CollabConfig { iterations: 1_000 };

    async fn session_pair() -> (CollabSession, crate::bus::BusPort, crate::bus::BusPort) {
        let bus = LocalBus::new();
        let own = bus.port("chan");
        let peer = bus.port("chan");
        let session = CollabSession::new(own.sender(), "secret", None, &FAST).await.unwrap();
        (session, own, peer)
    }

    #[tokio::test]
    async fn empty_secret_is_rejected() {
        let bus = LocalBus::new();
        let port = bus.port("chan");
        assert!(matches!(
            CollabSession::new(port.sender(), "", None, &FAST).await,
            Err(ProtoError::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn first_broadcast_announces_salt_then_probes() {
        let (mut session, _own, mut peer) = session_pair().await;
        session.broadcast(Some(Collections::default())).await.unwrap();
        assert_eq!(session.phase(), CollabPhase::AwaitingHandshake);

        let salt_frame = peer.recv().await.unwrap();
        let salt: Vec<u8> = serde_json::from_value(salt_frame["salt"].clone()).unwrap();
        assert_eq!(salt, session.salt().unwrap().to_vec());

        let probe = peer.recv().await.unwrap();
        assert!(probe.get("cipher").is_some() && probe.get("iv").is_some());
    }

    #[tokio::test]
    async fn data_before_handshake_is_discarded() {
        let (mut session, _own, _peer) = session_pair().await;
        session.broadcast(None).await.unwrap();
        let salt = session.salt().unwrap();

        let key = kdf::derive("secret", &salt, &KdfParams::Pbkdf2 { iterations: FAST.iterations }).unwrap();
        let data = serde_json::to_vec(&Collections::default()).unwrap();
        let sealed = aead::seal(&key, &data).unwrap();
        let frame = json!({"cipher": sealed.ciphertext, "iv": sealed.iv.to_vec()});

        assert_eq!(session.handle(frame.clone()).await, None);
        assert_eq!(session.phase(), CollabPhase::AwaitingHandshake);

        let probe = aead::seal(&key, br#"{"type":"handshake"}"#).unwrap();
        let probe = json!({"cipher": probe.ciphertext, "iv": probe.iv.to_vec()});
        assert_eq!(session.handle(probe).await, None);
        assert_eq!(session.phase(), CollabPhase::Ready);

        assert_eq!(session.handle(frame).await, Some(Collections::default()));
    }

    #[tokio::test]
    async fn noise_is_dropped_silently() {
        let (mut session, _own, _peer) = session_pair().await;
        session.broadcast(None).await.unwrap();
        for frame in [
            json!(null),
            json!("hello"),
            json!({"unrelated": true}),
            json!({"cipher": [], "iv": []}),
            json!({"cipher": [1, 2, 3], "iv": vec![0u8; IV_LEN]}),
            json!({"cipher": [1, 2, 3], "iv": [999]}),
            json!({"salt": [1, 2, 3]}),
        ] {
            assert_eq!(session.handle(frame).await, None);
        }
        assert_eq!(session.phase(), CollabPhase::AwaitingHandshake);
    }

    #[tokio::test]
    async fn cipher_before_salt_is_dropped() {
        let (mut session, _own, _peer) = session_pair().await;
        let frame = json!({"cipher": vec![1u8; 32], "iv": vec![0u8; IV_LEN]});
        assert_eq!(session.handle(frame).await, None);
        assert_eq!(session.phase(), CollabPhase::AwaitingSalt);
    }

    #[tokio::test]
    async fn closed_session_drops_key_and_refuses_traffic() {
        let (mut session, _own, _peer) = session_pair().await;
        session.broadcast(None).await.unwrap();
        let salt = session.salt().unwrap();
        session.close();

        assert_eq!(session.phase(), CollabPhase::Closed);
        assert_eq!(session.salt(), None);
        assert!(matches!(session.broadcast(None).await, Err(ProtoError::Precondition(_))));

        let key = kdf::derive("secret", &salt, &KdfParams::Pbkdf2 { iterations: FAST.iterations }).unwrap();
        let probe = aead::seal(&key, br#"{"type":"handshake"}"#).unwrap();
        let probe = json!({"cipher": probe.ciphertext, "iv": probe.iv.to_vec()});
        assert_eq!(session.handle(probe).await, None);
        assert_eq!(session.handle(json!({"salt": salt.to_vec()})).await, None);
        assert_eq!(session.phase(), CollabPhase::Closed);
    }
}
