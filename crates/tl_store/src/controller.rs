//! Vault controller: holds the passphrase-derived key while unlocked and
//! gates every read and write of the decrypted state.
//!
//! Saves are sealed while the state mutex is held, so the key never leaves
//! it, and are then written through an async gate in sequence order. A
//! write that lost the race to a newer one is dropped rather than allowed
//! to overwrite it.
//!
//! Auto-lock: a watchdog task locks the vault after a period without
//! recorded activity (5 minutes by default, see [`VaultSettings`]).

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use tl_crypto::{kdf, CryptoError, DerivedKey, KdfParams};
use tl_proto::{share, AppState, CollabCloser, CollabHandle, Collections, LocalBus, RecordKind, Replica, ShareEnvelope};

use crate::envelope::{self, Persisted, VaultEnvelope, VAULT_FORMAT_VERSION};
use crate::error::StoreError;
use crate::events::{LockReason, VaultEvent};
use crate::settings::VaultSettings;
use crate::storage::KeyValueStore;

const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultStatus {
    /// No passphrase yet: data is readable but saving is disabled.
    NoPassphrase,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Locked,
    AlreadyLocked,
}

enum Phase {
    NoPassphrase,
    Locked,
    Unlocked {
        key: DerivedKey,
        salt: Vec<u8>,
        kdf: KdfParams,
    },
}

impl Phase {
    fn status(&self) -> VaultStatus {
        match self {
            Phase::NoPassphrase => VaultStatus::NoPassphrase,
            Phase::Locked => VaultStatus::Locked,
            Phase::Unlocked { .. } => VaultStatus::Unlocked,
        }
    }
}

struct Inner {
    phase: Phase,
    state: AppState,
    seq: u64,
    generation: u64,
    last_activity: Instant,
    auto_lock: Option<Duration>,
    watchdog: Option<JoinHandle<()>>,
    /// Channels joined while unlocked. Closed on lock.
    collab: Vec<CollabCloser>,
}

struct PendingWrite {
    seq: u64,
    sealed: Result<VaultEnvelope, StoreError>,
}

struct Shared {
    store: Arc<dyn KeyValueStore>,
    settings: VaultSettings,
    inner: Mutex<Inner>,
    /// Highest sequence number that reached the store.
    written: AsyncMutex<u64>,
    events: broadcast::Sender<VaultEvent>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(task) = self.inner.get_mut().watchdog.take() {
            task.abort();
        }
    }
}

/// Thread-safe vault handle. Clone to share across tasks.
#[derive(Clone)]
pub struct VaultController {
    shared: Arc<Shared>,
}

impl VaultController {
    /// Load whatever the store holds. An encrypted envelope leaves the
    /// controller locked with empty collections; plain or legacy data is
    /// loaded as-is with saving disabled.
    pub fn open(store: Arc<dyn KeyValueStore>, settings: VaultSettings) -> Result<Self, StoreError> {
        let (phase, state) = match envelope::load(store.as_ref())? {
            Persisted::Encrypted(_) => {
                info!("encrypted vault found, starting locked");
                (Phase::Locked, AppState::default())
            }
            Persisted::Plain(mut state) => {
                state.normalize_notes();
                (Phase::NoPassphrase, state)
            }
            Persisted::Legacy(items) => (
                Phase::NoPassphrase,
                AppState {
                    items,
                    ..AppState::default()
                },
            ),
            Persisted::Empty => (Phase::NoPassphrase, AppState::default()),
        };

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let auto_lock = settings.auto_lock();
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                settings,
                inner: Mutex::new(Inner {
                    phase,
                    state,
                    seq: 0,
                    generation: 0,
                    last_activity: Instant::now(),
                    auto_lock,
                    watchdog: None,
                    collab: Vec::new(),
                }),
                written: AsyncMutex::new(0),
                events,
            }),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.shared.events.subscribe()
    }

    pub fn settings(&self) -> &VaultSettings {
        &self.shared.settings
    }

    pub fn status(&self) -> VaultStatus {
        self.shared.inner.lock().phase.status()
    }

    pub fn is_locked(&self) -> bool {
        self.status() == VaultStatus::Locked
    }

    /// Incremented on every lock. Views built from an older generation
    /// must be thrown away.
    pub fn generation(&self) -> u64 {
        self.shared.inner.lock().generation
    }

    /// Snapshot of the decrypted state.
    pub fn state(&self) -> Result<AppState, StoreError> {
        let inner = self.shared.inner.lock();
        if matches!(inner.phase, Phase::Locked) {
            return Err(StoreError::Precondition("vault is locked".into()));
        }
        Ok(inner.state.clone())
    }

    /// Record user activity (resets the inactivity timer).
    pub fn touch(&self) {
        self.shared.inner.lock().last_activity = Instant::now();
    }

    /// Time left before auto-lock fires, if unlocked with a timeout.
    pub fn time_until_lock(&self) -> Option<Duration> {
        let inner = self.shared.inner.lock();
        match (&inner.phase, inner.auto_lock) {
            (Phase::Unlocked { .. }, Some(timeout)) => {
                Some(timeout.saturating_sub(inner.last_activity.elapsed()))
            }
            _ => None,
        }
    }

    /// Change the inactivity timeout. `None` disables auto-lock.
    pub fn set_auto_lock(&self, timeout: Option<Duration>) {
        let mut inner = self.shared.inner.lock();
        inner.auto_lock = timeout;
        if matches!(inner.phase, Phase::Unlocked { .. }) {
            self.arm_watchdog(&mut inner);
        } else if let Some(task) = inner.watchdog.take() {
            task.abort();
        }
    }

    /// Set (or replace) the passphrase. Draws a fresh salt, derives a new
    /// key and re-encrypts the current state under it.
    pub async fn set_passphrase(&self, passphrase: &str) -> Result<(), StoreError> {
        if passphrase.is_empty() {
            return Err(StoreError::Precondition("passphrase required".into()));
        }
        if self.is_locked() {
            return Err(StoreError::Precondition("unlock the vault before changing the passphrase".into()));
        }

        let salt = kdf::generate_salt().to_vec();
        let params = self.shared.settings.vault_kdf;
        let key = derive_blocking(passphrase, salt.clone(), params).await?;

        let write = {
            let mut inner = self.shared.inner.lock();
            if matches!(inner.phase, Phase::Locked) {
                return Err(StoreError::Precondition("vault was locked during key derivation".into()));
            }
            inner.phase = Phase::Unlocked { key, salt, kdf: params };
            inner.last_activity = Instant::now();
            self.arm_watchdog(&mut inner);
            seal_current(&mut inner)
        };

        info!(kdf = params.name(), "vault passphrase set");
        self.emit(VaultEvent::PassphraseSet);
        self.persist(write).await;
        Ok(())
    }

    /// Drop the key and every decrypted collection. Locking an already
    /// locked vault is reported, not an error.
    pub fn lock(&self) -> Result<LockOutcome, StoreError> {
        self.lock_with(LockReason::User)
    }

    fn lock_with(&self, reason: LockReason) -> Result<LockOutcome, StoreError> {
        let channels = {
            let mut inner = self.shared.inner.lock();
            match inner.phase {
                Phase::Locked => {
                    info!("vault already locked");
                    return Ok(LockOutcome::AlreadyLocked);
                }
                Phase::NoPassphrase => {
                    return Err(StoreError::Precondition("no passphrase set".into()));
                }
                Phase::Unlocked { .. } => {}
            }
            inner.phase = Phase::Locked;
            inner.state = AppState::default();
            inner.generation += 1;
            if let Some(task) = inner.watchdog.take() {
                task.abort();
            }
            std::mem::take(&mut inner.collab)
        };

        for channel in channels.iter().filter(|c| c.is_live()) {
            channel.close();
        }
        if !channels.is_empty() {
            debug!("closed {} collaboration channel(s)", channels.len());
        }
        info!(?reason, "vault locked");
        self.emit(VaultEvent::Locked { reason });
        self.emit(VaultEvent::ReloadRequired);
        Ok(LockOutcome::Locked)
    }

    /// Re-read the envelope from storage and decrypt it. Wrong passphrase,
    /// tampering and corruption are all reported as
    /// [`StoreError::UnlockFailed`].
    pub async fn unlock(&self, passphrase: &str) -> Result<(), StoreError> {
        if !self.is_locked() {
            return Err(StoreError::Precondition("vault is not locked".into()));
        }
        let stored = match envelope::load(self.shared.store.as_ref())? {
            Persisted::Encrypted(value) => value,
            _ => return Err(StoreError::Precondition("nothing to unlock".into())),
        };

        let Opened {
            key,
            salt,
            params,
            mut state,
            version,
        } = match decrypt(stored, passphrase).await {
            Ok(opened) => opened,
            Err(e) => {
                debug!("unlock rejected: {e}");
                return Err(StoreError::UnlockFailed);
            }
        };
        let upgrade = state.normalize_notes() || version < VAULT_FORMAT_VERSION;

        let write = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.phase, Phase::Locked) {
                return Err(StoreError::Precondition("vault is not locked".into()));
            }
            inner.phase = Phase::Unlocked { key, salt, kdf: params };
            inner.state = state;
            inner.last_activity = Instant::now();
            self.arm_watchdog(&mut inner);
            if upgrade {
                seal_current(&mut inner)
            } else {
                None
            }
        };

        info!("vault unlocked");
        self.emit(VaultEvent::Unlocked);
        if write.is_some() {
            info!("re-saving vault in current format");
        }
        self.persist(write).await;
        Ok(())
    }

    /// Replace the whole state and save it.
    pub async fn save(&self, state: AppState) -> Result<(), StoreError> {
        self.update(move |current| *current = state).await
    }

    /// Mutate the state in place and save it. Refused unless unlocked.
    /// A failed write is logged and published as
    /// [`VaultEvent::SaveFailed`]; the in-memory change stands.
    pub async fn update<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut AppState) -> R,
    {
        let (result, write) = {
            let mut inner = self.shared.inner.lock();
            require_unlocked(&inner.phase)?;
            let result = f(&mut inner.state);
            inner.last_activity = Instant::now();
            (result, seal_current(&mut inner))
        };
        self.persist(write).await;
        Ok(result)
    }

    /// Seal one record for out-of-band transfer. `reference` is an id or a
    /// 1-based position.
    pub async fn share(
        &self,
        kind: RecordKind,
        reference: &str,
        passphrase: &str,
    ) -> Result<ShareEnvelope, StoreError> {
        if passphrase.is_empty() {
            return Err(StoreError::Precondition("share passphrase required".into()));
        }
        let record = {
            let inner = self.shared.inner.lock();
            if matches!(inner.phase, Phase::Locked) {
                return Err(StoreError::Precondition("vault is locked".into()));
            }
            inner
                .state
                .find(kind, reference)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("{} {reference}", kind.as_str())))?
        };
        self.touch();

        let params = self.shared.settings.share_kdf;
        let passphrase = Zeroizing::new(passphrase.to_string());
        let envelope = tokio::task::spawn_blocking(move || share::share(&record, kind, &passphrase, &params))
            .await
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;

        info!(kind = kind.as_str(), "record shared");
        Ok(envelope)
    }

    /// Decrypt a share envelope and add the record to its collection.
    /// Returns the kind and the id the record was stored under.
    pub async fn receive_share(&self, text: &str, passphrase: &str) -> Result<(RecordKind, String), StoreError> {
        require_unlocked(&self.shared.inner.lock().phase)?;
        let envelope = share::parse(text)?;
        let kind = envelope.kind;

        let passphrase = Zeroizing::new(passphrase.to_string());
        let record = tokio::task::spawn_blocking(move || share::receive(&envelope, &passphrase))
            .await
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;

        let id = self.update(move |state| state.import(kind, record)).await?;
        info!(kind = kind.as_str(), %id, "share imported");
        self.emit(VaultEvent::ShareImported {
            kind: kind.as_str().to_string(),
            id: id.clone(),
        });
        Ok((kind, id))
    }

    /// Join a collaboration session with this vault as the replica.
    ///
    /// Locking the vault closes the returned handle: its receive task stops
    /// and the session key is dropped. Join again after unlocking.
    pub async fn join_collaboration(
        &self,
        bus: &LocalBus,
        session: &str,
        secret: &str,
    ) -> Result<CollabHandle, StoreError> {
        require_unlocked(&self.shared.inner.lock().phase)?;
        let replica: Arc<dyn Replica> = Arc::new(self.clone());
        let handle = CollabHandle::join(bus, session, secret, replica, &self.shared.settings.collab).await?;

        let mut inner = self.shared.inner.lock();
        if require_unlocked(&inner.phase).is_err() {
            handle.close();
            return Err(StoreError::Precondition("vault was locked while joining".into()));
        }
        inner.collab.retain(CollabCloser::is_live);
        inner.collab.push(handle.closer());
        Ok(handle)
    }

    /// The UI went out of view: stop timers and lock.
    pub fn on_hidden(&self) {
        self.release(LockReason::Hidden);
    }

    /// Process teardown: stop timers and lock.
    pub fn shutdown(&self) {
        self.release(LockReason::Shutdown);
    }

    fn release(&self, reason: LockReason) {
        if let Some(task) = self.shared.inner.lock().watchdog.take() {
            task.abort();
        }
        if self.status() == VaultStatus::Unlocked {
            if let Err(e) = self.lock_with(reason) {
                debug!("lock on {reason:?} skipped: {e}");
            }
        }
    }

    fn arm_watchdog(&self, inner: &mut Inner) {
        if let Some(task) = inner.watchdog.take() {
            task.abort();
        }
        let Some(timeout) = inner.auto_lock else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, auto-lock disabled");
            return;
        };
        inner.watchdog = Some(runtime.spawn(watchdog(Arc::downgrade(&self.shared), timeout)));
    }

    async fn persist(&self, write: Option<PendingWrite>) {
        let Some(PendingWrite { seq, sealed }) = write else {
            return;
        };
        let mut written = self.shared.written.lock().await;
        if seq <= *written {
            debug!(seq, "dropping superseded vault write");
            return;
        }
        match sealed.and_then(|envelope| envelope::persist(self.shared.store.as_ref(), &envelope)) {
            Ok(()) => {
                *written = seq;
                debug!(seq, "vault saved");
                self.emit(VaultEvent::Saved { seq });
            }
            Err(e) => {
                warn!(seq, "vault save failed: {e}");
                self.emit(VaultEvent::SaveFailed {
                    seq,
                    reason: e.to_string(),
                });
            }
        }
    }

    fn emit(&self, event: VaultEvent) {
        // No subscribers is fine.
        let _ = self.shared.events.send(event);
    }
}

#[async_trait]
impl Replica for VaultController {
    async fn snapshot(&self) -> Option<Collections> {
        let inner = self.shared.inner.lock();
        matches!(inner.phase, Phase::Unlocked { .. }).then(|| inner.state.collections())
    }

    async fn replace(&self, incoming: Collections) {
        match self.update(move |state| state.apply_collections(incoming)).await {
            Ok(()) => self.emit(VaultEvent::Replicated),
            Err(e) => warn!("dropping replicated state: {e}"),
        }
    }
}

fn require_unlocked(phase: &Phase) -> Result<(), StoreError> {
    match phase {
        Phase::Unlocked { .. } => Ok(()),
        Phase::Locked => Err(StoreError::Precondition("vault is locked".into())),
        Phase::NoPassphrase => Err(StoreError::Precondition("no passphrase set, saving is disabled".into())),
    }
}

fn seal_current(inner: &mut Inner) -> Option<PendingWrite> {
    inner.seq += 1;
    let seq = inner.seq;
    let Phase::Unlocked { key, salt, kdf } = &inner.phase else {
        return None;
    };
    Some(PendingWrite {
        seq,
        sealed: envelope::seal(&inner.state, key, salt, kdf),
    })
}

async fn derive_blocking(passphrase: &str, salt: Vec<u8>, params: KdfParams) -> Result<DerivedKey, StoreError> {
    let passphrase = Zeroizing::new(passphrase.to_string());
    let key = tokio::task::spawn_blocking(move || kdf::derive(&passphrase, &salt, &params))
        .await
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))??;
    Ok(key)
}

struct Opened {
    key: DerivedKey,
    salt: Vec<u8>,
    params: KdfParams,
    state: AppState,
    version: u32,
}

async fn decrypt(stored: serde_json::Value, passphrase: &str) -> Result<Opened, StoreError> {
    let envelope = VaultEnvelope::from_value(stored)?;
    let params = envelope.kdf_params()?;
    let salt = envelope.salt()?;
    let key = derive_blocking(passphrase, salt.clone(), params).await?;
    let state = envelope::open(&envelope, &key)?;
    Ok(Opened {
        key,
        salt,
        params,
        state,
        version: envelope.version,
    })
}

async fn watchdog(shared: Weak<Shared>, timeout: Duration) {
    loop {
        let deadline = {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            let last_activity = strong.inner.lock().last_activity;
            last_activity + timeout
        };
        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;

        let Some(strong) = shared.upgrade() else {
            return;
        };
        let controller = VaultController { shared: strong };
        let idle = controller.shared.inner.lock().last_activity.elapsed() >= timeout;
        if idle {
            info!("no activity for {timeout:?}");
            if let Err(e) = controller.lock_with(LockReason::Inactivity) {
                debug!("auto-lock skipped: {e}");
            }
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use tl_proto::Record;

    const FAST: KdfParams = KdfParams::Pbkdf2 { iterations: 1_000 };

    fn fast_settings() -> VaultSettings {
        VaultSettings {
            vault_kdf: FAST,
            share_kdf: FAST,
            auto_lock_secs: 0,
            collab: tl_proto::CollabConfig { iterations: 1_000 },
        }
    }

    fn fresh() -> (Arc<MemoryStore>, VaultController) {
        let store = Arc::new(MemoryStore::new());
        let vault = VaultController::open(store.clone(), fast_settings()).unwrap();
        (store, vault)
    }

    fn item(text: &str) -> Record {
        Record::from_value(json!({"id": text, "text": text, "done": false})).unwrap()
    }

    struct ReadOnlyStore;

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
        fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn fresh_vault_refuses_saving_and_locking() {
        let (_, vault) = fresh();
        assert_eq!(vault.status(), VaultStatus::NoPassphrase);
        assert!(matches!(vault.save(AppState::default()).await, Err(StoreError::Precondition(_))));
        assert!(matches!(vault.lock(), Err(StoreError::Precondition(_))));
        assert!(matches!(vault.set_passphrase("").await, Err(StoreError::Precondition(_))));
    }

    #[tokio::test]
    async fn lock_drops_state_and_reports_repeat() {
        let (_, vault) = fresh();
        vault.set_passphrase("pw").await.unwrap();
        vault.update(|s| s.items.push(item("a"))).await.unwrap();
        let mut events = vault.subscribe();

        assert_eq!(vault.lock().unwrap(), LockOutcome::Locked);
        assert_eq!(vault.generation(), 1);
        assert!(matches!(vault.state(), Err(StoreError::Precondition(_))));
        assert_eq!(
            events.recv().await.unwrap(),
            VaultEvent::Locked {
                reason: LockReason::User
            }
        );
        assert_eq!(events.recv().await.unwrap(), VaultEvent::ReloadRequired);

        assert_eq!(vault.lock().unwrap(), LockOutcome::AlreadyLocked);
        assert_eq!(vault.generation(), 1);
        assert!(matches!(vault.set_passphrase("new").await, Err(StoreError::Precondition(_))));
    }

    #[tokio::test]
    async fn unlock_restores_saved_state() {
        let (store, vault) = fresh();
        vault.set_passphrase("pw").await.unwrap();
        vault.update(|s| s.items.push(item("a"))).await.unwrap();
        vault.lock().unwrap();

        assert!(matches!(vault.unlock("nope").await, Err(StoreError::UnlockFailed)));
        assert!(vault.is_locked());
        vault.unlock("pw").await.unwrap();
        assert_eq!(vault.state().unwrap().items, vec![item("a")]);
        assert!(matches!(vault.unlock("pw").await, Err(StoreError::Precondition(_))));

        let reopened = VaultController::open(store, fast_settings()).unwrap();
        assert!(reopened.is_locked());
        reopened.unlock("pw").await.unwrap();
        assert_eq!(reopened.state().unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn changing_passphrase_reencrypts() {
        let (_, vault) = fresh();
        vault.set_passphrase("first").await.unwrap();
        vault.update(|s| s.items.push(item("a"))).await.unwrap();
        vault.set_passphrase("second").await.unwrap();
        vault.lock().unwrap();

        assert!(matches!(vault.unlock("first").await, Err(StoreError::UnlockFailed)));
        vault.unlock("second").await.unwrap();
        assert_eq!(vault.state().unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn superseded_write_is_dropped() {
        let (store, vault) = fresh();
        vault.set_passphrase("pw").await.unwrap();
        vault.update(|s| s.items.push(item("old"))).await.unwrap();

        let (older, newer) = {
            let mut inner = vault.shared.inner.lock();
            let older = seal_current(&mut inner);
            inner.state.items.push(item("new"));
            (older, seal_current(&mut inner))
        };
        vault.persist(newer).await;
        vault.persist(older).await;

        let reopened = VaultController::open(store, fast_settings()).unwrap();
        reopened.unlock("pw").await.unwrap();
        assert_eq!(reopened.state().unwrap().items.len(), 2);
    }

    #[tokio::test]
    async fn failed_write_is_reported_not_propagated() {
        let vault = VaultController::open(Arc::new(ReadOnlyStore), fast_settings()).unwrap();
        let mut events = vault.subscribe();
        vault.set_passphrase("pw").await.unwrap();
        assert_eq!(events.recv().await.unwrap(), VaultEvent::PassphraseSet);
        assert!(matches!(events.recv().await.unwrap(), VaultEvent::SaveFailed { seq: 1, .. }));

        vault.update(|s| s.items.push(item("a"))).await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), VaultEvent::SaveFailed { seq: 2, .. }));
        assert_eq!(vault.state().unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn hidden_locks_and_is_quiet_when_not_unlocked() {
        let (_, vault) = fresh();
        vault.on_hidden();
        assert_eq!(vault.status(), VaultStatus::NoPassphrase);

        vault.set_passphrase("pw").await.unwrap();
        vault.on_hidden();
        assert!(vault.is_locked());
        vault.shutdown();
        assert!(vault.is_locked());
    }

    #[tokio::test]
    async fn time_until_lock_tracks_timeout() {
        let (_, vault) = fresh();
        vault.set_auto_lock(Some(Duration::from_secs(60)));
        assert_eq!(vault.time_until_lock(), None);
        vault.set_passphrase("pw").await.unwrap();
        let left = vault.time_until_lock().unwrap();
        assert!(left <= Duration::from_secs(60) && left > Duration::from_secs(50));
        vault.set_auto_lock(None);
        assert_eq!(vault.time_until_lock(), None);
    }
}
