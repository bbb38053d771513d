//! Session key manager: the single in-memory slot for the master key.
//!
//! ```text
//!   Empty ──set_key──► Active ──clear / idle timeout / drop──► Empty
//!                        │  ▲
//!                        └──┘ extend (timer reset), set_key (key replaced)
//! ```
//!
//! The slot is the only shared mutable key state in the crate. The idle timer
//! is a tokio task holding a weak reference, so it never keeps a session
//! alive, and `get_key` also checks the deadline so an expired key is not
//! handed out while the timer task waits to be polled.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use medvault_core::config::SessionConfig;

use crate::kdf::MasterKey;

/// Default inactivity window before the key is evicted.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Longest accepted inactivity window; larger values are clamped to it.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Empty,
    Active,
}

/// Shared handle to the session's key slot. Clones refer to the same slot;
/// the key is wiped when the last clone is dropped.
#[derive(Clone)]
pub struct KeyManager {
    inner: Arc<Inner>,
}

struct Inner {
    slot: Mutex<Slot>,
    idle_timeout: Duration,
}

#[derive(Default)]
struct Slot {
    key: Option<MasterKey>,
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every transition; a timer only evicts the generation it was armed for.
    generation: u64,
}

impl Slot {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.deadline = None;
    }

    /// Drop the key (zeroized by `MasterKey`'s `Drop`) and cancel the timer.
    fn wipe(&mut self) -> bool {
        self.disarm();
        self.generation = self.generation.wrapping_add(1);
        self.key.take().is_some()
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.wipe() {
            debug!("session key wiped on drop");
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_if_idle(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation && slot.key.is_some() {
            slot.timer = None;
            slot.wipe();
            info!("session key evicted after inactivity");
        }
    }
}

impl KeyManager {
    pub fn new(idle_timeout: Duration) -> Self {
        if idle_timeout > MAX_IDLE_TIMEOUT {
            warn!(
                requested_secs = idle_timeout.as_secs(),
                max_secs = MAX_IDLE_TIMEOUT.as_secs(),
                "idle timeout clamped"
            );
        }
        let idle_timeout = idle_timeout.min(MAX_IDLE_TIMEOUT);
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot::default()),
                idle_timeout,
            }),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.idle_timeout_secs))
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    /// Store `key`, replacing (and wiping) any previous one, and restart the
    /// inactivity timer.
    pub fn set_key(&self, key: MasterKey) {
        let mut slot = self.inner.lock();
        let replaced = slot.wipe();
        slot.key = Some(key);
        self.arm(&mut slot);
        debug!(replaced, timeout_secs = self.inner.idle_timeout.as_secs(), "session key set");
    }

    /// A copy of the key if the session is active. Does not extend the
    /// session; the copy is zeroized when the caller drops it.
    pub fn get_key(&self) -> Option<MasterKey> {
        let mut slot = self.inner.lock();
        if slot.key.is_some() && slot.expired() {
            slot.wipe();
            info!("session key evicted after inactivity");
            return None;
        }
        slot.key.clone()
    }

    /// Reset the inactivity timer. Returns false (and does nothing) when no
    /// key is held.
    pub fn extend(&self) -> bool {
        let mut slot = self.inner.lock();
        if slot.key.is_none() || slot.expired() {
            return false;
        }
        slot.disarm();
        slot.generation = slot.generation.wrapping_add(1);
        self.arm(&mut slot);
        debug!("session extended");
        true
    }

    /// Wipe the key and cancel the timer. Used for logout and shutdown.
    pub fn clear(&self) {
        if self.inner.lock().wipe() {
            info!("session key cleared");
        }
    }

    /// Current slot state, without the deadline check `get_key` performs.
    pub fn state(&self) -> KeyState {
        if self.inner.lock().key.is_some() {
            KeyState::Active
        } else {
            KeyState::Empty
        }
    }

    fn arm(&self, slot: &mut Slot) {
        let timeout = self.inner.idle_timeout;
        let now = Instant::now();
        // An unrepresentable deadline expires at once.
        slot.deadline = Some(now.checked_add(timeout).unwrap_or(now));

        // Without a runtime the deadline check in `get_key` still applies.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let generation = slot.generation;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        slot.timer = Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.evict_if_idle(generation);
            }
        }));
    }
}

impl Default for KeyManager {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("state", &self.state())
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish()
    }
}
