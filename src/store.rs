use std::sync::{Mutex, MutexGuard, PoisonError};

use time::OffsetDateTime;

/// Client-side persistence of the token expiry reported by the authority.
///
/// Written when the gate check activates a session with a reported expiry, erased on
/// any session termination. Only [`SessionController`](crate::session::SessionController)
/// touches it.
pub trait ExpiryStore: Send + Sync + 'static {
    fn save(&self, expires_at: OffsetDateTime);

    fn load(&self) -> Option<OffsetDateTime>;

    fn clear(&self);
}

/// Process-local [`ExpiryStore`].
#[derive(Debug, Default)]
pub struct MemoryExpiryStore {
    expires_at: Mutex<Option<OffsetDateTime>>,
}

impl MemoryExpiryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryExpiryStore {
    fn slot(&self) -> MutexGuard<'_, Option<OffsetDateTime>> {
        self.expires_at.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExpiryStore for MemoryExpiryStore {
    fn save(&self, expires_at: OffsetDateTime) {
        *self.slot() = Some(expires_at);
    }

    fn load(&self) -> Option<OffsetDateTime> {
        *self.slot()
    }

    fn clear(&self) {
        *self.slot() = None;
    }
}
