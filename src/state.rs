//! Process-wide shared state
//!
//! Every component receives a [`SharedState`] instead of reaching for
//! globals: the streaming handlers mutate the [`ConnectionRegistry`], the
//! advertiser reads it and owns the [`RegistrationState`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::metrics;

// ============================================================================
// Connection Registry
// ============================================================================

/// Count of streaming connections between "accepted" and "terminated"
///
/// The count only changes through [`ConnectionRegistry::acquire`] and the
/// drop of the returned [`ConnectionGuard`], so it cannot go negative.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    active: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new connection; the count drops again when the guard does
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_connections(now);
        ConnectionGuard {
            registry: Arc::clone(self),
        }
    }

    /// Current number of active connections
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Scoped registration of one connection
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    /// Active connections, including this one
    pub fn active(&self) -> usize {
        self.registry.active()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let now = self.registry.active.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_connections(now);
    }
}

// ============================================================================
// Registration State
// ============================================================================

/// Whether this instance is currently advertised to discovery
///
/// Reads are lock-free. Transitions go through [`RegistrationState::lock`],
/// which serializes the whole decide-then-call-discovery sequence.
#[derive(Debug, Default)]
pub struct RegistrationState {
    registered: AtomicBool,
    transition: Mutex<()>,
}

impl RegistrationState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Last recorded registration state
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Take the process-wide transition lock
    pub async fn lock(&self) -> RegistrationTransition<'_> {
        RegistrationTransition {
            _permit: self.transition.lock().await,
            state: self,
        }
    }
}

/// Exclusive right to change the registration state
pub struct RegistrationTransition<'a> {
    _permit: MutexGuard<'a, ()>,
    state: &'a RegistrationState,
}

impl RegistrationTransition<'_> {
    pub fn is_registered(&self) -> bool {
        self.state.is_registered()
    }

    pub fn set_registered(&mut self, registered: bool) {
        self.state.registered.store(registered, Ordering::SeqCst);
        metrics::set_registered(registered);
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// State shared by the streaming service, the advertiser and the admin server
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub connections: Arc<ConnectionRegistry>,
    pub registration: Arc<RegistrationState>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Shutdown
// ============================================================================

/// Resolve once shutdown is signalled; never resolves if the sender is gone
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_tracks_count() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.active(), 0);

        let a = registry.acquire();
        let b = registry.acquire();
        let c = registry.acquire();
        assert_eq!(registry.active(), 3);
        assert_eq!(a.active(), 3);

        drop(b);
        assert_eq!(registry.active(), 2);

        drop(a);
        drop(c);
        assert_eq!(registry.active(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let registry = ConnectionRegistry::new();
        let r = Arc::clone(&registry);

        let result = std::panic::catch_unwind(move || {
            let _guard = r.acquire();
            panic!("handler blew up");
        });

        assert!(result.is_err());
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_release() {
        let registry = ConnectionRegistry::new();
        let mut handles = Vec::new();

        for _ in 0..64 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire();
                tokio::task::yield_now().await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test]
    async fn test_registration_transition() {
        let state = RegistrationState::new();
        assert!(!state.is_registered());

        {
            let mut transition = state.lock().await;
            assert!(!transition.is_registered());
            transition.set_registered(true);
        }

        assert!(state.is_registered());
    }

    #[tokio::test]
    async fn test_shutdown_signalled_sees_earlier_send() {
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), shutdown_signalled(&mut rx))
            .await
            .unwrap();
    }
}
