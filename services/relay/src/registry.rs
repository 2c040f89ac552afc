//! Tracks the session tasks spawned during one supervisor cycle.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

pub type SessionId = Uuid;

/// How long a failing session gets to flush its last message during a drain.
const SPARED_SESSION_GRACE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Inner {
    tasks: HashMap<SessionId, JoinHandle<()>>,
    closed: bool,
}

/// Owns the join handles of every session task in the current cycle.
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a session task and records its handle.
    ///
    /// Returns `false` (and drops the future) once the registry has been drained.
    pub fn spawn<F>(&self, session_id: SessionId, session: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inner = self.lock();
        if inner.closed {
            warn!(%session_id, "Session arrived while draining; dropping it.");
            return false;
        }
        inner.tasks.retain(|_, handle| !handle.is_finished());
        inner.tasks.insert(session_id, tokio::spawn(session));
        true
    }

    /// Number of session tasks still running.
    pub fn active(&self) -> usize {
        self.lock()
            .tasks
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Closes the registry, aborts every task except `spare`, and waits for all
    /// of them. The spared task is given a short grace period before it is
    /// aborted too. Returns the number of tasks that were aborted.
    pub async fn drain(&self, spare: Option<SessionId>) -> usize {
        let tasks = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.tasks)
        };

        let mut aborted = 0;
        let mut spared = None;
        let mut pending = Vec::with_capacity(tasks.len());
        for (session_id, handle) in tasks {
            if Some(session_id) == spare {
                spared = Some((session_id, handle));
                continue;
            }
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
            pending.push((session_id, handle));
        }

        if let Some((session_id, mut handle)) = spared {
            if tokio::time::timeout(SPARED_SESSION_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!(%session_id, "Failing session did not finish in time; aborting it.");
                handle.abort();
                aborted += 1;
                pending.push((session_id, handle));
            }
        }

        for (session_id, handle) in pending {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    error!(%session_id, "Session task panicked: {}", e);
                }
            }
        }
        aborted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_drain_aborts_running_sessions() {
        let registry = SessionRegistry::new();
        let released = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(released.clone());

        assert!(registry.spawn(Uuid::new_v4(), async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        }));
        tokio::task::yield_now().await;
        assert_eq!(registry.active(), 1);

        let aborted = registry.drain(None).await;
        assert_eq!(aborted, 1);
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(registry.active(), 0);
    }

    #[tokio::test]
    async fn test_drain_lets_spared_session_finish() {
        let registry = SessionRegistry::new();
        let finished = Arc::new(AtomicBool::new(false));
        let spared_id = Uuid::new_v4();

        let flag = finished.clone();
        registry.spawn(spared_id, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });
        registry.spawn(Uuid::new_v4(), std::future::pending::<()>());

        let aborted = registry.drain(Some(spared_id)).await;
        assert_eq!(aborted, 1);
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_after_drain_is_refused() {
        let registry = SessionRegistry::new();
        registry.drain(None).await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        assert!(!registry.spawn(Uuid::new_v4(), async move {
            flag.store(true, Ordering::SeqCst);
        }));
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));
    }
}
