//! Bounded pool of browser instances.
//!
//! The pool is generic over a [`BrowserLauncher`] so eviction and shutdown
//! can be exercised without a real browser. Pages are never pooled: callers
//! open a fresh page per fetch on the instance they were handed.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use gleaner_core::config::DEFAULT_BROWSER_CAPACITY;
use gleaner_core::error::AppError;
use gleaner_core::rotation::Proxy;
use tokio::sync::Mutex;

/// A running browser process.
pub trait BrowserHandle: Send + Sync + 'static {
    fn close(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Starts browser processes, optionally behind an upstream proxy.
pub trait BrowserLauncher: Send + Sync + 'static {
    type Instance: BrowserHandle;

    fn launch(
        &self,
        proxy: Option<&Proxy>,
    ) -> impl Future<Output = Result<Self::Instance, AppError>> + Send;
}

struct PooledBrowser<I> {
    id: u64,
    instance: Arc<I>,
}

struct PoolState<I> {
    instances: VecDeque<PooledBrowser<I>>,
    next_id: u64,
}

/// An instance handed out by [`BrowserPool::acquire`].
pub struct AcquiredBrowser<I> {
    pub id: u64,
    pub instance: Arc<I>,
}

/// Keeps at most `capacity` launched browsers, evicting the oldest.
///
/// `acquire` launches while holding the pool lock, so launches and
/// evictions never interleave and an evicted instance is never handed out.
pub struct BrowserPool<L: BrowserLauncher> {
    launcher: L,
    capacity: usize,
    state: Mutex<PoolState<L::Instance>>,
}

impl<L: BrowserLauncher> BrowserPool<L> {
    pub fn new(launcher: L) -> Self {
        Self::with_capacity(launcher, DEFAULT_BROWSER_CAPACITY)
    }

    pub fn with_capacity(launcher: L, capacity: usize) -> Self {
        Self {
            launcher,
            capacity: capacity.max(1),
            state: Mutex::new(PoolState {
                instances: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Launch a new instance and add it to the pool.
    ///
    /// When the pool grows past capacity the oldest instance is removed and
    /// closed in the background; a failed close is only logged.
    pub async fn acquire(
        &self,
        proxy: Option<&Proxy>,
    ) -> Result<AcquiredBrowser<L::Instance>, AppError> {
        let mut state = self.state.lock().await;

        let instance = Arc::new(self.launcher.launch(proxy).await?);
        let id = state.next_id;
        state.next_id += 1;
        state.instances.push_back(PooledBrowser {
            id,
            instance: Arc::clone(&instance),
        });
        tracing::debug!(instance = id, proxy = ?proxy.map(Proxy::url), "Browser launched");

        while state.instances.len() > self.capacity {
            if let Some(evicted) = state.instances.pop_front() {
                tracing::debug!(instance = evicted.id, "Evicting oldest browser");
                tokio::spawn(async move {
                    if let Err(e) = evicted.instance.close().await {
                        tracing::warn!(instance = evicted.id, error = %e, "Failed to close evicted browser");
                    }
                });
            }
        }

        Ok(AcquiredBrowser { id, instance })
    }

    /// Close every pooled instance. Used at shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock().await;
            state.instances.drain(..).collect()
        };
        for pooled in drained {
            if let Err(e) = pooled.instance.close().await {
                tracing::warn!(instance = pooled.id, error = %e, "Failed to close browser");
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.instances.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids of pooled instances, oldest first.
    pub async fn ids(&self) -> Vec<u64> {
        self.state
            .lock()
            .await
            .instances
            .iter()
            .map(|p| p.id)
            .collect()
    }
}
