//! Bounded pool of launched browsers
//!
//! Leases are capped by a semaphore sized to `max_browsers` and bounded by
//! an acquire timeout. Pool membership lives behind one mutex:
//! - `members`: every live browser (`total`)
//! - `available`: members not currently leased
//! - `launching`: launches in progress, counted against `max_browsers`
//!
//! A watcher task per member observes its disconnect signal, evicts it,
//! and launches a replacement while the pool is below `min_browsers`.

use super::{Browser, BrowserError, BrowserLauncher, LaunchedBrowser, NavigateOptions, Page};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Notify, OwnedSemaphorePermit, Semaphore};
use url::Url;

/// Errors raised by the browser pool
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("No browser became available within {0:?}")]
    Exhausted(Duration),

    #[error("Failed to launch browser: {0}")]
    Launch(#[from] BrowserError),

    #[error("Browser pool is shut down")]
    Closed,

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Pool sizing and acquire timeout
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_browsers: usize,
    pub max_browsers: usize,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_browsers: 2,
            max_browsers: 10,
            acquire_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    fn validate(&self) -> Result<(), PoolError> {
        if self.max_browsers == 0 {
            return Err(PoolError::InvalidConfig(
                "max_browsers must be greater than 0".to_string(),
            ));
        }
        if self.min_browsers > self.max_browsers {
            return Err(PoolError::InvalidConfig(format!(
                "min_browsers ({}) exceeds max_browsers ({})",
                self.min_browsers, self.max_browsers
            )));
        }
        Ok(())
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Leased browsers (`total - queued`)
    pub active: usize,
    /// Idle browsers ready to be leased
    pub queued: usize,
    pub total: usize,
}

#[derive(Default)]
struct PoolState {
    members: HashMap<u64, Arc<dyn Browser>>,
    available: Vec<u64>,
    launching: usize,
    next_id: u64,
    closed: bool,
}

struct PoolShared {
    config: PoolConfig,
    launcher: Arc<dyn BrowserLauncher>,
    state: Mutex<PoolState>,
    leases: Arc<Semaphore>,
    changed: Notify,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts a leased browser back, if it is still a member
    fn give_back(&self, id: u64) {
        {
            let mut state = self.lock();
            if !state.closed && state.members.contains_key(&id) && !state.available.contains(&id)
            {
                state.available.push(id);
                tracing::trace!("Browser {} returned, {} available", id, state.available.len());
            }
        }
        self.changed.notify_waiters();
    }

    fn handle_disconnect(shared: &Arc<PoolShared>, id: u64) {
        let replace = {
            let mut state = shared.lock();
            if state.members.remove(&id).is_none() {
                return;
            }
            state.available.retain(|member| *member != id);
            tracing::warn!(
                "Browser {} disconnected unexpectedly, {} remain",
                id,
                state.members.len()
            );

            let below_min =
                state.members.len() + state.launching < shared.config.min_browsers;
            if !state.closed && below_min {
                state.launching += 1;
                true
            } else {
                false
            }
        };

        shared.changed.notify_waiters();

        if replace {
            let slot = LaunchSlot::reserved(shared.clone());
            tokio::spawn(async move {
                match slot.shared.launcher.launch().await {
                    Ok(launched) => {
                        if slot.fill(launched, true).is_some() {
                            tracing::info!("Launched replacement browser");
                        }
                    }
                    Err(e) => tracing::error!("Failed to launch replacement browser: {}", e),
                }
            });
        }
    }
}

/// A reserved launch, counted in `launching` until filled or dropped
struct LaunchSlot {
    shared: Arc<PoolShared>,
    armed: bool,
}

impl LaunchSlot {
    /// Wraps a reservation already counted in `launching`
    fn reserved(shared: Arc<PoolShared>) -> Self {
        Self {
            shared,
            armed: true,
        }
    }

    /// Registers the launched browser as a member
    ///
    /// Returns `None` (and closes the browser) if the pool shut down
    /// meanwhile.
    fn fill(mut self, launched: LaunchedBrowser, available: bool) -> Option<(u64, Arc<dyn Browser>)> {
        self.armed = false;
        let LaunchedBrowser {
            browser,
            disconnected,
        } = launched;

        let id = {
            let mut state = self.shared.lock();
            state.launching -= 1;
            if state.closed {
                None
            } else {
                let id = state.next_id;
                state.next_id += 1;
                state.members.insert(id, browser.clone());
                if available {
                    state.available.push(id);
                }
                Some(id)
            }
        };
        self.shared.changed.notify_waiters();

        match id {
            Some(id) => {
                watch(&self.shared, id, disconnected);
                Some((id, browser))
            }
            None => {
                tokio::spawn(async move {
                    let _ = browser.close().await;
                });
                None
            }
        }
    }
}

impl Drop for LaunchSlot {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().launching -= 1;
            self.shared.changed.notify_waiters();
        }
    }
}

fn watch(shared: &Arc<PoolShared>, id: u64, disconnected: oneshot::Receiver<()>) {
    let pool: Weak<PoolShared> = Arc::downgrade(shared);
    tokio::spawn(async move {
        let _ = disconnected.await;
        if let Some(shared) = pool.upgrade() {
            PoolShared::handle_disconnect(&shared, id);
        }
    });
}

enum AcquireStep {
    Ready(u64, Arc<dyn Browser>),
    Launch(LaunchSlot),
    Wait,
}

/// A bounded pool of browser instances
#[derive(Clone)]
pub struct BrowserPool {
    shared: Arc<PoolShared>,
}

impl BrowserPool {
    /// Validates the config and launches `min_browsers` instances
    ///
    /// # Returns
    ///
    /// * `Ok(BrowserPool)` - Pool warmed up to its minimum size
    /// * `Err(PoolError)` - Invalid config, or a warm-up launch failed
    pub async fn start(
        config: PoolConfig,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, PoolError> {
        config.validate()?;

        let warm_up = config.min_browsers;
        let shared = Arc::new(PoolShared {
            leases: Arc::new(Semaphore::new(config.max_browsers)),
            config,
            launcher,
            state: Mutex::new(PoolState {
                launching: warm_up,
                ..PoolState::default()
            }),
            changed: Notify::new(),
        });
        let pool = Self { shared };

        let launches = join_all((0..warm_up).map(|_| {
            let slot = LaunchSlot::reserved(pool.shared.clone());
            async move {
                let launched = slot_launch(&slot.shared).await;
                (slot, launched)
            }
        }))
        .await;

        let mut failure = None;
        for (slot, launched) in launches {
            match launched {
                Ok(launched) => {
                    slot.fill(launched, true);
                }
                Err(e) => failure = Some(e),
            }
        }

        if let Some(e) = failure {
            pool.shutdown().await;
            return Err(PoolError::Launch(e));
        }

        tracing::info!("Browser pool started with {} browsers", warm_up);
        Ok(pool)
    }

    /// Leases a browser
    ///
    /// Reuses an idle browser, launches a new one while the pool is below
    /// `max_browsers`, or waits for one to be returned. Waiting is bounded
    /// by the configured acquire timeout.
    ///
    /// # Returns
    ///
    /// * `Ok(BrowserLease)` - The lease; dropping it returns the browser
    /// * `Err(PoolError::Exhausted)` - Nothing became available in time
    /// * `Err(PoolError::Launch)` - A new browser failed to start
    pub async fn acquire(&self) -> Result<BrowserLease, PoolError> {
        let timeout = self.shared.config.acquire_timeout;
        tokio::time::timeout(timeout, self.acquire_inner())
            .await
            .map_err(|_| {
                tracing::warn!("Browser pool exhausted after waiting {:?}", timeout);
                PoolError::Exhausted(timeout)
            })?
    }

    async fn acquire_inner(&self) -> Result<BrowserLease, PoolError> {
        let permit = self
            .shared
            .leases
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut state = self.shared.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }

                match state.available.pop() {
                    Some(id) => match state.members.get(&id) {
                        Some(browser) => AcquireStep::Ready(id, browser.clone()),
                        None => continue,
                    },
                    None if state.members.len() + state.launching
                        < self.shared.config.max_browsers =>
                    {
                        state.launching += 1;
                        AcquireStep::Launch(LaunchSlot::reserved(self.shared.clone()))
                    }
                    None => AcquireStep::Wait,
                }
            };

            match step {
                AcquireStep::Ready(id, browser) => {
                    return Ok(self.lease(id, browser, permit));
                }
                AcquireStep::Launch(slot) => {
                    let (reply, launched) = oneshot::channel();
                    tokio::spawn(launch_on_demand(slot, reply));
                    let (id, browser) = launched.await.map_err(|_| PoolError::Closed)??;
                    tracing::debug!("Launched browser {} on demand", id);
                    return Ok(self.lease(id, browser, permit));
                }
                AcquireStep::Wait => notified.await,
            }
        }
    }

    fn lease(&self, id: u64, browser: Arc<dyn Browser>, permit: OwnedSemaphorePermit) -> BrowserLease {
        BrowserLease {
            id,
            browser,
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    /// Returns a leased browser to the pool
    ///
    /// Equivalent to dropping the lease. A browser evicted after a
    /// disconnect is not re-added.
    pub fn release(&self, lease: BrowserLease) {
        drop(lease);
    }

    /// Returns current occupancy
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        let total = state.members.len();
        let queued = state.available.len();
        PoolStats {
            active: total - queued,
            queued,
            total,
        }
    }

    /// Closes every browser; a failure to close one does not stop the rest
    pub async fn shutdown(&self) {
        let members: Vec<(u64, Arc<dyn Browser>)> = {
            let mut state = self.shared.lock();
            state.closed = true;
            state.available.clear();
            state.members.drain().collect()
        };
        self.shared.leases.close();
        self.shared.changed.notify_waiters();

        let results = join_all(members.iter().map(|(id, browser)| async move {
            (*id, browser.close().await)
        }))
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                tracing::error!("Failed to close browser {}: {}", id, e);
            }
        }

        tracing::info!("Browser pool shut down, closed {} browsers", members.len());
    }
}

async fn slot_launch(shared: &PoolShared) -> Result<LaunchedBrowser, BrowserError> {
    shared.launcher.launch().await
}

type LaunchReply = oneshot::Sender<Result<(u64, Arc<dyn Browser>), PoolError>>;

/// Launches a browser for one acquiring caller
///
/// Runs as its own task so a caller that times out never cancels a launch
/// halfway. If nobody is left to receive the browser it joins the idle set.
async fn launch_on_demand(slot: LaunchSlot, reply: LaunchReply) {
    let shared = slot.shared.clone();
    let outcome = match slot_launch(&shared).await {
        Ok(launched) => slot.fill(launched, false).ok_or(PoolError::Closed),
        Err(e) => {
            drop(slot);
            Err(PoolError::Launch(e))
        }
    };

    if let Err(Ok((id, _))) = reply.send(outcome) {
        tracing::debug!("Acquire gave up before browser {} launched, keeping it idle", id);
        shared.give_back(id);
    }
}

/// Exclusive hold on one pooled browser
///
/// Dropping the lease returns the browser to the pool.
pub struct BrowserLease {
    id: u64,
    browser: Arc<dyn Browser>,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl BrowserLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn browser(&self) -> &Arc<dyn Browser> {
        &self.browser
    }

    /// Opens an auxiliary page on the leased browser
    pub async fn open_page(
        &self,
        url: &Url,
        options: &NavigateOptions,
    ) -> Result<Box<dyn Page>, BrowserError> {
        self.browser.navigate(url, options).await
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        self.shared.give_back(self.id);
    }
}
