//! The caching agent: one explicit instance owning store access.
//!
//! ```ignore
//! let agent = Agent::new(storage, fetcher, AgentSettings::from_config(&config)?);
//! agent.install().await;
//! let warming = agent.activate().await;   // returns immediately
//!
//! match agent.intercept(request).await {
//!     Interception::Respond(result) => serve(result.data),
//!     Interception::Passthrough(request) => forward(request),
//! }
//! ```

mod batch;
mod control;
mod interceptor;
mod lifecycle;
mod warmer;

pub use control::{ControlClient, ControlMessage};
pub use interceptor::Interception;

use color_eyre::{eyre::eyre, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;
use url::Url;

use crate::cache::{CacheStorage, CacheStore, StoreId};
use crate::config::Config;
use crate::manifest::AssetManifest;
use crate::net::Fetcher;

/// Where the agent is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Installing,
  /// Install finished, ready to take control
  Installed,
  /// In control, background warmer still running
  ActiveWarming,
  /// In control, warmer finished
  ActiveIdle,
  /// A newer agent has claimed control
  Superseded,
}

impl LifecycleState {
  pub fn is_active(self) -> bool {
    matches!(self, Self::ActiveWarming | Self::ActiveIdle)
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::ActiveWarming => "active-warming",
      Self::ActiveIdle => "active-idle",
      Self::Superseded => "superseded",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
  pub store: StoreId,
  /// Base for resolving relative URLs in preload requests
  pub origin: Url,
  pub manifest: AssetManifest,
  /// Quiescence window between the two warming stages
  pub warm_delay: Duration,
}

impl AgentSettings {
  pub fn from_config(config: &Config) -> Result<Self> {
    let origin = config.origin_url()?;
    let manifest = AssetManifest::resolve(&config.manifest, &origin)?;

    Ok(Self {
      store: config.store_id(),
      origin,
      manifest,
      warm_delay: config.warm_delay(),
    })
  }
}

struct AgentInner<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  settings: AgentSettings,
  state: watch::Sender<LifecycleState>,
  /// Set once activation has claimed control
  claimed: AtomicBool,
  /// Record that was left in place when the claim could not be written
  prior_controller: Mutex<Option<String>>,
  writes: WriteTracker,
}

/// Caching agent. Cheap to clone; clones share all state.
pub struct Agent<S: CacheStorage, F: Fetcher> {
  inner: Arc<AgentInner<S, F>>,
}

impl<S, F> Agent<S, F>
where
  S: CacheStorage + 'static,
  F: Fetcher + 'static,
{
  pub fn new(storage: Arc<S>, fetcher: Arc<F>, settings: AgentSettings) -> Self {
    let (state, _) = watch::channel(LifecycleState::Installing);
    Self {
      inner: Arc::new(AgentInner {
        storage,
        fetcher,
        settings,
        state,
        claimed: AtomicBool::new(false),
        prior_controller: Mutex::new(None),
        writes: WriteTracker::default(),
      }),
    }
  }

  pub fn store_id(&self) -> &StoreId {
    &self.inner.settings.store
  }

  /// The store this agent reads and writes. Never opens or creates it.
  pub fn store(&self) -> CacheStore<S> {
    CacheStore::handle(Arc::clone(&self.inner.storage), self.store_id())
  }

  /// Resolve an absolute URL or origin-relative path.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .inner
      .settings
      .origin
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  /// Current lifecycle state, refreshed against the storage's controller record.
  pub fn state(&self) -> LifecycleState {
    let state = *self.inner.state.borrow();
    if state.is_active() && !self.holds_claim() {
      self.set_state(LifecycleState::Superseded);
      return LifecycleState::Superseded;
    }
    state
  }

  /// Watch lifecycle transitions.
  pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
    self.inner.state.subscribe()
  }

  /// Wait until every write-through started so far has landed.
  pub async fn writes_settled(&self) {
    self.inner.writes.settled().await;
  }

  fn set_state(&self, state: LifecycleState) {
    self.inner.state.send_replace(state);
  }

  fn holds_claim(&self) -> bool {
    if !self.inner.claimed.load(Ordering::SeqCst) {
      return false;
    }
    match self.inner.storage.controller() {
      // A different claim displaces us, unless it is the one ours failed to replace
      Ok(Some(controller)) if controller != self.store().name() => {
        self.is_prior_controller(&controller)
      }
      Ok(_) => true,
      Err(e) => {
        // Unreadable claim: keep serving rather than dropping control
        debug!(error = %e, "Could not read controller record");
        true
      }
    }
  }

  fn is_prior_controller(&self, controller: &str) -> bool {
    self
      .inner
      .prior_controller
      .lock()
      .map(|prior| prior.as_deref() == Some(controller))
      .unwrap_or(true)
  }

  fn is_controlling(&self) -> bool {
    self.state().is_active()
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for Agent<S, F> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

/// Counts fire-and-forget store writes so shutdown can wait for them.
#[derive(Default)]
struct WriteTracker {
  pending: AtomicUsize,
  idle: Notify,
}

impl WriteTracker {
  fn start(&self) {
    self.pending.fetch_add(1, Ordering::SeqCst);
  }

  fn finish(&self) {
    if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
      self.idle.notify_waiters();
    }
  }

  async fn settled(&self) {
    loop {
      let notified = self.idle.notified();
      if self.pending.load(Ordering::SeqCst) == 0 {
        return;
      }
      notified.await;
    }
  }
}
