//! The public engine handle and the process-wide registry.
//!
//! The engine runs on its own small tokio runtime so it can be embedded into
//! hosts that have no async runtime of their own. All host-facing calls are
//! non-blocking message sends into the pipeline service, except
//! [`Wiretap::flush`] which waits for the pipeline to drain its queue.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use wiretap_config::Config;
use wiretap_storage::{JsonFileStore, KeyValueStore, Storage, StorageError};
use wiretap_system::{Addr, Service};

use crate::clock::SystemClock;
use crate::record::ObservedRequest;
use crate::service::{Flush, PipelineService, RequestPipeline, Stop, Submit, UpdateTags};
use crate::upstream::{HttpConfigClient, UpstreamError};

/// An error initializing the engine.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    /// The upstream HTTP client could not be built.
    #[error("failed to build the upstream client")]
    Upstream(#[from] UpstreamError),
    /// The tokio runtime could not be started.
    #[error("failed to start the runtime")]
    Runtime(#[from] std::io::Error),
    /// The persistent store could not be opened.
    #[error("failed to open the store")]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
struct Inner {
    addr: Addr<RequestPipeline>,
    shutdown: Mutex<Option<Shutdown>>,
}

#[derive(Debug)]
struct Shutdown {
    tx: oneshot::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

/// A handle to a running interception engine.
///
/// Handles are cheap to clone and all clones address the same engine.
/// Dropping every handle does not stop the engine; call [`stop`](Self::stop)
/// for an orderly shutdown.
#[derive(Clone, Debug)]
pub struct Wiretap {
    inner: Arc<Inner>,
}

impl Wiretap {
    /// Starts the engine with the given configuration and store.
    pub fn init(config: Config, store: Arc<dyn KeyValueStore>) -> Result<Self, InitError> {
        let config = Arc::new(config);
        let storage = Storage::new(store, &config.tp_id, &config.environment);
        let client = Arc::new(HttpConfigClient::new(&config)?);
        let clock = Arc::new(SystemClock::new());

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let addr = {
            let _guard = runtime.enter();
            PipelineService::new(config, storage, client, clock).start()
        };

        // The runtime is driven by a dedicated thread until shutdown.
        let (tx, rx) = oneshot::channel();
        let thread = std::thread::Builder::new()
            .name("wiretap".to_owned())
            .spawn(move || {
                runtime.block_on(async {
                    rx.await.ok();
                });
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                addr,
                shutdown: Mutex::new(Some(Shutdown { tx, thread })),
            }),
        })
    }

    /// Starts the engine with a JSON file store at the given path.
    pub fn init_with_file(config: Config, path: impl AsRef<Path>) -> Result<Self, InitError> {
        let store = JsonFileStore::open(path)?;
        Self::init(config, Arc::new(store))
    }

    /// Submits an intercepted request to the pipeline.
    ///
    /// Logs and discards the request when the engine has been stopped.
    pub fn submit(&self, record: ObservedRequest) {
        if self.is_stopped() {
            wiretap_log::error!("engine stopped, request discarded");
            return;
        }

        self.inner.addr.send(Submit(record));
    }

    /// Merges tags into the tags stamped on every delivered batch.
    ///
    /// New values overwrite existing ones with the same key. Logs and
    /// discards the tags when the engine has been stopped.
    pub fn update_tags(&self, tags: std::collections::HashMap<String, String>) {
        if self.is_stopped() {
            wiretap_log::error!("engine stopped, tags discarded");
            return;
        }

        self.inner.addr.send(UpdateTags(tags));
    }

    /// Forces all queued records out in batches and waits for the handoff.
    ///
    /// Does nothing when no session is ready or the engine has been stopped.
    pub fn flush(&self) {
        if self.is_stopped() {
            return;
        }

        let request = self.inner.addr.send(Flush);
        futures::executor::block_on(request).ok();
    }

    /// Stops the engine.
    ///
    /// Queued records that have not been handed to delivery are discarded.
    /// Submissions on this or any cloned handle afterwards log an error and
    /// are discarded.
    pub fn stop(&self) {
        let shutdown = self
            .inner
            .shutdown
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();

        let Some(shutdown) = shutdown else {
            return;
        };

        self.inner.addr.send(Stop);
        shutdown.tx.send(()).ok();
        shutdown.thread.join().ok();
    }

    fn is_stopped(&self) -> bool {
        self.inner
            .shutdown
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .is_none()
    }
}

static REGISTRY: Mutex<Option<Wiretap>> = Mutex::new(None);

/// Registers the process-wide engine instance.
///
/// Replaces and returns a previously registered instance without stopping it.
pub fn register(wiretap: Wiretap) -> Option<Wiretap> {
    REGISTRY
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .replace(wiretap)
}

/// Returns the process-wide engine instance, if one is registered.
pub fn instance() -> Option<Wiretap> {
    REGISTRY
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .clone()
}

/// Removes and returns the process-wide engine instance.
pub fn unregister() -> Option<Wiretap> {
    REGISTRY
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
        .take()
}

/// Submits a request through the registered engine instance.
///
/// Logs and discards the request when no instance is registered.
pub fn submit(record: ObservedRequest) {
    match instance() {
        Some(wiretap) => wiretap.submit(record),
        None => wiretap_log::error!("engine not initialized, request discarded"),
    }
}

/// Updates tags through the registered engine instance.
///
/// Logs and discards the tags when no instance is registered.
pub fn update_tags(tags: std::collections::HashMap<String, String>) {
    match instance() {
        Some(wiretap) => wiretap.update_tags(tags),
        None => wiretap_log::error!("engine not initialized, tags discarded"),
    }
}
