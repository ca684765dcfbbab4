//! The request pipeline service.
//!
//! All interception state lives in a single service task: the pre-queue of
//! requests captured before a session exists, the sampled queue awaiting
//! batching, the current session, and the batch watchdog. Hosts talk to the
//! pipeline exclusively through its [`Addr`], so no state needs locking.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use wiretap_config::Config;
use wiretap_log::LogError;
use wiretap_sampling::{IngestConfig, MatchTarget, SamplingDecision};
use wiretap_storage::Storage;
use wiretap_system::{
    AsyncResponse, FromMessage, Interface, NoResponse, Receiver, Sender, Service,
};

use crate::clock::Clock;
use crate::delivery::{self, BatchReceipt, DeliveryError};
use crate::encoder::SampledRecord;
use crate::providers::ProviderMatcher;
use crate::record::ObservedRequest;
use crate::session::Session;
use crate::upstream::{ConfigClient, UpstreamError};
use crate::utils::SleepHandle;

/// Maximum number of records in a single batch.
pub const MAX_BATCH_SIZE: usize = 10;

/// Batch identifiers wrap around after this many batches.
const BATCH_ID_MODULO: u32 = 10_000;

/// Time a partially filled batch waits before it is sent anyway.
const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Suspension window after a failed ingest config download.
const FETCH_RETRY_INTERVAL_MS: i64 = 5 * 60 * 1000;

/// Maximum age of a cached ingest config. A cache exactly this old has
/// already expired.
const CONFIG_MAX_AGE_MS: i64 = 24 * 60 * 60 * 1000;

/// Provider name attached to synthesized lifecycle events.
const LIFECYCLE_PROVIDER: &str = "wiretap";

/// Submits an intercepted request to the pipeline.
#[derive(Debug)]
pub struct Submit(pub ObservedRequest);

/// Merges new tags into the tags stamped on every batch.
#[derive(Debug)]
pub struct UpdateTags(pub HashMap<String, String>);

/// Forces immediate batching of all queued records.
#[derive(Debug)]
pub struct Flush;

/// Stops the pipeline, discarding anything still queued.
#[derive(Debug)]
pub struct Stop;

/// Messages of the request pipeline service.
#[derive(Debug)]
pub enum RequestPipeline {
    /// See [`Submit`].
    Submit(ObservedRequest),
    /// See [`UpdateTags`].
    UpdateTags(HashMap<String, String>),
    /// See [`Flush`].
    Flush(Sender<()>),
    /// See [`Stop`].
    Stop,
}

impl Interface for RequestPipeline {}

impl FromMessage<Submit> for RequestPipeline {
    type Response = NoResponse;

    fn from_message(message: Submit, _: ()) -> Self {
        Self::Submit(message.0)
    }
}

impl FromMessage<UpdateTags> for RequestPipeline {
    type Response = NoResponse;

    fn from_message(message: UpdateTags, _: ()) -> Self {
        Self::UpdateTags(message.0)
    }
}

impl FromMessage<Flush> for RequestPipeline {
    type Response = AsyncResponse<()>;

    fn from_message(_: Flush, sender: Sender<()>) -> Self {
        Self::Flush(sender)
    }
}

impl FromMessage<Stop> for RequestPipeline {
    type Response = NoResponse;

    fn from_message(_: Stop, _: ()) -> Self {
        Self::Stop
    }
}

/// Internal completions marshaled back into the service loop.
#[derive(Debug)]
enum PipelineEvent {
    /// An ingest config download finished.
    ConfigFetched(Result<String, UpstreamError>),
    /// A batch delivery finished.
    BatchFinished {
        batch_id: u32,
        result: Result<BatchReceipt, DeliveryError>,
    },
}

/// Service implementing the interception pipeline.
pub struct PipelineService {
    config: Arc<Config>,
    storage: Storage,
    client: Arc<dyn ConfigClient>,
    clock: Arc<dyn Clock>,
    providers: ProviderMatcher,
    tags: HashMap<String, String>,
    session: Option<Session>,
    pre_queue: VecDeque<ObservedRequest>,
    queue: VecDeque<SampledRecord>,
    next_batch_id: u32,
    watchdog: SleepHandle,
    watchdog_batch_id: Option<u32>,
    suspended_until: Option<i64>,
    refresh_in_flight: bool,
    events_tx: mpsc::UnboundedSender<PipelineEvent>,
    events_rx: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl PipelineService {
    /// Creates the pipeline, restoring a persisted session if one is still
    /// valid.
    pub fn new(
        config: Arc<Config>,
        storage: Storage,
        client: Arc<dyn ConfigClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut service = Self {
            providers: ProviderMatcher::new(&config.custom_domains),
            tags: config.tags.clone(),
            config,
            storage,
            client,
            clock,
            session: None,
            pre_queue: VecDeque::new(),
            queue: VecDeque::new(),
            next_batch_id: 0,
            watchdog: SleepHandle::idle(),
            watchdog_batch_id: None,
            suspended_until: None,
            refresh_in_flight: false,
            events_tx,
            events_rx,
        };

        service.restore_session();
        service
    }

    fn restore_session(&mut self) {
        let Some(record) = self.storage.load_session() else {
            return;
        };

        let mut session = Session::from_record(record);
        if session.has_expired(&*self.clock) {
            wiretap_log::debug!("Persisted session expired");
            return;
        }

        if session.update_last_activity(&*self.clock) {
            self.storage.save_session(&session.to_record());
        }

        wiretap_log::debug!("Session restored: {}", session.session_id());
        let tracking_enabled = session.tracking_enabled();
        self.session = Some(session);

        if !tracking_enabled {
            self.suspend_tracking_disabled();
        }
    }

    fn handle_message(&mut self, message: RequestPipeline) {
        match message {
            RequestPipeline::Submit(record) => self.handle_submit(record),
            RequestPipeline::UpdateTags(tags) => self.handle_update_tags(tags),
            RequestPipeline::Flush(sender) => self.handle_flush(sender),
            // Handled in the service loop.
            RequestPipeline::Stop => (),
        }
    }

    fn handle_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::ConfigFetched(result) => self.handle_config_fetched(result),
            PipelineEvent::BatchFinished { batch_id, result } => {
                self.handle_batch_finished(batch_id, result)
            }
        }
    }

    fn handle_submit(&mut self, record: ObservedRequest) {
        if self.is_suspended() {
            wiretap_log::debug!("Request ignored. Processing is suspended");
            return;
        }

        let record = if record.created_at_ms() == 0 {
            record.with_created_at(self.clock.boot_elapsed_millis())
        } else {
            record
        };

        // Resolve the provider up front so requests to unsupported
        // destinations never occupy queue slots.
        let Some(record) = self.resolve_provider(record) else {
            return;
        };

        if !self.session_ready() {
            self.pre_queue.push_back(record);
            wiretap_log::info!("Request pre-queued (session not ready)");
            self.ensure_session();
            return;
        }

        self.touch_session();
        self.admit(record);
        self.process_queue(false);
    }

    fn handle_update_tags(&mut self, tags: HashMap<String, String>) {
        self.tags.extend(tags);
        wiretap_log::debug!("Tags updated: {:?}", self.tags);
    }

    fn handle_flush(&mut self, sender: Sender<()>) {
        if self.session_ready() && !self.is_suspended() {
            self.touch_session();
            self.process_queue(true);
        } else {
            wiretap_log::debug!("Flush ignored (session not ready)");
        }

        sender.send(());
    }

    fn handle_stop(&mut self) {
        let discarded = self.pre_queue.len() + self.queue.len();
        self.pre_queue.clear();
        self.queue.clear();
        self.watchdog.reset();
        self.watchdog_batch_id = None;

        if discarded > 0 {
            wiretap_log::debug!("{discarded} pending requests discarded on stop");
        }
    }

    fn handle_config_fetched(&mut self, result: Result<String, UpstreamError>) {
        self.refresh_in_flight = false;

        let raw = match result {
            Ok(raw) => raw,
            Err(error) => {
                wiretap_log::error!("Fetching ingest config failed: {}", LogError(&error));
                self.suspend_processing(FETCH_RETRY_INTERVAL_MS);
                return;
            }
        };

        match IngestConfig::from_json(&raw) {
            Ok(ingest) => {
                self.storage
                    .save_ingest_config(&raw, self.clock.wall_millis());
                wiretap_log::debug!("Ingest config downloaded and cached");
                self.start_session(&ingest);
            }
            Err(error) => {
                wiretap_log::error!("Invalid ingest config: {}", LogError(&error));
                self.suspend_processing(FETCH_RETRY_INTERVAL_MS);
            }
        }
    }

    fn handle_batch_finished(&mut self, batch_id: u32, result: Result<BatchReceipt, DeliveryError>) {
        match result {
            Ok(receipt) => wiretap_log::debug!(
                "Batch {batch_id} sent ({} requests). Response code {}",
                receipt.num_sent,
                receipt.status
            ),
            // The batch is gone. Records are delivered at most once.
            Err(error) => wiretap_log::error!(
                "Batch {batch_id} delivery failed: {}",
                LogError(&error)
            ),
        }
    }

    fn handle_watchdog(&mut self) {
        let Some(batch_id) = self.watchdog_batch_id.take() else {
            return;
        };

        if batch_id == self.next_batch_id {
            wiretap_log::debug!("Watcher {batch_id} timed out. Forcing a queue processing...");
            self.process_queue(true);
        } else {
            wiretap_log::debug!("Watcher {batch_id} timed out. Nothing to do here");
        }
    }

    /// Returns `true` while request processing is suspended.
    ///
    /// Clears the suspension once its deadline passes.
    fn is_suspended(&mut self) -> bool {
        match self.suspended_until {
            Some(until) if self.clock.boot_elapsed_millis() < until => true,
            Some(_) => {
                self.suspended_until = None;
                false
            }
            None => false,
        }
    }

    fn suspend_processing(&mut self, duration_ms: i64) {
        let duration_ms = duration_ms.max(0);
        self.suspended_until = Some(self.clock.boot_elapsed_millis() + duration_ms);

        let discarded = self.pre_queue.len() + self.queue.len();
        self.pre_queue.clear();
        self.queue.clear();
        self.watchdog.reset();
        self.watchdog_batch_id = None;

        wiretap_log::warn!(
            "Request processing is suspended temporarily for {} seconds",
            duration_ms / 1000
        );
        if discarded > 0 {
            wiretap_log::debug!("{discarded} pending requests discarded");
        }
    }

    /// Suspends processing for the remaining lifetime of the cached config.
    ///
    /// A session without tracking stays untracked until a new config download
    /// can dice a new session, so processing anything earlier is wasted work.
    fn suspend_tracking_disabled(&mut self) {
        let remaining = self
            .storage
            .load_ingest_config()
            .map(|cached| cached.downloaded_at + CONFIG_MAX_AGE_MS - self.clock.wall_millis())
            .unwrap_or(FETCH_RETRY_INTERVAL_MS);

        wiretap_log::info!("Tracking is disabled for this session");
        self.suspend_processing(remaining);
    }

    fn resolve_provider(&mut self, record: ObservedRequest) -> Option<ObservedRequest> {
        if !record.provider().is_empty() {
            return Some(record);
        }

        match self.providers.match_provider(record.url()) {
            Some(provider) => Some(record.with_provider(provider)),
            None => {
                wiretap_log::debug!("Request ignored. Unsupported destination: {}", record.url());
                None
            }
        }
    }

    fn session_ready(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.has_expired(&*self.clock))
    }

    fn touch_session(&mut self) {
        if let Some(session) = &mut self.session {
            if session.update_last_activity(&*self.clock) {
                self.storage.save_session(&session.to_record());
            }
        }
    }

    /// Makes sure a session exists, creating one from the cached config or
    /// triggering a download when the cache has expired.
    fn ensure_session(&mut self) {
        if self.refresh_in_flight {
            return;
        }

        if let Some(ingest) = self.load_valid_ingest_config() {
            self.start_session(&ingest);
            return;
        }

        self.trigger_refresh();
    }

    fn load_valid_ingest_config(&mut self) -> Option<IngestConfig> {
        let cached = self.storage.load_ingest_config()?;
        if self.clock.wall_millis() >= cached.downloaded_at + CONFIG_MAX_AGE_MS {
            return None;
        }

        match IngestConfig::from_json(&cached.raw) {
            Ok(ingest) => Some(ingest),
            Err(error) => {
                wiretap_log::warn!("Discarding unreadable cached config: {}", LogError(&error));
                self.storage.clear_ingest_config();
                None
            }
        }
    }

    fn trigger_refresh(&mut self) {
        self.refresh_in_flight = true;
        wiretap_log::debug!("Ingest config expired. Downloading...");

        let client = self.client.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch_ingest_config().await;
            events_tx.send(PipelineEvent::ConfigFetched(result)).ok();
        });
    }

    /// Starts a new session from an ingest config and replays the pre-queue.
    fn start_session(&mut self, ingest: &IngestConfig) {
        let environment = &self.config.environment;
        let rate = ingest.sampling_rate_for(environment);
        let tracking_enabled = ingest.should_enable_tracking(environment, &mut rand::thread_rng());

        let session = Session::new(
            rate,
            tracking_enabled,
            ingest.options.clone(),
            &*self.clock,
        );
        self.storage.save_session(&session.to_record());
        self.storage.save_tracking_enabled(tracking_enabled);

        wiretap_log::debug!(
            "Session initialized: id={} sampling_rate={rate} tracking_enabled={tracking_enabled}",
            session.session_id()
        );

        self.session = Some(session);

        if !tracking_enabled {
            self.suspend_tracking_disabled();
            return;
        }

        self.drain_pre_queue();
        self.emit_lifecycle_events();
        self.process_queue(true);
    }

    /// Replays requests captured before the session was ready.
    ///
    /// Records keep their submission order and their original capture
    /// timestamps.
    fn drain_pre_queue(&mut self) {
        if self.pre_queue.is_empty() {
            return;
        }

        wiretap_log::info!("Processing {} pre-queued requests...", self.pre_queue.len());
        while let Some(record) = self.pre_queue.pop_front() {
            self.admit(record);
        }
        wiretap_log::info!("Pre-queue processed");
    }

    /// Queues the lifecycle events a newly created session implies.
    ///
    /// `new-session` is sent for every new session, `new-dau` at most once a
    /// day, and `new-user` only on the very first run on this storage.
    fn emit_lifecycle_events(&mut self) {
        let mut events = vec!["new-session"];
        let now = self.clock.wall_millis();

        if self.storage.was_last_dau_sent_over_24h_ago(now) {
            events.push("new-dau");
            self.storage.save_last_dau_event_sent(now);
        }
        if self.storage.is_first_time_execution() {
            events.push("new-user");
            self.storage.save_first_time_execution(now);
        }

        for event in events {
            if let Ok(record) = self.lifecycle_record(event) {
                self.admit(record);
            }
        }
    }

    fn lifecycle_record(&self, event: &str) -> Result<ObservedRequest, crate::record::RecordError> {
        let payload = format!("{{\"event\":\"{event}\"}}");
        ObservedRequest::builder(self.config.tracks_url())
            .method("POST")
            .payload(payload.into_bytes())
            .provider(LIFECYCLE_PROVIDER)
            .created_at_ms(self.clock.boot_elapsed_millis())
            .finish()
    }

    /// Runs the sampling decision for a record and queues it if included.
    fn admit(&mut self, record: ObservedRequest) {
        let Some(session) = &self.session else {
            return;
        };

        let target = MatchTarget {
            provider: record.provider(),
            endpoint: record.url(),
            path: record.path(),
            payload: record.payload_text().unwrap_or(""),
        };
        let decision = session.evaluate(&target, &mut rand::thread_rng());

        match decision {
            SamplingDecision::Include {
                effective_rate,
                mode,
            } => {
                wiretap_log::trace!("Request queued: {}", record.url());
                self.queue.push_back(SampledRecord {
                    record,
                    effective_rate,
                    mode,
                });
            }
            SamplingDecision::Drop { reason } => {
                wiretap_log::info!("Request dropped (reason: {reason})");
            }
        }
    }

    /// Drains the queue into batches of up to [`MAX_BATCH_SIZE`] records.
    ///
    /// A trailing partial batch is only sent when `allow_partial` is set;
    /// otherwise it stays queued under a watchdog that forces it out after
    /// [`BATCH_TIMEOUT`].
    fn process_queue(&mut self, allow_partial: bool) {
        wiretap_log::trace!("Processing queue...");

        if self.queue.is_empty() {
            wiretap_log::debug!("Process queue ignored. Queue is empty");
            return;
        }

        let mut batches = self.queue.len() / MAX_BATCH_SIZE;
        if allow_partial && self.queue.len() % MAX_BATCH_SIZE > 0 {
            batches += 1;
        }

        for _ in 0..batches {
            let size = MAX_BATCH_SIZE.min(self.queue.len());
            let batch: Vec<_> = self.queue.drain(..size).collect();

            let batch_id = self.next_batch_id;
            self.cancel_watchdog(batch_id);

            if self.config.dry_run {
                wiretap_log::info!(
                    "Queue processed ({} requests). Dry run mode enabled. No batch scheduled",
                    batch.len()
                );
            } else {
                wiretap_log::info!(
                    "Queue processed ({} requests). Batch {batch_id} scheduled for sending",
                    batch.len()
                );
                self.spawn_delivery(batch_id, batch);
            }

            self.next_batch_id = (self.next_batch_id + 1) % BATCH_ID_MODULO;
        }

        if !self.queue.is_empty() {
            wiretap_log::trace!("Queue not full yet ({} requests)", self.queue.len());
            self.arm_watchdog();
        }
    }

    fn arm_watchdog(&mut self) {
        // An armed watchdog for the same batch slot keeps its deadline.
        if self.watchdog_batch_id == Some(self.next_batch_id) {
            return;
        }

        wiretap_log::trace!("Start watcher {}", self.next_batch_id);
        self.watchdog_batch_id = Some(self.next_batch_id);
        self.watchdog.set(BATCH_TIMEOUT);
    }

    fn cancel_watchdog(&mut self, batch_id: u32) {
        if self.watchdog_batch_id == Some(batch_id) {
            wiretap_log::trace!("Watcher {batch_id} stopped");
            self.watchdog_batch_id = None;
            self.watchdog.reset();
        }
    }

    fn spawn_delivery(&mut self, batch_id: u32, batch: Vec<SampledRecord>) {
        let Some(session) = &self.session else {
            return;
        };

        let session_id = session.session_id().to_owned();
        let client = self.client.clone();
        let config = self.config.clone();
        let tags = self.tags.clone();
        let events_tx = self.events_tx.clone();

        tokio::spawn(async move {
            let result = delivery::send_batch(&*client, &batch, &session_id, &config, &tags).await;
            events_tx
                .send(PipelineEvent::BatchFinished { batch_id, result })
                .ok();
        });
    }
}

impl Service for PipelineService {
    type Interface = RequestPipeline;

    fn spawn_handler(mut self, mut rx: Receiver<Self::Interface>) {
        tokio::spawn(async move {
            wiretap_log::info!("request pipeline started");

            loop {
                tokio::select! {
                    // Internal completions take priority over new submissions
                    // so session state is current before requests are routed.
                    biased;

                    Some(event) = self.events_rx.recv() => self.handle_event(event),
                    () = &mut self.watchdog => self.handle_watchdog(),
                    message = rx.recv() => match message {
                        Some(RequestPipeline::Stop) | None => {
                            self.handle_stop();
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    },
                }
            }

            wiretap_log::info!("request pipeline stopped");
        });
    }

    fn name() -> &'static str {
        "pipeline"
    }
}
