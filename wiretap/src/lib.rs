//! Client-embedded telemetry interception engine.
//!
//! Wiretap runs inside an application and captures the analytics traffic the
//! application already sends to third-party destinations. Intercepted
//! requests are attributed to a destination provider, sampled per session,
//! queued, batched, and delivered to the tracks endpoint.
//!
//! # Path of a request through the engine
//!
//! 1. The host hands an [`ObservedRequest`] to [`Wiretap::submit`].
//! 2. The pipeline resolves the destination provider from the URL; requests
//!    to unsupported destinations are dropped here.
//! 3. While no session is ready, requests wait in a pre-queue. A session is
//!    created from the cached ingest config, or after a config download when
//!    the cache is older than a day. Pre-queued requests are replayed in
//!    order once the session exists.
//! 4. The session's sampling decision either drops the request or queues it
//!    with its effective rate.
//! 5. Full batches of 10 records are delivered immediately; a partial batch
//!    is forced out by a 30 second watchdog, by [`Wiretap::flush`], or
//!    stays behind on [`Wiretap::stop`].
//!
//! Failed deliveries are not retried, so a record is posted at most once.
//!
//! The engine owns a dedicated single-threaded runtime, so hosts without a
//! tokio runtime of their own can embed it. Logging is not initialized by
//! the engine; hosts install their own `tracing` subscriber or call
//! [`wiretap_log::init`].

#![warn(missing_docs)]

mod clock;
mod delivery;
mod encoder;
mod handle;
mod providers;
mod record;
mod service;
mod session;
mod upstream;
mod utils;

pub use wiretap_config::{Config, ConfigBuilder, ConfigError};

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::delivery::{BatchReceipt, DeliveryError};
pub use self::encoder::{EncodeError, SampledRecord};
pub use self::handle::{instance, register, submit, unregister, update_tags, InitError, Wiretap};
pub use self::providers::{default_providers, ProviderMatcher};
pub use self::record::{ObservedRequest, ObservedRequestBuilder, RecordError};
pub use self::service::{
    Flush, PipelineService, RequestPipeline, Stop, Submit, UpdateTags, MAX_BATCH_SIZE,
};
pub use self::session::Session;
pub use self::upstream::{ConfigClient, HttpConfigClient, UpstreamError};
