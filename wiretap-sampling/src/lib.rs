//! Ingest configuration and sampling for the Wiretap engine.
//!
//! Sampling follows a two-tier model. The first tier is decided once per
//! session: a dice roll with probability `1/sample_rate` fixes whether the
//! whole session is tracked. The second tier runs per request and only when
//! adaptive sampling is enabled: rules from the ingest config can raise the
//! effective rate of matching requests, rescuing them from sessions the first
//! tier excluded, with a conditional probability that keeps the overall rate
//! of matched requests at the rule's target.
//!
//! The root types are [`IngestConfig`] and [`evaluate`].

#![warn(missing_docs)]

mod config;
mod evaluation;
mod rule;

pub use config::*;
pub use evaluation::*;
pub use rule::*;
