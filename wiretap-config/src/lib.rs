//! Configuration for the Wiretap engine.
//!
//! The [`Config`] struct carries everything the host application provides at
//! initialization time: the tracking-plan identifier, environment, endpoint
//! overrides, custom domain mappings, initial tags, and behavior flags. It is
//! constructed through [`Config::builder`] and validated on
//! [`build`](ConfigBuilder::build).

#![warn(missing_docs)]

mod config;

pub use config::*;
