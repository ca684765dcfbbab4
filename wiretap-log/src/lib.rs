//! Logging facade for Wiretap.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The
//! configuration implements `serde` traits, so it can be embedded into the
//! host's configuration files.
//!
//! ```
//! let config = wiretap_log::LogConfig {
//!     enable_backtraces: true,
//!     ..Default::default()
//! };
//!
//! wiretap_log::init(&config);
//! ```
//!
//! # Logging
//!
//! The basic use is through the five macros re-exported from `tracing`:
//! [`error!`], [`warn!`], [`info!`], [`debug!`] and [`trace!`].
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer
//! short and precise log messages over verbose text. Choose the log level
//! according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior.
//! - [`warn!`] for undesirable behavior.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`]
//! that should be called at the beginning of the test. It routes output to
//! the writer registered by the Rust test runner and only captures logs from
//! the calling crate.
//!
//! ```ignore
//! #[test]
//! fn test_something() {
//!     wiretap_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
mod test;
#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal tracing facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
