//! Foundational components for Wiretap's services.
//!
//! Services are the unit of concurrency in Wiretap: each service owns its
//! state exclusively and receives messages through a single-consumer mailbox.
//! Producers on arbitrary threads obtain an [`Addr`] and send messages into
//! the mailbox; a single task drains it sequentially, which makes all state
//! mutation inside the service effectively single-threaded without locks.
//!
//! To implement a service:
//!
//!  1. Declare an interface type (usually an enum of all accepted messages)
//!     and implement [`Interface`] for it.
//!  2. Implement [`FromMessage`] for every message the service accepts,
//!     choosing [`NoResponse`] for fire-and-forget messages and
//!     [`AsyncResponse`] for messages the caller awaits an answer to.
//!  3. Implement [`Service`] and drain the [`Receiver`] in
//!     [`spawn_handler`](Service::spawn_handler).

#![warn(missing_docs)]

mod service;

pub use service::*;
