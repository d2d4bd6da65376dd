//! # Rill Core
//!
//! A demand-driven, in-process data-flow engine.
//!
//! This crate provides:
//! - **Flow protocol**: backpressured push streams (`request(n)`/`cancel`)
//!   with atomic demand accounting
//! - **Operators**: race-selection, single-value extraction, merge,
//!   windowed collection, recovery, timeout
//! - **Registry**: selector-based routing with a tiered lookup cache
//! - **Event bus**: keyed notify/send dispatch over the registry
//!
//! ## Design Principles
//!
//! 1. **No global lock** — per-object atomic state transitions (CAS winner
//!    slots, demand counters, cancellation flags)
//! 2. **At most one terminal signal** — completion and error are mutually
//!    exclusive and final, everywhere
//! 3. **Non-blocking by default** — the only blocking operation is the
//!    manual emission session's cooperative `submit`
//!
//! ## Example
//!
//! ```rust,ignore
//! use rill_core::source::IterSource;
//! use rill_core::operator::Single;
//!
//! let single = Single::new(Arc::new(IterSource::new(vec![42])));
//! single.subscribe(sink);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bus;
pub mod dispatch;
pub mod fault;
pub mod flow;
pub mod operator;
pub mod registry;
pub mod source;

// Re-export key types
pub use flow::{FlowError, SessionError, Source, Subscriber, Subscription};

/// Result type for rill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for rill-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Flow protocol errors.
    #[error("flow error: {0}")]
    Flow(#[from] flow::FlowError),

    /// Manual emission session errors.
    #[error("session error: {0}")]
    Session(#[from] flow::SessionError),
}
