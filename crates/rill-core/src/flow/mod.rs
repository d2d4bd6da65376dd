//! # Flow Protocol
//!
//! The demand-driven subscription contract between sources and sinks.
//!
//! A sink subscribes to a source and receives an [`on_subscribe`] callback
//! carrying a [`Subscription`]. The sink then requests a bounded (or
//! unbounded) number of items; the source emits at most that many. Either
//! side may cancel. Completion and error are terminal, mutually exclusive,
//! and delivered at most once.
//!
//! ## Types
//!
//! - [`Source`] / [`Subscriber`] / [`Subscription`] — the protocol traits
//! - [`Demand`] / [`DemandChannel`] — atomic demand accounting
//! - [`EmitterSession`] — manual emission with explicit [`Emission`] outcomes
//!
//! [`on_subscribe`]: Subscriber::on_subscribe

mod demand;
mod session;
mod subscription;

#[cfg(test)]
pub(crate) mod testkit;

pub use demand::{validate_request, Demand, DemandChannel, TerminalGate, UNBOUNDED};
pub use session::{Emission, EmitterSession};
pub use subscription::{
    subscribe_empty, CancelledSubscription, DeferredSubscription, EmptySubscription, Source,
    Subscriber, Subscription,
};

use std::sync::Arc;

// ---------------------------------------------------------------------------
// FlowError
// ---------------------------------------------------------------------------

/// Terminal error signal carried through the flow protocol.
///
/// Cloneable so that terminal signals can be cached and replayed (the
/// recovery operator re-serves a converted error to late subscribers).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// A sink requested a non-positive amount of demand.
    #[error("request amount must be strictly positive, got {0}")]
    InvalidDemand(u64),

    /// A second terminal signal was attempted on the same channel.
    #[error("terminal signal already delivered")]
    DoubleTerminal,

    /// An emission was attempted with zero outstanding demand.
    #[error("emission attempted with zero outstanding demand")]
    Backpressure,

    /// A single-value source emitted more than one item.
    #[error("source emitted more than one item")]
    TooManyItems,

    /// A single-value source completed without emitting and no default
    /// was configured.
    #[error("source was empty")]
    NoSuchElement,

    /// A configured default-value supplier produced no value.
    #[error("default value supplier produced no value")]
    EmptyDefault,

    /// An application-level data error.
    #[error("{0}")]
    Message(Arc<str>),
}

impl FlowError {
    /// Creates an application-level data error from a message.
    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(Arc::from(msg.into().into_boxed_str()))
    }

    /// Returns `true` if this error is a protocol violation (as opposed to
    /// a data error raised by application logic).
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidDemand(_) | Self::DoubleTerminal | Self::Backpressure
        )
    }
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Programmer errors surfaced by [`EmitterSession`], distinct from data
/// errors travelling the flow protocol.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// `fail_with` was called on a session that already delivered its
    /// terminal error.
    #[error("session already failed")]
    AlreadyFailed,
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_error_display() {
        assert_eq!(
            FlowError::InvalidDemand(0).to_string(),
            "request amount must be strictly positive, got 0"
        );
        assert_eq!(FlowError::NoSuchElement.to_string(), "source was empty");
        assert_eq!(FlowError::message("boom").to_string(), "boom");
    }

    #[test]
    fn test_flow_error_classification() {
        assert!(FlowError::InvalidDemand(0).is_protocol_violation());
        assert!(FlowError::DoubleTerminal.is_protocol_violation());
        assert!(FlowError::Backpressure.is_protocol_violation());
        assert!(!FlowError::NoSuchElement.is_protocol_violation());
        assert!(!FlowError::message("boom").is_protocol_violation());
    }

    #[test]
    fn test_flow_error_clone_eq() {
        let err = FlowError::message("cache me");
        assert_eq!(err.clone(), err);
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(SessionError::AlreadyFailed.to_string(), "session already failed");
    }
}
