use std::io;
use thiserror::Error;

/// Per-event delivery failures.
///
/// These never escape [`DeliveryEngine::deliver`](crate::engine::DeliveryEngine::deliver);
/// they are classified into an [`Outcome`](crate::engine::Outcome) and
/// handed to the error sink.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("could not resolve {addr}")]
    Resolve { addr: String },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message of {len} bytes exceeds frame limit of {limit}")]
    MessageTooLarge { len: usize, limit: usize },

    #[error("remote application error: {0}")]
    Application(String),
}

impl DeliveryError {
    /// Errors raised before any bytes reached the collector.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            DeliveryError::Resolve { .. } | DeliveryError::Connect { .. } | DeliveryError::NotConnected
        )
    }

    /// Whether the connection must be dropped after this error.
    ///
    /// An oversized message is refused before anything is written, so the
    /// stream is still in step with the collector.
    pub fn closes_connection(&self) -> bool {
        !matches!(self, DeliveryError::MessageTooLarge { .. })
    }
}

/// An outcome code outside the known set.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid outcome code: {0}")]
pub struct UnknownOutcome(pub u8);
