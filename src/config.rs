//! # Configuration
//!
//! Deadlines applied while a [`crate::peer::PeerSession`] is being constructed.
//!
//! Every construction step gets its own [`Deadline`]. A step without a bound
//! is spelled [`Deadline::None`] rather than a zero duration.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::peer::PeerError;

pub const DIAL_TIMEOUT: Duration = Duration::from_secs(3);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const BITFIELD_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long a single step may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Deadline {
    /// The step may block forever.
    #[default]
    None,
    After(Duration),
}

impl Deadline {
    pub fn limit(self) -> Option<Duration> {
        match self {
            Deadline::None => None,
            Deadline::After(limit) => Some(limit),
        }
    }

    /// Drives `fut` to completion, failing with [`PeerError::Timeout`] naming
    /// `step` if the deadline elapses first.
    pub async fn run<F, T>(self, step: &'static str, fut: F) -> Result<T, PeerError>
    where
        F: Future<Output = Result<T, PeerError>>,
    {
        match self {
            Deadline::None => fut.await,
            Deadline::After(limit) => timeout(limit, fut)
                .await
                .map_err(|_| PeerError::Timeout(step))?,
        }
    }
}

impl From<Duration> for Deadline {
    fn from(limit: Duration) -> Self {
        Deadline::After(limit)
    }
}

impl From<Option<Duration>> for Deadline {
    fn from(limit: Option<Duration>) -> Self {
        limit.map_or(Deadline::None, Deadline::After)
    }
}

/// Per-step deadlines used by [`crate::peer::PeerSession::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub dial: Deadline,
    pub handshake: Deadline,
    pub bitfield: Deadline,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dial: Deadline::After(DIAL_TIMEOUT),
            handshake: Deadline::After(HANDSHAKE_TIMEOUT),
            bitfield: Deadline::After(BITFIELD_TIMEOUT),
        }
    }
}

impl SessionConfig {
    pub fn with_dial(mut self, dial: impl Into<Deadline>) -> Self {
        self.dial = dial.into();
        self
    }

    pub fn with_handshake(mut self, handshake: impl Into<Deadline>) -> Self {
        self.handshake = handshake.into();
        self
    }

    pub fn with_bitfield(mut self, bitfield: impl Into<Deadline>) -> Self {
        self.bitfield = bitfield.into();
        self
    }
}
