/// Error taxonomy for chain negotiation.
///
/// Protocol clients surface every failure to the orchestrator; nothing is
/// recovered inside a client. Credentials never appear in any `Display`
/// output.

use crate::report::ConnectionReport;
use std::fmt;
use thiserror::Error;

/// Which deadline fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutScope {
    Step,
    Total,
}

impl fmt::Display for TimeoutScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutScope::Step => write!(f, "step"),
            TimeoutScope::Total => write!(f, "total"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("proxy requires authentication but no credentials were provided")]
    AuthRequiredButNotProvided,

    #[error("proxy rejected the supplied credentials")]
    AuthFailed,

    #[error("no acceptable authentication methods")]
    NoAcceptableMethods,

    #[error("unexpected authentication method 0x{0:02X}")]
    UnexpectedAuthMethod(u8),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("connect rejected by proxy: {reason} (code {code})")]
    NegotiationRejected { code: u16, reason: String },

    #[error("address type not supported: {0}")]
    AddressTypeUnsupported(String),

    #[error("timed out ({scope} deadline)")]
    Timeout { scope: TimeoutScope },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the orchestrator may retry the current hop after this failure.
    ///
    /// Only connection-level and rejection-level failures qualify; everything
    /// else (auth, framing, timeouts) is terminal. The orchestrator further
    /// restricts retries to attempts that consumed no reply bytes.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connect { .. } | Error::Io(_) | Error::NegotiationRejected { .. }
        )
    }
}

/// Terminal failure of a whole `build_chain` call.
///
/// `failed_hop` is the 1-based hop whose negotiation failed (0 when the chain
/// descriptor was rejected before any I/O); `failed_step` is the index of the
/// step record carrying the error.
#[derive(Debug)]
pub struct ChainError {
    pub failed_hop: usize,
    pub failed_step: usize,
    pub error: Error,
    pub report: ConnectionReport,
}

impl fmt::Display for ChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.failed_hop == 0 {
            write!(f, "chain '{}' rejected: {}", self.report.chain_id, self.error)
        } else {
            write!(
                f,
                "chain '{}' failed at hop {} (step {}): {}",
                self.report.chain_id, self.failed_hop, self.failed_step, self.error
            )
        }
    }
}

impl std::error::Error for ChainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
