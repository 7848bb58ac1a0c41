//! Error taxonomy shared across the vault engine.
//!
//! Every fallible core operation returns [`LpResult<T>`]. Variants match
//! the kinds in spec §7 one-to-one; callers (the CLI, the agent) map
//! these to exit codes and user-facing text rather than the core doing
//! it itself.

pub type LpResult<T> = Result<T, LpError>;

#[derive(Debug, thiserror::Error)]
pub enum LpError {
    /// Any failure in the cipher layer: wrong key, malformed framing,
    /// padding, RSA failure. Fatal to the containing operation; the blob
    /// parser downgrades this to a warning and skips one record.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Malformed chunk stream at blob-parse time. Fatal to the whole parse.
    #[error("malformed vault blob: {0}")]
    Blob(String),

    /// Transport failure, including HTTP status >= 400 after the
    /// transport's own retry budget. `rate_limited` is set on 429 so
    /// callers can recommend a wait per spec §7.
    #[error("network error ({status:?}): {message}")]
    Network {
        status: Option<u16>,
        message: String,
        rate_limited: bool,
    },

    /// Authentication rejected by the server: wrong password, unknown
    /// user, bad OTP. Not recoverable locally.
    #[error("login failed: {0}")]
    Login(String),

    /// Operation requires an authenticated session the client cannot
    /// produce.
    #[error("not logged in")]
    InvalidSession,

    /// Lookup returned zero or ambiguous results. `matches` carries the
    /// near-matches' `fullname`s in the ambiguous case.
    #[error("{message}")]
    NotFound { message: String, matches: Vec<String> },

    /// Persisted state corrupt or inaccessible.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LpError {
    pub fn decryption(msg: impl Into<String>) -> Self {
        LpError::Decryption(msg.into())
    }

    pub fn blob(msg: impl Into<String>) -> Self {
        LpError::Blob(msg.into())
    }

    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        let rate_limited = status == Some(429);
        LpError::Network { status, message, rate_limited }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        LpError::NotFound { message: message.into(), matches: Vec::new() }
    }

    pub fn ambiguous(query: &str, matches: Vec<String>) -> Self {
        LpError::NotFound {
            message: format!("multiple accounts match '{query}'"),
            matches,
        }
    }

    /// Process exit code per spec §6: 0 success (not represented here),
    /// 1 operational failure. 130 (interrupted) is the CLI's own concern,
    /// raised on SIGINT rather than surfaced from the core.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

/// Thin wrapper so the blob parser can report "skip one record" without
/// exposing `tracing` to every caller of the public API.
pub(crate) fn warn_skipped_record(context: &str, err: &LpError) {
    tracing::warn!(context, error = %err, "skipping undecryptable record");
}
