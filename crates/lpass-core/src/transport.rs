//! Abstract HTTP transport (spec §1, §6). The wire client itself —
//! connection pooling, TLS, retries at the socket level — is an external
//! collaborator; the core only needs something that can make one `POST`
//! call and hand back a status code and body. This keeps C6/C7/C8
//! deterministic under test via [`test_support::ScriptedTransport`].

use crate::error::LpResult;

pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx other than 429 (rate limit) is not worth retrying.
    pub fn is_retryable_failure(&self) -> bool {
        self.status >= 500 || self.status == 429
    }
}

/// One `POST https://<server>/<endpoint>` call with form-encoded params
/// (spec §6). Implementations own the server host and auth headers.
pub trait Transport {
    fn post(&self, endpoint: &str, params: &[(&str, &str)]) -> LpResult<TransportResponse>;
}

pub mod endpoints {
    pub const ITERATIONS: &str = "iterations.php";
    pub const LOGIN: &str = "login.php";
    pub const LOGOUT: &str = "logout.php";
    pub const GET_ACCTS: &str = "getaccts.php";
    pub const SHOW_WEBSITE: &str = "show_website.php";
    pub const GET_ATTACH: &str = "getattach.php";
    pub const UPLOAD_ATTACH: &str = "uploadattach.php";
    pub const SHARE: &str = "share.php";
}
