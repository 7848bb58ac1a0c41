//! Real-world [`Transport`] over the hosted vault's HTTPS endpoints.
//! `lpass-core` stays decoupled from any particular HTTP stack; this is
//! the one concrete implementation the CLI wires in (tests instead use
//! `lpass_core::transport::test_support::ScriptedTransport`).

use lpass_core::{LpError, LpResult, Transport, TransportResponse};

pub struct HttpTransport {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> LpResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| LpError::network(None, format!("could not build HTTP client: {e}")))?;
        Ok(HttpTransport { base_url: base_url.into(), client })
    }
}

impl Transport for HttpTransport {
    fn post(&self, endpoint: &str, params: &[(&str, &str)]) -> LpResult<TransportResponse> {
        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .form(params)
            .send()
            .map_err(|e| LpError::network(None, format!("{endpoint} request failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(|e| LpError::network(Some(status), format!("reading response body: {e}")))?.to_vec();
        Ok(TransportResponse { status, body })
    }
}
