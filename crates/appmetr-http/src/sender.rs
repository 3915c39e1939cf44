use crate::response::parse_upload_response;
use appmetr::{BatchSender, Clock, SendError, SystemClock};
use log::{debug, warn};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_METHOD_NAME: &str = "server.trackS2S";

/// Posts deflated batches to the tracking endpoint.
///
/// Network errors, non-200 statuses and unexpected bodies are transient (`Ok(false)`).
/// Only a URL that cannot be parsed is reported as an error.
pub struct HttpBatchSender {
    client: Client,
    method_name: String,
    clock: Arc<dyn Clock>,
}

impl HttpBatchSender {
    pub fn new() -> Result<Self, SendError> {
        Self::with_timeouts(DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
    }

    pub fn with_timeouts(connect_timeout: Duration, read_timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(read_timeout)
            .build()
            .map_err(|e| SendError::ClientBuild {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            method_name: DEFAULT_METHOD_NAME.to_string(),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_method_name(mut self, method_name: impl Into<String>) -> Self {
        self.method_name = method_name.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// `{url}?method=..&token=..&timestamp=..`
    pub fn endpoint(&self, url: &str, token: &str) -> Result<reqwest::Url, SendError> {
        let timestamp = self.clock.now_millis().to_string();
        reqwest::Url::parse_with_params(
            url,
            &[
                ("method", self.method_name.as_str()),
                ("token", token),
                ("timestamp", timestamp.as_str()),
            ],
        )
        .map_err(|e| SendError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

impl BatchSender for HttpBatchSender {
    #[tracing::instrument(level = "debug", skip(self, token, batch), fields(bytes = batch.len()))]
    fn send(&self, url: &str, token: &str, batch: &[u8]) -> Result<bool, SendError> {
        let endpoint = self.endpoint(url, token)?;

        let response = match self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(batch.to_vec())
            .send()
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Request to {url} failed: {e}");
                return Ok(false);
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!("Status code error {status} from {url}");
            return Ok(false);
        }

        let body = match response.text() {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read response from {url}: {e}");
                return Ok(false);
            }
        };

        let accepted = parse_upload_response(&body).is_accepted();
        debug!("Sent {} bytes to {url}, accepted: {accepted}", batch.len());
        Ok(accepted)
    }
}
