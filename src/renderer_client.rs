//! Probes issued directly to a running renderer's HTTP interface (spec §6):
//! the vocabulary readiness probe and the graceful `EXIT` shutdown signal.
//!
//! Kept separate from the adapters because both the Scheduler Adapter
//! (`cancel`, when `graceful_exit` is set) and the Session Engine (readiness
//! polling in `query_status`) need it.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

/// Outcome of a vocabulary probe, matching the three-way split spec §4.5
/// drives the state machine on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocabularyProbe {
    /// HTTP 200 — renderer is ready.
    Ready,
    /// HTTP 404 — the job/process behind this endpoint is gone.
    Gone,
    /// Any other response, or a transport error — renderer is busy or
    /// momentarily unreachable; not a terminal signal (spec §7).
    Busy,
}

#[derive(Clone)]
pub struct RendererClient {
    client: Client,
    vocabulary_path: String,
}

impl RendererClient {
    #[must_use]
    pub fn new(request_timeout: Duration) -> Self {
        Self::with_vocabulary_path(request_timeout, "registry".to_string())
    }

    /// `vocabulary_path` is configurable (spec §6: "Readiness: `PUT
    /// http://<host>:<port>/registry` (configurable; referred to as
    /// *vocabulary*)").
    #[must_use]
    pub fn with_vocabulary_path(request_timeout: Duration, vocabulary_path: String) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            vocabulary_path,
        }
    }

    /// `PUT http://<host>:<port>/<vocabulary_path>` (spec §6).
    pub async fn request_vocabulary(&self, host: &str, port: u16) -> VocabularyProbe {
        let url = format!("http://{host}:{port}/{}", self.vocabulary_path);
        debug!(%url, "requesting vocabulary");
        match self.client.put(&url).send().await {
            Ok(resp) if resp.status().as_u16() == 200 => VocabularyProbe::Ready,
            Ok(resp) if resp.status().as_u16() == 404 => VocabularyProbe::Gone,
            Ok(resp) => {
                debug!(status = %resp.status(), "vocabulary probe returned non-ready status");
                VocabularyProbe::Busy
            }
            Err(e) => {
                debug!(error = %e, "vocabulary probe transport error");
                VocabularyProbe::Busy
            }
        }
    }

    /// `GET http://<host>:<port>/EXIT`. Network errors are ignored — the
    /// caller is about to cancel the job/process regardless (spec §4.3).
    pub async fn request_exit(&self, host: &str, port: u16) {
        let url = format!("http://{host}:{port}/EXIT");
        info!(%url, "requesting graceful exit");
        if let Err(e) = self.client.get(&url).send().await {
            debug!(error = %e, "graceful exit request failed, proceeding to cancel anyway");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_against_unreachable_host_is_busy_not_gone() {
        let client = RendererClient::new(Duration::from_millis(200));
        // Port 1 should refuse the connection immediately on any CI host.
        let probe = client.request_vocabulary("127.0.0.1", 1).await;
        assert_eq!(probe, VocabularyProbe::Busy);
    }

    #[tokio::test]
    async fn exit_against_unreachable_host_does_not_panic() {
        let client = RendererClient::new(Duration::from_millis(200));
        client.request_exit("127.0.0.1", 1).await;
    }
}
