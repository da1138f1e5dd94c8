//! OTLP/JSON over HTTP transport.

use crate::exporter::{ExportError, ExportResult, Exporter};
use crate::otlp;
use crate::signal::{Batch, SignalKind};
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;

// Rejection bodies are logged; keep them short.
const MAX_ERROR_BODY: usize = 512;

/// Posts each batch to `{endpoint}/v1/{traces,metrics,logs}`.
///
/// Each request is bounded by the timeout given at construction, so a hung
/// collector shows up as [`ExportError::Timeout`] rather than a stuck task.
pub struct OtlpHttpExporter {
    kind: SignalKind,
    url: String,
    client: reqwest::Client,
    name: String,
}

impl OtlpHttpExporter {
    pub fn new(kind: SignalKind, endpoint: &str, timeout: Duration) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ExportError::Transport(e.to_string()))?;
        Ok(Self::with_client(kind, endpoint, client))
    }

    /// Uses a caller-supplied client; its timeout settings apply.
    pub fn with_client(kind: SignalKind, endpoint: &str, client: reqwest::Client) -> Self {
        let url = format!("{}{}", endpoint.trim_end_matches('/'), kind.export_path());
        Self {
            kind,
            url,
            client,
            name: format!("otlp-http-{}", kind),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn transport_error(err: reqwest::Error) -> ExportError {
    if err.is_timeout() {
        ExportError::Timeout
    } else {
        ExportError::Transport(err.to_string())
    }
}

impl Exporter for OtlpHttpExporter {
    async fn export(&self, batch: Batch) -> ExportResult {
        debug_assert_eq!(batch.kind(), self.kind);
        let body = otlp::encode(&batch)?;

        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(ExportError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_per_signal() {
        let exporter =
            OtlpHttpExporter::new(SignalKind::Metrics, "http://localhost:4318/", Duration::from_millis(500))
                .unwrap();
        assert_eq!(exporter.url(), "http://localhost:4318/v1/metrics");
        assert_eq!(Exporter::name(&exporter), "otlp-http-metrics");
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_transport_error() {
        // Port 9 (discard) is closed on test hosts; connection is refused quickly.
        let exporter =
            OtlpHttpExporter::new(SignalKind::Logs, "http://127.0.0.1:9", Duration::from_millis(500))
                .unwrap();
        let result = exporter.export(Batch::new(SignalKind::Logs, Vec::new())).await;

        assert!(matches!(
            result,
            Err(ExportError::Transport(_)) | Err(ExportError::Timeout)
        ));
    }
}
