//! HTTP transfers behind a trait so the prober can be driven by fakes.

use super::trial::StreamSample;
use super::Direction;
use crate::error::ProbeError;
use async_trait::async_trait;
use futures::StreamExt as _;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Size of each chunk handed to the upload body stream.
const UPLOAD_CHUNK_BYTES: u64 = 64 * 1024;

/// One transfer stream.
///
/// Implementations move `total_bytes`, start the timer once `warmup_bytes`
/// have gone through, and never run past `budget`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn download(
        &self,
        url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        budget: Duration,
    ) -> Result<StreamSample, ProbeError>;

    async fn upload(
        &self,
        url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        budget: Duration,
    ) -> Result<StreamSample, ProbeError>;
}

/// Build the request URL for an endpoint template.
///
/// `{bytes}` is substituted wherever it appears. Download endpoints without
/// the placeholder get a `bytes=N` query parameter instead.
pub fn endpoint_url(template: &str, bytes: u64, direction: Direction) -> Result<String, ProbeError> {
    if template.contains("{bytes}") {
        return Ok(template.replace("{bytes}", &bytes.to_string()));
    }
    let mut url = reqwest::Url::parse(template)
        .map_err(|_| ProbeError::InvalidEndpoint(template.to_string()))?;
    if direction == Direction::Download {
        url.query_pairs_mut()
            .append_pair("bytes", &bytes.to_string());
    }
    Ok(url.into())
}

/// Transport backed by a pooled reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("netgauge/", env!("CARGO_PKG_VERSION")))
            .no_gzip()
            .build()
            .map_err(|e| ProbeError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client })
    }

    /// Create a transport with custom HTTP client (for testing).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(
        &self,
        url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        let budget_ms = budget.as_millis() as u64;
        let deadline = Instant::now() + budget;

        let mut response = tokio::time::timeout(budget, self.client.get(url).send())
            .await
            .map_err(|_| ProbeError::Timeout(budget_ms))?
            .map_err(|e| ProbeError::from_reqwest(e, budget_ms))?;

        if !response.status().is_success() {
            return Err(ProbeError::HttpError(response.status().as_u16()));
        }

        let mut received: u64 = 0;
        // (timer start, bytes received before it)
        let mut timer = (warmup_bytes == 0).then(|| (Instant::now(), 0));

        while received < total_bytes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, response.chunk()).await {
                // Budget ran out mid-body; the timed part so far still counts
                Err(_) => break,
                Ok(Ok(None)) => break,
                Ok(Ok(Some(chunk))) => {
                    received += chunk.len() as u64;
                    if timer.is_none() && received >= warmup_bytes {
                        timer = Some((Instant::now(), received));
                    }
                }
                Ok(Err(e)) if timer.is_none() => {
                    return Err(ProbeError::from_reqwest(e, budget_ms));
                }
                Ok(Err(e)) => {
                    tracing::debug!(url, error = %e, "Download stream broke after warm-up");
                    break;
                }
            }
        }

        let finished = Instant::now();
        match timer {
            Some((started, offset)) => Ok(StreamSample {
                bytes: received - offset,
                started,
                finished,
            }),
            None => Err(ProbeError::BelowFloor {
                bytes: 0,
                duration_ms: 0,
            }),
        }
    }

    async fn upload(
        &self,
        url: &str,
        total_bytes: u64,
        warmup_bytes: u64,
        budget: Duration,
    ) -> Result<StreamSample, ProbeError> {
        let budget_ms = budget.as_millis() as u64;

        // Set when the first chunk past the warm-up prefix is handed to the body
        let marker: Arc<Mutex<Option<(Instant, u64)>>> = Arc::new(Mutex::new(None));
        let body_marker = Arc::clone(&marker);
        // Bytes handed to the body so far
        let pulled = Arc::new(AtomicU64::new(0));
        let body_pulled = Arc::clone(&pulled);

        let chunk_count = total_bytes.div_ceil(UPLOAD_CHUNK_BYTES);
        let mut offset: u64 = 0;
        let chunks = futures::stream::iter(0..chunk_count).map(move |_| {
            let len = UPLOAD_CHUNK_BYTES.min(total_bytes - offset);
            if offset >= warmup_bytes {
                if let Ok(mut guard) = body_marker.lock() {
                    guard.get_or_insert((Instant::now(), offset));
                }
            }
            offset += len;
            body_pulled.store(offset, Ordering::Release);
            Ok::<Vec<u8>, std::io::Error>(vec![0u8; len as usize])
        });

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, total_bytes)
            .body(reqwest::Body::wrap_stream(chunks))
            .send();

        let outcome = tokio::time::timeout(budget, request).await;
        let finished = Instant::now();
        let timer = marker.lock().ok().and_then(|guard| *guard);

        let response = match outcome {
            Ok(sent) => sent.map_err(|e| ProbeError::from_reqwest(e, budget_ms))?,
            // Budget ran out mid-body; the timed part so far still counts
            Err(_) => {
                return match timer {
                    Some((started, offset)) => {
                        let bytes = pulled.load(Ordering::Acquire).saturating_sub(offset);
                        tracing::debug!(url, bytes, "Upload stopped at budget");
                        Ok(StreamSample {
                            bytes,
                            started,
                            finished,
                        })
                    }
                    None => Err(ProbeError::Timeout(budget_ms)),
                };
            }
        };

        if !response.status().is_success() {
            return Err(ProbeError::HttpError(response.status().as_u16()));
        }

        match timer {
            Some((started, offset)) => Ok(StreamSample {
                bytes: total_bytes - offset,
                started,
                finished,
            }),
            None => Err(ProbeError::BelowFloor {
                bytes: 0,
                duration_ms: 0,
            }),
        }
    }
}
