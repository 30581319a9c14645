//! # Cloud Transcription Client
//!
//! Talks to an upload-then-poll transcription API:
//!
//! 1. `POST {base}/upload` with the raw WAV bytes → `{"upload_url"}`
//! 2. `POST {base}/transcript` with `{"audio_url", "language_code"}` → `{"id", "status"}`
//! 3. `GET {base}/transcript/{id}` until `status` is `completed` or `error`
//!
//! Every request carries the API key in the `authorization` header. Any non-2xx
//! response, network failure, `error` job status, or exhausted poll budget becomes a
//! `SessionError::Transcription`.

use crate::config::TranscriptionConfig;
use crate::error::SessionError;
use crate::transcription::{Transcriber, Transcript};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client as HttpClient, Response};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct UploadResponse {
    upload_url: String,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    audio_url: &'a str,
    language_code: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum JobStatus {
    Queued,
    Processing,
    Completed,
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct TranscriptJob {
    id: String,
    status: JobStatus,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Upload + poll client for the cloud transcription API.
pub struct CloudTranscriber {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
    language_code: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

impl CloudTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty()),
            language_code: config.language_code.clone(),
            poll_interval: config.poll_interval(),
            max_poll_attempts: config.max_poll_attempts,
        })
    }

    fn api_key(&self) -> Result<&str, SessionError> {
        self.api_key.as_deref().ok_or_else(|| {
            SessionError::ConfigurationMissing("transcription API key is not set".to_string())
        })
    }

    async fn upload(&self, api_key: &str, wav: Vec<u8>) -> Result<String, SessionError> {
        let response = self
            .http
            .post(format!("{}/upload", self.base_url))
            .header(header::AUTHORIZATION, api_key)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(wav)
            .send()
            .await?;

        let upload: UploadResponse = ensure_success(response, "upload").await?.json().await?;
        Ok(upload.upload_url)
    }

    async fn submit(&self, api_key: &str, audio_url: &str) -> Result<TranscriptJob, SessionError> {
        let response = self
            .http
            .post(format!("{}/transcript", self.base_url))
            .header(header::AUTHORIZATION, api_key)
            .json(&SubmitRequest {
                audio_url,
                language_code: &self.language_code,
            })
            .send()
            .await?;

        Ok(ensure_success(response, "submit").await?.json().await?)
    }

    async fn fetch(&self, api_key: &str, job_id: &str) -> Result<TranscriptJob, SessionError> {
        let response = self
            .http
            .get(format!("{}/transcript/{}", self.base_url, job_id))
            .header(header::AUTHORIZATION, api_key)
            .send()
            .await?;

        Ok(ensure_success(response, "poll").await?.json().await?)
    }

    /// Poll until the job leaves the queued/processing states.
    async fn wait_for(&self, api_key: &str, mut job: TranscriptJob) -> Result<Transcript, SessionError> {
        let mut attempts = 0;
        loop {
            match job.status {
                JobStatus::Completed => {
                    return Ok(Transcript {
                        text: job.text.unwrap_or_default(),
                        confidence: job.confidence.unwrap_or(0.0),
                    });
                }
                JobStatus::Error => {
                    return Err(SessionError::Transcription(format!(
                        "job {} failed: {}",
                        job.id,
                        job.error.unwrap_or_else(|| "no error message".to_string())
                    )));
                }
                JobStatus::Queued | JobStatus::Processing | JobStatus::Unknown => {}
            }

            if attempts >= self.max_poll_attempts {
                return Err(SessionError::Transcription(format!(
                    "job {} still {:?} after {} polls",
                    job.id, job.status, attempts
                )));
            }
            attempts += 1;

            tokio::time::sleep(self.poll_interval).await;
            job = self.fetch(api_key, &job.id).await?;
        }
    }
}

#[async_trait]
impl Transcriber for CloudTranscriber {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<Transcript, SessionError> {
        let api_key = self.api_key()?;
        let started = Instant::now();
        let wav_bytes = wav.len();

        let audio_url = self.upload(api_key, wav).await?;
        debug!(wav_bytes, "Uploaded audio for transcription");

        let job = self.submit(api_key, &audio_url).await?;
        let job_id = job.id.clone();
        debug!(job_id = %job_id, "Submitted transcription job");

        let transcript = self.wait_for(api_key, job).await?;
        info!(
            job_id = %job_id,
            chars = transcript.text.len(),
            duration_ms = %started.elapsed().as_millis(),
            "Transcription job completed"
        );
        Ok(transcript)
    }
}

/// Turn a non-2xx response into a transcription error that carries the body.
async fn ensure_success(response: Response, step: &str) -> Result<Response, SessionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SessionError::Transcription(format!(
        "{} request returned {}: {}",
        step, status, body
    )))
}
