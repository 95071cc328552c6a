//! Verdict delivery to the engine service
//!
//! Each verdict is signed with HMAC-SHA256 over the serialized payload and sent
//! as a PUT. Delivery is fire-and-forget: failures are logged, never retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::core::{ResultCode, Verdict};

type HmacSha256 = Hmac<Sha256>;

const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Signed fields of a verdict report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineData {
    pub submission_id: i64,
    pub problem_id: i64,
    pub verdict: ResultCode,
    pub execution_time: Option<f64>,
    pub execution_memory: Option<f64>,
    pub timestamp: i64,
}

/// Body of the PUT sent to the engine
#[derive(Debug, Clone, Serialize)]
pub struct EnginePayload {
    #[serde(rename = "payload")]
    pub data: EngineData,
    pub access_token: String,
}

impl EnginePayload {
    /// Build a signed payload. Returns `None` if the verdict lacks either id.
    pub fn new(verdict: &Verdict, secret: &str, timestamp: i64) -> Result<Option<Self>> {
        let (Some(submission_id), Some(problem_id)) = (verdict.submission_id, verdict.problem_id)
        else {
            return Ok(None);
        };

        let data = EngineData {
            submission_id,
            problem_id,
            verdict: verdict.result,
            execution_time: verdict.max_time,
            execution_memory: verdict.max_memory,
            timestamp,
        };
        let access_token = sign(&data, secret)?;

        Ok(Some(Self { data, access_token }))
    }
}

/// Hex HMAC-SHA256 of the JSON-serialized payload
pub fn sign(data: &EngineData, secret: &str) -> Result<String> {
    let message = serde_json::to_vec(data).context("Failed to serialize payload")?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid engine key: {}", e))?;
    mac.update(&message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Sink for final verdicts
pub trait Reporter: Send + Sync {
    /// Hand a verdict off for delivery. Must not block the caller.
    fn report(&self, verdict: &Verdict);
}

/// Reports verdicts to `{endpoint}/api/submissions`
pub struct EngineReporter {
    client: reqwest::Client,
    url: String,
    secret: Arc<str>,
}

impl EngineReporter {
    pub fn new(server_endpoint: &str, secret: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/api/submissions", server_endpoint.trim_end_matches('/')),
            secret: Arc::from(secret),
        })
    }

    async fn send(client: reqwest::Client, url: String, payload: EnginePayload) -> Result<()> {
        let response = client
            .put(&url)
            .json(&payload)
            .send()
            .await
            .context("Error sending PUT request")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("PUT request failed with status {}: {}", status, body);
        }

        info!(
            "Reported verdict {} for submission {} ({})",
            payload.data.verdict, payload.data.submission_id, status
        );
        Ok(())
    }
}

impl Reporter for EngineReporter {
    fn report(&self, verdict: &Verdict) {
        let timestamp = chrono::Utc::now().timestamp();
        let payload = match EnginePayload::new(verdict, &self.secret, timestamp) {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                warn!("Verdict without submission_id or problem_id, not reporting");
                return;
            }
            Err(e) => {
                error!("Error generating token: {:#}", e);
                return;
            }
        };

        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = Self::send(client, url, payload).await {
                error!("{:#}", e);
            }
        });
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(submission_id: Option<i64>, problem_id: Option<i64>) -> Verdict {
        Verdict {
            submission_id,
            problem_id,
            result: ResultCode::Ac,
            max_time: Some(0.25),
            max_memory: Some(2048.0),
        }
    }

    #[test]
    fn test_payload_serialization_shape() {
        let payload = EnginePayload::new(&verdict(Some(10), Some(20)), "secret", 1_700_000_000)
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["payload"]["submission_id"], 10);
        assert_eq!(json["payload"]["problem_id"], 20);
        assert_eq!(json["payload"]["verdict"], "ac");
        assert_eq!(json["payload"]["execution_time"], 0.25);
        assert_eq!(json["payload"]["timestamp"], 1_700_000_000i64);
        assert_eq!(json["access_token"].as_str().unwrap().len(), 64);
    }

    #[test]
    fn test_token_matches_manual_hmac() {
        let payload = EnginePayload::new(&verdict(Some(1), Some(2)), "k", 5)
            .unwrap()
            .unwrap();

        let message = serde_json::to_vec(&payload.data).unwrap();
        let mut mac = HmacSha256::new_from_slice(b"k").unwrap();
        mac.update(&message);
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(payload.access_token, expected);
    }

    #[test]
    fn test_token_depends_on_secret_and_fields() {
        let data = EnginePayload::new(&verdict(Some(1), Some(2)), "a", 5)
            .unwrap()
            .unwrap()
            .data;
        let mut changed = data.clone();
        changed.verdict = ResultCode::Wa;

        assert_ne!(sign(&data, "a").unwrap(), sign(&data, "b").unwrap());
        assert_ne!(sign(&data, "a").unwrap(), sign(&changed, "a").unwrap());
    }

    #[test]
    fn test_missing_ids_are_not_reported() {
        assert!(EnginePayload::new(&verdict(None, Some(2)), "k", 0)
            .unwrap()
            .is_none());
        assert!(EnginePayload::new(&verdict(Some(1), None), "k", 0)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_reporter_url() {
        let reporter = EngineReporter::new("http://engine.local/", "k").unwrap();
        assert_eq!(reporter.url, "http://engine.local/api/submissions");
    }
}
