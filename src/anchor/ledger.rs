// src/anchor/ledger.rs
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::ingest::FINGERPRINT_PREFIX;

/// Opaque proof that a payload was committed to the ledger.
pub type ReceiptId = String;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The ledger account cannot pay for another write.
    #[error("insufficient capacity: {0}")]
    InsufficientCapacity(String),
    /// Anything else: network, server error, malformed payload.
    #[error("ledger write failed: {0}")]
    TransientFailure(String),
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn commit_fingerprint(&self, hash: &str) -> Result<ReceiptId, LedgerError>;
    async fn commit_change_event(
        &self,
        prior_receipt: Option<&str>,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<ReceiptId, LedgerError>;
}

/// Strip the `sha256:` prefix; the ledger only ever sees the bare digest.
pub fn bare_digest(hash: &str) -> &str {
    hash.strip_prefix(FINGERPRINT_PREFIX).unwrap_or(hash)
}

#[derive(Debug, Serialize)]
struct FingerprintReq<'a> {
    hash: &'a str,
}

#[derive(Debug, Serialize)]
struct ChangeEventReq<'a> {
    prior_receipt_id: Option<&'a str>,
    old_hash: &'a str,
    new_hash: &'a str,
}

/// Tolerant response shape: either field name is accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommitResp {
    Receipt { receipt_id: String },
    Txid { txid: String },
}

impl CommitResp {
    fn into_receipt(self) -> ReceiptId {
        match self {
            CommitResp::Receipt { receipt_id } => receipt_id,
            CommitResp::Txid { txid } => txid,
        }
    }
}

/// JSON-over-HTTP client for a ledger commit service.
pub struct HttpLedger {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpLedger {
    pub fn new(endpoint: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building ledger http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn post<T: Serialize + Sync>(&self, path: &str, body: &T) -> Result<ReceiptId, LedgerError> {
        let mut req = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .json(body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LedgerError::TransientFailure(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| LedgerError::TransientFailure(e.to_string()))?;

        if !status.is_success() {
            return Err(classify_failure(status.as_u16(), &text));
        }

        serde_json::from_str::<CommitResp>(text.trim())
            .map(CommitResp::into_receipt)
            .map_err(|e| LedgerError::TransientFailure(format!("bad commit response: {e}")))
    }
}

/// 402, or any body mentioning insufficient funds, means the account is dry.
pub fn classify_failure(status: u16, body: &str) -> LedgerError {
    let lower = body.to_ascii_lowercase();
    if status == 402 || lower.contains("insufficient funds") || lower.contains("insufficient capacity")
    {
        LedgerError::InsufficientCapacity(format!("status {status}: {}", body.trim()))
    } else {
        LedgerError::TransientFailure(format!("status {status}: {}", body.trim()))
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn commit_fingerprint(&self, hash: &str) -> Result<ReceiptId, LedgerError> {
        self.post(
            "/fingerprints",
            &FingerprintReq {
                hash: bare_digest(hash),
            },
        )
        .await
    }

    async fn commit_change_event(
        &self,
        prior_receipt: Option<&str>,
        old_hash: &str,
        new_hash: &str,
    ) -> Result<ReceiptId, LedgerError> {
        self.post(
            "/change-events",
            &ChangeEventReq {
                prior_receipt_id: prior_receipt,
                old_hash: bare_digest(old_hash),
                new_hash: bare_digest(new_hash),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_prefix_is_stripped() {
        assert_eq!(bare_digest("sha256:abcd"), "abcd");
        assert_eq!(bare_digest("abcd"), "abcd");
    }

    #[test]
    fn funds_errors_are_capacity_failures() {
        assert!(matches!(
            classify_failure(402, ""),
            LedgerError::InsufficientCapacity(_)
        ));
        assert!(matches!(
            classify_failure(500, "Insufficient funds: need 1 more sat"),
            LedgerError::InsufficientCapacity(_)
        ));
        assert!(matches!(
            classify_failure(503, "upstream unavailable"),
            LedgerError::TransientFailure(_)
        ));
    }

    #[test]
    fn commit_response_accepts_both_shapes() {
        let a: CommitResp = serde_json::from_str(r#"{"receipt_id":"r1"}"#).unwrap();
        let b: CommitResp = serde_json::from_str(r#"{"txid":"t1"}"#).unwrap();
        assert_eq!(a.into_receipt(), "r1");
        assert_eq!(b.into_receipt(), "t1");
    }
}
