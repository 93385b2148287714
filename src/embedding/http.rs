//! External HTTP embedding provider.
//!
//! Generalizes the teacher's `OpenAIEmbedder` (a blocking façade over an
//! async client, hard-coded to `api.openai.com`) to an arbitrary
//! configurable OpenAI-compatible endpoint. Uses `reqwest::blocking`
//! directly rather than bridging an async client through a hand-rolled
//! runtime, since this crate has exactly one synchronous call site and no
//! other need for an async executor.
//!
//! A fresh addition not present in the teacher: an SSRF guard rejecting
//! endpoints that resolve to link-local/cloud-metadata addresses unless
//! explicitly allowed, since this provider's target host is now
//! caller-configurable rather than fixed. Loopback is deliberately
//! allowed through: pointing this provider at a local model runner (e.g.
//! Ollama on 127.0.0.1) is a legitimate deployment, not an SSRF vector.

#![cfg(feature = "http-embeddings")]

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::embedding::Embedder;
use crate::error::{MeshError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, dimensions: usize) -> Result<Self> {
        guard_against_ssrf(&endpoint)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MeshError::Embedding(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            model,
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let mut results = self.embed_batch(std::slice::from_ref(&text.to_string()))?;
        Ok(results.pop().flatten())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vec<f32>>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            input: texts,
            model: &self.model,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // Network failure or a malformed provider response degrades to
        // "no embedding for this batch" rather than propagating an error:
        // recall must still work via the keyword fallback when the
        // remote provider is unreachable.
        match request.send() {
            Ok(response) if response.status().is_success() => match response.json::<EmbeddingResponse>() {
                Ok(parsed) => Ok(parsed.data.into_iter().map(|d| Some(d.embedding)).collect()),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding provider returned an unparsable response");
                    Ok(texts.iter().map(|_| None).collect())
                }
            },
            Ok(response) => {
                tracing::warn!(status = %response.status(), "embedding provider returned a non-success status");
                Ok(texts.iter().map(|_| None).collect())
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding provider request failed");
                Ok(texts.iter().map(|_| None).collect())
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Reject endpoints that resolve to link-local or cloud metadata
/// addresses (e.g. 169.254.169.254), and warn (but allow) plain HTTP to
/// a non-localhost host. Loopback addresses are allowed.
fn guard_against_ssrf(endpoint: &str) -> Result<()> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| MeshError::Config(format!("invalid embedding endpoint '{endpoint}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| MeshError::Config(format!("embedding endpoint '{endpoint}' has no host")))?;

    if url.scheme() == "http" && host != "localhost" && host != "127.0.0.1" {
        tracing::warn!(endpoint = %endpoint, "embedding endpoint uses plain HTTP to a non-local host");
    }

    let port = url.port_or_known_default().unwrap_or(443);
    if let Ok(addrs) = (host, port).to_socket_addrs() {
        for addr in addrs {
            if is_disallowed(addr.ip()) {
                return Err(MeshError::Config(format!(
                    "embedding endpoint '{endpoint}' resolves to a disallowed address ({})",
                    addr.ip()
                )));
            }
        }
    }

    Ok(())
}

fn is_disallowed(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local() || v4 == Ipv4Addr::new(169, 254, 169, 254),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
