//! Time-series backend boundary.
//!
//! The aggregator only sees [`RawSample`]s. [`PrometheusSource`] issues one instant
//! query over a plain HTTP/1 connection and decodes the vector result into raw samples.

use std::collections::HashMap;

use http_body_util::BodyExt;
use hyper::header::{HeaderValue, ACCEPT, HOST};
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use rpcbench_core::config::SourceSettings;
use rpcbench_core::types::{MetricsError, MetricsResult, Url};
use serde::Deserialize;
use tokio::net::TcpStream;

const QUERY_ENDPOINT: &str = "/api/v1/query";

/// One untyped series value as returned by the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

impl RawSample {
    pub fn new<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>, value: f64) -> Self {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Self { labels, value }
    }
}

/// # Time Series Source
///
/// Evaluates `selector` at `timestamp` (unix seconds) and returns every matching series.
pub trait TimeSeriesSource {
    async fn query(&self, selector: &str, timestamp: u64) -> MetricsResult<Vec<RawSample>>;
}

/// # Prometheus Source
///
/// Prometheus compatible HTTP query API. Each query opens a fresh connection, the
/// aggregator issues exactly one query per collection.
pub struct PrometheusSource {
    url: Url,
}

impl PrometheusSource {
    /// Returns `None` for endpoints this client cannot talk to (TLS).
    pub fn new(settings: &SourceSettings) -> Option<Self> {
        if settings.url.0.scheme_str() == Some("https") {
            tracing::warn!(url = %settings.url, "https metrics sources are not supported");
            return None;
        }
        Some(Self {
            url: settings.url.clone(),
        })
    }

    fn request(&self, selector: &str, timestamp: u64) -> MetricsResult<Request<String>> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("query", selector)
            .append_pair("time", &timestamp.to_string())
            .finish();
        let path = format!("{}{QUERY_ENDPOINT}?{query}", self.url.base_path());
        let host = HeaderValue::from_str(&self.url.address())
            .map_err(|err| MetricsError::Query(err.to_string()))?;
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .header(HOST, host)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .body(String::new())
            .map_err(|err| MetricsError::Query(err.to_string()))
    }
}

impl TimeSeriesSource for PrometheusSource {
    async fn query(&self, selector: &str, timestamp: u64) -> MetricsResult<Vec<RawSample>> {
        let request = self.request(selector, timestamp)?;

        let stream = TcpStream::connect(self.url.address()).await?;
        stream.set_nodelay(true)?;
        let (mut sender, con) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(err) = con.await {
                tracing::debug!(%err, "metrics source connection closed");
            }
        });

        let response = sender.send_request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        if status != StatusCode::OK && body.is_empty() {
            return Err(MetricsError::Query(format!("unexpected status {status}")));
        }
        decode_response(&body).inspect_err(|err| {
            tracing::error!(%err, %status, "failed to decode metrics response");
        })
    }
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    result_type: String,
    result: Vec<VectorEntry>,
}

#[derive(Deserialize)]
struct VectorEntry {
    metric: HashMap<String, String>,
    /// `[<unix seconds>, "<value>"]`
    value: (f64, String),
}

/// Decodes an instant-query body. Shape violations are query errors, individual values
/// that are not finite numbers are dropped.
pub fn decode_response(body: &[u8]) -> MetricsResult<Vec<RawSample>> {
    let response: QueryResponse = json::from_slice(body)?;
    if response.status != "success" {
        let reason = response.error.unwrap_or_else(|| response.status.clone());
        return Err(MetricsError::Query(reason));
    }
    let data = response
        .data
        .ok_or_else(|| MetricsError::Query("response has no data".into()))?;
    if data.result_type != "vector" {
        return Err(MetricsError::Query(format!(
            "expected a vector result, got {}",
            data.result_type
        )));
    }
    let samples = data
        .result
        .into_iter()
        .filter_map(|entry| {
            let value = entry.value.1.parse::<f64>().ok().filter(|v| v.is_finite());
            if value.is_none() {
                tracing::trace!(raw = %entry.value.1, "dropping non-numeric sample value");
            }
            Some(RawSample {
                labels: entry.metric,
                value: value?,
            })
        })
        .collect();
    Ok(samples)
}
