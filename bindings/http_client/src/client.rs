use crate::response::HttpResponse;
use anyhow::Context;
use gust_instruments::metrics::{DATA_RECEIVED, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED};
use gust_instruments::{Reporter, Sample};
use reqwest::Method;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// How long a request may take, including reading the body, before it is recorded as failed.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// An HTTP client that records a sample for every request it makes.
///
/// Each request produces `http_reqs`, `http_req_duration` and `http_req_failed` samples, plus
/// `data_received` when the response had a body. Samples are tagged with the request `name`,
/// `method` and `status`. The name defaults to the request path. Give requests for URLs that
/// contain ids a shared name with [HttpClientInstrumented::get_named] so they are grouped.
///
/// Requests are never retried.
#[derive(Debug, Clone)]
pub struct HttpClientInstrumented {
    client: reqwest::Client,
    base_url: Url,
    reporter: Arc<Reporter>,
}

impl HttpClientInstrumented {
    pub fn new(base_url: Url, reporter: Arc<Reporter>) -> anyhow::Result<Self> {
        Self::with_timeout(base_url, reporter, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: Url,
        reporter: Arc<Reporter>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            reporter,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `GET` a path relative to the base URL, for example `/api/produk`.
    pub async fn get(&self, path: &str) -> HttpResponse {
        self.request(Method::GET, path, path).await
    }

    /// `GET` a path and tag its samples with `name` instead of the path.
    pub async fn get_named(&self, path: &str, name: &str) -> HttpResponse {
        self.request(Method::GET, path, name).await
    }

    /// Send a request without a body and read the whole response.
    ///
    /// The path is resolved against the base URL with the usual URL rules, so an absolute path
    /// replaces any path on the base URL.
    pub async fn request(&self, method: Method, path: &str, name: &str) -> HttpResponse {
        let response = match self.base_url.join(path) {
            Ok(url) => self.send(method.clone(), url).await,
            Err(e) => {
                HttpResponse::transport_error(format!("Invalid URL path {path}: {e}"), Duration::ZERO)
            }
        };

        if let Some(error) = response.error() {
            log::debug!("{} {} failed: {}", method, path, error);
        }
        self.record(&method, name, &response);

        response
    }

    async fn send(&self, method: Method, url: Url) -> HttpResponse {
        let started = Instant::now();
        let result = async {
            let response = self.client.request(method, url).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>((status, body.to_vec()))
        }
        .await;
        let duration = started.elapsed();

        match result {
            Ok((status, body)) => HttpResponse::new(status, body, duration),
            Err(e) => HttpResponse::transport_error(e.to_string(), duration),
        }
    }

    fn record(&self, method: &Method, name: &str, response: &HttpResponse) {
        let passed = response.is_expected_status();
        let status = response.status().to_string();
        let tags = [
            ("name", name),
            ("method", method.as_str()),
            ("status", status.as_str()),
        ];

        self.reporter.add_sample(
            Sample::counter(HTTP_REQS, 1.0)
                .with_tags(tags)
                .with_outcome(passed),
        );
        self.reporter.add_sample(
            Sample::trend_duration(HTTP_REQ_DURATION, response.duration())
                .with_tags(tags)
                .with_outcome(passed),
        );
        self.reporter.add_sample(
            Sample::rate(HTTP_REQ_FAILED, !passed)
                .with_tags(tags)
                .with_outcome(passed),
        );
        if !response.body().is_empty() {
            self.reporter.add_sample(
                Sample::counter(DATA_RECEIVED, response.body().len() as f64).with_tags(tags),
            );
        }
    }
}
