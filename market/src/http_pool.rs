use crate::config::HttpConfig;
use anyhow::{Context, Result};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, CONTENT_TYPE},
    Client, ClientBuilder,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Shared reqwest client bound to a base URL. Clones share the connection pool.
#[derive(Clone)]
pub struct HttpPool {
    client: Client,
    base: Url,
    metrics: Arc<HttpMetrics>,
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub json: Option<Value>,
    pub text: Option<String>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl HttpPool {
    pub fn new(cfg: &HttpConfig, base_url: &str, registry: &Registry) -> Result<Self> {
        let client = ClientBuilder::new()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .pool_max_idle_per_host(cfg.max_connections)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .connect_timeout(Duration::from_millis(cfg.timeout_ms))
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("build reqwest client")?;
        let base = Url::parse(base_url).with_context(|| format!("parse base url {}", base_url))?;
        Ok(Self {
            client,
            base,
            metrics: Arc::new(HttpMetrics::new(registry)),
        })
    }

    /// Same client and metrics, different base URL.
    pub fn with_base(&self, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("parse base url {}", base_url))?;
        Ok(Self {
            client: self.client.clone(),
            base,
            metrics: Arc::clone(&self.metrics),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn build_url(&self, path: &str) -> Result<Url> {
        if path.is_empty() {
            return Ok(self.base.clone());
        }
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).context("parse absolute url");
        }
        self.base.join(path).context("join url")
    }

    fn default_headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        h.insert(
            ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );
        h
    }

    pub async fn get(&self, path: &str, headers: Option<HeaderMap>) -> Result<HttpResponse> {
        let url = self.build_url(path)?;
        let mut h = self.default_headers();
        if let Some(extra) = headers {
            h.extend(extra);
        }
        let target = url.host_str().unwrap_or("").to_string();
        self.do_req("GET", &target, self.client.get(url).headers(h), None)
            .await
    }

    pub async fn post(
        &self,
        path: &str,
        headers: Option<HeaderMap>,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let url = self.build_url(path)?;
        let mut h = self.default_headers();
        h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(extra) = headers {
            h.extend(extra);
        }
        let target = url.host_str().unwrap_or("").to_string();
        self.do_req("POST", &target, self.client.post(url).headers(h), body)
            .await
    }

    async fn do_req(
        &self,
        method: &str,
        target: &str,
        builder: reqwest::RequestBuilder,
        body: Option<&Value>,
    ) -> Result<HttpResponse> {
        let start = Instant::now();
        self.metrics.inflight.with_label_values(&[method]).inc();
        self.metrics
            .req_total
            .with_label_values(&[method, target])
            .inc();
        let sent = match body {
            Some(v) => builder.json(v).send().await,
            None => builder.send().await,
        };
        let result = match sent {
            Ok(resp) => {
                let status = resp.status().as_u16();
                resp.bytes().await.map(|b| (status, b))
            }
            Err(err) => Err(err),
        };
        self.metrics.inflight.with_label_values(&[method]).dec();
        let (status, body_bytes) = match result {
            Ok(v) => v,
            Err(err) => {
                self.metrics
                    .fail_total
                    .with_label_values(&[method, target])
                    .inc();
                return Err(err).context("http send");
            }
        };
        let dur = start.elapsed().as_secs_f64();
        self.metrics
            .latency
            .with_label_values(&[method, target])
            .observe(dur);
        if status >= 400 {
            self.metrics
                .fail_total
                .with_label_values(&[method, target])
                .inc();
        }
        let dur_ms = (dur * 1000.0) as u64;
        tracing::debug!(target: "http", method=%method, host=%target, status=%status, latency_ms=%dur_ms, bytes=%body_bytes.len(), "HTTP request completed");
        Ok(Self::parse_body(status, &body_bytes))
    }

    fn parse_body(status: u16, bytes: &[u8]) -> HttpResponse {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(v) => HttpResponse {
                status,
                json: Some(v),
                text: None,
            },
            Err(_) => HttpResponse {
                status,
                json: None,
                text: Some(String::from_utf8_lossy(bytes).to_string()),
            },
        }
    }
}

struct HttpMetrics {
    req_total: IntCounterVec,
    fail_total: IntCounterVec,
    inflight: IntGaugeVec,
    latency: HistogramVec,
}

impl HttpMetrics {
    fn new(registry: &Registry) -> Self {
        let req_total = IntCounterVec::new(
            prometheus::Opts::new("http_requests_total", "HTTP requests total"),
            &["method", "host"],
        )
        .unwrap();
        let fail_total = IntCounterVec::new(
            prometheus::Opts::new("http_failures_total", "HTTP failures total"),
            &["method", "host"],
        )
        .unwrap();
        let inflight = IntGaugeVec::new(
            prometheus::Opts::new("http_inflight", "HTTP inflight requests"),
            &["method"],
        )
        .unwrap();
        let latency = HistogramVec::new(
            prometheus::HistogramOpts::new("http_latency_seconds", "HTTP request latency seconds")
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
            &["method", "host"],
        )
        .unwrap();
        registry.register(Box::new(req_total.clone())).ok();
        registry.register(Box::new(fail_total.clone())).ok();
        registry.register(Box::new(inflight.clone())).ok();
        registry.register(Box::new(latency.clone())).ok();
        Self {
            req_total,
            fail_total,
            inflight,
            latency,
        }
    }
}
