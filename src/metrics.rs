use std::time::Duration;

use prometheus::{
    opts, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct AppMetrics {
    registry: Registry,
    request_total: IntCounterVec,
    request_duration_seconds: HistogramVec,
    inflight_requests: IntGauge,
    backend_errors_total: IntCounterVec,
    stream_chunks_total: IntCounterVec,
    malformed_stream_lines_total: IntCounter,
}

pub struct InflightGuard<'a> {
    metrics: &'a AppMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let request_total = IntCounterVec::new(
            opts!(
                "proxy_http_requests_total",
                "Total HTTP requests processed by the proxy"
            ),
            &["path", "method", "status", "stream"],
        )
        .expect("valid request_total metric");

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "proxy_http_request_duration_seconds",
                "Time until response headers were ready, in seconds",
            ),
            &["path", "method", "stream"],
        )
        .expect("valid request_duration_seconds metric");

        let inflight_requests = IntGauge::new(
            "proxy_inflight_requests",
            "Requests currently being handled by the proxy",
        )
        .expect("valid inflight_requests metric");

        let backend_errors_total = IntCounterVec::new(
            opts!(
                "proxy_backend_errors_total",
                "Backend failures by stage and kind"
            ),
            &["stage", "kind"],
        )
        .expect("valid backend_errors_total metric");

        let stream_chunks_total = IntCounterVec::new(
            opts!(
                "proxy_stream_chunks_total",
                "Chunks written to streaming responses"
            ),
            &["flavor", "kind"],
        )
        .expect("valid stream_chunks_total metric");

        let malformed_stream_lines_total = IntCounter::new(
            "proxy_malformed_stream_lines_total",
            "Backend stream lines skipped because they were not valid JSON",
        )
        .expect("valid malformed_stream_lines_total metric");

        registry
            .register(Box::new(request_total.clone()))
            .expect("register request_total");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("register request_duration_seconds");
        registry
            .register(Box::new(inflight_requests.clone()))
            .expect("register inflight_requests");
        registry
            .register(Box::new(backend_errors_total.clone()))
            .expect("register backend_errors_total");
        registry
            .register(Box::new(stream_chunks_total.clone()))
            .expect("register stream_chunks_total");
        registry
            .register(Box::new(malformed_stream_lines_total.clone()))
            .expect("register malformed_stream_lines_total");

        Self {
            registry,
            request_total,
            request_duration_seconds,
            inflight_requests,
            backend_errors_total,
            stream_chunks_total,
            malformed_stream_lines_total,
        }
    }

    pub fn inflight_guard(&self) -> InflightGuard<'_> {
        self.inflight_requests.inc();
        InflightGuard { metrics: self }
    }

    pub fn observe_request(
        &self,
        path: &str,
        method: &str,
        stream: bool,
        status: u16,
        duration: Duration,
    ) {
        let stream_label = if stream { "true" } else { "false" };
        let status_label = status.to_string();
        self.request_total
            .with_label_values(&[path, method, &status_label, stream_label])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[path, method, stream_label])
            .observe(duration.as_secs_f64());
    }

    pub fn observe_backend_error(&self, stage: &str, kind: &str) {
        self.backend_errors_total
            .with_label_values(&[stage, kind])
            .inc();
    }

    pub fn observe_stream_chunk(&self, flavor: &str, kind: &str) {
        self.stream_chunks_total
            .with_label_values(&[flavor, kind])
            .inc();
    }

    pub fn observe_malformed_lines(&self, count: u64) {
        self.malformed_stream_lines_total.inc_by(count);
    }

    pub fn render(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|error| error.to_string())?;
        String::from_utf8(buffer).map_err(|error| error.to_string())
    }
}

impl Default for AppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.inflight_requests.dec();
    }
}
