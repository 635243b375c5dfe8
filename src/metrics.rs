/// Metrics and telemetry for the vehicle portal
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Login outcomes and lockouts
/// - Owner resolution and vehicle access decisions
/// - Session lifecycle
/// - Background job execution

use lazy_static::lazy_static;
use std::time::Instant;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder, HistogramVec,
    IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    /// Process start, for uptime reporting
    static ref START_TIME: Instant = Instant::now();

    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .expect("http_requests_total registers once");

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .expect("http_request_duration_seconds registers once");

    // ========== Authentication Metrics ==========

    /// Login attempts by outcome
    pub static ref LOGIN_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portal_login_attempts_total",
        "Login attempts by outcome",
        &["outcome"]
    )
    .expect("portal_login_attempts_total registers once");

    /// Lockouts started
    pub static ref LOCKOUTS_TOTAL: IntCounter = register_int_counter!(
        "portal_lockouts_total",
        "Identifiers locked out after repeated failures"
    )
    .expect("portal_lockouts_total registers once");

    /// Session lifecycle transitions
    pub static ref SESSION_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portal_session_events_total",
        "Session lifecycle transitions",
        &["event"]
    )
    .expect("portal_session_events_total registers once");

    /// Security events by kind
    pub static ref SECURITY_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portal_security_events_total",
        "Recorded security events by kind",
        &["kind"]
    )
    .expect("portal_security_events_total registers once");

    // ========== Access Metrics ==========

    /// Owner resolution results by matching rule
    pub static ref OWNER_RESOLUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portal_owner_resolutions_total",
        "Owner resolution results by matching rule",
        &["rule"]
    )
    .expect("portal_owner_resolutions_total registers once");

    /// Vehicle access decisions
    pub static ref VEHICLE_ACCESS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "portal_vehicle_access_total",
        "Vehicle access decisions",
        &["decision"]
    )
    .expect("portal_vehicle_access_total registers once");

    // ========== Background Job Metrics ==========

    /// Background job executions by job type and status
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "background_jobs_total",
        "Total number of background job executions",
        &["job_type", "status"]
    )
    .expect("background_jobs_total registers once");
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Seconds since metrics were first touched
pub fn uptime_seconds() -> f64 {
    START_TIME.elapsed().as_secs_f64()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Record a login attempt outcome
pub fn record_login(outcome: &str) {
    LOGIN_ATTEMPTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record the start of a lockout
pub fn record_lockout() {
    LOCKOUTS_TOTAL.inc();
}

/// Record a session lifecycle transition
pub fn record_session_event(event: &str) {
    SESSION_EVENTS_TOTAL.with_label_values(&[event]).inc();
}

/// Record a persisted security event
pub fn record_security_event(kind: &str) {
    SECURITY_EVENTS_TOTAL.with_label_values(&[kind]).inc();
}

/// Record which rule linked an account to an owner ("unlinked" when none did)
pub fn record_owner_resolution(rule: &str) {
    OWNER_RESOLUTIONS_TOTAL.with_label_values(&[rule]).inc();
}

/// Record a vehicle access decision
pub fn record_vehicle_access(decision: &str) {
    VEHICLE_ACCESS_TOTAL.with_label_values(&[decision]).inc();
}

/// Record a background job execution
pub fn record_background_job(job_type: &str, status: &str) {
    BACKGROUND_JOBS_TOTAL
        .with_label_values(&[job_type, status])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_http_request() {
        record_http_request("GET", "/vehicles/:id", 200, 0.05);
        let metrics = render_metrics();
        assert!(metrics.contains("http_requests_total"));
        assert!(metrics.contains("http_request_duration_seconds"));
    }

    #[test]
    fn test_record_auth_metrics() {
        record_login("success");
        record_lockout();
        record_session_event("started");
        let metrics = render_metrics();
        assert!(metrics.contains("portal_login_attempts_total"));
        assert!(metrics.contains("portal_lockouts_total"));
        assert!(metrics.contains("portal_session_events_total"));
    }

    #[test]
    fn test_record_access_metrics() {
        record_owner_resolution("email");
        record_vehicle_access("denied");
        let metrics = render_metrics();
        assert!(metrics.contains("portal_owner_resolutions_total"));
        assert!(metrics.contains("portal_vehicle_access_total"));
    }

    #[test]
    fn test_record_background_job() {
        record_background_job("session_cleanup", "success");
        let metrics = render_metrics();
        assert!(metrics.contains("background_jobs_total"));
    }
}
