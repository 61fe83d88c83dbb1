use lazy_static::lazy_static;
use prometheus::{
    Counter, Encoder, GaugeVec, Histogram, IntCounterVec, TextEncoder, register_counter,
    register_gauge_vec, register_histogram, register_int_counter_vec,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: Counter =
        register_counter!("subgate_requests_total", "Total number of requests").unwrap();
    pub static ref RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "subgate_responses_total",
        "Responses by terminal outcome",
        &["outcome"]
    )
    .unwrap();
    pub static ref BANS_TOTAL: Counter =
        register_counter!("subgate_bans_total", "Total bans issued for auth failures").unwrap();
    pub static ref REQUEST_LATENCY: Histogram = register_histogram!(
        "subgate_request_latency_seconds",
        "Request latency in seconds"
    )
    .unwrap();
    pub static ref LIMITER_RECORDS: GaugeVec = register_gauge_vec!(
        "subgate_limiter_records",
        "Records held by each limiter after the last sweep",
        &["limiter"]
    )
    .unwrap();
}

// Text exposition of everything in the default registry
pub fn gather() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
