/// Prometheus metrics for deploy runs
use once_cell::sync::Lazy;
use prometheus::{register_histogram, register_int_counter_vec, Histogram, IntCounterVec};

static UPLOADS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "site_deploy_uploads_total",
        "Total number of asset uploads by result",
        &["result"]
    )
    .expect("Failed to register uploads metric")
});

static INVALIDATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "site_deploy_invalidations_total",
        "Total number of edge invalidations by outcome",
        &["result"]
    )
    .expect("Failed to register invalidations metric")
});

static DEPLOY_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "site_deploy_duration_seconds",
        "Wall time of a deploy from lock to report"
    )
    .expect("Failed to register deploy duration metric")
});

pub struct DeployMetrics;

impl DeployMetrics {
    pub fn record_upload(result: &str) {
        UPLOADS.with_label_values(&[result]).inc();
    }

    pub fn record_invalidation(result: &str) {
        INVALIDATIONS.with_label_values(&[result]).inc();
    }

    pub fn record_duration(duration_secs: f64) {
        DEPLOY_DURATION.observe(duration_secs);
    }
}
