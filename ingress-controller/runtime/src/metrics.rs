use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time::Duration;

#[derive(Clone, Debug)]
pub struct ReconcileMetrics {
    syncs: Family<SyncLabels, Counter>,
    reloads: Counter,
    status_updates: Counter,
    sync_duration: Histogram,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SyncLabels {
    result: &'static str,
}

// === impl ReconcileMetrics ===

impl ReconcileMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let syncs = Family::default();
        reg.register("syncs", "Count of configuration syncs", syncs.clone());

        let reloads = Counter::default();
        reg.register(
            "reloads",
            "Count of syncs that changed the proxy configuration",
            reloads.clone(),
        );

        let status_updates = Counter::default();
        reg.register(
            "status_updates",
            "Count of ingress status writes",
            status_updates.clone(),
        );

        // Syncs rebuild the whole configuration and may wait on a proxy reload.
        let sync_duration = Histogram::new([0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]);
        reg.register_with_unit(
            "sync_duration",
            "Histogram of sync durations",
            Unit::Seconds,
            sync_duration.clone(),
        );

        Self {
            syncs,
            reloads,
            status_updates,
            sync_duration,
        }
    }

    pub(crate) fn sync(&self, ok: bool, elapsed: Duration) {
        let result = if ok { "ok" } else { "error" };
        self.syncs.get_or_create(&SyncLabels { result }).inc();
        self.sync_duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn reloaded(&self) {
        self.reloads.inc();
    }

    pub(crate) fn status_updated(&self, count: usize) {
        self.status_updates.inc_by(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_prefix() {
        let mut prom = Registry::default();
        let metrics = ReconcileMetrics::register(prom.sub_registry_with_prefix("ingress"));
        metrics.sync(true, Duration::from_millis(20));
        metrics.sync(false, Duration::from_millis(20));
        metrics.reloaded();
        metrics.status_updated(3);

        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &prom).unwrap();
        assert!(out.contains("ingress_syncs_total{result=\"ok\"} 1"), "{}", out);
        assert!(out.contains("ingress_syncs_total{result=\"error\"} 1"), "{}", out);
        assert!(out.contains("ingress_reloads_total 1"), "{}", out);
        assert!(out.contains("ingress_status_updates_total 3"), "{}", out);
        assert!(out.contains("ingress_sync_duration_seconds_count 2"), "{}", out);
    }
}
