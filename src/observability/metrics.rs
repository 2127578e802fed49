use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub flow_transitions_total: IntCounterVec,
    pub stale_events_total: IntCounter,
    pub actions_total: IntCounterVec,
    pub action_latency_seconds: HistogramVec,
    pub presence_online: IntGauge,
    pub channel_reconnects_total: IntCounter,
    pub location_updates_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let flow_transitions_total = IntCounterVec::new(
            Opts::new("flow_transitions_total", "Flow step changes by source"),
            &["source"],
        )
        .expect("valid flow_transitions_total metric");

        let stale_events_total = IntCounter::new(
            "stale_events_total",
            "Order updates dropped because they would regress the flow",
        )
        .expect("valid stale_events_total metric");

        let actions_total = IntCounterVec::new(
            Opts::new("actions_total", "Screen actions by action and outcome"),
            &["action", "outcome"],
        )
        .expect("valid actions_total metric");

        let action_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "action_latency_seconds",
                "Latency of backend calls made by screen actions",
            ),
            &["action"],
        )
        .expect("valid action_latency_seconds metric");

        let presence_online = IntGauge::new("presence_online", "1 while the rider is online")
            .expect("valid presence_online metric");

        let channel_reconnects_total = IntCounter::new(
            "channel_reconnects_total",
            "Real-time channel reconnect attempts",
        )
        .expect("valid channel_reconnects_total metric");

        let location_updates_total = IntCounter::new(
            "location_updates_total",
            "Location fixes sent over the real-time channel",
        )
        .expect("valid location_updates_total metric");

        registry
            .register(Box::new(flow_transitions_total.clone()))
            .expect("register flow_transitions_total");
        registry
            .register(Box::new(stale_events_total.clone()))
            .expect("register stale_events_total");
        registry
            .register(Box::new(actions_total.clone()))
            .expect("register actions_total");
        registry
            .register(Box::new(action_latency_seconds.clone()))
            .expect("register action_latency_seconds");
        registry
            .register(Box::new(presence_online.clone()))
            .expect("register presence_online");
        registry
            .register(Box::new(channel_reconnects_total.clone()))
            .expect("register channel_reconnects_total");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");

        Self {
            registry,
            flow_transitions_total,
            stale_events_total,
            actions_total,
            action_latency_seconds,
            presence_online,
            channel_reconnects_total,
            location_updates_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
