use prometheus::{
    Counter, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub shipments_created_total: IntCounter,
    pub assignments_total: IntCounterVec,
    pub assignment_latency_seconds: HistogramVec,
    pub dispatch_queue_depth: IntGauge,
    pub deliveries_verified_total: IntCounterVec,
    pub payouts_total: IntCounterVec,
    pub earnings_net_credited: Counter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let shipments_created_total =
            IntCounter::new("shipments_created_total", "Total shipments created")
                .expect("valid shipments_created_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Total assignments by source and outcome"),
            &["source", "outcome"],
        )
        .expect("valid assignments_total metric");

        let assignment_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "assignment_latency_seconds",
                "Latency of assignment processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid assignment_latency_seconds metric");

        let dispatch_queue_depth = IntGauge::new(
            "dispatch_queue_depth",
            "Current number of shipments waiting for automatic dispatch",
        )
        .expect("valid dispatch_queue_depth metric");

        let deliveries_verified_total = IntCounterVec::new(
            Opts::new("deliveries_verified_total", "OTP verifications by outcome"),
            &["outcome"],
        )
        .expect("valid deliveries_verified_total metric");

        let payouts_total = IntCounterVec::new(
            Opts::new("payouts_total", "Payout requests and settlements by outcome"),
            &["outcome"],
        )
        .expect("valid payouts_total metric");

        let earnings_net_credited = Counter::new(
            "earnings_net_credited",
            "Sum of net earnings credited to drivers",
        )
        .expect("valid earnings_net_credited metric");

        registry
            .register(Box::new(shipments_created_total.clone()))
            .expect("register shipments_created_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(assignment_latency_seconds.clone()))
            .expect("register assignment_latency_seconds");
        registry
            .register(Box::new(dispatch_queue_depth.clone()))
            .expect("register dispatch_queue_depth");
        registry
            .register(Box::new(deliveries_verified_total.clone()))
            .expect("register deliveries_verified_total");
        registry
            .register(Box::new(payouts_total.clone()))
            .expect("register payouts_total");
        registry
            .register(Box::new(earnings_net_credited.clone()))
            .expect("register earnings_net_credited");

        Self {
            registry,
            shipments_created_total,
            assignments_total,
            assignment_latency_seconds,
            dispatch_queue_depth,
            deliveries_verified_total,
            payouts_total,
            earnings_net_credited,
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
