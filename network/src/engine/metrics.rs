use prometheus_client::{metrics::counter::Counter, registry::Registry};

/// Frame counters of an engine.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// Frames handed to the engine by its medium.
    pub received: Counter,
    /// Envelopes delivered to the engine's transport.
    pub delivered: Counter,
    /// Envelopes relayed to a neighbor.
    pub forwarded: Counter,
    /// Frames discarded without delivery or relay.
    pub dropped: Counter,
}

impl Metrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "received",
            "Number of frames received from the medium",
            self.received.clone(),
        );
        registry.register(
            "delivered",
            "Number of envelopes delivered to the transport",
            self.delivered.clone(),
        );
        registry.register(
            "forwarded",
            "Number of envelopes relayed to a neighbor",
            self.forwarded.clone(),
        );
        registry.register(
            "dropped",
            "Number of frames discarded",
            self.dropped.clone(),
        );
    }
}
