use crate::SharedIndex;
use ahash::AHashMap as HashMap;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();
        let stores = this.stores();

        let rules = ConstGauge::new(stores.policy.len() as i64);
        rules.encode(encoder.encode_descriptor(
            "policy_rules",
            "The number of rules in the policy repository",
            None,
            MetricType::Gauge,
        )?)?;

        let revision = ConstGauge::new(stores.policy.revision() as i64);
        revision.encode(encoder.encode_descriptor(
            "policy_revision",
            "The current revision of the policy repository",
            None,
            MetricType::Gauge,
        )?)?;

        let endpoints = ConstGauge::new(stores.endpoints.len() as i64);
        endpoints.encode(encoder.encode_descriptor(
            "endpoints",
            "The number of endpoints managed by the agent",
            None,
            MetricType::Gauge,
        )?)?;

        let nodes = ConstGauge::new(stores.nodes.len() as i64);
        nodes.encode(encoder.encode_descriptor(
            "nodes",
            "The number of nodes in the node registry",
            None,
            MetricType::Gauge,
        )?)?;

        let ipcache = ConstGauge::new(stores.ipcache.len() as i64);
        ipcache.encode(encoder.encode_descriptor(
            "ipcache_entries",
            "The number of entries in the IP cache",
            None,
            MetricType::Gauge,
        )?)?;

        let namespaces = ConstGauge::new(this.namespace_labels.len() as i64);
        namespaces.encode(encoder.encode_descriptor(
            "namespace_index_size",
            "The number of namespaces in index",
            None,
            MetricType::Gauge,
        )?)?;

        let mut services_by_ns = HashMap::<&str, i64>::default();
        for (svc, _) in this.services() {
            *services_by_ns.entry(svc.namespace.as_str()).or_default() += 1;
        }
        let mut services_encoder = encoder.encode_descriptor(
            "service_index_size",
            "The number of services with tracked endpoints in index",
            None,
            MetricType::Gauge,
        )?;
        for (ns, count) in services_by_ns {
            let labels = [("namespace", ns)];
            let services = ConstGauge::new(count);
            let services_encoder = services_encoder.encode_family(&labels)?;
            services.encode(services_encoder)?;
        }

        Ok(())
    }
}
