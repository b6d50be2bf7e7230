use crate::{
    core::{node::DEFAULT_CLUSTER, LocalNode},
    index::{self, ClusterInfo, Index, Stores},
    k8s::{self, policy::CiliumNetworkPolicy, Resource},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::{runtime::watcher, Client};
use prometheus_client::registry::Registry;
use std::{net::Ipv6Addr, sync::Arc};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "policy-agent", about = "Reconciles cluster policy state on a node")]
pub struct Args {
    #[clap(
        long,
        default_value = "policy_agent=info,warn",
        env = "POLICY_AGENT_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The name of the cluster the agent runs in.
    #[clap(long, default_value = DEFAULT_CLUSTER, env = "POLICY_AGENT_CLUSTER_NAME")]
    cluster_name: String,

    /// Uniquely identifies the cluster within a mesh of clusters.
    #[clap(long, default_value = "0", env = "POLICY_AGENT_CLUSTER_ID")]
    cluster_id: u32,

    /// The name of the node the agent runs on.
    #[clap(long, env = "POLICY_AGENT_NODE_NAME")]
    node_name: String,

    /// The node's IPv6 address, used as the source of direct routes to other nodes.
    #[clap(long)]
    node_ipv6: Option<Ipv6Addr>,

    /// Installs direct IPv6 routes to nodes of other clusters.
    #[clap(long)]
    auto_ipv6_node_routes: bool,

    /// The device direct routes are installed on.
    #[clap(long)]
    device: Option<String>,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    fn cluster_info(&self) -> ClusterInfo {
        ClusterInfo {
            cluster_name: self.cluster_name.clone(),
            cluster_id: self.cluster_id,
            local: Arc::new(LocalNode {
                name: self.node_name.clone(),
                cluster: self.cluster_name.clone(),
                ipv6: self.node_ipv6,
                auto_ipv6_node_routes: self.auto_ipv6_node_routes,
                device: self.device.clone(),
            }),
        }
    }

    pub async fn run(self) -> Result<()> {
        let cluster_info = self.cluster_info();
        let Self {
            admin,
            client,
            log_level,
            log_format,
            ..
        } = self;

        // Build the index, which keeps the agent's stores consistent with the cluster.
        let stores = Stores::default();
        let index = Index::shared(cluster_info, stores);

        let mut prom = <Registry>::default();
        index::metrics::register(prom.sub_registry_with_prefix("policy_agent"), index.clone());
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Spawn resource watches.

        if api_resource_exists::<CiliumNetworkPolicy>(&runtime.client()).await {
            let cnps = runtime.watch_all::<CiliumNetworkPolicy>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(index.clone(), cnps)
                    .instrument(info_span!("ciliumnetworkpolicies")),
            );
        } else {
            tracing::warn!("ciliumnetworkpolicies.cilium.io resource kind not found, skipping watches");
        }

        let nps = runtime.watch_all::<k8s::NetworkPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), nps).instrument(info_span!("networkpolicies")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(kubert::index::namespaced(index.clone(), pods).instrument(info_span!("pods")));

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let nodes = runtime.watch_all::<k8s::Node>(watcher::Config::default());
        tokio::spawn(kubert::index::cluster(index, nodes).instrument(info_span!("nodes")));

        info!("Watching cluster resources");

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
