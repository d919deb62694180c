//! Sibling discovery through the Kubernetes API.
//!
//! Lists the pods matching a label selector in this pod's own namespace and
//! resolves each running, addressable pod to an availability zone. Zones come
//! from the pod's node selector first, then from the labels of the node it
//! runs on. Node lookups are cached for the duration of one call only.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::models::PeerInfo;

/// Service account file holding the pod's namespace.
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Standard topology label.
pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

/// Pre-1.17 topology label.
pub const LEGACY_ZONE_LABEL: &str = "failure-domain.beta.kubernetes.io/zone";

/// Zone reported for peers whose zone cannot be determined.
pub const UNKNOWN_ZONE: &str = "unknown";

const RUNNING_PHASE: &str = "Running";

/// The slice of the Kubernetes API that discovery needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List pods in `namespace` matching `label_selector`.
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, DiscoveryError>;

    /// Fetch a cluster node by name.
    async fn get_node(&self, name: &str) -> Result<Node, DiscoveryError>;
}

/// [`ClusterApi`] backed by a live `kube` client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Pod>, DiscoveryError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(label_selector);
        Ok(pods.list(&lp).await?.items)
    }

    async fn get_node(&self, name: &str) -> Result<Node, DiscoveryError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        Ok(nodes.get(name).await?)
    }
}

/// Node name to zone, scoped to a single discovery call.
///
/// A `None` entry records a node that was looked up but carried no zone
/// label (or could not be fetched), so it is not looked up again.
#[derive(Debug, Default)]
struct ZoneLabelCache {
    zones: HashMap<String, Option<String>>,
}

impl ZoneLabelCache {
    fn get(&self, node_name: &str) -> Option<&Option<String>> {
        self.zones.get(node_name)
    }

    fn insert(&mut self, node_name: &str, zone: Option<String>) {
        self.zones.insert(node_name.to_string(), zone);
    }
}

/// Discovers sibling pods and their zones.
#[derive(Clone)]
pub struct DiscoveryClient {
    api: Arc<dyn ClusterApi>,
    namespace: String,
}

impl DiscoveryClient {
    pub fn new(api: Arc<dyn ClusterApi>, namespace: impl Into<String>) -> Self {
        Self {
            api,
            namespace: namespace.into(),
        }
    }

    /// Build a client from the in-cluster service account.
    pub async fn in_cluster() -> Result<Self, DiscoveryError> {
        let client = kube::Client::try_default().await?;
        let namespace = read_namespace(NAMESPACE_FILE).await?;
        info!(namespace = %namespace, "Discovery client connected to Kubernetes");
        Ok(Self::new(Arc::new(KubeClusterApi::new(client)), namespace))
    }

    /// List live, addressable peers matching `label_selector`.
    ///
    /// Fails only when the pod list call fails. A peer whose zone cannot be
    /// determined is reported with [`UNKNOWN_ZONE`].
    pub async fn discover(&self, label_selector: &str) -> Result<Vec<PeerInfo>, DiscoveryError> {
        let pods = self.api.list_pods(&self.namespace, label_selector).await?;
        let listed = pods.len();

        let mut cache = ZoneLabelCache::default();
        let mut peers = Vec::with_capacity(listed);

        for pod in &pods {
            let name = pod.metadata.name.clone().unwrap_or_default();
            let status = pod.status.as_ref();

            let phase = status
                .and_then(|s| s.phase.as_deref())
                .unwrap_or("Unknown");
            if phase != RUNNING_PHASE {
                debug!(pod = %name, phase = %phase, "Skipping non-running pod");
                continue;
            }

            let Some(address) = status
                .and_then(|s| s.pod_ip.clone())
                .filter(|ip| !ip.is_empty())
            else {
                debug!(pod = %name, "Skipping pod without IP");
                continue;
            };

            let zone = self.resolve_zone(&name, pod, &mut cache).await;
            peers.push(PeerInfo {
                name,
                address,
                zone,
            });
        }

        info!(
            selector = %label_selector,
            listed,
            peers = peers.len(),
            nodes_looked_up = cache.zones.len(),
            "Discovered peers"
        );

        Ok(peers)
    }

    async fn resolve_zone(&self, pod_name: &str, pod: &Pod, cache: &mut ZoneLabelCache) -> String {
        let spec = pod.spec.as_ref();

        if let Some(zone) = spec
            .and_then(|s| s.node_selector.as_ref())
            .and_then(zone_from_labels)
        {
            return zone.to_string();
        }

        let Some(node_name) = spec
            .and_then(|s| s.node_name.as_deref())
            .filter(|n| !n.is_empty())
        else {
            warn!(pod = %pod_name, "Pod has no zone selector and no node assigned, zone unknown");
            return UNKNOWN_ZONE.to_string();
        };

        let zone = if let Some(cached) = cache.get(node_name) {
            cached.clone()
        } else {
            let zone = match self.api.get_node(node_name).await {
                Ok(node) => node
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(zone_from_labels)
                    .map(ToString::to_string),
                Err(e) => {
                    warn!(node = %node_name, error = %e, "Failed to get node");
                    None
                }
            };
            cache.insert(node_name, zone.clone());
            zone
        };

        zone.unwrap_or_else(|| {
            warn!(
                pod = %pod_name,
                node = %node_name,
                "No zone label on pod or node, zone unknown"
            );
            UNKNOWN_ZONE.to_string()
        })
    }
}

/// Zone from the standard label, falling back to the legacy one.
fn zone_from_labels(labels: &BTreeMap<String, String>) -> Option<&str> {
    labels
        .get(ZONE_LABEL)
        .or_else(|| labels.get(LEGACY_ZONE_LABEL))
        .map(String::as_str)
}

/// Read and trim the namespace file.
pub async fn read_namespace(path: &str) -> Result<String, DiscoveryError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DiscoveryError::Namespace {
            path: path.to_string(),
            source,
        })?;
    Ok(raw.trim().to_string())
}
