//! Cluster topology discovery.
//!
//! Lists the namespaces and ingress rules of a Kubernetes cluster and turns
//! them into probe targets. Discovery is deliberately thin: two typed GET
//! calls against the cluster API, authenticated either with the in-cluster
//! service account or with explicitly configured credentials.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::config::KubernetesConfig;
use crate::error::DiscoveryError;
use crate::HostnameTarget;

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const DISCOVERY_TIMEOUT_SECS: u64 = 10;

/// Source of the (hostname, ingress, namespace) triples configured in the
/// cluster.
///
/// Either listing call failing is fatal to the current collection pass.
pub trait TopologySource {
    fn namespaces(&self) -> Result<Vec<String>, DiscoveryError>;

    fn ingress_rules(&self, namespace: &str) -> Result<Vec<HostnameTarget>, DiscoveryError>;

    /// All probe targets currently configured, across every namespace.
    fn targets(&self) -> Result<Vec<HostnameTarget>, DiscoveryError> {
        let mut targets = Vec::new();
        for namespace in self.namespaces()? {
            targets.extend(self.ingress_rules(&namespace)?);
        }
        Ok(targets)
    }
}

/// Topology source backed by the Kubernetes REST API.
pub struct KubeTopology {
    base: Url,
    token: Option<String>,
    client: Client,
}

impl KubeTopology {
    /// Builds a topology source from the resolved configuration: explicit
    /// `api_server` credentials when present, the in-cluster service account
    /// otherwise.
    pub fn connect(config: Option<&KubernetesConfig>) -> Result<Self, DiscoveryError> {
        if let Some(kubernetes) = config {
            if let Some(api_server) = kubernetes.api_server.as_deref() {
                let token = match kubernetes.token_file.as_deref() {
                    Some(path) => Some(read_credential(path)?),
                    None => None,
                };
                return Self::new(
                    api_server,
                    token,
                    kubernetes.ca_cert_file.as_deref().map(Path::new),
                );
            }
        }
        Self::in_cluster()
    }

    /// Builds a topology source from the pod's service-account credentials.
    pub fn in_cluster() -> Result<Self, DiscoveryError> {
        let host = env::var("KUBERNETES_SERVICE_HOST").map_err(|_| DiscoveryError::MissingEnv {
            name: "KUBERNETES_SERVICE_HOST".to_string(),
        })?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());
        let api_server = format!("https://{}:{}", host, port);
        let token = read_credential(SERVICE_ACCOUNT_TOKEN)?;
        Self::new(&api_server, Some(token), Some(Path::new(SERVICE_ACCOUNT_CA)))
    }

    fn new(
        api_server: &str,
        token: Option<String>,
        ca_cert: Option<&Path>,
    ) -> Result<Self, DiscoveryError> {
        let base = Url::parse(api_server).map_err(|e| DiscoveryError::InvalidUrl {
            url: api_server.to_string(),
            source: e,
        })?;

        let mut builder = Client::builder().timeout(Duration::from_secs(DISCOVERY_TIMEOUT_SECS));
        match ca_cert {
            Some(path) => {
                let pem = fs::read(path).map_err(|e| DiscoveryError::Credentials {
                    path: path.display().to_string(),
                    source: e,
                })?;
                let certificate = reqwest::Certificate::from_pem(&pem).map_err(|e| {
                    DiscoveryError::Transport {
                        operation: format!("load cluster CA certificate {}", path.display()),
                        source: e,
                    }
                })?;
                builder = builder.add_root_certificate(certificate);
            }
            None => {
                warn!("no cluster CA certificate configured, accepting the API server certificate unverified");
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        let client = builder.build().map_err(|e| DiscoveryError::Transport {
            operation: "build cluster API client".to_string(),
            source: e,
        })?;

        Ok(KubeTopology {
            base,
            token,
            client,
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, operation: &str) -> Result<T, DiscoveryError> {
        let url = self.base.join(path).map_err(|e| DiscoveryError::InvalidUrl {
            url: format!("{}{}", self.base, path),
            source: e,
        })?;

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| DiscoveryError::Transport {
            operation: operation.to_string(),
            source: e,
        })?;
        let status = response.status();
        let body = response.text().map_err(|e| DiscoveryError::Transport {
            operation: operation.to_string(),
            source: e,
        })?;

        if !status.is_success() {
            return Err(DiscoveryError::Api {
                operation: operation.to_string(),
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| DiscoveryError::InvalidResponse {
            operation: operation.to_string(),
            source: e,
        })
    }
}

impl TopologySource for KubeTopology {
    fn namespaces(&self) -> Result<Vec<String>, DiscoveryError> {
        let list: NamespaceList = self.get("/api/v1/namespaces", "list namespaces")?;
        Ok(list
            .items
            .into_iter()
            .map(|namespace| namespace.metadata.name)
            .collect())
    }

    fn ingress_rules(&self, namespace: &str) -> Result<Vec<HostnameTarget>, DiscoveryError> {
        let path = format!("/apis/networking.k8s.io/v1/namespaces/{}/ingresses", namespace);
        let operation = format!("list ingress resources in namespace {}", namespace);
        let list: IngressList = self.get(&path, &operation)?;
        Ok(targets_from_ingresses(list, namespace))
    }
}

fn read_credential(path: &str) -> Result<String, DiscoveryError> {
    let token = fs::read_to_string(path).map_err(|e| DiscoveryError::Credentials {
        path: path.to_string(),
        source: e,
    })?;
    Ok(token.trim().to_string())
}

fn targets_from_ingresses(list: IngressList, namespace: &str) -> Vec<HostnameTarget> {
    let mut targets = Vec::new();
    for ingress in list.items {
        for rule in ingress.spec.rules {
            match rule.host {
                Some(host) if !host.is_empty() => targets.push(HostnameTarget {
                    hostname: host,
                    ingress_name: ingress.metadata.name.clone(),
                    namespace: namespace.to_string(),
                }),
                _ => debug!(
                    "ingress {}/{} has a rule without a host, skipping",
                    namespace, ingress.metadata.name
                ),
            }
        }
    }
    targets
}

#[derive(Debug, Deserialize)]
struct NamespaceList {
    #[serde(default)]
    items: Vec<Namespace>,
}

#[derive(Debug, Deserialize)]
struct Namespace {
    #[serde(default)]
    metadata: ObjectMeta,
}

#[derive(Debug, Default, Deserialize)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct IngressList {
    #[serde(default)]
    items: Vec<Ingress>,
}

#[derive(Debug, Deserialize)]
struct Ingress {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: IngressSpec,
}

#[derive(Debug, Default, Deserialize)]
struct IngressSpec {
    #[serde(default)]
    rules: Vec<IngressRule>,
}

#[derive(Debug, Deserialize)]
struct IngressRule {
    host: Option<String>,
}
