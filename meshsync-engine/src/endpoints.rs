//! Endpoint derivation for synthetic service entries.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::push::Endpoint;

/// The subset of a service entry payload the narrow push path needs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceEntrySpec {
    pub hosts: Vec<String>,
    pub endpoints: Vec<WorkloadEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkloadEntry {
    pub address: String,
    /// Port name → port number.
    pub ports: BTreeMap<String, u32>,
    pub labels: BTreeMap<String, String>,
    pub network: String,
    pub locality: String,
    pub weight: u32,
}

impl ServiceEntrySpec {
    pub fn from_payload(payload: &Value) -> Result<Self, serde_json::Error> {
        ServiceEntrySpec::deserialize(payload)
    }
}

/// One [`Endpoint`] per (workload, port) pair, in payload order and port
/// name order.
pub fn convert_endpoints(spec: &ServiceEntrySpec, name: &str, namespace: &str) -> Vec<Endpoint> {
    let uid = format!("{name}.{namespace}");
    spec.endpoints
        .iter()
        .flat_map(|workload| {
            let uid = uid.clone();
            workload.ports.iter().map(move |(port_name, port)| Endpoint {
                address: workload.address.clone(),
                endpoint_port: *port,
                service_port_name: port_name.clone(),
                labels: workload.labels.clone(),
                uid: uid.clone(),
                network: workload.network.clone(),
                locality: workload.locality.clone(),
                lb_weight: workload.weight,
            })
        })
        .collect()
}

/// `name.namespace.svc.<domain_suffix>`
pub fn host_name(name: &str, namespace: &str, domain_suffix: &str) -> String {
    format!("{name}.{namespace}.svc.{domain_suffix}")
}
