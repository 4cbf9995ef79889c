//! Full-vs-narrow push decision for synthetic service entries.
//!
//! Two annotations act as version fingerprints:
//!
//! - [`SERVICE_VERSION_ANNOTATION`] changes when anything about the service
//!   other than its endpoint list changed. A change needs a full push.
//! - [`ENDPOINTS_VERSION_ANNOTATION`] changes when only endpoints changed. A
//!   change alone is served by a narrow endpoint push.
//!
//! A missing annotation reads as the empty string.

use std::collections::BTreeSet;
use std::sync::Arc;

use meshsync_core::ConfigRecord;

use crate::endpoints::{convert_endpoints, host_name, ServiceEntrySpec};
use crate::push::{EndpointUpdate, FullPush, PushSignal};

pub const SERVICE_VERSION_ANNOTATION: &str = "networking.alpha.istio.io/serviceVersion";
pub const ENDPOINTS_VERSION_ANNOTATION: &str = "networking.alpha.istio.io/endpointsVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushClass {
    Full,
    Narrow,
    None,
}

pub fn classify(previous: Option<&ConfigRecord>, next: &ConfigRecord) -> PushClass {
    let Some(previous) = previous else {
        return PushClass::Full;
    };
    if previous.annotation(SERVICE_VERSION_ANNOTATION) != next.annotation(SERVICE_VERSION_ANNOTATION) {
        return PushClass::Full;
    }
    if previous.annotation(ENDPOINTS_VERSION_ANNOTATION)
        != next.annotation(ENDPOINTS_VERSION_ANNOTATION)
    {
        return PushClass::Narrow;
    }
    PushClass::None
}

/// Accumulated push decision for one batch.
#[derive(Debug, Default)]
pub struct PushPlan {
    full_namespaces: BTreeSet<String>,
    full: bool,
    narrow: Vec<Arc<ConfigRecord>>,
}

impl PushPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, class: PushClass, record: &Arc<ConfigRecord>) {
        match class {
            PushClass::Full => self.mark_full(&record.namespace),
            PushClass::Narrow => self.narrow.push(Arc::clone(record)),
            PushClass::None => {}
        }
    }

    pub fn mark_full(&mut self, namespace: &str) {
        self.full = true;
        self.full_namespaces.insert(namespace.to_string());
    }

    pub fn is_empty(&self) -> bool {
        !self.full && self.narrow.is_empty()
    }

    /// One full signal if anything needed a full push, otherwise one narrow
    /// signal per endpoint-only change.
    pub fn into_signals(self, type_name: &str, cluster_id: &str, domain_suffix: &str) -> Vec<PushSignal> {
        if self.full {
            return vec![PushSignal::Full(FullPush {
                collections: BTreeSet::from([type_name.to_string()]),
                namespaces: self.full_namespaces,
            })];
        }
        self.narrow
            .iter()
            .map(|record| {
                let endpoints = match ServiceEntrySpec::from_payload(&record.spec) {
                    Ok(spec) => convert_endpoints(&spec, &record.name, &record.namespace),
                    Err(e) => {
                        tracing::warn!(
                            namespace = %record.namespace,
                            name = %record.name,
                            error = %e,
                            "cannot derive endpoints; sending empty endpoint list"
                        );
                        vec![]
                    }
                };
                PushSignal::Narrow(EndpointUpdate {
                    cluster_id: cluster_id.to_string(),
                    hostname: host_name(&record.name, &record.namespace, domain_suffix),
                    namespace: record.namespace.clone(),
                    endpoints,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::record;
    use rstest::rstest;
    use serde_json::json;

    fn annotated(service: Option<&str>, endpoints: Option<&str>) -> ConfigRecord {
        let mut r = (*record("synthetic-service-entry", "ns", "svc", "1")).clone();
        if let Some(v) = service {
            r.annotations.insert(SERVICE_VERSION_ANNOTATION.into(), v.into());
        }
        if let Some(v) = endpoints {
            r.annotations.insert(ENDPOINTS_VERSION_ANNOTATION.into(), v.into());
        }
        r
    }

    #[rstest]
    #[case(Some("v1"), Some("e1"), Some("v1"), Some("e2"), PushClass::Narrow)]
    #[case(Some("v1"), Some("e1"), Some("v2"), Some("e1"), PushClass::Full)]
    #[case(Some("v1"), Some("e1"), Some("v2"), Some("e2"), PushClass::Full)]
    #[case(Some("v1"), Some("e1"), Some("v1"), Some("e1"), PushClass::None)]
    #[case(None, None, None, None, PushClass::None)]
    #[case(None, Some("e1"), None, None, PushClass::Narrow)]
    #[case(Some("v1"), None, None, None, PushClass::Full)]
    fn classification(
        #[case] old_svc: Option<&str>,
        #[case] old_ep: Option<&str>,
        #[case] new_svc: Option<&str>,
        #[case] new_ep: Option<&str>,
        #[case] expected: PushClass,
    ) {
        let prev = annotated(old_svc, old_ep);
        let next = annotated(new_svc, new_ep);
        assert_eq!(classify(Some(&prev), &next), expected);
    }

    #[test]
    fn first_sighting_is_full() {
        assert_eq!(classify(None, &annotated(Some("v1"), Some("e1"))), PushClass::Full);
    }

    #[test]
    fn full_wins_over_narrow() {
        let mut plan = PushPlan::new();
        plan.record(PushClass::Narrow, &record("synthetic-service-entry", "a", "x", "1"));
        plan.record(PushClass::Full, &record("synthetic-service-entry", "b", "y", "1"));
        plan.mark_full("c");

        let signals = plan.into_signals("synthetic-service-entry", "Kubernetes", "cluster.local");
        assert_eq!(signals.len(), 1);
        let PushSignal::Full(full) = &signals[0] else {
            panic!("expected full push");
        };
        assert_eq!(
            full.namespaces.iter().cloned().collect::<Vec<_>>(),
            vec!["b".to_string(), "c".to_string()]
        );
        assert!(full.collections.contains("synthetic-service-entry"));
    }

    #[test]
    fn narrow_signals_carry_endpoints() {
        let mut r = (*record("synthetic-service-entry", "ns", "svc", "1")).clone();
        r.spec = json!({"hosts": ["svc"], "endpoints": [{"address": "1.1.1.1", "ports": {"http": 80}}]});
        let mut plan = PushPlan::new();
        plan.record(PushClass::Narrow, &Arc::new(r));

        let signals = plan.into_signals("synthetic-service-entry", "east", "cluster.local");
        assert_eq!(
            signals,
            vec![PushSignal::Narrow(EndpointUpdate {
                cluster_id: "east".into(),
                hostname: "svc.ns.svc.cluster.local".into(),
                namespace: "ns".into(),
                endpoints: vec![crate::push::Endpoint {
                    address: "1.1.1.1".into(),
                    endpoint_port: 80,
                    service_port_name: "http".into(),
                    uid: "svc.ns".into(),
                    ..Default::default()
                }],
            })]
        );
    }

    #[test]
    fn empty_plan_sends_nothing() {
        let plan = PushPlan::new();
        assert!(plan.is_empty());
        assert!(plan.into_signals("t", "c", "d").is_empty());
    }
}
