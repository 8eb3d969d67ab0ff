//! Integration tests for the public API
//!
//! The pipeline is exercised end to end with stub probes and topologies, so
//! no test ever touches the network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prometheus::core::Collector;
use prometheus::Registry;

use tlsexporter::error::{DiscoveryError, ScrapeError};
use tlsexporter::metrics::prom::{encode_scrape, CertExpiryExporter, METRIC_NAME};
use tlsexporter::topology::TopologySource;
use tlsexporter::{dedupe, HostnameTarget, Probe, ProbeOutcome, ProbeScheduler};

fn target(hostname: &str, namespace: &str) -> HostnameTarget {
    HostnameTarget {
        hostname: hostname.to_string(),
        ingress_name: "web".to_string(),
        namespace: namespace.to_string(),
    }
}

/// Topology serving a fixed set of rules per namespace.
struct StaticTopology {
    rules: Vec<(String, Vec<HostnameTarget>)>,
}

impl TopologySource for StaticTopology {
    fn namespaces(&self) -> Result<Vec<String>, DiscoveryError> {
        Ok(self.rules.iter().map(|(ns, _)| ns.clone()).collect())
    }

    fn ingress_rules(&self, namespace: &str) -> Result<Vec<HostnameTarget>, DiscoveryError> {
        Ok(self
            .rules
            .iter()
            .find(|(ns, _)| ns == namespace)
            .map(|(_, targets)| targets.clone())
            .unwrap_or_default())
    }
}

struct FailingTopology;

impl TopologySource for FailingTopology {
    fn namespaces(&self) -> Result<Vec<String>, DiscoveryError> {
        Err(DiscoveryError::Api {
            operation: "list namespaces".to_string(),
            status: 503,
            message: "etcdserver: request timed out".to_string(),
        })
    }

    fn ingress_rules(&self, _namespace: &str) -> Result<Vec<HostnameTarget>, DiscoveryError> {
        Ok(Vec::new())
    }
}

/// Simulated prober: hostnames starting with "down" fail to dial, every
/// other target presents a two-certificate chain. A small per-target sleep
/// shakes up the scheduling interleaving.
struct ScriptedProbe {
    invocations: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let invocations = Arc::new(AtomicUsize::new(0));
        (
            ScriptedProbe {
                invocations: Arc::clone(&invocations),
            },
            invocations,
        )
    }
}

impl Probe for ScriptedProbe {
    fn probe(&self, target: &HostnameTarget) -> Vec<ProbeOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis((target.hostname.len() % 7) as u64));

        if target.hostname.starts_with("down") {
            return vec![ProbeOutcome::unreachable(target)];
        }
        let leaf = ProbeOutcome {
            domain: target.hostname.clone(),
            ingress: target.ingress_name.clone(),
            namespace: target.namespace.clone(),
            common_name: target.hostname.clone(),
            days_until_expiry: 60,
            ok: true,
        };
        let issuer = ProbeOutcome {
            common_name: "Example Intermediate CA".to_string(),
            days_until_expiry: 500,
            ..leaf.clone()
        };
        vec![leaf, issuer]
    }
}

fn fleet(total: usize, failing: usize) -> Vec<HostnameTarget> {
    (0..total)
        .map(|i| {
            if i < failing {
                target(&format!("down-{}.example.com", i), "default")
            } else {
                target(&format!("host-{}.example.com", i), "default")
            }
        })
        .collect()
}

#[test]
fn failed_targets_yield_sentinels_and_successes_yield_per_certificate_records() {
    let (probe, _) = ScriptedProbe::new();
    let scheduler = ProbeScheduler::new(Arc::new(probe), 8);

    let outcomes = scheduler.collect(fleet(10, 4));

    let sentinels = outcomes.iter().filter(|o| !o.ok).count();
    let successes = outcomes.iter().filter(|o| o.ok).count();
    assert_eq!(sentinels, 4);
    assert_eq!(successes, 2 * 6);
    assert_eq!(outcomes.len(), 4 + 2 * 6);
}

#[test]
fn failed_target_is_reported_exactly_once() {
    let (probe, invocations) = ScriptedProbe::new();
    let scheduler = ProbeScheduler::new(Arc::new(probe), 4);

    let outcomes = scheduler.collect(vec![target("down.example.com", "default")]);

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.len(), 1);
    assert!(!outcomes[0].ok);
    assert_eq!(outcomes[0].days_until_expiry, -1);
    assert_eq!(outcomes[0].domain, "down.example.com");
}

#[test]
fn fifty_concurrent_targets_lose_no_outcome() {
    let (probe, invocations) = ScriptedProbe::new();
    let scheduler = ProbeScheduler::new(Arc::new(probe), 16);

    let outcomes = scheduler.collect(fleet(50, 25));

    assert_eq!(invocations.load(Ordering::SeqCst), 50);
    assert_eq!(outcomes.iter().filter(|o| !o.ok).count(), 25);
    assert_eq!(outcomes.iter().filter(|o| o.ok).count(), 2 * 25);

    // Deduplication restores determinism; all records here are distinct.
    assert_eq!(dedupe(outcomes).len(), 25 + 2 * 25);
}

#[test]
fn single_worker_observes_the_same_set_as_many() {
    let collect = |workers| {
        let (probe, _) = ScriptedProbe::new();
        let scheduler = ProbeScheduler::new(Arc::new(probe), workers);
        let mut outcomes = scheduler.collect(fleet(12, 3));
        outcomes.sort_by(|a, b| (&a.domain, &a.common_name).cmp(&(&b.domain, &b.common_name)));
        outcomes
    };

    assert_eq!(collect(1), collect(12));
}

#[test]
fn overlapping_rules_across_namespaces_stay_distinct() {
    let shared = "shop.example.com";
    let (probe, _) = ScriptedProbe::new();
    let scheduler = ProbeScheduler::new(Arc::new(probe), 4);

    let outcomes = scheduler.collect(vec![
        target(shared, "default"),
        target(shared, "staging"),
    ]);

    // Same hostname, different namespace label: dedup must keep both.
    assert_eq!(dedupe(outcomes).len(), 4);
}

#[test]
fn describe_phase_never_probes() {
    let (probe, invocations) = ScriptedProbe::new();
    let exporter = CertExpiryExporter::new(
        Box::new(StaticTopology {
            rules: vec![("default".to_string(), fleet(5, 0))],
        }),
        ProbeScheduler::new(Arc::new(probe), 4),
    )
    .unwrap();

    let descs = exporter.desc();
    assert_eq!(descs.len(), 1);
    assert_eq!(descs[0].fq_name, METRIC_NAME);
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn registered_collector_answers_a_scrape() {
    let (probe, invocations) = ScriptedProbe::new();
    let exporter = CertExpiryExporter::new(
        Box::new(StaticTopology {
            rules: vec![
                ("default".to_string(), vec![target("shop.example.com", "default")]),
                ("staging".to_string(), vec![target("down.example.com", "staging")]),
            ],
        }),
        ProbeScheduler::new(Arc::new(probe), 4),
    )
    .unwrap();

    let registry = Registry::new();
    registry.register(Box::new(exporter)).unwrap();
    // Registration only describes the family.
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    let families = registry.gather();
    let family = families
        .iter()
        .find(|f| f.get_name() == METRIC_NAME)
        .expect("ssl_expiry family");
    assert_eq!(family.get_metric().len(), 3);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    let down = family
        .get_metric()
        .iter()
        .find(|m| {
            m.get_label()
                .iter()
                .any(|l| l.get_name() == "domain" && l.get_value() == "down.example.com")
        })
        .expect("sample for the unreachable host");
    assert_eq!(down.get_gauge().value(), -1.0);
}

#[test]
fn discovery_failure_fails_the_scrape_instead_of_emitting_nothing() {
    let (probe, invocations) = ScriptedProbe::new();
    let exporter = CertExpiryExporter::new(
        Box::new(FailingTopology),
        ProbeScheduler::new(Arc::new(probe), 4),
    )
    .unwrap();

    let err = encode_scrape(&exporter, &Registry::new()).unwrap_err();
    match err {
        ScrapeError::Discovery(e) => assert!(e.to_string().contains("list namespaces")),
        other => panic!("expected a discovery error, got {:?}", other),
    }
    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[test]
fn scrape_text_contains_one_line_per_observation() {
    let (probe, _) = ScriptedProbe::new();
    let exporter = CertExpiryExporter::new(
        Box::new(StaticTopology {
            rules: vec![("default".to_string(), vec![target("shop.example.com", "default")])],
        }),
        ProbeScheduler::new(Arc::new(probe), 4),
    )
    .unwrap();

    let body = encode_scrape(&exporter, &Registry::new()).unwrap();
    assert!(body.contains("# HELP ssl_expiry"));
    assert!(body.contains("# TYPE ssl_expiry gauge"));
    assert_eq!(body.matches("\nssl_expiry{").count(), 2);
    assert!(body.contains("common_name=\"Example Intermediate CA\""));
    assert!(body.contains("namespace=\"default\""));
}
