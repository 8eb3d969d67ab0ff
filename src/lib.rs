//! Certificate-expiry collection pipeline for Kubernetes ingress hosts.
//!
//! The pipeline probes every externally routed hostname over TLS, converts
//! each presented certificate into a [`ProbeOutcome`], tolerates per-target
//! failures, and deduplicates the observations before they are published
//! through the Prometheus collector in [`metrics`].

pub mod config;
pub mod error;
pub mod metrics;
pub mod topology;

use std::collections::HashSet;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use log::warn;
use openssl::asn1::{Asn1Time, Asn1TimeRef};
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslVerifyMode};
use openssl::x509::X509Ref;

use crate::error::ProbeError;

const TLS_PORT: u16 = 443;
const SECS_PER_DAY: i64 = 86_400;

/// One externally routed hostname taken from an ingress rule.
///
/// Hostnames may repeat across ingresses and namespaces; every repetition is
/// a distinct target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostnameTarget {
    pub hostname: String,
    pub ingress_name: String,
    pub namespace: String,
}

/// A single observation produced by probing one target.
///
/// `ok` is the only discriminator between a failed dial (`ok == false`,
/// `days_until_expiry == -1`) and a certificate that expired exactly one day
/// ago (`ok == true`, `days_until_expiry == -1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeOutcome {
    pub domain: String,
    pub ingress: String,
    pub namespace: String,
    pub common_name: String,
    pub days_until_expiry: i64,
    pub ok: bool,
}

impl ProbeOutcome {
    /// Sentinel outcome for a target that could not be dialed.
    pub fn unreachable(target: &HostnameTarget) -> Self {
        ProbeOutcome {
            domain: target.hostname.clone(),
            ingress: target.ingress_name.clone(),
            namespace: target.namespace.clone(),
            common_name: String::new(),
            days_until_expiry: -1,
            ok: false,
        }
    }

    fn from_cert(target: &HostnameTarget, cert: &X509Ref) -> Result<Self, ErrorStack> {
        Ok(ProbeOutcome {
            domain: target.hostname.clone(),
            ingress: target.ingress_name.clone(),
            namespace: target.namespace.clone(),
            common_name: common_name(cert),
            days_until_expiry: days_until_expiry(cert.not_after())?,
            ok: true,
        })
    }
}

/// Probes one target and reports everything it observed.
///
/// Implementations never fail the batch: a target that cannot be reached is
/// reported as a single sentinel outcome.
pub trait Probe {
    fn probe(&self, target: &HostnameTarget) -> Vec<ProbeOutcome>;
}

/// openssl-backed prober that reads the certificate chain a host presents.
///
/// Peer verification is disabled on purpose: the exporter reports expiry
/// metadata, it does not validate trust.
pub struct TlsProbe {
    timeout: Duration,
}

impl TlsProbe {
    pub fn new(timeout: Duration) -> Self {
        TlsProbe { timeout }
    }

    fn handshake(&self, target: &HostnameTarget) -> Result<Vec<ProbeOutcome>, ProbeError> {
        let mut context = SslContext::builder(SslMethod::tls())?;
        context.set_verify(SslVerifyMode::empty());
        let context = context.build();

        let mut ssl = Ssl::new(&context)?;
        ssl.set_hostname(&target.hostname)?;

        let remote = format!("{}:{}", target.hostname, TLS_PORT);
        let mut addresses = remote
            .to_socket_addrs()
            .map_err(|e| ProbeError::DnsResolution {
                hostname: target.hostname.clone(),
                source: e,
            })?;
        let address = addresses.next().ok_or_else(|| ProbeError::DnsResolution {
            hostname: target.hostname.clone(),
            source: io::Error::new(io::ErrorKind::NotFound, "hostname resolved to no addresses"),
        })?;

        let tcp_stream = TcpStream::connect_timeout(&address, self.timeout).map_err(|e| {
            ProbeError::ConnectionFailed {
                address: remote.clone(),
                source: e,
            }
        })?;
        tcp_stream.set_read_timeout(Some(self.timeout))?;
        tcp_stream.set_write_timeout(Some(self.timeout))?;

        let mut stream = ssl
            .connect(tcp_stream)
            .map_err(|e| ProbeError::HandshakeFailed {
                details: e.to_string(),
            })?;

        let result = match stream.ssl().peer_cert_chain() {
            Some(chain) => {
                let mut outcomes = Vec::with_capacity(chain.len());
                for cert in chain.iter() {
                    match ProbeOutcome::from_cert(target, cert) {
                        Ok(outcome) => outcomes.push(outcome),
                        Err(e) => warn!(
                            "skipping unreadable certificate from {}: {}",
                            target.hostname, e
                        ),
                    }
                }
                Ok(outcomes)
            }
            None => Err(ProbeError::CertificateError {
                reason: "server presented no certificate chain".to_string(),
            }),
        };
        let _ = stream.shutdown();
        result
    }
}

impl Probe for TlsProbe {
    fn probe(&self, target: &HostnameTarget) -> Vec<ProbeOutcome> {
        match self.handshake(target) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                warn!(
                    "failed to probe {} (ingress {} in namespace {}): {}",
                    target.hostname, target.ingress_name, target.namespace, e
                );
                vec![ProbeOutcome::unreachable(target)]
            }
        }
    }
}

fn common_name(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|name| name.to_string())
        .unwrap_or_default()
}

/// Days until `not_after`, rounded to the nearest whole day.
///
/// Negative for an already-expired certificate. Computed from the exact
/// second-resolution ASN.1 time difference, not a fixed day-length
/// approximation.
fn days_until_expiry(not_after: &Asn1TimeRef) -> Result<i64, ErrorStack> {
    let now = Asn1Time::days_from_now(0)?;
    let remaining = now.diff(not_after)?;
    let seconds = i64::from(remaining.days) * SECS_PER_DAY + i64::from(remaining.secs);
    Ok((seconds as f64 / SECS_PER_DAY as f64).round() as i64)
}

/// Scatter-gather scheduler: probes every target concurrently and joins all
/// results before returning.
///
/// Workers claim targets through an atomic cursor and report outcomes over a
/// channel whose single consumer owns the accumulation exclusively, so no
/// append ever races another.
pub struct ProbeScheduler {
    probe: Arc<dyn Probe + Send + Sync>,
    max_workers: usize,
}

impl ProbeScheduler {
    pub fn new(probe: Arc<dyn Probe + Send + Sync>, max_workers: usize) -> Self {
        ProbeScheduler {
            probe,
            max_workers: max_workers.max(1),
        }
    }

    /// Runs one fan-out pass over `targets` and returns the raw, not yet
    /// deduplicated outcomes.
    ///
    /// An individual probe failure never cancels its siblings; the pass waits
    /// for the slowest probe or its timeout, whichever comes first.
    pub fn collect(&self, targets: Vec<HostnameTarget>) -> Vec<ProbeOutcome> {
        if targets.is_empty() {
            return Vec::new();
        }

        let expected = targets.len();
        let targets = Arc::new(targets);
        let cursor = Arc::new(AtomicUsize::new(0));
        let (sender, receiver) = mpsc::channel();

        let workers = self.max_workers.min(expected);
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let targets = Arc::clone(&targets);
            let cursor = Arc::clone(&cursor);
            let probe = Arc::clone(&self.probe);
            let sender = sender.clone();
            handles.push(thread::spawn(move || loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= targets.len() {
                    break;
                }
                for outcome in probe.probe(&targets[index]) {
                    if sender.send(outcome).is_err() {
                        return;
                    }
                }
            }));
        }
        drop(sender);

        // The receive loop is the join barrier: it ends once every worker has
        // dropped its sender.
        let mut outcomes = Vec::with_capacity(expected);
        for outcome in receiver {
            outcomes.push(outcome);
        }
        for handle in handles {
            let _ = handle.join();
        }
        outcomes
    }
}

/// Collapses structurally identical outcomes, keeping the first occurrence in
/// first-seen order.
pub fn dedupe(outcomes: Vec<ProbeOutcome>) -> Vec<ProbeOutcome> {
    let mut seen = HashSet::with_capacity(outcomes.len());
    let mut unique = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        if seen.insert(outcome.clone()) {
            unique.push(outcome);
        }
    }
    unique
}
