//! Pull-based Prometheus collector for ingress certificate expiry.
//!
//! Implements the two-phase collector contract: `desc` declares the metric
//! family without touching the network, `collect` runs one full collection
//! pass (discover, probe, dedupe) and emits one gauge sample per surviving
//! observation. No metric state is kept between scrapes.

use std::collections::HashMap;

use log::{debug, error};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::error::ScrapeError;
use crate::topology::TopologySource;
use crate::{dedupe, ProbeOutcome, ProbeScheduler};

pub const METRIC_NAME: &str = "ssl_expiry";
const METRIC_HELP: &str =
    "Days until the TLS certificate served by an ingress host expires (-1 when the host could not be reached)";
const METRIC_LABELS: [&str; 4] = ["domain", "ingress", "common_name", "namespace"];

/// Prometheus collector wrapping the whole collection pipeline.
pub struct CertExpiryExporter {
    topology: Box<dyn TopologySource + Send + Sync>,
    scheduler: ProbeScheduler,
    desc: Desc,
}

impl CertExpiryExporter {
    pub fn new(
        topology: Box<dyn TopologySource + Send + Sync>,
        scheduler: ProbeScheduler,
    ) -> Result<Self, prometheus::Error> {
        let desc = Desc::new(
            METRIC_NAME.to_string(),
            METRIC_HELP.to_string(),
            METRIC_LABELS.iter().map(|label| label.to_string()).collect(),
            HashMap::new(),
        )?;
        Ok(CertExpiryExporter {
            topology,
            scheduler,
            desc,
        })
    }

    /// Runs one full collection pass and renders the observation set.
    ///
    /// A topology discovery failure aborts the pass and is returned to the
    /// caller so the transport can fail the scrape instead of serving an
    /// empty answer.
    pub fn export(&self) -> Result<Vec<MetricFamily>, ScrapeError> {
        let targets = self.topology.targets()?;
        debug!("probing {} ingress targets", targets.len());

        let outcomes = self.scheduler.collect(targets);
        let observations = dedupe(outcomes);
        debug!("{} observations after deduplication", observations.len());

        render(&observations).map_err(ScrapeError::from)
    }
}

fn render(observations: &[ProbeOutcome]) -> Result<Vec<MetricFamily>, prometheus::Error> {
    let gauge = GaugeVec::new(Opts::new(METRIC_NAME, METRIC_HELP), &METRIC_LABELS)?;
    for observation in observations {
        gauge
            .get_metric_with_label_values(&[
                &observation.domain,
                &observation.ingress,
                &observation.common_name,
                &observation.namespace,
            ])?
            .set(observation.days_until_expiry as f64);
    }
    Ok(gauge.collect())
}

impl Collector for CertExpiryExporter {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    fn collect(&self) -> Vec<MetricFamily> {
        match self.export() {
            Ok(families) => families,
            Err(e) => {
                error!("collection pass failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Renders one scrape answer: the pipeline's families plus whatever the
/// process registry carries, in Prometheus text format.
pub fn encode_scrape(
    exporter: &CertExpiryExporter,
    registry: &Registry,
) -> Result<String, ScrapeError> {
    let mut families = exporter.export()?;
    families.extend(registry.gather());

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&families, &mut buffer)
        .map_err(ScrapeError::Metrics)?;
    String::from_utf8(buffer).map_err(|e| ScrapeError::Metrics(prometheus::Error::Msg(e.to_string())))
}
