//! Metrics publication module.
//!
//! Exposes the collection pipeline as a pull-based Prometheus collector:
//! every scrape triggers one full, independent pass over the cluster's
//! ingress hosts.
//!
//! # Submodules
//!
//! - `prom` - Prometheus collector integration

pub mod prom;
