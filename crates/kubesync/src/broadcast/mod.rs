//! Broadcasting modules for real-time event streaming.
//!
//! The catalog is the aggregate entity source exposed to downstream
//! consumers: snapshot it or subscribe to its deltas.

pub mod catalog;

pub use catalog::{CatalogEvent, CatalogEventKind, ClusterCatalog};
