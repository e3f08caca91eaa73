//! Cluster entities, their lifecycle collaborator and catalog projection.

pub mod catalog;
pub mod model;
pub mod store;

pub use catalog::{CatalogEntity, CatalogMetadata, CatalogSpec, CatalogStatus, LOCAL_SOURCE};
pub use model::{Cluster, ClusterId, ClusterModel, ConnectionState};
pub use store::{ClusterError, ClusterLifecycle, ClusterStore};
