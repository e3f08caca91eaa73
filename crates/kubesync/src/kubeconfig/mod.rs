//! Kubeconfig document model and per-context parsing.

pub mod error;
pub mod parser;
pub mod types;

pub use error::{ContextError, KubeconfigError};
pub use parser::{parse_kubeconfig, ContextParse, RawContextConfig};
pub use types::{
    AuthInfo, ClusterEntry, ContextEntry, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
};
