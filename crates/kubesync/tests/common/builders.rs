//! Builder for kubeconfig documents used as test fixtures.

#![allow(dead_code)]

/// Builds kubeconfig YAML with one cluster and one user per context.
#[derive(Default)]
pub struct KubeconfigBuilder {
    contexts: Vec<(String, Option<String>)>,
    dangling: Vec<String>,
    current: Option<String>,
}

impl KubeconfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a context backed by its own cluster at `server`.
    pub fn context(mut self, name: &str, server: &str) -> Self {
        self.contexts
            .push((name.to_string(), Some(server.to_string())));
        self
    }

    /// Add a context whose cluster has no server URL.
    pub fn serverless_context(mut self, name: &str) -> Self {
        self.contexts.push((name.to_string(), None));
        self
    }

    /// Add a context that references a user missing from the document.
    pub fn dangling_context(mut self, name: &str) -> Self {
        self.dangling.push(name.to_string());
        self
    }

    pub fn current(mut self, name: &str) -> Self {
        self.current = Some(name.to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut yaml = String::from("apiVersion: v1\nkind: Config\n");
        if let Some(current) = &self.current {
            yaml.push_str(&format!("current-context: {}\n", current));
        }

        yaml.push_str("clusters:\n");
        for (name, server) in &self.contexts {
            yaml.push_str(&format!("- name: {}-cluster\n  cluster:\n", name));
            match server {
                Some(server) => yaml.push_str(&format!("    server: {}\n", server)),
                None => yaml.push_str("    insecure-skip-tls-verify: true\n"),
            }
        }
        yaml.push_str("- name: shared-cluster\n  cluster:\n    server: https://shared.example.com\n");

        yaml.push_str("users:\n");
        for (name, _) in &self.contexts {
            yaml.push_str(&format!("- name: {}-user\n  user:\n    token: {}-token\n", name, name));
        }

        yaml.push_str("contexts:\n");
        for (name, _) in &self.contexts {
            yaml.push_str(&format!(
                "- name: {0}\n  context:\n    cluster: {0}-cluster\n    user: {0}-user\n",
                name
            ));
        }
        for name in &self.dangling {
            yaml.push_str(&format!(
                "- name: {}\n  context:\n    cluster: shared-cluster\n    user: ghost\n",
                name
            ));
        }
        yaml
    }
}
