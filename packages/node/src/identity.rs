//! Process-wide node identity.

/// This node's stable identity, established at startup.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub node_id: String,
    pub secret: Option<String>,
    pub cluster_auth_token: String,
}

impl NodeIdentity {
    #[must_use]
    pub fn new(node_id: impl Into<String>, cluster_auth_token: impl Into<String>) -> Self {
        Self { node_id: node_id.into(), secret: None, cluster_auth_token: cluster_auth_token.into() }
    }
}
