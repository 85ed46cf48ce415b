use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::services::{NetworkNode, NodeRanking};

#[derive(Debug, Default, Deserialize)]
pub struct TopNodesQuery {
    pub limit: Option<u32>,
    #[serde(default)]
    pub order: NodeRanking,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeersQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeListResponse {
    pub count: usize,
    pub nodes: Vec<NetworkNode>,
}

impl From<Vec<NetworkNode>> for NodeListResponse {
    fn from(nodes: Vec<NetworkNode>) -> Self {
        Self {
            count: nodes.len(),
            nodes,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearedResponse {
    pub success: bool,
    pub stats: CacheStats,
}
