use serde::Serialize;
use shared::{AppError, Result};
use std::sync::Arc;
use tracing::debug;

use crate::cache::QueryCache;
use crate::services::node_store::{NetworkNode, NodeRanking, NodeStore};

pub const DEFAULT_NODE_LIMIT: u32 = 10;
pub const MAX_NODE_LIMIT: u32 = 100;

#[derive(Serialize)]
struct NodeParams<'a> {
    pubkey: &'a str,
}

#[derive(Serialize)]
struct TopNodesParams {
    order: NodeRanking,
    limit: u32,
}

#[derive(Serialize)]
struct PeersParams<'a> {
    pubkey: &'a str,
    limit: u32,
}

pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_NODE_LIMIT).clamp(1, MAX_NODE_LIMIT)
}

/// Read-side network queries, each memoized by the shared `QueryCache`.
pub struct NodeQueryService {
    store: Arc<dyn NodeStore>,
    cache: Arc<QueryCache>,
}

impl NodeQueryService {
    pub fn new(store: Arc<dyn NodeStore>, cache: Arc<QueryCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn node(&self, pubkey: &str) -> Result<NetworkNode> {
        let found: Option<NetworkNode> = self
            .cache
            .get_or_fetch("node", &NodeParams { pubkey }, || self.store.find_node(pubkey))
            .await?;

        found.ok_or_else(|| AppError::not_found("Nœud"))
    }

    pub async fn top_nodes(&self, order: NodeRanking, limit: Option<u32>) -> Result<Vec<NetworkNode>> {
        let limit = clamp_limit(limit);
        debug!(?order, limit, "top nodes query");
        self.cache
            .get_or_fetch("top_nodes", &TopNodesParams { order, limit }, || {
                self.store.top_nodes(order, limit)
            })
            .await
    }

    pub async fn peers_of_peers(&self, pubkey: &str, limit: Option<u32>) -> Result<Vec<NetworkNode>> {
        let limit = clamp_limit(limit);
        self.cache
            .get_or_fetch("peers_of_peers", &PeersParams { pubkey, limit }, || {
                self.store.peers_of_peers(pubkey, limit)
            })
            .await
    }
}
