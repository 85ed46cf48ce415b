// ============================================================================
// NODE STORE - Lightning network graph reads
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared::Result;
use sqlx::PgPool;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    pub pubkey: String,
    pub alias: Option<String>,
    pub color: Option<String>,
    pub capacity_sats: i64,
    pub channel_count: i32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRanking {
    #[default]
    Capacity,
    Channels,
}

#[async_trait]
pub trait NodeStore: Send + Sync {
    async fn find_node(&self, pubkey: &str) -> Result<Option<NetworkNode>>;

    async fn top_nodes(&self, ranking: NodeRanking, limit: u32) -> Result<Vec<NetworkNode>>;

    /// Nodes exactly two channel hops from `pubkey`, largest first.
    async fn peers_of_peers(&self, pubkey: &str, limit: u32) -> Result<Vec<NetworkNode>>;
}

// ============================================================================
// POSTGRES
// ============================================================================

pub struct NodeQueries;

impl NodeQueries {
    pub const FIND_NODE: &'static str = r#"
        SELECT pubkey, alias, color, capacity_sats, channel_count, updated_at
        FROM ln_nodes
        WHERE pubkey = $1
    "#;

    pub const TOP_BY_CAPACITY: &'static str = r#"
        SELECT pubkey, alias, color, capacity_sats, channel_count, updated_at
        FROM ln_nodes
        ORDER BY capacity_sats DESC, pubkey
        LIMIT $1
    "#;

    pub const TOP_BY_CHANNELS: &'static str = r#"
        SELECT pubkey, alias, color, capacity_sats, channel_count, updated_at
        FROM ln_nodes
        ORDER BY channel_count DESC, pubkey
        LIMIT $1
    "#;

    pub const PEERS_OF_PEERS: &'static str = r#"
        WITH direct AS (
            SELECT CASE WHEN node1_pubkey = $1 THEN node2_pubkey ELSE node1_pubkey END AS pubkey
            FROM ln_channels
            WHERE node1_pubkey = $1 OR node2_pubkey = $1
        ),
        second_hop AS (
            SELECT DISTINCT CASE WHEN c.node1_pubkey = d.pubkey THEN c.node2_pubkey
                                 ELSE c.node1_pubkey END AS pubkey
            FROM ln_channels c
            JOIN direct d ON c.node1_pubkey = d.pubkey OR c.node2_pubkey = d.pubkey
        )
        SELECT n.pubkey, n.alias, n.color, n.capacity_sats, n.channel_count, n.updated_at
        FROM ln_nodes n
        JOIN second_hop s ON s.pubkey = n.pubkey
        WHERE n.pubkey <> $1
          AND n.pubkey NOT IN (SELECT pubkey FROM direct)
        ORDER BY n.capacity_sats DESC, n.pubkey
        LIMIT $2
    "#;
}

pub struct PgNodeStore {
    pool: PgPool,
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn find_node(&self, pubkey: &str) -> Result<Option<NetworkNode>> {
        let node = sqlx::query_as::<_, NetworkNode>(NodeQueries::FIND_NODE)
            .bind(pubkey)
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    async fn top_nodes(&self, ranking: NodeRanking, limit: u32) -> Result<Vec<NetworkNode>> {
        let query = match ranking {
            NodeRanking::Capacity => NodeQueries::TOP_BY_CAPACITY,
            NodeRanking::Channels => NodeQueries::TOP_BY_CHANNELS,
        };
        let nodes = sqlx::query_as::<_, NetworkNode>(query)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(nodes)
    }

    async fn peers_of_peers(&self, pubkey: &str, limit: u32) -> Result<Vec<NetworkNode>> {
        let nodes = sqlx::query_as::<_, NetworkNode>(NodeQueries::PEERS_OF_PEERS)
            .bind(pubkey)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        Ok(nodes)
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

/// Graph held in memory. Used in tests and when no database is configured.
#[derive(Default)]
pub struct InMemoryNodeStore {
    nodes: DashMap<String, NetworkNode>,
    channels: RwLock<Vec<(String, String)>>,
}

impl InMemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&self, node: NetworkNode) {
        self.nodes.insert(node.pubkey.clone(), node);
    }

    pub fn add_channel(&self, a: &str, b: &str) {
        self.channels.write().push((a.to_string(), b.to_string()));
    }

    fn neighbours(&self, pubkey: &str) -> HashSet<String> {
        self.channels
            .read()
            .iter()
            .filter_map(|(a, b)| {
                if a == pubkey {
                    Some(b.clone())
                } else if b == pubkey {
                    Some(a.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn ranked(&self, mut nodes: Vec<NetworkNode>, ranking: NodeRanking, limit: u32) -> Vec<NetworkNode> {
        nodes.sort_by(|a, b| {
            let primary = match ranking {
                NodeRanking::Capacity => b.capacity_sats.cmp(&a.capacity_sats),
                NodeRanking::Channels => b.channel_count.cmp(&a.channel_count),
            };
            primary.then_with(|| a.pubkey.cmp(&b.pubkey))
        });
        nodes.truncate(limit as usize);
        nodes
    }
}

#[async_trait]
impl NodeStore for InMemoryNodeStore {
    async fn find_node(&self, pubkey: &str) -> Result<Option<NetworkNode>> {
        Ok(self.nodes.get(pubkey).map(|n| n.clone()))
    }

    async fn top_nodes(&self, ranking: NodeRanking, limit: u32) -> Result<Vec<NetworkNode>> {
        let nodes: Vec<NetworkNode> = self.nodes.iter().map(|n| n.clone()).collect();
        Ok(self.ranked(nodes, ranking, limit))
    }

    async fn peers_of_peers(&self, pubkey: &str, limit: u32) -> Result<Vec<NetworkNode>> {
        let direct = self.neighbours(pubkey);

        let second_hop: HashSet<String> = direct
            .iter()
            .flat_map(|peer| self.neighbours(peer))
            .filter(|candidate| candidate != pubkey && !direct.contains(candidate))
            .collect();

        let nodes = second_hop
            .iter()
            .filter_map(|key| self.nodes.get(key).map(|n| n.clone()))
            .collect();

        Ok(self.ranked(nodes, NodeRanking::Capacity, limit))
    }
}
