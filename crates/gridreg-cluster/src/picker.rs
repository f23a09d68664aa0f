use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use gridreg_core::{dual_slot_request, ClusterSnapshot, ResourceRequest};
use gridreg_core::{CAPACITY_POLL_SECS, DEFAULT_MAX_NODES, DEFAULT_MIN_FREE_NODES};

/// Live cluster availability. Behind a trait so the picker can be
/// exercised against canned output.
pub trait ClusterQuery: Send + Sync {
    fn snapshot(&self) -> Result<ClusterSnapshot>;
}

/// Runs the configured availability command (classically `upnodes`) and
/// parses its table output.
pub struct CommandClusterQuery {
    pub command: String,
}

impl ClusterQuery for CommandClusterQuery {
    fn snapshot(&self) -> Result<ClusterSnapshot> {
        let out = std::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .output()
            .with_context(|| format!("run availability command `{}`", self.command))?;
        if !out.status.success() {
            return Err(anyhow!(
                "availability command `{}` failed: {}",
                self.command,
                String::from_utf8_lossy(&out.stderr)
            ));
        }
        Ok(ClusterSnapshot::parse(&String::from_utf8_lossy(&out.stdout)))
    }
}

/// Per-pool selection policy.
#[derive(Clone, Debug)]
pub struct PoolPolicy {
    /// Pseudo-pools (aggregates, summaries) never eligible for selection.
    pub denylist: Vec<String>,
    /// Pools whose nodes provide two execution slots each.
    pub dual_slot: Vec<String>,
    pub max_nodes: usize,
    pub min_free_nodes: usize,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            denylist: vec!["orange".into(), "green".into(), "total".into()],
            dual_slot: vec!["red".into(), "green".into()],
            max_nodes: DEFAULT_MAX_NODES,
            min_free_nodes: DEFAULT_MIN_FREE_NODES,
        }
    }
}

/// Pick the pool with the most free nodes, first-found on ties, then
/// apply the dual-slot conversion and the node cap. Returns `None` when
/// no eligible pool meets the minimum; the caller backs off and retries
/// rather than proceeding with zero resources.
pub fn choose_pool(snapshot: &ClusterSnapshot, policy: &PoolPolicy) -> Option<ResourceRequest> {
    let mut best: Option<(&str, usize)> = None;
    for pool in &snapshot.pools {
        if policy.denylist.iter().any(|d| d == &pool.name) {
            continue;
        }
        // strictly greater keeps the first pool found on a tie
        if pool.free > best.map_or(0, |(_, free)| free) {
            best = Some((&pool.name, pool.free));
        }
    }
    let (name, free) = best?;
    if free < policy.min_free_nodes {
        return None;
    }
    let (mut nodes, slots_per_node) = if policy.dual_slot.iter().any(|p| p == name) {
        dual_slot_request(free)
    } else {
        (free, 1)
    };
    if nodes > policy.max_nodes {
        nodes = policy.max_nodes;
    }
    Some(ResourceRequest {
        pool: name.to_string(),
        nodes,
        slots_per_node,
    })
}

/// Blocking resource acquisition: query, choose, and when the cluster is
/// full sleep and re-query. Resource selection is poll-with-sleep, not
/// fail-fast.
pub struct ResourcePicker {
    pub query: Box<dyn ClusterQuery>,
    pub policy: PoolPolicy,
    pub poll: Duration,
}

impl ResourcePicker {
    pub fn new(query: Box<dyn ClusterQuery>, policy: PoolPolicy) -> Self {
        Self {
            query,
            policy,
            poll: Duration::from_secs(CAPACITY_POLL_SECS),
        }
    }

    pub fn acquire(&self) -> Result<ResourceRequest> {
        loop {
            let snapshot = self.query.snapshot()?;
            if let Some(req) = choose_pool(&snapshot, &self.policy) {
                tracing::info!(
                    pool = %req.pool,
                    nodes = req.nodes,
                    slots_per_node = req.slots_per_node,
                    "requesting nodes"
                );
                return Ok(req);
            }
            tracing::info!(wait_secs = self.poll.as_secs(), "clusters busy, waiting for an opening");
            std::thread::sleep(self.poll);
        }
    }
}
