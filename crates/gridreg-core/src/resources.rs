use serde::{Deserialize, Serialize};

/// One pool's availability as reported by the cluster status command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    pub total: usize,
    pub free: usize,
}

/// Ephemeral view of cluster availability. Re-queried on every selection
/// attempt; never persisted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub pools: Vec<PoolStatus>,
}

impl ClusterSnapshot {
    /// Parse the availability command's table output. Each useful line is
    /// `<name> ... <total> <free>`; anything that does not fit (headers,
    /// separators) is skipped.
    pub fn parse(text: &str) -> Self {
        let mut pools = Vec::new();
        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                continue;
            }
            let name = fields[0];
            if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                continue;
            }
            let (total, free) = match (
                fields[fields.len() - 2].parse::<usize>(),
                fields[fields.len() - 1].parse::<usize>(),
            ) {
                (Ok(t), Ok(f)) => (t, f),
                _ => continue,
            };
            pools.push(PoolStatus {
                name: name.to_string(),
                total,
                free,
            });
        }
        Self { pools }
    }
}

/// What to ask the batch scheduler for: a pool, a node count, and how many
/// execution slots each node provides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRequest {
    pub pool: String,
    pub nodes: usize,
    pub slots_per_node: u32,
}

impl ResourceRequest {
    /// Total worker slots the request yields.
    pub fn slots(&self) -> usize {
        self.nodes * self.slots_per_node as usize
    }

    /// Render the scheduler resource spec, e.g.
    /// `nodes=8:red:run:ppn=2,walltime=1:00:00,cput=25000`.
    pub fn spec(&self, label: &str, walltime: &str, cput: &str) -> String {
        let ppn = if self.slots_per_node > 1 {
            format!(":ppn={}", self.slots_per_node)
        } else {
            String::new()
        };
        format!(
            "nodes={}:{}:{}{},walltime={},cput={}",
            self.nodes, self.pool, label, ppn, walltime, cput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPNODES: &str = "\
cluster status
  red     rack1    32   12
  blue    rack2    16    4
  total   -------  48   16
";

    #[test]
    fn parses_pool_lines_and_skips_noise() {
        let snap = ClusterSnapshot::parse(UPNODES);
        assert_eq!(snap.pools.len(), 3);
        assert_eq!(
            snap.pools[0],
            PoolStatus { name: "red".into(), total: 32, free: 12 }
        );
        assert_eq!(snap.pools[1].free, 4);
        assert_eq!(snap.pools[2].name, "total");
    }

    #[test]
    fn empty_output_is_an_empty_snapshot() {
        assert!(ClusterSnapshot::parse("").pools.is_empty());
    }

    #[test]
    fn spec_includes_ppn_only_for_multi_slot_nodes() {
        let single = ResourceRequest { pool: "blue".into(), nodes: 4, slots_per_node: 1 };
        assert_eq!(
            single.spec("run", "1:00:00", "25000"),
            "nodes=4:blue:run,walltime=1:00:00,cput=25000"
        );
        let dual = ResourceRequest { pool: "red".into(), nodes: 5, slots_per_node: 2 };
        assert_eq!(
            dual.spec("run", "1:00:00", "25000"),
            "nodes=5:red:run:ppn=2,walltime=1:00:00,cput=25000"
        );
        assert_eq!(dual.slots(), 10);
    }
}
