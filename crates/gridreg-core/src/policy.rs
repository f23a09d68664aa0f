//! Named policy constants for resource selection and polling.
//!
//! The dual-slot numbers reproduce a quirk of the legacy dispatcher: on
//! pools whose nodes carry two execution slots, it asked for half the
//! free nodes with ppn=2 and held one node back to keep the scheduler
//! from refusing the request. The quirk is load-bearing on that
//! scheduler, so it stays a named constant rather than getting "fixed".

/// Free-node count a dual-slot pool must exceed before the request is
/// converted to two slots per node.
pub const DUAL_SLOT_THRESHOLD: usize = 3;

/// Nodes held back when a dual-slot request is made.
pub const DUAL_SLOT_RESERVE: usize = 1;

/// Default hard cap on nodes per job, regardless of pool.
pub const DEFAULT_MAX_NODES: usize = 24;

/// Default minimum free nodes a pool must offer; below this the caller
/// backs off and re-queries instead of running on scraps.
pub const DEFAULT_MIN_FREE_NODES: usize = 2;

/// How long to sleep between queue polls when there is nothing to do.
pub const QUEUE_POLL_SECS: u64 = 100;

/// How long to sleep between availability queries while the cluster is full.
pub const CAPACITY_POLL_SECS: u64 = 300;

/// Delay between scheduler submission retries.
pub const SUBMIT_RETRY_SECS: u64 = 100;

/// Default submission retry budget before a run is abandoned.
pub const SUBMIT_RETRY_BUDGET: u32 = 30;

/// Poll interval while waiting for a run's report sentinel.
pub const SENTINEL_POLL_SECS: u64 = 20;

/// Default bound on the sentinel wait; the legacy dispatcher polled
/// forever, which turned a lost job into a wedged loop.
pub const SENTINEL_MAX_WAIT_SECS: u64 = 2 * 60 * 60;

/// Per-outstanding-result bound in the parallel distributor; a worker
/// that goes quiet longer than this forfeits its in-flight case.
pub const WORKER_STALL_SECS: u64 = 600;

/// Apply the dual-slot conversion to a free-node count.
/// Returns `(nodes, slots_per_node)`.
pub fn dual_slot_request(free: usize) -> (usize, u32) {
    if free > DUAL_SLOT_THRESHOLD {
        ((free / 2).saturating_sub(DUAL_SLOT_RESERVE), 2)
    } else {
        (free, 1)
    }
}
