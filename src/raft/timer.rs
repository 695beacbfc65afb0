use rand::Rng;
use std::time::Duration;

/// Draws the node's election timeout uniformly from `[min_ms, max_ms)`.
/// Randomized per node to reduce split votes.
pub fn random_election_timeout(min_ms: u64, max_ms: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let timeout_ms = rng.gen_range(min_ms..max_ms);
    Duration::from_millis(timeout_ms)
}
