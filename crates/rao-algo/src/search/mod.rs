//! Combinatorial search over discrete remedial actions.
//!
//! The tree explores network-action combinations depth by depth; each leaf
//! is evaluated (and, when range actions exist, linearly optimized) on a
//! handle leased from the bounded pool. All ordering decisions are
//! deterministic so two runs on the same inputs activate the same actions.

pub mod bloomer;
pub mod leaf;
pub mod tree;

pub use bloomer::Bloomer;
pub use leaf::{Leaf, LeafStatus};
pub use tree::{SearchTree, SearchTreeResult};

use rao_core::ActionId;

/// Stable FNV-1a hash of an action combination, used as the final
/// tie-breaker. Independent of platform and of `HashMap` iteration order.
pub(crate) fn stable_hash(actions: &[ActionId]) -> u64 {
    let mut sorted: Vec<usize> = actions.iter().map(|a| a.value()).collect();
    sorted.sort_unstable();
    let mut hash: u64 = 0xcbf29ce484222325;
    for value in sorted {
        for byte in value.to_le_bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
    }
    hash
}
