//! Shard placement
//!
//! The shard of an entity depends only on its identity values and the
//! shard count. Reads never re-place themselves: a changed shard count
//! only takes effect through an explicit redistribution.

use crate::schema::Value;

/// Bits the running hash is rotated by before each identity value is mixed in
const COMBINE_ROTATION: u32 = 7;

/// Order-sensitive hash of identity values.
pub fn identity_hash(identity: &[Value]) -> u32 {
    identity.iter().fold(0u32, |hash, value| {
        hash.rotate_left(COMBINE_ROTATION) ^ value.stable_hash()
    })
}

/// Index of the shard holding `identity` among `shard_count` shards.
pub fn shard_index(identity: &[Value], shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    (u64::from(identity_hash(identity)) % shard_count as u64) as usize
}

/// Shard count keeping the average shard near `target_bytes`:
/// `max(1, round(total_bytes / target_bytes))`.
pub fn ideal_shard_count(total_bytes: u64, target_bytes: u64) -> usize {
    let target = target_bytes.max(1);
    let rounded = total_bytes.saturating_add(target / 2) / target;
    rounded.max(1) as usize
}
