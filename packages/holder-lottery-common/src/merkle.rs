use sha2::{Digest, Sha256};

use crate::types::{Snapshot, SnapshotEntry};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Compute the leaf hash for one holder's ticket range.
///
/// `leaf_hash = sha256( 0x00 || owner_bytes || ticket_start_u128_be || ticket_end_u128_be )`
///
/// Both range ends are inclusive, matching [`SnapshotEntry`].
pub fn compute_leaf_hash(owner: &str, ticket_start: u128, ticket_end: u128) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(owner.as_bytes());
    hasher.update(ticket_start.to_be_bytes());
    hasher.update(ticket_end.to_be_bytes());
    hasher.finalize().into()
}

pub fn entry_leaf_hash(entry: &SnapshotEntry) -> [u8; 32] {
    compute_leaf_hash(&entry.owner, entry.ticket_start.u128(), entry.ticket_end.u128())
}

/// Sorted-pair internal node: smaller hash first.
fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    if a.as_slice() <= b.as_slice() {
        hasher.update(a);
        hasher.update(b);
    } else {
        hasher.update(b);
        hasher.update(a);
    }
    hasher.finalize().into()
}

fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [a, b] => hash_pair(a, b),
            // odd node is carried up unchanged
            [a] => *a,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Root over `leaves` in order. `None` for an empty tree.
pub fn merkle_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    Some(level[0])
}

/// Sibling hashes (hex) proving `leaves[index]` is under the root.
pub fn merkle_proof(leaves: &[[u8; 32]], index: usize) -> Option<Vec<String>> {
    if index >= leaves.len() {
        return None;
    }
    let mut proof = vec![];
    let mut level = leaves.to_vec();
    let mut position = index;
    while level.len() > 1 {
        let sibling = position ^ 1;
        if let Some(hash) = level.get(sibling) {
            proof.push(hex::encode(hash));
        }
        level = next_level(&level);
        position /= 2;
    }
    Some(proof)
}

/// Verify a Merkle proof against a known root.
///
/// Uses sorted-pair hashing: for each sibling in the proof,
/// if current <= sibling then hash(current || sibling), else hash(sibling || current).
///
/// Returns true if the computed root matches the expected root.
pub fn verify_merkle_proof(root_hex: &str, proof_hex: &[String], leaf_hash: &[u8; 32]) -> bool {
    let expected_root = match hex::decode(root_hex) {
        Ok(v) => v,
        Err(_) => return false,
    };
    if expected_root.len() != 32 {
        return false;
    }

    let mut current = *leaf_hash;

    for sibling_hex in proof_hex {
        let sibling: [u8; 32] = match hex::decode(sibling_hex).map(<[u8; 32]>::try_from) {
            Ok(Ok(v)) => v,
            _ => return false,
        };
        current = hash_pair(&current, &sibling);
    }

    current.as_slice() == expected_root.as_slice()
}

impl Snapshot {
    pub fn leaf_hashes(&self) -> Vec<[u8; 32]> {
        self.holders.iter().map(entry_leaf_hash).collect()
    }

    /// Hex root committing to every holder's range, `None` when empty.
    pub fn merkle_root(&self) -> Option<String> {
        merkle_root(&self.leaf_hashes()).map(hex::encode)
    }

    /// Inclusion proof for the holder at `index`.
    pub fn inclusion_proof(&self, index: usize) -> Option<Vec<String>> {
        merkle_proof(&self.leaf_hashes(), index)
    }
}
