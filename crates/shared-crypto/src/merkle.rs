//! # Merkle Root
//!
//! Binary keccak tree. An odd node at the end of a level is promoted to the
//! next level unhashed, so the root commits to the leaf count: `[a, b, c]`
//! and `[a, b, c, c]` give different roots.

use crate::hashing::{keccak256_concat, Hash};

/// Root over the given leaves. The empty tree hashes to zero.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => keccak256_concat(&[left, right]),
                _ => pair[0],
            })
            .collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::keccak256;
    use proptest::prelude::*;

    #[test]
    fn test_single_leaf_is_root() {
        let leaf = keccak256(b"only");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_odd_leaf_is_promoted() {
        let a = keccak256(b"a");
        let b = keccak256(b"b");
        let c = keccak256(b"c");
        let ab = keccak256_concat(&[&a, &b]);
        assert_eq!(merkle_root(&[a, b, c]), keccak256_concat(&[&ab, &c]));
    }

    #[test]
    fn test_repeated_last_leaf_changes_root() {
        let leaves: Vec<Hash> = [b"a", b"b", b"c"].iter().map(|l| keccak256(*l)).collect();
        let mut padded = leaves.clone();
        padded.push(leaves[2]);
        assert_ne!(merkle_root(&leaves), merkle_root(&padded));
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    proptest! {
        #[test]
        fn prop_root_commits_to_leaf_count(seeds in prop::collection::vec(any::<u64>(), 1..16)) {
            let leaves: Vec<Hash> = seeds.iter().map(|s| keccak256(&s.to_be_bytes())).collect();
            let mut extended = leaves.clone();
            extended.push(leaves[leaves.len() - 1]);
            prop_assert_ne!(merkle_root(&leaves), merkle_root(&extended));
        }

        #[test]
        fn prop_root_depends_on_order(seeds in prop::collection::vec(any::<u64>(), 2..16)) {
            let leaves: Vec<Hash> = seeds.iter().map(|s| keccak256(&s.to_be_bytes())).collect();
            let mut swapped = leaves.clone();
            swapped.swap(0, 1);
            prop_assume!(leaves[0] != leaves[1]);
            prop_assert_ne!(merkle_root(&leaves), merkle_root(&swapped));
        }
    }
}
