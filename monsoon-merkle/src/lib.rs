//! monsoon-merkle
//!
//! Append-only, fixed-depth commitment accumulator. One instance mirrors
//! each chain's on-chain tree and is reconstructible from nothing but the
//! ordered deposit-event leaf sequence. Inserts are incremental
//! (O(levels) via the filled-subtree table); every new root lands in a
//! bounded ring buffer, and only roots still inside that window are
//! accepted for proof verification.

use once_cell::sync::Lazy;
use thiserror::Error;

use monsoon_common::{reduce_be_bytes_to_fr, FieldHasher, Fr};

/// Number of recent roots accepted for proof verification.
pub const ROOT_HISTORY_SIZE: usize = 30;

/// Supported tree depths.
pub const MIN_LEVELS: u32 = 1;
pub const MAX_LEVELS: u32 = 31;

const EMPTY_LEAF_DOMAIN: &[u8] = b"monsoon.merkle.empty-leaf.v1";

static EMPTY_LEAF: Lazy<Fr> = Lazy::new(|| {
    let digest = blake3::hash(EMPTY_LEAF_DOMAIN);
    reduce_be_bytes_to_fr(digest.as_bytes())
});

/// The level-0 hash of an unoccupied leaf slot. A fixed digest-derived
/// constant rather than literal zero, so empty slots have no trivial
/// preimage.
pub fn empty_leaf_value() -> Fr {
    *EMPTY_LEAF
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MerkleError {
    #[error("tree depth {0} outside supported range {MIN_LEVELS}..={MAX_LEVELS}")]
    DepthOutOfRange(u32),

    #[error("leaf index {index} out of range, tree holds {count} leaves")]
    LeafOutOfRange { index: usize, count: usize },

    #[error("tree is full at {0} leaves")]
    TreeFull(u64),
}

/// Inclusion proof: one sibling per level, leaf to root, with side bits
/// (0 = sibling is the right child, 1 = sibling is the left child).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    pub siblings: Vec<Fr>,
    pub bits: Vec<u8>,
}

impl MerklePath {
    /// Fold `leaf` up the path and return the implied root.
    pub fn compute_root<H: FieldHasher>(&self, hasher: &H, leaf: Fr) -> Fr {
        let mut node = leaf;
        for (sibling, bit) in self.siblings.iter().zip(self.bits.iter()) {
            node = if *bit == 0 {
                hasher.hash2(node, *sibling)
            } else {
                hasher.hash2(*sibling, node)
            };
        }
        node
    }
}

/// Incremental fixed-depth accumulator with bounded root history.
#[derive(Clone)]
pub struct MerkleAccumulator<H: FieldHasher> {
    hasher: H,
    levels: u32,
    /// `zero_hashes[l]` is the root of an all-empty subtree of height `l`,
    /// memoized once at construction.
    zero_hashes: Vec<Fr>,
    /// Running left-subtree hash per level for the incremental insert.
    filled_subtrees: Vec<Fr>,
    leaves: Vec<Fr>,
    roots: [Fr; ROOT_HISTORY_SIZE],
    /// Next ring-buffer write position.
    root_cursor: usize,
    /// Number of valid ring entries, saturating at `ROOT_HISTORY_SIZE`.
    roots_recorded: usize,
}

impl<H: FieldHasher> MerkleAccumulator<H> {
    pub fn new(levels: u32, hasher: H) -> Result<Self, MerkleError> {
        if !(MIN_LEVELS..=MAX_LEVELS).contains(&levels) {
            return Err(MerkleError::DepthOutOfRange(levels));
        }

        let mut zero_hashes = Vec::with_capacity(levels as usize + 1);
        zero_hashes.push(empty_leaf_value());
        for level in 1..=levels as usize {
            let below = zero_hashes[level - 1];
            zero_hashes.push(hasher.hash2(below, below));
        }

        let filled_subtrees = zero_hashes[..levels as usize].to_vec();
        let empty_root = zero_hashes[levels as usize];

        let mut tree = Self {
            hasher,
            levels,
            zero_hashes,
            filled_subtrees,
            leaves: Vec::new(),
            roots: [empty_root; ROOT_HISTORY_SIZE],
            root_cursor: 0,
            roots_recorded: 0,
        };
        tree.push_root(empty_root);
        Ok(tree)
    }

    /// Replay an ordered leaf sequence, e.g. one recovered from event logs.
    pub fn from_leaves(
        levels: u32,
        hasher: H,
        leaves: impl IntoIterator<Item = Fr>,
    ) -> Result<Self, MerkleError> {
        let mut tree = Self::new(levels, hasher)?;
        for leaf in leaves {
            tree.insert(leaf)?;
        }
        Ok(tree)
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.levels
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Root of an all-empty subtree of height `level`.
    pub fn zero_hash_at(&self, level: u32) -> Result<Fr, MerkleError> {
        self.zero_hashes
            .get(level as usize)
            .copied()
            .ok_or(MerkleError::DepthOutOfRange(level))
    }

    /// Append a leaf and return the new root.
    pub fn insert(&mut self, leaf: Fr) -> Result<Fr, MerkleError> {
        let index = self.leaves.len() as u64;
        if index == self.capacity() {
            return Err(MerkleError::TreeFull(self.capacity()));
        }

        let mut node = leaf;
        let mut position = index;
        for level in 0..self.levels as usize {
            if position % 2 == 0 {
                // Left child: remember the running subtree, pair with the
                // empty sibling.
                self.filled_subtrees[level] = node;
                node = self.hasher.hash2(node, self.zero_hashes[level]);
            } else {
                node = self.hasher.hash2(self.filled_subtrees[level], node);
            }
            position /= 2;
        }

        self.leaves.push(leaf);
        self.push_root(node);
        Ok(node)
    }

    /// The most recent root.
    pub fn root(&self) -> Fr {
        let last = (self.root_cursor + ROOT_HISTORY_SIZE - 1) % ROOT_HISTORY_SIZE;
        self.roots[last]
    }

    /// Whether `root` is still inside the accepted window. This is the
    /// authoritative membership test for proof verification; anything that
    /// fell out of the ring is no longer provable against.
    pub fn root_is_known(&self, root: Fr) -> bool {
        let window = if self.roots_recorded == ROOT_HISTORY_SIZE {
            &self.roots[..]
        } else {
            &self.roots[..self.roots_recorded]
        };
        window.contains(&root)
    }

    /// Position of a leaf value, if present.
    pub fn index_of(&self, leaf: Fr) -> Option<usize> {
        self.leaves.iter().position(|candidate| *candidate == leaf)
    }

    pub fn leaf_at(&self, index: usize) -> Option<Fr> {
        self.leaves.get(index).copied()
    }

    /// Inclusion proof for the leaf at `index`, rebuilt from the leaf
    /// history with empty-subtree substitution for missing siblings.
    pub fn path_for(&self, index: usize) -> Result<MerklePath, MerkleError> {
        if index >= self.leaves.len() {
            return Err(MerkleError::LeafOutOfRange {
                index,
                count: self.leaves.len(),
            });
        }

        let mut siblings = Vec::with_capacity(self.levels as usize);
        let mut bits = Vec::with_capacity(self.levels as usize);
        let mut nodes = self.leaves.clone();
        let mut position = index;

        for level in 0..self.levels as usize {
            let zero = self.zero_hashes[level];
            let sibling = nodes.get(position ^ 1).copied().unwrap_or(zero);
            siblings.push(sibling);
            bits.push((position % 2) as u8);

            let mut above = Vec::with_capacity((nodes.len() + 1) / 2);
            for pair in nodes.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(zero);
                above.push(self.hasher.hash2(left, right));
            }
            nodes = above;
            position /= 2;
        }

        Ok(MerklePath { siblings, bits })
    }

    fn push_root(&mut self, root: Fr) {
        self.roots[self.root_cursor] = root;
        self.root_cursor = (self.root_cursor + 1) % ROOT_HISTORY_SIZE;
        self.roots_recorded = (self.roots_recorded + 1).min(ROOT_HISTORY_SIZE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monsoon_common::{random_fr, Poseidon};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    /// Full bottom-up rebuild over the zero-padded leaf layer. The
    /// production path is the incremental insert; this survives only as
    /// the cross-check reference.
    fn reference_root(levels: u32, leaves: &[Fr]) -> Fr {
        let h = Poseidon;
        let mut nodes = leaves.to_vec();
        let mut zero = empty_leaf_value();
        for _ in 0..levels {
            if nodes.len() % 2 == 1 {
                nodes.push(zero);
            }
            let mut above = Vec::with_capacity((nodes.len() + 1) / 2);
            for pair in nodes.chunks(2) {
                let left = pair[0];
                let right = pair.get(1).copied().unwrap_or(zero);
                above.push(h.hash2(left, right));
            }
            nodes = above;
            zero = h.hash2(zero, zero);
        }
        nodes.first().copied().unwrap_or(zero)
    }

    fn tree(levels: u32) -> MerkleAccumulator<Poseidon> {
        MerkleAccumulator::new(levels, Poseidon).unwrap()
    }

    #[test]
    fn depth_bounds_are_enforced() {
        assert_eq!(
            MerkleAccumulator::new(0, Poseidon).err(),
            Some(MerkleError::DepthOutOfRange(0))
        );
        assert_eq!(
            MerkleAccumulator::new(32, Poseidon).err(),
            Some(MerkleError::DepthOutOfRange(32))
        );
        assert!(MerkleAccumulator::new(1, Poseidon).is_ok());
        assert!(MerkleAccumulator::new(31, Poseidon).is_ok());
    }

    #[test]
    fn zero_hash_chain_is_consistent() {
        let t = tree(8);
        let h = Poseidon;
        assert_eq!(t.zero_hash_at(0).unwrap(), empty_leaf_value());
        for level in 1..=8 {
            let below = t.zero_hash_at(level - 1).unwrap();
            assert_eq!(t.zero_hash_at(level).unwrap(), h.hash2(below, below));
        }
        assert!(t.zero_hash_at(9).is_err());
    }

    #[test]
    fn empty_root_is_top_zero_hash() {
        let t = tree(6);
        assert_eq!(t.root(), t.zero_hash_at(6).unwrap());
        assert!(t.root_is_known(t.root()));
    }

    #[test]
    fn depth_three_worked_example() {
        // insert [L0, L1, L2]; the root must equal
        // H(H(H(L0,L1), H(L2,Z0)), H(Z1,Z1)) bit for bit.
        let h = Poseidon;
        let l0 = Fr::from(1u64);
        let l1 = Fr::from(2u64);
        let l2 = Fr::from(3u64);
        let z0 = empty_leaf_value();
        let z1 = h.hash2(z0, z0);

        let mut t = tree(3);
        t.insert(l0).unwrap();
        t.insert(l1).unwrap();
        let root = t.insert(l2).unwrap();

        let expected = h.hash2(
            h.hash2(h.hash2(l0, l1), h.hash2(l2, z0)),
            h.hash2(z1, z1),
        );
        assert_eq!(root, expected);
        assert_eq!(t.root(), expected);
    }

    #[test]
    fn incremental_matches_reference_rebuild() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        for levels in [1u32, 2, 3, 4, 6] {
            let capacity = 1usize << levels;
            let leaves: Vec<Fr> = (0..capacity).map(|_| random_fr(&mut rng)).collect();
            let mut t = tree(levels);
            for (taken, leaf) in leaves.iter().enumerate() {
                let root = t.insert(*leaf).unwrap();
                assert_eq!(
                    root,
                    reference_root(levels, &leaves[..=taken]),
                    "divergence at depth {} after {} leaves",
                    levels,
                    taken + 1
                );
            }
        }
    }

    #[test]
    fn paths_round_trip_for_every_index() {
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let h = Poseidon;
        let mut t = tree(4);
        for _ in 0..11 {
            t.insert(random_fr(&mut rng)).unwrap();
        }
        for index in 0..t.leaf_count() {
            let path = t.path_for(index).unwrap();
            assert_eq!(path.siblings.len(), 4);
            assert_eq!(path.bits.len(), 4);
            let leaf = t.leaf_at(index).unwrap();
            assert_eq!(path.compute_root(&h, leaf), t.root());
        }
    }

    #[test]
    fn path_for_unknown_index_fails() {
        let mut t = tree(3);
        t.insert(Fr::from(5u64)).unwrap();
        assert_eq!(
            t.path_for(1).err(),
            Some(MerkleError::LeafOutOfRange { index: 1, count: 1 })
        );
    }

    #[test]
    fn tree_rejects_insert_when_full() {
        let mut t = tree(2);
        for value in 0..4u64 {
            t.insert(Fr::from(value)).unwrap();
        }
        assert_eq!(t.insert(Fr::from(4u64)).err(), Some(MerkleError::TreeFull(4)));
        assert_eq!(t.leaf_count(), 4);
    }

    #[test]
    fn root_history_window_slides() {
        let mut rng = ChaCha20Rng::seed_from_u64(3);
        let mut t = tree(8);
        let early_root = t.insert(random_fr(&mut rng)).unwrap();
        assert!(t.root_is_known(early_root));

        // ROOT_HISTORY_SIZE further inserts push the early root out.
        for _ in 0..ROOT_HISTORY_SIZE {
            t.insert(random_fr(&mut rng)).unwrap();
        }
        assert!(!t.root_is_known(early_root));
        assert!(t.root_is_known(t.root()));
    }

    #[test]
    fn replay_reconstructs_identical_state() {
        let mut rng = ChaCha20Rng::seed_from_u64(4);
        let leaves: Vec<Fr> = (0..9).map(|_| random_fr(&mut rng)).collect();

        let mut sequential = tree(5);
        for leaf in &leaves {
            sequential.insert(*leaf).unwrap();
        }

        let replayed = MerkleAccumulator::from_leaves(5, Poseidon, leaves.clone()).unwrap();
        assert_eq!(replayed.root(), sequential.root());
        assert_eq!(replayed.leaf_count(), sequential.leaf_count());
        for index in 0..leaves.len() {
            assert_eq!(
                replayed.path_for(index).unwrap(),
                sequential.path_for(index).unwrap()
            );
        }
    }

    #[test]
    fn index_lookup_finds_inserted_leaves() {
        let mut t = tree(3);
        let leaf = Fr::from(77u64);
        t.insert(Fr::from(11u64)).unwrap();
        t.insert(leaf).unwrap();
        assert_eq!(t.index_of(leaf), Some(1));
        assert_eq!(t.index_of(Fr::from(99u64)), None);
    }
}
