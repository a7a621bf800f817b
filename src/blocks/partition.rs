use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator as _;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::blocks::{Block, NodeFlag, NodeRec, StageError};
use crate::mesh::Mesh;

/// The mutable state of a block layout over one mesh.
///
/// Blocks are identified by their slot in `blocks`; every primitive takes
/// a slot index and looks the block up again after any mutation of the
/// vector, so no reference can dangle across a push or a compaction.
pub struct BlockPartition<'m> {
    mesh: &'m Mesh,
    /// Per-node classification.
    pub flags: Vec<NodeFlag>,
    /// Per-node owning block, or -1 for free nodes.
    pub owner: Vec<i32>,
    /// The growable block vector. Slot indices are block identities.
    pub blocks: Vec<Block>,
    /// Sweep cap for the peripheral pair search. The double sweep
    /// normally converges in a handful of iterations; this only guards
    /// against cycling.
    pub max_peripheral_sweeps: usize,
    max_size: usize,
    depth_scratch: Vec<i32>,
}

impl<'m> BlockPartition<'m> {
    /// Create an empty layout over the given mesh. The block size cap is
    /// the tile node count `x_block_size * y_block_size`.
    pub fn new(mesh: &'m Mesh, x_block_size: usize, y_block_size: usize) -> Self {
        let n_nodes = mesh.len();
        Self {
            mesh,
            flags: vec![NodeFlag::Free; n_nodes],
            owner: vec![-1; n_nodes],
            blocks: Vec::new(),
            max_peripheral_sweeps: 11,
            max_size: x_block_size * y_block_size,
            depth_scratch: vec![0; n_nodes],
        }
    }

    // Returns the mesh with its own lifetime, not tied to this borrow,
    // so callers can keep it across mutations of the partition.
    pub fn mesh(&self) -> &'m Mesh {
        self.mesh
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Borrow the reusable depth buffer, zeroed and sized to the mesh.
    pub(crate) fn take_depths(&mut self) -> Vec<i32> {
        let mut depths = std::mem::take(&mut self.depth_scratch);
        depths.clear();
        depths.resize(self.mesh.len(), 0);
        depths
    }

    pub(crate) fn give_depths(&mut self, depths: Vec<i32>) {
        self.depth_scratch = depths;
    }

    /// Rebuild the block vector from an ownership array.
    ///
    /// Every owned node starts out on its block's boundary list and is
    /// then reclassified; unowned nodes are marked free.
    pub fn separate(&mut self, owner: &[i32]) -> Result<(), StageError> {
        assert_eq!(owner.len(), self.mesh.len());
        self.owner.copy_from_slice(owner);
        self.blocks.clear();

        let max_block = self.owner.iter().copied().max().unwrap_or(0).max(0);
        for block_num in 0..=max_block {
            self.blocks.push(Block::new(block_num, self.max_size));
        }

        let n_blocks = self.blocks.len() as i32;
        for node in 0..self.mesh.len() {
            let block = self.owner[node];
            if block >= 0 {
                if block > n_blocks - 1 {
                    return Err(StageError::new(
                        "getting block definitions",
                        2409,
                        format!("{block} block number found vs number of blocks: {n_blocks}"),
                    ));
                }
                self.blocks[block as usize].boundary.push(NodeRec::new(node));
                self.flags[node] = NodeFlag::Boundary;
            } else {
                self.flags[node] = NodeFlag::Free;
            }
        }

        for block in 0..self.blocks.len() {
            self.tidy_boundaries(block)?;
        }
        Ok(())
    }

    /// Move every boundary node whose neighbours are all owned by this
    /// block onto the interior list.
    pub fn tidy_boundaries(&mut self, b: usize) -> Result<(), StageError> {
        Self::tidy_block(self.mesh, &mut self.flags, &self.owner, &mut self.blocks[b])
    }

    /// Rebuild both node lists of a block from the ownership array.
    pub fn redo_lists(&mut self, b: usize) -> Result<(), StageError> {
        Self::redo_block(self.mesh, &mut self.flags, &self.owner, &mut self.blocks[b])
    }

    // Works on a detached block so that split products can be tidied
    // before they are pushed onto the vector.
    pub(crate) fn tidy_block(
        mesh: &Mesh,
        flags: &mut [NodeFlag],
        owner: &[i32],
        block: &mut Block,
    ) -> Result<(), StageError> {
        let block_num = block.block_num;

        // Classify first so that a corrupt link matrix cannot leave the
        // lists half rebuilt.
        let mut stays_boundary = Vec::with_capacity(block.boundary.len());
        for rec in &block.boundary {
            let node = rec.node_num;
            let mut is_boundary = false;
            for (slot, &linked) in mesh.neighbors(node).iter().enumerate() {
                if linked < 0 {
                    return Err(StageError::new(
                        "tidying boundaries",
                        2401,
                        format!(
                            "linkMat has an undefined node (value {linked}) in node {node} \
                             at position {slot} out of {}",
                            mesh.degree(node)
                        ),
                    ));
                }
                if owner[linked as usize] != block_num {
                    is_boundary = true;
                    break;
                }
            }
            stays_boundary.push(is_boundary);
        }

        let mut kept = Vec::with_capacity(block.boundary.len());
        for (rec, stays) in block.boundary.drain(..).zip(stays_boundary) {
            if stays {
                kept.push(rec);
            } else {
                flags[rec.node_num] = NodeFlag::Interior;
                block.interior.push(rec);
            }
        }
        block.boundary = kept;
        Ok(())
    }

    pub(crate) fn redo_block(
        mesh: &Mesh,
        flags: &mut [NodeFlag],
        owner: &[i32],
        block: &mut Block,
    ) -> Result<(), StageError> {
        block.interior.clear();
        block.boundary.clear();
        let block_num = block.block_num;
        for node in 0..mesh.len() {
            if owner[node] == block_num {
                block.boundary.push(NodeRec::new(node));
                flags[node] = NodeFlag::Boundary;
            }
        }
        Self::tidy_block(mesh, flags, owner, block)
    }

    /// The boundary nodes that still touch free territory.
    pub fn active_nodes(&self, b: usize) -> Vec<NodeRec> {
        self.blocks[b]
            .boundary
            .iter()
            .filter(|rec| {
                self.mesh
                    .neighbors(rec.node_num)
                    .iter()
                    .any(|&linked| linked >= 0 && self.flags[linked as usize] == NodeFlag::Free)
            })
            .copied()
            .collect()
    }

    /// The distinct foreign blocks reachable over one edge from this
    /// block's boundary, in first-contact order.
    pub fn get_links(&self, b: usize) -> Vec<i32> {
        Self::links_of(self.mesh, &self.owner, &self.blocks[b])
    }

    pub(crate) fn links_of(mesh: &Mesh, owner: &[i32], block: &Block) -> Vec<i32> {
        let mut seen = FxHashSet::default();
        let mut linked_blocks = Vec::new();
        for rec in &block.boundary {
            for &linked in mesh.neighbors(rec.node_num) {
                if linked < 0 {
                    continue;
                }
                let link_block = owner[linked as usize];
                if link_block >= 0 && link_block != block.block_num && seen.insert(link_block) {
                    linked_blocks.push(link_block);
                }
            }
        }
        linked_blocks
    }

    /// Check a single block against the layout invariants, logging a
    /// diagnostic and returning false on the first violation.
    pub fn verify(&self, b: usize) -> bool {
        let block = &self.blocks[b];
        let block_num = block.block_num;

        if block_num != b as i32 {
            warn!(slot = b, block_num, "block number does not match its slot");
            return false;
        }

        for rec in &block.interior {
            let node = rec.node_num;
            if self.owner[node] != block_num || self.flags[node] == NodeFlag::Free {
                warn!(block_num, node, "internal nodes list not matching owner array");
                return false;
            }
        }

        let interior_nodes: FxHashSet<usize> =
            block.interior.iter().map(|rec| rec.node_num).collect();
        for rec in &block.boundary {
            let node = rec.node_num;
            if self.owner[node] != block_num || self.flags[node] == NodeFlag::Free {
                warn!(block_num, node, "boundary nodes list not matching owner array");
                return false;
            }
            if interior_nodes.contains(&node) {
                warn!(block_num, node, "a single node appears on both lists");
                return false;
            }
        }

        let owned = self.owner.iter().filter(|&&o| o == block_num).count();
        if owned != block.size() {
            warn!(
                block_num,
                listed = block.size(),
                owned,
                "total counts of lists and owner array not matching"
            );
            return false;
        }

        let n_blocks = self.blocks.len() as i32;
        if block.prev < -1 || block.next < -1 || block.prev >= n_blocks || block.next >= n_blocks {
            warn!(
                block_num,
                prev = block.prev,
                next = block.next,
                n_blocks,
                "chain links out of range"
            );
            return false;
        }
        if block.next != -1 && self.blocks[block.next as usize].prev != block_num {
            warn!(
                block_num,
                next = block.next,
                back = self.blocks[block.next as usize].prev,
                "prev of next block does not point back"
            );
            return false;
        }
        if block.prev != -1 && self.blocks[block.prev as usize].next != block_num {
            warn!(
                block_num,
                prev = block.prev,
                back = self.blocks[block.prev as usize].next,
                "next of prev block does not point back"
            );
            return false;
        }

        let linked_blocks = self.get_links(b);
        let next_is_linked = block.next == -1 || linked_blocks.contains(&block.next);
        let prev_is_linked = block.prev == -1 || linked_blocks.contains(&block.prev);
        if !next_is_linked {
            warn!(block_num, next = block.next, "next block is not physically linked");
        }
        if !prev_is_linked {
            warn!(block_num, prev = block.prev, "prev block is not physically linked");
        }
        next_is_linked && prev_is_linked
    }

    /// Run the verifier across the whole block vector.
    pub fn verify_all(&self) -> bool {
        (0..self.blocks.len())
            .into_par_iter()
            .all(|b| self.verify(b))
    }

    /// Classify a block as growing (0), bordering a growing block (1) or
    /// fully surrounded by settled blocks (2).
    pub fn get_status(&mut self, b: usize) -> i32 {
        let block_flag = if self.blocks[b].is_active {
            0
        } else {
            let linked_blocks = self.get_links(b);
            if linked_blocks.is_empty() {
                debug!(block = self.blocks[b].block_num, "block has no linked neighbours");
            }
            if linked_blocks
                .iter()
                .any(|&linked| self.blocks[linked as usize].is_active)
            {
                1
            } else {
                2
            }
        };
        self.blocks[b].block_flag = block_flag;
        block_flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen_mesh::grid_mesh;
    use crate::mesh::Mesh;

    #[test]
    fn test_separate_builds_lists_from_owner() {
        // Arrange
        let mesh = grid_mesh(4, 4);
        let mut partition = BlockPartition::new(&mesh, 2, 4);
        let mut owner = vec![-1; 16];
        for node in [0, 1, 4, 5] {
            owner[node] = 0;
        }
        for node in [2, 3, 6, 7] {
            owner[node] = 1;
        }

        // Act
        partition.separate(&owner).unwrap();

        // Assert
        assert_eq!(partition.blocks.len(), 2);
        assert_eq!(partition.blocks[0].size(), 4);
        assert_eq!(partition.blocks[1].size(), 4);
        // node 0 only touches nodes 1 and 4, both owned by block 0
        assert_eq!(partition.flags[0], NodeFlag::Interior);
        // node 1 touches node 2, owned by block 1
        assert_eq!(partition.flags[1], NodeFlag::Boundary);
        // node 3 only touches nodes 2 and 7, both owned by block 1
        assert_eq!(partition.flags[3], NodeFlag::Interior);
        assert!(partition.verify_all());
    }

    #[test]
    fn test_separate_with_fully_free_ownership() {
        // Arrange
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![-1; 9];

        // Act
        partition.separate(&owner).unwrap();

        // Assert: one empty block, every node free
        assert_eq!(partition.blocks.len(), 1);
        assert!(partition.flags.iter().all(|&f| f == NodeFlag::Free));
    }

    #[test]
    fn test_tidy_boundaries_raises_on_corrupt_links() {
        // Arrange: degree says two links but the second entry is undefined
        let n_linked = vec![2, 1, 1];
        let link_mat = vec![1, -1, 0, -1, 0, -1];
        let mesh = Mesh::from_raw_parts(3, 2, n_linked, link_mat);
        let mut partition = BlockPartition::new(&mesh, 2, 2);
        let owner = vec![0, 0, 0];

        // Act
        let result = partition.separate(&owner);

        // Assert
        let error = result.unwrap_err();
        assert_eq!(error.code, 2401);
        assert_eq!(error.stage, "tidying boundaries");
    }

    #[test]
    fn test_get_links_is_deduplicated_in_contact_order() {
        // Arrange: three vertical strips in a 3x3 grid
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 1, 2, 0, 1, 2, 0, 1, 2];
        partition.separate(&owner).unwrap();

        // Act
        let links = partition.get_links(1);

        // Assert: the middle strip touches both others exactly once
        assert_eq!(links, vec![0, 2]);
    }

    #[test]
    fn test_active_nodes_require_free_neighbours() {
        // Arrange: block 0 owns the left half, block 1 the top right corner
        let mesh = grid_mesh(4, 4);
        let mut partition = BlockPartition::new(&mesh, 4, 4);
        let mut owner = vec![-1; 16];
        for node in [0, 1, 4, 5, 8, 9, 12, 13] {
            owner[node] = 0;
        }
        owner[2] = 1;
        owner[3] = 1;
        partition.separate(&owner).unwrap();

        // Act
        let active = partition.active_nodes(0);

        // Assert: node 1 touches only owned nodes (0, 2, 5), the rest of
        // the right boundary still sees free territory
        let nodes: Vec<usize> = active.iter().map(|rec| rec.node_num).collect();
        assert_eq!(nodes, vec![5, 9, 13]);
    }

    #[test]
    fn test_get_status_classification() {
        // Arrange
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        partition.separate(&owner).unwrap();
        partition.blocks[0].is_active = false;
        partition.blocks[1].is_active = true;
        partition.blocks[2].is_active = false;

        // Act and Assert
        assert_eq!(partition.get_status(1), 0);
        // block 0 touches the active block 1
        assert_eq!(partition.get_status(0), 1);
        assert_eq!(partition.blocks[0].block_flag, 1);

        // Assert: with block 1 settled, block 0 is fully surrounded
        partition.blocks[1].is_active = false;
        assert_eq!(partition.get_status(0), 2);
    }

    #[test]
    fn test_verify_catches_asymmetric_links() {
        // Arrange
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        partition.separate(&owner).unwrap();
        partition.blocks[0].next = 1;
        partition.blocks[1].prev = 2;

        // Act and Assert
        assert!(!partition.verify(0));
        assert!(!partition.verify_all());
    }

    #[test]
    fn test_verify_catches_owner_list_mismatch() {
        // Arrange
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        partition.separate(&owner).unwrap();
        partition.owner[4] = 2;

        // Act and Assert: both the robbed and the crediting block fail
        assert!(!partition.verify(1));
        assert!(!partition.verify(2));
    }
}
