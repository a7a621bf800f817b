use tracing::debug;

use crate::blocks::{Block, BlockPartition, NodeFlag, NodeRec, StageError};

// Growth caps share one rule: a positive `max_add` limits the nodes
// claimed by this call, and the block size cap applies unless the caller
// passes -2 to ignore it.
fn caps_hit(n_added: usize, size: usize, max_size: usize, max_add: i32) -> bool {
    (max_add > 0 && n_added >= max_add as usize) || (size >= max_size && max_add != -2)
}

impl BlockPartition<'_> {
    /// Grow the block by one breadth layer, claiming free neighbours
    /// without arbitration.
    ///
    /// Only the boundary nodes present when the pass starts are visited;
    /// nodes claimed during the pass wait for the next call. Returns the
    /// number of nodes claimed.
    pub fn advance_greedy(&mut self, b: usize, max_add: i32) -> Result<usize, StageError> {
        if !self.blocks[b].is_active {
            return Ok(0);
        }
        let mesh = self.mesh();
        let block_num = self.blocks[b].block_num;
        let max_size = self.blocks[b].max_size;
        let mut size = self.blocks[b].size();
        let mut n_added = 0usize;

        let n_bound = self.blocks[b].boundary.len();
        for bound_cnt in 0..n_bound {
            if caps_hit(n_added, size, max_size, max_add) {
                break;
            }
            let curr_node = self.blocks[b].boundary[bound_cnt].node_num;
            if self.flags[curr_node] == NodeFlag::ExhaustedBoundary {
                continue;
            }

            let mut any_added = false;
            for &linked in mesh.neighbors(curr_node) {
                if linked < 0 {
                    continue;
                }
                let link_node = linked as usize;
                if self.flags[link_node] != NodeFlag::Free {
                    continue;
                }
                if caps_hit(n_added, size, max_size, max_add) {
                    break;
                }

                self.flags[link_node] = NodeFlag::Boundary;
                self.owner[link_node] = block_num;
                self.blocks[b].boundary.push(NodeRec::new(link_node));
                n_added += 1;
                size += 1;
                any_added = true;
            }

            if !any_added {
                // no point in coming back to this node
                self.flags[curr_node] = NodeFlag::ExhaustedBoundary;
            }
            if self.surrounded_by_self(curr_node, block_num) {
                self.flags[curr_node] = NodeFlag::Interior;
            }
        }

        self.settle_promotions(b);
        self.tidy_boundaries(b)?;
        self.blocks[b].last_advance = n_added;
        Ok(n_added)
    }

    /// Grow the block by one breadth layer with arbitration.
    ///
    /// With `greedy` false, a free neighbour that another active block
    /// could also claim is marked ambiguous and handed to the caller
    /// instead of being taken.
    pub fn advance(
        &mut self,
        b: usize,
        ambiguous_nodes: &mut Vec<NodeRec>,
        greedy: bool,
        max_add: i32,
    ) -> Result<usize, StageError> {
        if !self.blocks[b].is_active {
            return Ok(0);
        }
        let mesh = self.mesh();
        let block_num = self.blocks[b].block_num;
        let max_size = self.blocks[b].max_size;
        let mut size = self.blocks[b].size();
        let mut n_added = 0usize;

        let n_bound = self.blocks[b].boundary.len();
        for bound_cnt in 0..n_bound {
            if caps_hit(n_added, size, max_size, max_add) {
                break;
            }
            let curr_node = self.blocks[b].boundary[bound_cnt].node_num;

            for &linked in mesh.neighbors(curr_node) {
                if linked < 0 {
                    continue;
                }
                let link_node = linked as usize;
                if self.flags[link_node] != NodeFlag::Free {
                    continue;
                }

                let mut single_link = true;
                if !greedy {
                    // the candidate is contended if any of its neighbours
                    // already belongs to a different active block
                    for &linked_in in mesh.neighbors(link_node) {
                        if linked_in < 0 {
                            continue;
                        }
                        let neighbour = linked_in as usize;
                        let neighbour_block = self.owner[neighbour];
                        let link_is_active = neighbour_block >= 0
                            && self.blocks[neighbour_block as usize].is_active;
                        if self.flags[neighbour] != NodeFlag::Free
                            && neighbour_block != block_num
                            && link_is_active
                        {
                            single_link = false;
                            break;
                        }
                    }
                }

                if single_link {
                    if caps_hit(n_added, size, max_size, max_add) {
                        break;
                    }
                    self.flags[link_node] = NodeFlag::Boundary;
                    self.owner[link_node] = block_num;
                    self.blocks[b].boundary.push(NodeRec::new(link_node));
                    n_added += 1;
                    size += 1;
                } else {
                    self.flags[link_node] = NodeFlag::Ambiguous;
                    if !ambiguous_nodes
                        .iter()
                        .any(|rec| rec.node_num == link_node)
                    {
                        ambiguous_nodes.push(NodeRec::new(link_node));
                    }
                }
            }

            if self.surrounded_by_self(curr_node, block_num) {
                self.flags[curr_node] = NodeFlag::Interior;
            }

            if caps_hit(n_added, size, max_size, max_add) {
                break;
            }
        }

        self.settle_promotions(b);
        self.tidy_boundaries(b)?;
        self.blocks[b].last_advance = n_added;
        Ok(n_added)
    }

    /// Seed a new block from this block's boundary, claiming free
    /// neighbours that no third block could also reach, then settle this
    /// block.
    ///
    /// Returns the new block's slot, or -1 when nothing could be claimed
    /// or the block was not active.
    pub fn gen_new_block(&mut self, b: usize) -> i32 {
        if !self.blocks[b].is_active {
            return -1;
        }
        let mesh = self.mesh();
        let block_num = self.blocks[b].block_num;
        let new_block_num = self.blocks.len() as i32;
        let mut new_block = self.blocks[b].derive(new_block_num);

        let bound_nodes: Vec<usize> = self.blocks[b]
            .boundary
            .iter()
            .map(|rec| rec.node_num)
            .collect();
        for curr_node in bound_nodes {
            for &linked in mesh.neighbors(curr_node) {
                if linked < 0 {
                    continue;
                }
                let link_node = linked as usize;
                if self.flags[link_node] != NodeFlag::Free {
                    continue;
                }

                let mut single_link = true;
                for &linked_in in mesh.neighbors(link_node) {
                    if linked_in < 0 {
                        continue;
                    }
                    let neighbour = linked_in as usize;
                    if self.flags[neighbour] != NodeFlag::Free
                        && self.owner[neighbour] != block_num
                        && self.owner[neighbour] != new_block_num
                    {
                        single_link = false;
                        break;
                    }
                }
                if single_link {
                    self.flags[link_node] = NodeFlag::Boundary;
                    self.owner[link_node] = new_block_num;
                    new_block.boundary.push(NodeRec::new(link_node));
                }
            }
        }

        new_block.parent = block_num;
        let claimed = new_block.size();
        let new_slot = if claimed == 0 {
            self.blocks[b].child = -1;
            -1
        } else {
            self.blocks[b].child = new_block_num;
            self.blocks.push(new_block);
            new_block_num
        };
        debug!(parent = block_num, child = new_slot, claimed, "seeded new block");
        self.blocks[b].is_active = false;
        new_slot
    }

    /// Take the block back to its skin: release the interior and every
    /// boundary node that does not touch a settled block.
    pub fn minimise(&mut self, b: usize) {
        if !self.blocks[b].is_active {
            return;
        }
        let mesh = self.mesh();

        let interior = std::mem::take(&mut self.blocks[b].interior);
        for rec in interior {
            self.owner[rec.node_num] = -1;
            self.flags[rec.node_num] = NodeFlag::Free;
        }

        let boundary = std::mem::take(&mut self.blocks[b].boundary);
        let mut kept = Vec::with_capacity(boundary.len());
        for rec in boundary {
            let node = rec.node_num;
            let mut inactive_linked = false;
            for &linked in mesh.neighbors(node) {
                if linked < 0 {
                    continue;
                }
                let link_block = self.owner[linked as usize];
                if link_block >= 0 && !self.blocks[link_block as usize].is_active {
                    inactive_linked = true;
                    break;
                }
            }

            if inactive_linked {
                self.flags[node] = NodeFlag::Boundary;
                kept.push(rec);
            } else {
                self.owner[node] = -1;
                self.flags[node] = NodeFlag::Free;
            }
        }
        self.blocks[b].boundary = kept;
    }

    /// Release every node owned by the block and clear both lists. The
    /// block stays in the vector.
    pub fn erase(&mut self, b: usize) {
        let interior = std::mem::take(&mut self.blocks[b].interior);
        let boundary = std::mem::take(&mut self.blocks[b].boundary);
        for rec in interior.iter().chain(boundary.iter()) {
            self.owner[rec.node_num] = -1;
            self.flags[rec.node_num] = NodeFlag::Free;
        }
    }

    /// Give the block a new number and rewrite the ownership of every
    /// node it holds.
    pub fn renumber(&mut self, b: usize, new_number: i32) {
        Self::renumber_block(&mut self.owner, &mut self.blocks[b], new_number);
    }

    pub(crate) fn renumber_block(owner: &mut [i32], block: &mut Block, new_number: i32) {
        block.block_num = new_number;
        for rec in block.interior.iter().chain(block.boundary.iter()) {
            owner[rec.node_num] = new_number;
        }
    }

    /// Move every node of `from` into `into`, leaving `from` empty but
    /// still in the vector.
    pub fn combine_from(&mut self, into: usize, from: usize) -> Result<(), StageError> {
        let into_num = self.blocks[into].block_num;
        let from_revision = self.blocks[from].modified_times;
        if from_revision > self.blocks[into].modified_times {
            self.blocks[into].modified_times = from_revision;
        }

        let mut moved_interior = std::mem::take(&mut self.blocks[from].interior);
        let mut moved_boundary = std::mem::take(&mut self.blocks[from].boundary);
        for rec in moved_interior.iter().chain(moved_boundary.iter()) {
            self.owner[rec.node_num] = into_num;
        }

        // incoming nodes are spliced ahead of the existing ones
        moved_interior.extend(self.blocks[into].interior.drain(..));
        moved_boundary.extend(self.blocks[into].boundary.drain(..));
        self.blocks[into].interior = moved_interior;
        self.blocks[into].boundary = moved_boundary;

        self.tidy_boundaries(into)
    }

    // True when every neighbour of the node belongs to this block.
    fn surrounded_by_self(&self, node: usize, block_num: i32) -> bool {
        self.mesh()
            .neighbors(node)
            .iter()
            .all(|&linked| linked >= 0 && self.owner[linked as usize] == block_num)
    }

    // Move the boundary records promoted during a pass onto the interior
    // list, keeping the remaining boundary order intact.
    fn settle_promotions(&mut self, b: usize) {
        let flags = &self.flags;
        let block = &mut self.blocks[b];
        let (promoted, kept): (Vec<NodeRec>, Vec<NodeRec>) = block
            .boundary
            .drain(..)
            .partition(|rec| flags[rec.node_num] == NodeFlag::Interior);
        block.interior.extend(promoted);
        block.boundary = kept;
    }
}
