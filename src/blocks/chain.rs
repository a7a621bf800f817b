use tracing::{info, warn};

use crate::blocks::{BlockPartition, StageError};

impl BlockPartition<'_> {
    /// Merge this block into a chain neighbour, or failing that into any
    /// active physically linked block with a spare chain slot.
    ///
    /// The freed slot is filled by moving the last block of the vector
    /// into it, so block identities above this slot are not stable across
    /// the call. Returns the slot of the combined block, or -1 when no
    /// viable target exists (the block is then settled in place).
    pub fn join(&mut self, b: usize) -> Result<i32, StageError> {
        let self_num = self.blocks[b].block_num;
        let prev = self.blocks[b].prev;
        let next = self.blocks[b].next;

        let join_block;
        let mut both_prev;
        let mut both_next;
        if next != -1 {
            join_block = next;
            both_next = self.blocks[next as usize].next;
            both_prev = prev;
        } else if prev != -1 {
            join_block = prev;
            both_prev = self.blocks[prev as usize].prev;
            both_next = next;
        } else {
            // unchained, fall back to any active linked block that still
            // has a spare slot
            let mut candidate = -1;
            both_prev = -1;
            both_next = -1;
            for linked in self.get_links(b) {
                let target = &self.blocks[linked as usize];
                if !target.is_active {
                    continue;
                }
                if target.prev == -1 {
                    // the target's previous slot is free, so we go before
                    candidate = linked;
                    both_prev = -1;
                    both_next = target.next;
                    break;
                } else if target.next == -1 {
                    // the target's next slot is free, so we go after
                    candidate = linked;
                    both_prev = target.prev;
                    both_next = -1;
                    break;
                }
            }
            if candidate == -1 {
                warn!(block = self_num, "no joining block found");
                self.blocks[b].is_active = false;
                return Ok(-1);
            }
            join_block = candidate;
        }

        if both_prev == self_num || both_prev == join_block {
            both_prev = -1;
        }
        if both_next == self_num || both_next == join_block {
            both_next = -1;
        }

        self.blocks[b].modified_times += 1;
        let target = join_block as usize;
        self.combine_from(target, b)?;

        info!(
            from = self_num,
            into = join_block,
            n_blocks = self.blocks.len(),
            "joining blocks"
        );

        self.blocks[target].next = both_next;
        self.blocks[target].prev = both_prev;
        if both_next >= 0 {
            self.blocks[both_next as usize].prev = join_block;
        }
        if both_prev >= 0 {
            self.blocks[both_prev as usize].next = join_block;
        }

        // fill the freed slot with the last block of the vector
        let last = self.blocks.len() - 1;
        let mut combined = join_block;
        if b != last {
            self.blocks[b].modified_times = 0;
            self.combine_from(b, last)?;

            let moved_next = self.blocks[last].next;
            let moved_prev = self.blocks[last].prev;
            self.blocks[b].next = moved_next;
            self.blocks[b].prev = moved_prev;
            if moved_next >= 0 {
                self.blocks[moved_next as usize].prev = self_num;
            }
            if moved_prev >= 0 {
                self.blocks[moved_prev as usize].next = self_num;
            }
            if combined as usize == last {
                combined = self_num;
            }
        }
        self.blocks.pop();
        Ok(combined)
    }

    /// Drop any chain link that no longer matches physical adjacency,
    /// clearing the back pointer as well. Returns false when a link had
    /// to be severed.
    pub fn check_links(&mut self, b: usize) -> bool {
        let linked_blocks = self.get_links(b);
        let prev = self.blocks[b].prev;
        let next = self.blocks[b].next;
        let prev_is_linked = linked_blocks.contains(&prev);
        let next_is_linked = linked_blocks.contains(&next);

        let mut intact = true;
        if prev != -1 && !prev_is_linked {
            // not attached, so remove this link
            self.blocks[prev as usize].next = -1;
            self.blocks[b].prev = -1;
            intact = false;
        }
        if next != -1 && !next_is_linked {
            self.blocks[next as usize].prev = -1;
            self.blocks[b].next = -1;
            intact = false;
        }
        intact
    }

    /// Same repair as `check_links`, exposed for callers that only want
    /// the cleanup.
    pub fn remove_false_links(&mut self, b: usize) -> bool {
        self.check_links(b)
    }

    /// Settle this block and, when its chain neighbours touch each other,
    /// splice them together directly. Returns whether the direct relink
    /// succeeded.
    pub fn deactivate_relink(&mut self, b: usize) -> bool {
        let self_num = self.blocks[b].block_num;
        let prev = self.blocks[b].prev;
        let next = self.blocks[b].next;

        if next < 0 {
            self.blocks[b].is_active = false;
            if prev >= 0 {
                self.blocks[prev as usize].next = -1;
            }
            self.blocks[b].prev = -1;
            return false;
        }

        let next_links = self.get_links(next as usize);
        if prev != -1 && next_links.contains(&prev) {
            info!(block = self_num, prev, next, "removing block and linking adjacent");
            self.blocks[b].is_active = false;
            self.blocks[next as usize].prev = prev;
            self.blocks[prev as usize].next = next;
            self.blocks[b].next = -1;
            self.blocks[b].prev = -1;
            true
        } else {
            warn!(
                block = self_num,
                "previous and next blocks are not adjacent, cannot relink"
            );
            self.blocks[b].is_active = false;
            self.blocks[next as usize].prev = -1;
            if prev >= 0 {
                self.blocks[prev as usize].next = -1;
            }
            self.blocks[b].next = -1;
            self.blocks[b].prev = -1;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::blocks::BlockPartition;
    use crate::gen_mesh::grid_mesh;

    fn block_nodes(partition: &BlockPartition, b: usize) -> Vec<usize> {
        let mut nodes: Vec<usize> = partition.blocks[b]
            .interior
            .iter()
            .chain(partition.blocks[b].boundary.iter())
            .map(|rec| rec.node_num)
            .collect();
        nodes.sort_unstable();
        nodes
    }

    #[test]
    fn test_join_into_next_then_compact() {
        // Arrange: three chained blocks over the 4x4 grid
        let mesh = grid_mesh(4, 4);
        let mut partition = BlockPartition::new(&mesh, 4, 2);
        let mut owner = vec![-1; 16];
        for node in [0, 1, 4, 5] {
            owner[node] = 0;
        }
        for node in [2, 3, 6, 7] {
            owner[node] = 1;
        }
        for node in 8..16 {
            owner[node] = 2;
        }
        partition.separate(&owner).unwrap();
        partition.blocks[0].next = 1;
        partition.blocks[1].prev = 0;
        partition.blocks[1].next = 2;
        partition.blocks[2].prev = 1;

        // Act
        let combined = partition.join(0).unwrap();

        // Assert: the merge lands in the old slot 1; the last block is
        // moved into the freed slot 0 and renumbered
        assert_eq!(combined, 1);
        assert_eq!(partition.blocks.len(), 2);
        assert_eq!(block_nodes(&partition, 1), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(block_nodes(&partition, 0), (8..16).collect::<Vec<_>>());
        assert_eq!(partition.blocks[0].block_num, 0);
        assert_eq!(partition.blocks[1].block_num, 1);
        // the chain now runs merged block -> moved block
        assert_eq!(partition.blocks[1].prev, -1);
        assert_eq!(partition.blocks[1].next, 0);
        assert_eq!(partition.blocks[0].prev, 1);
        assert_eq!(partition.blocks[0].next, -1);
        assert!(partition.verify_all());
    }

    #[test]
    fn test_join_into_prev_when_no_next() {
        // Arrange: two chained blocks, the tail joins backwards
        let mesh = grid_mesh(4, 2);
        let mut partition = BlockPartition::new(&mesh, 4, 2);
        let owner = vec![0, 0, 1, 1, 0, 0, 1, 1];
        partition.separate(&owner).unwrap();
        partition.blocks[0].next = 1;
        partition.blocks[1].prev = 0;

        // Act
        let combined = partition.join(1).unwrap();

        // Assert: slot 1 was the last slot, so nothing had to move
        assert_eq!(combined, 0);
        assert_eq!(partition.blocks.len(), 1);
        assert_eq!(block_nodes(&partition, 0), vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(partition.blocks[0].prev, -1);
        assert_eq!(partition.blocks[0].next, -1);
        assert!(partition.verify_all());
    }

    #[test]
    fn test_join_unchained_uses_physical_links() {
        // Arrange: no chain links at all, block 1 is the only active
        // neighbour of block 0
        let mesh = grid_mesh(4, 2);
        let mut partition = BlockPartition::new(&mesh, 4, 2);
        let owner = vec![0, 0, 1, 1, 0, 0, 1, 1];
        partition.separate(&owner).unwrap();

        // Act
        let combined = partition.join(0).unwrap();

        // Assert
        assert_eq!(combined, 0);
        assert_eq!(partition.blocks.len(), 1);
        assert_eq!(partition.blocks[0].size(), 8);
        assert!(partition.verify_all());
    }

    #[test]
    fn test_join_with_no_target_settles_in_place() {
        // Arrange: a lone block with free territory around it
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, -1, -1, -1, -1, -1, -1];
        partition.separate(&owner).unwrap();

        // Act
        let combined = partition.join(0).unwrap();

        // Assert
        assert_eq!(combined, -1);
        assert!(!partition.blocks[0].is_active);
        assert_eq!(partition.blocks.len(), 1);
    }

    #[test]
    fn test_check_links_severs_stale_chain() {
        // Arrange: blocks 0 and 2 are chained but do not touch
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        partition.separate(&owner).unwrap();
        partition.blocks[0].next = 2;
        partition.blocks[2].prev = 0;

        // Act
        let intact = partition.check_links(0);

        // Assert
        assert!(!intact);
        assert_eq!(partition.blocks[0].next, -1);
        assert_eq!(partition.blocks[2].prev, -1);
        assert!(partition.verify_all());
    }

    #[test]
    fn test_check_links_keeps_true_chain() {
        // Arrange
        let mesh = grid_mesh(3, 3);
        let mut partition = BlockPartition::new(&mesh, 3, 3);
        let owner = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        partition.separate(&owner).unwrap();
        partition.blocks[0].next = 1;
        partition.blocks[1].prev = 0;

        // Act and Assert
        assert!(partition.check_links(0));
        assert_eq!(partition.blocks[0].next, 1);
    }

    #[test]
    fn test_deactivate_relink_splices_adjacent_neighbours() {
        // Arrange: the middle strip's neighbours touch through it and
        // also directly along the grid rows? They do not, so use three
        // columns where outer columns share no edge; instead chain three
        // row strips and drop the middle one of a layout where the outer
        // rows touch: a 2x3 grid with interleaved ownership.
        let mesh = grid_mesh(3, 2);
        let mut partition = BlockPartition::new(&mesh, 3, 2);
        // block 0 owns nodes 0 and 3, block 1 nodes 1 and 4, block 2
        // nodes 2 and 5; block 1 sits between the other two but blocks 0
        // and 2 do not touch
        partition.separate(&[0, 1, 2, 0, 1, 2]).unwrap();
        partition.blocks[0].next = 1;
        partition.blocks[1].prev = 0;
        partition.blocks[1].next = 2;
        partition.blocks[2].prev = 1;

        // Act
        let relinked = partition.deactivate_relink(1);

        // Assert: no direct contact, both sides severed
        assert!(!relinked);
        assert!(!partition.blocks[1].is_active);
        assert_eq!(partition.blocks[0].next, -1);
        assert_eq!(partition.blocks[2].prev, -1);
        assert_eq!(partition.blocks[1].prev, -1);
        assert_eq!(partition.blocks[1].next, -1);

        // Arrange again with neighbours that genuinely touch: blocks 0
        // and 2 share column edges when ownership interleaves by row
        let mesh = grid_mesh(2, 3);
        let mut partition = BlockPartition::new(&mesh, 2, 3);
        // rows: block 0 on top, block 1 in the middle, block 2 at the
        // bottom, and block 0 also owns one node of the middle row so the
        // outer blocks touch
        partition.separate(&[0, 0, 0, 1, 2, 2]).unwrap();
        partition.blocks[1].prev = 0;
        partition.blocks[0].next = 1;
        partition.blocks[1].next = 2;
        partition.blocks[2].prev = 1;

        // Act
        let relinked = partition.deactivate_relink(1);

        // Assert: block 2 touches block 0 through nodes 2 and 4
        assert!(relinked);
        assert!(!partition.blocks[1].is_active);
        assert_eq!(partition.blocks[0].next, 2);
        assert_eq!(partition.blocks[2].prev, 0);
        assert_eq!(partition.blocks[1].prev, -1);
        assert_eq!(partition.blocks[1].next, -1);
    }
}
