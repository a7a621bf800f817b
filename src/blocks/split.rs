use tracing::{info, warn};

use crate::blocks::{Block, BlockPartition, NodeFlag, NodeRec, StageError};

impl BlockPartition<'_> {
    /// Multi source breadth first search constrained to this block's
    /// nodes.
    ///
    /// The caller seeds `depths` with 1 at the sources and 0 elsewhere.
    /// Returns the final wavefront depth and the last node reached, or
    /// -1 when the wave never left the seeds.
    pub fn depth_in_block(&self, b: usize, depths: &mut [i32]) -> (i32, i32) {
        let mesh = self.mesh();
        let block = &self.blocks[b];
        let block_num = block.block_num;

        let mut curr_depth = 1;
        let mut deep_node = -1i32;
        // a plain counter bounds the sweep in case the state is corrupt
        for _ in 0..2 * mesh.len() {
            let next_depth = curr_depth + 1;
            let mut update_points = 0;
            for rec in block.interior.iter().chain(block.boundary.iter()) {
                let node = rec.node_num;
                if depths[node] != curr_depth {
                    continue;
                }
                for &linked in mesh.neighbors(node) {
                    if linked < 0 {
                        continue;
                    }
                    let check_node = linked as usize;
                    if depths[check_node] == 0 && self.owner[check_node] == block_num {
                        depths[check_node] = next_depth;
                        deep_node = check_node as i32;
                        update_points += 1;
                    }
                }
            }
            if update_points == 0 {
                break;
            }
            curr_depth = next_depth;
        }
        (curr_depth, deep_node)
    }

    // Double sweep search for a pair of nodes far apart inside the
    // block. Each sweep projects depths from the current seed and jumps
    // to the deepest node found; the two most recent endpoints are kept
    // and the search stops once both repeat.
    fn find_furthest(
        &self,
        b: usize,
        start_node: usize,
        depths: &mut [i32],
    ) -> Result<[i32; 2], StageError> {
        let block_num = self.blocks[b].block_num;
        let mut deep_loc = [-1i32; 2];
        let mut is_good = [false; 2];
        let mut curr_node = start_node;

        for cnt in 0..self.max_peripheral_sweeps {
            depths.fill(0);
            depths[curr_node] = 1;
            let (max_depth, deepest_node) = self.depth_in_block(b, depths);

            if deepest_node == -1 {
                return Err(StageError::new(
                    "block splitting",
                    2403,
                    format!("no maximum depth found in block {block_num}"),
                ));
            }
            if max_depth == 1 {
                return Err(StageError::new(
                    "block splitting",
                    2404,
                    format!(
                        "maximum depth == 1, the starting depth, in block {block_num}"
                    ),
                ));
            }

            if deep_loc[cnt % 2] == deepest_node {
                is_good[cnt % 2] = true;
                if is_good[(cnt + 1) % 2] {
                    // both endpoints are repeating
                    break;
                }
            } else {
                is_good[cnt % 2] = false;
            }
            deep_loc[cnt % 2] = deepest_node;
            curr_node = deepest_node as usize;
        }
        Ok(deep_loc)
    }

    /// Split a connected block in two, seeding the halves at a pair of
    /// far apart nodes and growing them towards each other.
    ///
    /// The first half takes over this block's slot; the second is pushed
    /// onto the vector and its slot is returned. A single node block
    /// cannot be split and yields -1.
    pub fn split(&mut self, b: usize) -> Result<i32, StageError> {
        if self.blocks[b].size() == 1 {
            warn!(
                block = self.blocks[b].block_num,
                "cannot split a single node block"
            );
            return Ok(-1);
        }

        let mesh = self.mesh();
        let self_num = self.blocks[b].block_num;

        // depth projection needs a starting node that has a neighbour
        // inside the block
        let mut start_node = -1i32;
        for rec in &self.blocks[b].boundary {
            let node = rec.node_num;
            let has_links = mesh
                .neighbors(node)
                .iter()
                .any(|&linked| linked >= 0 && self.owner[linked as usize] == self_num);
            if has_links {
                start_node = node as i32;
                break;
            }
        }
        if start_node == -1 {
            return Err(StageError::new(
                "block splitting",
                2402,
                format!("unable to find a good starting node in block {self_num}"),
            ));
        }

        let mut depths = self.take_depths();
        let deep_loc = match self.find_furthest(b, start_node as usize, &mut depths) {
            Ok(deep_loc) => deep_loc,
            Err(error) => {
                self.give_depths(depths);
                return Err(error);
            }
        };
        self.give_depths(depths);

        if deep_loc[0] == deep_loc[1] {
            return Err(StageError::new(
                "block splitting",
                2405,
                format!("deepest points are the same, in {self_num}"),
            ));
        }

        self.blocks[b].modified_times += 1;
        let base = self.blocks.len() as i32;
        let mut halves = [
            self.blocks[b].derive(base + 1),
            self.blocks[b].derive(base),
        ];

        for cnt in 0..2 {
            let seed = deep_loc[cnt] as usize;
            halves[cnt].boundary.push(NodeRec::new(seed));
            self.owner[seed] = halves[cnt].block_num;
            self.flags[seed] = NodeFlag::Boundary;
        }

        self.grow_halves(b, self_num, &mut halves, false);

        Self::redo_block(mesh, &mut self.flags, &self.owner, &mut halves[0])?;
        Self::redo_block(mesh, &mut self.flags, &self.owner, &mut halves[1])?;

        // each half states whether it touches the old chain neighbours:
        // bit 0 for prev, bit 1 for next
        let self_prev = self.blocks[b].prev;
        let self_next = self.blocks[b].next;
        let mut before_after = [0i32; 2];
        for cnt in 0..2 {
            for linked in Self::links_of(mesh, &self.owner, &halves[cnt]) {
                if linked == self_prev && before_after[cnt] % 2 == 0 {
                    before_after[cnt] += 1;
                }
                if linked == self_next && (before_after[cnt] / 2) % 2 == 0 {
                    before_after[cnt] += 2;
                }
            }
        }

        if before_after == [0, 0] {
            warn!(block = self_num, "cannot find adjacent blocks");
        }
        // decide the order; the first half dominates when both want the
        // same side
        let order = match before_after[0] {
            1 => 1,
            2 => 2,
            _ => match before_after[1] {
                1 => 2,
                _ => 1,
            },
        };

        // the first half takes over this slot
        Self::renumber_block(&mut self.owner, &mut halves[0], self_num);
        // this also picks up any node the growth never reached
        self.redo_lists(b)?;

        let [_, mut second] = halves;
        let second_num = second.block_num;

        if order == 1 {
            self.blocks[b].prev = self_prev;
            self.blocks[b].next = second_num;
            second.prev = self_num;
            second.next = self_next;
            if self_prev >= 0 {
                self.blocks[self_prev as usize].next = self_num;
            }
            if self_next >= 0 {
                self.blocks[self_next as usize].prev = second_num;
            }
        } else {
            self.blocks[b].prev = second_num;
            self.blocks[b].next = self_next;
            second.prev = self_prev;
            second.next = self_num;
            if self_prev >= 0 {
                self.blocks[self_prev as usize].next = second_num;
            }
            if self_next >= 0 {
                self.blocks[self_next as usize].prev = self_num;
            }
        }

        info!(
            new_block = second_num,
            new_size = second.size(),
            remaining = self.blocks[b].size(),
            "split block"
        );
        self.blocks.push(second);
        Ok(self.blocks.len() as i32 - 1)
    }

    /// Split a block that is stretched between its two chain neighbours,
    /// seeding each half against one neighbour so the chain order is
    /// preserved.
    ///
    /// With `limit_size` the halves honour the block size cap and a block
    /// beyond twice the cap is rejected with -1. A block with no chain
    /// neighbours falls back to a plain split.
    pub fn split_in_layer(&mut self, b: usize, limit_size: bool) -> Result<i32, StageError> {
        let self_num = self.blocks[b].block_num;
        if limit_size && self.blocks[b].size() > 2 * self.blocks[b].max_size {
            warn!(
                block = self_num,
                size = self.blocks[b].size(),
                "block is too large to be split into two"
            );
            return Ok(-1);
        }

        let self_prev = self.blocks[b].prev;
        let self_next = self.blocks[b].next;
        if self_prev == -1 && self_next == -1 {
            // not attached on either side, so do a standard split
            return self.split(b);
        }

        let mesh = self.mesh();
        self.blocks[b].modified_times += 1;
        let base = self.blocks.len() as i32;
        let mut halves = [
            self.blocks[b].derive(base + 1),
            self.blocks[b].derive(base),
        ];

        // seed each half with the nodes touching one chain neighbour
        let bound_blocks = [self_prev, self_next];
        for cnt in 0..2 {
            if bound_blocks[cnt] == -1 {
                continue;
            }
            let seeds: Vec<usize> = self.blocks[bound_blocks[cnt] as usize]
                .boundary
                .iter()
                .map(|rec| rec.node_num)
                .collect();
            for node in seeds {
                for &linked in mesh.neighbors(node) {
                    if linked < 0 {
                        continue;
                    }
                    let link_node = linked as usize;
                    if self.owner[link_node] == self_num {
                        halves[cnt].boundary.push(NodeRec::new(link_node));
                        self.owner[link_node] = halves[cnt].block_num;
                        self.flags[link_node] = NodeFlag::Boundary;
                    }
                }
            }
        }

        if halves[0].size() == 0 && halves[1].size() == 0 {
            return Err(StageError::new(
                "block splitting in layer",
                2406,
                format!(
                    "both blocks seeded with zero size, block {self_num} \
                     (next {self_next}, prev {self_prev})"
                ),
            ));
        }

        // a missing neighbour leaves one half empty; seed it at the node
        // deepest away from the other half
        for cnt in 0..2 {
            if halves[cnt].size() != 0 {
                continue;
            }
            let mut depths = self.take_depths();
            for rec in &halves[(cnt + 1) % 2].boundary {
                depths[rec.node_num] = 1;
            }
            let (_, deepest_node) = self.depth_in_block(b, &mut depths);
            self.give_depths(depths);

            if deepest_node == -1 {
                return Err(StageError::new(
                    "block splitting in layer",
                    2407,
                    format!("no maximum depth found, block {self_num}"),
                ));
            }
            let seed = deepest_node as usize;
            halves[cnt].boundary.push(NodeRec::new(seed));
            self.owner[seed] = halves[cnt].block_num;
            self.flags[seed] = NodeFlag::Boundary;
        }

        if halves[0].size() == 0 || halves[1].size() == 0 {
            return Err(StageError::new(
                "block splitting in layer",
                2408,
                format!(
                    "one block seeded with zero size, block {self_num} \
                     (next {self_next}, prev {self_prev})"
                ),
            ));
        }

        self.grow_halves(b, self_num, &mut halves, limit_size);

        Self::tidy_block(mesh, &mut self.flags, &self.owner, &mut halves[0])?;
        Self::tidy_block(mesh, &mut self.flags, &self.owner, &mut halves[1])?;

        // the half grown against prev takes over this slot, the other is
        // appended after it in the chain
        Self::renumber_block(&mut self.owner, &mut halves[0], self_num);
        self.redo_lists(b)?;

        let [_, mut second] = halves;
        let second_num = second.block_num;
        self.blocks[b].prev = self_prev;
        self.blocks[b].next = second_num;
        second.prev = self_num;
        second.next = self_next;
        if self_prev >= 0 {
            self.blocks[self_prev as usize].next = self_num;
        }
        if self_next >= 0 {
            self.blocks[self_next as usize].prev = second_num;
        }

        info!(
            new_block = second_num,
            new_size = second.size(),
            remaining = self.blocks[b].size(),
            "split block in layer"
        );
        self.blocks.push(second);
        Ok(self.blocks.len() as i32 - 1)
    }

    // Alternating growth of two detached halves over the nodes still
    // owned by the parent. The currently smaller half advances first;
    // when a round claims nothing the preference flips, and when the
    // flipped round also claims nothing the growth is done.
    fn grow_halves(
        &mut self,
        b: usize,
        parent_num: i32,
        halves: &mut [Block; 2],
        limit_size: bool,
    ) {
        let mesh = self.mesh();
        let max_rounds = self.blocks[b].size();
        let mut try_other = false;
        for _ in 0..max_rounds {
            let side = if (halves[0].size() > halves[1].size()) != try_other {
                1
            } else {
                0
            };
            if limit_size && halves[side].size() >= halves[side].max_size {
                continue;
            }

            let mut n_added = 0;
            let n_bound = halves[side].boundary.len();
            for bound_cnt in 0..n_bound {
                let curr_node = halves[side].boundary[bound_cnt].node_num;
                for &linked in mesh.neighbors(curr_node) {
                    if linked < 0 {
                        continue;
                    }
                    let link_node = linked as usize;
                    if self.owner[link_node] == parent_num {
                        halves[side].boundary.push(NodeRec::new(link_node));
                        self.owner[link_node] = halves[side].block_num;
                        self.flags[link_node] = NodeFlag::Boundary;
                        n_added += 1;
                    }
                }
            }

            if n_added == 0 {
                if try_other {
                    break;
                }
                try_other = true;
            }
        }
    }

    /// Flood fill the block from its first boundary node and move every
    /// unreached component into a block of its own.
    ///
    /// An extracted component inherits the chain neighbour it physically
    /// touches, which loses its link to this block.
    pub fn separate_unjoined(&mut self, b: usize) -> Result<(), StageError> {
        let mesh = self.mesh();
        let self_num = self.blocks[b].block_num;
        if self.blocks[b].boundary.is_empty() {
            warn!(block = self_num, "no boundary nodes, nothing to separate");
            return Ok(());
        }

        let mut depths = self.take_depths();
        let first_node = self.blocks[b].boundary[0].node_num;
        depths[first_node] = 1;
        let _ = self.depth_in_block(b, &mut depths);

        let bound_nodes: Vec<usize> = self.blocks[b]
            .boundary
            .iter()
            .map(|rec| rec.node_num)
            .collect();

        let mut block_changed = false;
        for seed in bound_nodes {
            if depths[seed] != 0 {
                continue;
            }
            block_changed = true;

            // found a node the flood fill never reached; pull its whole
            // component out into a fresh block
            let new_block_num = self.blocks.len() as i32;
            let mut new_block = self.blocks[b].derive(new_block_num);
            new_block.boundary.push(NodeRec::new(seed));
            self.owner[seed] = new_block_num;
            self.flags[seed] = NodeFlag::Boundary;

            loop {
                let mut n_added = 0;
                let n_bound = new_block.boundary.len();
                for bound_cnt in 0..n_bound {
                    let curr_node = new_block.boundary[bound_cnt].node_num;
                    for &linked in mesh.neighbors(curr_node) {
                        if linked < 0 {
                            continue;
                        }
                        let link_node = linked as usize;
                        if self.owner[link_node] == self_num {
                            new_block.boundary.push(NodeRec::new(link_node));
                            self.owner[link_node] = new_block_num;
                            self.flags[link_node] = NodeFlag::Boundary;
                            depths[link_node] = 1;
                            n_added += 1;
                        }
                    }
                }
                if n_added == 0 {
                    break;
                }
            }

            Self::tidy_block(mesh, &mut self.flags, &self.owner, &mut new_block)?;
            new_block.prev = -1;
            new_block.next = -1;

            // the component keeps whichever chain neighbour it actually
            // touches
            let self_prev = self.blocks[b].prev;
            let self_next = self.blocks[b].next;
            for linked in Self::links_of(mesh, &self.owner, &new_block) {
                if linked == self_prev {
                    new_block.prev = linked;
                    self.blocks[linked as usize].next = new_block_num;
                    self.blocks[b].prev = -1;
                }
                if linked == self_next {
                    new_block.next = linked;
                    self.blocks[linked as usize].prev = new_block_num;
                    self.blocks[b].next = -1;
                }
            }

            info!(
                new_block = new_block_num,
                original = self_num,
                size = new_block.size(),
                "separated disconnected section"
            );
            self.blocks.push(new_block);
        }
        self.give_depths(depths);

        if block_changed {
            self.redo_lists(b)?;
        }
        Ok(())
    }
}
