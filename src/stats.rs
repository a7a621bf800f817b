// This file has code from https://github.com/LIHPC-Computational-Geometry/coupe
use num_traits::FromPrimitive;
use num_traits::ToPrimitive;
use num_traits::Zero;
use std::iter::Sum;
use std::ops::AddAssign;
use std::ops::Div;
use std::ops::Sub;

use crate::blocks::Block;

// Calculates the total weight carried by each block of a given layout.
// Unowned nodes (owner -1) contribute to no block.
pub fn compute_block_loads<W>(owner: &[i32], num_blocks: usize, weights: W) -> Vec<W::Item>
where
    W: IntoIterator,
    W::Item: Zero + Clone + AddAssign,
{
    let mut loads = vec![W::Item::zero(); num_blocks];

    for (&block, w) in owner.iter().zip(weights.into_iter()) {
        if block >= 0 && (block as usize) < num_blocks {
            loads[block as usize] += w;
        }
    }

    loads
}

/// Compute the imbalance of the given block layout.
///
/// Zero means every block carries the ideal weight; the value is the
/// worst relative deviation above the ideal.
pub fn imbalance<W>(num_blocks: usize, owner: &[i32], weights: W) -> f64
where
    W: IntoIterator,
    W::Item: Clone + PartialOrd + PartialEq,
    W::Item: Zero + FromPrimitive + ToPrimitive,
    W::Item: AddAssign + Div<Output = W::Item> + Sub<Output = W::Item> + Sum,
{
    if num_blocks == 0 {
        return 0.0;
    }

    let block_loads = compute_block_loads(owner, num_blocks, weights);

    let total_weight: W::Item = block_loads.iter().cloned().sum();

    let ideal_block_weight =
        total_weight.to_f64().unwrap_or(0.0) / num_blocks.to_f64().unwrap_or(1.0);
    if ideal_block_weight == 0.0 {
        return 0.0;
    }

    block_loads
        .into_iter()
        .map(|block_weight| {
            let block_weight: f64 = block_weight.to_f64().unwrap_or(0.0);
            (block_weight - ideal_block_weight) / ideal_block_weight
        })
        .fold(0.0f64, |acc, dev| acc.max(dev))
}

/// The node count of every block in the vector.
pub fn block_sizes(blocks: &[Block]) -> Vec<usize> {
    blocks.iter().map(Block::size).collect()
}
