use std::env;
use std::path::Path;
use std::time::Instant;

use MeshBlocker::blocks::BlockPartition;
use MeshBlocker::io::read_matrix_market_as_mesh;
use MeshBlocker::stats::imbalance;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "./testdata/mesh.mtx".to_string());
    let mesh = read_matrix_market_as_mesh(Path::new(&path));

    let mut partition = BlockPartition::new(&mesh, 32, 4);
    let mut owner = vec![-1; mesh.len()];
    if !owner.is_empty() {
        owner[0] = 0;
    }
    partition.separate(&owner)?;

    let start = Instant::now();

    // Grow a chain of blocks across the mesh: each block fills to its
    // cap, then seeds a successor from its boundary.
    let mut current = 0usize;
    loop {
        let added = partition.advance_greedy(current, -1)?;
        if added > 0 && partition.blocks[current].size() < partition.max_size() {
            continue;
        }
        let child = partition.gen_new_block(current);
        if child < 0 {
            break;
        }
        current = child as usize;
    }

    // Pull apart anything the growth left disconnected.
    let mut block = 0;
    while block < partition.blocks.len() {
        partition.separate_unjoined(block)?;
        block += 1;
    }

    let elapsed_time = start.elapsed();
    let weights = vec![1.0; mesh.len()];
    println!("Blocks {:?}", partition.blocks.len());
    println!("Cross edges {:?}", mesh.cross_edges(&partition.owner));
    println!(
        "Imbalance {:?}",
        imbalance(partition.blocks.len(), &partition.owner, weights)
    );
    println!("Verified {:?}", partition.verify_all());
    println!("Execution time {:?}", elapsed_time);
    Ok(())
}
