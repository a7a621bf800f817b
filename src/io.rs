use std::fs::File;
use std::io::Write;
use std::path::Path;

use sprs::io::read_matrix_market;
use sprs::TriMatI;

use crate::mesh::Mesh;

/// Read a matrix market file and build the mesh connectivity from its
/// sparsity pattern. Values are ignored; only the structure matters.
pub fn read_matrix_market_as_mesh(file_path: &Path) -> Mesh {
    // Attempt to read the matrix market file with entries as f64.
    let tri_matrix_f64: Result<TriMatI<f64, usize>, _> = read_matrix_market(file_path);

    match tri_matrix_f64 {
        Ok(tri_matrix) => mesh_from_pattern(&tri_matrix),
        Err(_) => {
            // Read was unsuccessful, hence we try reading with entries as i64.
            let tri_matrix_i64: TriMatI<i64, usize> = read_matrix_market(file_path)
                .expect("Failed to read matrix market file as both f64 and i64.");
            mesh_from_pattern(&tri_matrix_i64)
        }
    }
}

fn mesh_from_pattern<N>(tri_matrix: &TriMatI<N, usize>) -> Mesh {
    let n_nodes = tri_matrix.rows().max(tri_matrix.cols());

    let iters = tri_matrix.triplet_iter();
    let row_indices = iters.clone().into_row_inds();
    let col_indices = iters.clone().into_col_inds();

    let mut edges = Vec::with_capacity(tri_matrix.nnz());
    for (row, col) in row_indices.zip(col_indices) {
        edges.push((*row, *col));
    }

    Mesh::from_edges(n_nodes, &edges)
}

/// Write the ownership array to a file.
pub fn write_block_map_to_file(owner: &[i32], file_name: &str) -> Result<(), std::io::Error> {
    let mut file = File::create(file_name)?;
    for node_id in 0..owner.len() {
        writeln!(file, "node {} => block {}", node_id, owner[node_id])?;
    }
    Ok(())
}
