use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::mesh::Mesh;

/// Generate a structured grid mesh with a 4-neighbourhood.
///
/// Node `y * nx + x` is linked to its left, right, upper and lower
/// neighbours where those exist.
pub fn grid_mesh(nx: usize, ny: usize) -> Mesh {
    let mut edges = Vec::with_capacity(2 * nx * ny);
    for y in 0..ny {
        for x in 0..nx {
            let node = y * nx + x;
            if x + 1 < nx {
                edges.push((node, node + 1));
            }
            if y + 1 < ny {
                edges.push((node, node + nx));
            }
        }
    }
    Mesh::from_edges(nx * ny, &edges)
}

/// Generate a strip mesh, i.e. a path of nodes linked end to end.
pub fn strip_mesh(n_nodes: usize) -> Mesh {
    grid_mesh(n_nodes, 1)
}

/// Generate a random ownership array assigning every node to one of
/// `n_blocks` blocks.
pub fn gen_random_owner(n_nodes: usize, n_blocks: usize, seed: Option<u64>) -> Vec<i32> {
    if n_blocks == 0 {
        panic!("Number of blocks must be positive.");
    }

    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };

    (0..n_nodes)
        .map(|_| rng.gen_range(0..n_blocks) as i32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_mesh_neighbourhood() {
        // Arrange and Act
        let mesh = grid_mesh(4, 4);

        // Assert
        assert_eq!(mesh.len(), 16);
        assert_eq!(mesh.max_links(), 4);
        // corner
        assert_eq!(mesh.degree(0), 2);
        // edge
        assert_eq!(mesh.degree(1), 3);
        // inner
        assert_eq!(mesh.degree(5), 4);
        let mut inner: Vec<i32> = mesh.neighbors(5).to_vec();
        inner.sort_unstable();
        assert_eq!(inner, vec![1, 4, 6, 9]);
    }

    #[test]
    fn test_strip_mesh_is_a_path() {
        // Arrange and Act
        let mesh = strip_mesh(5);

        // Assert
        assert_eq!(mesh.degree(0), 1);
        assert_eq!(mesh.degree(2), 2);
        assert_eq!(mesh.degree(4), 1);
        assert_eq!(mesh.neighbors(0), &[1]);
    }

    #[test]
    fn test_gen_random_owner_is_seeded() {
        // Arrange and Act
        let owner_a = gen_random_owner(32, 4, Some(7));
        let owner_b = gen_random_owner(32, 4, Some(7));

        // Assert
        assert_eq!(owner_a, owner_b);
        assert!(owner_a.iter().all(|&block| (0..4).contains(&block)));
    }
}
