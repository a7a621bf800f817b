use rayon::iter::IntoParallelIterator;
use rayon::iter::ParallelIterator as _;

/// Struct that represents the node connectivity of an unstructured mesh.
///
/// The neighbour relation is stored as a flat matrix of width `max_links`
/// plus a per-node degree vector. Entries beyond a node's degree are `-1`.
pub struct Mesh {
    n_nodes: usize,
    max_links: usize,
    n_linked: Vec<i32>,
    link_mat: Vec<i32>,
}

impl Mesh {
    /// Create a mesh with no links.
    pub fn new(n_nodes: usize, max_links: usize) -> Self {
        Self {
            n_nodes,
            max_links,
            n_linked: vec![0; n_nodes],
            link_mat: vec![-1; n_nodes * max_links],
        }
    }

    /// Build a mesh from an edge list. The matrix width is the maximum
    /// degree found. Self loops and duplicate edges are dropped.
    pub fn from_edges(n_nodes: usize, edges: &[(usize, usize)]) -> Self {
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n_nodes];
        for &(a, b) in edges {
            assert!(a < n_nodes && b < n_nodes, "edge ({a},{b}) is out of range");
            if a == b {
                continue;
            }
            if !adj[a].contains(&b) {
                adj[a].push(b);
                adj[b].push(a);
            }
        }

        let max_links = adj.iter().map(Vec::len).max().unwrap_or(0);
        let mut mesh = Mesh::new(n_nodes, max_links);
        for (node, linked) in adj.iter().enumerate() {
            mesh.n_linked[node] = linked.len() as i32;
            for (slot, &other) in linked.iter().enumerate() {
                mesh.link_mat[node * max_links + slot] = other as i32;
            }
        }
        mesh
    }

    /// Wrap an externally built degree vector and link matrix.
    pub fn from_raw_parts(
        n_nodes: usize,
        max_links: usize,
        n_linked: Vec<i32>,
        link_mat: Vec<i32>,
    ) -> Self {
        assert_eq!(n_linked.len(), n_nodes);
        assert_eq!(link_mat.len(), n_nodes * max_links);
        Self {
            n_nodes,
            max_links,
            n_linked,
            link_mat,
        }
    }

    /// The number of nodes in the mesh.
    pub fn len(&self) -> usize {
        self.n_nodes
    }

    /// Whether the mesh has no nodes.
    pub fn is_empty(&self) -> bool {
        self.n_nodes == 0
    }

    /// The width of the link matrix.
    pub fn max_links(&self) -> usize {
        self.max_links
    }

    /// The degree of the given node.
    pub fn degree(&self, node: usize) -> usize {
        self.n_linked[node] as usize
    }

    /// The in-degree slice of the link matrix row for the given node.
    ///
    /// Entries are node identifiers; a negative entry marks corrupt input
    /// and is rejected by the partition when it reclassifies boundaries.
    pub fn neighbors(&self, node: usize) -> &[i32] {
        let row = node * self.max_links;
        &self.link_mat[row..row + self.degree(node)]
    }

    /// The number of mesh edges whose endpoints have different owners.
    ///
    /// The combinatorial quality measure for a block layout: every cross
    /// edge is a neighbour access that leaves the memory tile.
    pub fn cross_edges(&self, owner: &[i32]) -> usize {
        debug_assert_eq!(self.len(), owner.len());

        (0..self.n_nodes)
            .into_par_iter()
            .map(|node| {
                let node_owner = owner[node];
                self.neighbors(node)
                    .iter()
                    .filter(|&&linked| {
                        linked >= 0
                            && (linked as usize) < node
                            && owner[linked as usize] != node_owner
                    })
                    .count()
            })
            .sum()
    }
}
