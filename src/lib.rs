// Partitions the nodes of an unstructured finite element mesh into an
// ordered sequence of contiguous blocks. Each block maps to one GPU
// memory tile and the prev/next chain between blocks keeps neighbouring
// tiles adjacent in memory.
pub mod blocks;
pub mod gen_mesh;
pub mod io;
pub mod mesh;
pub mod stats;

pub use blocks::{Block, BlockPartition, NodeFlag, NodeRec, StageError};
pub use mesh::Mesh;
