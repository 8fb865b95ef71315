//! Vector index adapters behind [`ingredb_core::traits::VectorIndex`].
//!
//! `LanceVectorIndex` reads an existing LanceDB table whose rows carry an `id`,
//! a `vector` column and any number of scalar metadata columns.
//! `MemoryVectorIndex` is a brute-force cosine index for tests and small
//! fixtures.

pub mod lance;
pub mod memory;

pub use lance::LanceVectorIndex;
pub use memory::MemoryVectorIndex;
