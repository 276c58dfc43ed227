//! Artifact sink implementations.
//!
//! Each sink implements [`ArtifactSink`](crate::traits::ArtifactSink):
//! - `directory` - a local directory per container, atomic overwrite
//! - `memory` - in-process blobs, for tests and dry runs

pub mod directory;
pub mod memory;

pub use directory::DirectorySink;
pub use memory::MemorySink;
