//! Concrete `Store` implementations.
//!
//! Storage is the embedder's choice; this module ships one reference
//! implementation, [`memory::MemoryStore`], sufficient for embedding
//! in-process and for the test suite.

pub mod memory;

pub use memory::MemoryStore;
