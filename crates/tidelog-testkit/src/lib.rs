//! # tidelog testkit
//!
//! Deterministic fixtures and legacy-dialect vectors for testing the oplog
//! core and the sync layer.

pub mod fixtures;
pub mod vectors;

pub use fixtures::{multi_author, TestAuthor};
pub use vectors::{all_vectors, generate, LegacyVector};
