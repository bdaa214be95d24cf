// src/utils/mod.rs
//! Hashing and encoding helpers.

pub mod crypto;
pub mod multihash;
pub mod serialization;
