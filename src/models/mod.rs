// src/models/mod.rs
//! Data structures exchanged with the claim engine.

pub mod credential;
pub mod did;
