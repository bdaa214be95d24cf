// src/wallet/mod.rs
//! Issuer-side helpers.

pub mod key_management;

pub use key_management::KeyManager;
