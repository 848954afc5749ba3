//! Shared token primitives for chat services.
//!
//! `jwt` holds the process-wide Ed25519 key material and the claim set that
//! every service agrees on.

pub mod jwt;
