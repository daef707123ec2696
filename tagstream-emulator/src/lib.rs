//! # tagstream-emulator
//!
//! Standalone LocalSense server.
//!
//! Thin binary wrapper around [`tagstream_core::Emulator`]: loads a TOML
//! configuration, binds the listen address, and serves synthetic tag
//! traffic until interrupted. Useful for developing against the wire
//! protocol without hardware on the bench.

pub mod config;
