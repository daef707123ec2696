//! # tagstream-monitor
//!
//! Positioning stream console.
//!
//! Foreground tool that connects a [`tagstream_core`] provider to the
//! terminal: every event the provider emits is printed as a log record
//! or, with `--json`, as one JSON object per line for piping into other
//! tooling.
//!
//! ## Modes
//!
//! - **Live**: point it at a LocalSense server and a set of tag ids.
//! - **Simulated**: run against the built-in simulation, no hardware.

pub mod config;
