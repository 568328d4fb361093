//! Library surface for the `medivault` binary.
//!
//! The config loader and command implementations live here so doctests and
//! runnable examples can link against them, keeping `main.rs` to argument
//! parsing and output.

pub mod commands;
pub mod config;
