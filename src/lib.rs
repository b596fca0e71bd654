// src/lib.rs
// ────────────────────────────────────────────────────────────────────────────
// Public library entry point.  Re-export everything for both `main.rs` and
// integration tests.

pub mod macros;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod events;
pub mod monitor;
pub mod output;
pub mod policy;
pub mod techs;
pub mod workflows;
