//! CLI↔server hybrid write path.
//!
//! `backend` is the only submodule: argument parsing and per-command
//! dispatch live in `main.rs` as a single `Cli`/`Commands` pair rather
//! than splitting each verb into its own module.

pub mod backend;
