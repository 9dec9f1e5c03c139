//! Engine library for `mirrorfs`: fans FUSE operations out across N replica
//! directories and flags divergences. See `DESIGN.md` for how each module
//! maps onto the component design, and `SPEC_FULL.md` for the contract each
//! one implements. `src/main.rs` is a thin CLI/mount wrapper around this
//! crate so the engine itself stays testable without a live FUSE session.

pub mod config;
pub mod equivalence;
pub mod fanout;
pub mod fs;
pub mod handle_table;
pub mod inode;
pub mod pathutil;
pub mod registry;
pub mod sys;
