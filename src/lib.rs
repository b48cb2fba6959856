//! Purpose: Library crate behind the `fileport` binary.
//! Exports: `core` (port engine, tasks, codecs, errors), `runtime` (tokio owner context).
//! Role: Turns blocking filesystem calls into ordered, non-blocking ports.
//! Invariants: One logical owner per port; all Port State mutation happens there.
//! Invariants: The engine in `core` never spawns or sleeps; `runtime` supplies both.
pub mod core;
pub mod runtime;
