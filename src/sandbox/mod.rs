//! Sandbox module - Per-job filesystem workspace
//!
//! This module handles:
//! - Creating a uniquely named workspace directory per job
//! - Writing the job's source file into it
//! - Removing it on every exit path
//!
//! The sandbox module does NOT:
//! - Isolate processes (that is the runner's job)
//! - Know about languages or commands

pub mod workspace;

pub use workspace::Workspace;
