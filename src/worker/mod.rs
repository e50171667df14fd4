//! Script execution for submitted jobs.
//!
//! - **Artifact creation**: [`ScriptRunner::create`] writes the script body to
//!   a uniquely named executable file, adding a `#!` line when missing
//! - **Execution**: [`ScriptRunner::spawn`] runs the artifact on its own task
//!   and returns an [`Execution`] handle
//! - **Kill / cleanup**: signal a live process, delete the artifact
//!
//! # Execution Flow
//!
//! 1. `new` -> `running`, start time recorded
//! 2. The artifact is exec'd directly; stdout/stderr stream into the job
//! 3. Exit status (or spawn failure) is recorded as the job's outcome
//! 4. `running` -> `complete`, completion time recorded
//!
//! Scripts run with the server's privileges. There is no sandboxing.

pub mod runner;

pub use runner::{Execution, ScriptRunner, DEFAULT_SHELL};
