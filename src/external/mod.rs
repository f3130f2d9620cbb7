//! External tool abstractions
//!
//! Trait-based access to the git toolchain so the bundling logic can run
//! against the real binary or an in-memory double.

pub mod command;
#[cfg(any(test, feature = "testing"))]
pub mod fake;
pub mod git;

pub use command::{CommandError, CommandExecutor, CommandOutput, ProcessCommandExecutor};
#[cfg(any(test, feature = "testing"))]
pub use fake::FakeGit;
pub use git::{GitCli, GitEngine};
