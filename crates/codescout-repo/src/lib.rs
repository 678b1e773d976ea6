//! Working-tree access for codescout
//!
//! Everything that touches a repository checkout goes through the
//! [`RepoExec`] shell surface, so the same code paths work against a local
//! checkout and inside an isolated container runtime. Git is driven as a
//! subprocess; there is deliberately no linked git library here.

pub mod error;
pub mod exec;
pub mod git;
pub mod matcher;
pub mod shell;

pub use error::{RepoError, RepoResult};
pub use exec::{ExecResult, LocalExec, RepoExec, read_file_head};
pub use git::{Git, clone_repository};
pub use matcher::{IgnoreMatcher, IgnoreMatchers};
pub use shell::shell_quote;
