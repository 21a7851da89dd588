//! [`RefStore`](refgate_core::RefStore) backed by the `git` command line.
//!
//! Every operation runs one `git` subprocess against the repository:
//! `rev-parse --symbolic-full-name` to canonicalize, `for-each-ref` to
//! enumerate branches, `merge-base --is-ancestor` for reachability.

pub mod error;
pub mod repo;

pub use error::GitError;
pub use repo::GitRepo;
