use std::borrow::Cow;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Output;

use refgate_core::{AuthzError, CanonicalRef, ObjectId, RefEntry, RefList, RefStore};
use tokio::process::Command;

use crate::error::GitError;

/// A repository on disk, queried through the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepo {
    path: PathBuf,
    git_bin: String,
}

impl GitRepo {
    /// Open the repository at `path` (a worktree or a bare git dir).
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let repo = Self {
            path: path.into(),
            git_bin: "git".into(),
        };
        let output = repo.git(&["rev-parse", "--git-dir"]).await?;
        if !output.status.success() {
            return Err(GitError::NotARepository(repo.path.display().to_string()));
        }
        tracing::debug!(path = %repo.path.display(), "Opened git repository");
        Ok(repo)
    }

    /// Override the git binary, e.g. when it is not on `PATH`.
    pub fn with_bin(mut self, git_bin: impl Into<String>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn git(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = Command::new(&self.git_bin)
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .await?;
        Ok(output)
    }

    async fn git_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        String::from_utf8(output.stdout).map_err(|e| GitError::Parse(e.to_string()))
    }

    async fn resolve(&self, name: &str) -> Result<Option<String>, GitError> {
        // Never let a ref name be read as an option.
        if name.is_empty() || name.starts_with('-') {
            return Ok(None);
        }
        let output = self
            .git(&["rev-parse", "--verify", "--quiet", "--symbolic-full-name", name])
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        let resolved = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!resolved.is_empty()).then_some(resolved))
    }

    async fn for_each_ref(&self, prefix: &str, list: &mut RefList) -> Result<(), GitError> {
        let stdout = self
            .git_checked(&["for-each-ref", "--format=%(objectname) %(refname)", prefix])
            .await?;

        for line in stdout.lines().filter(|l| !l.is_empty()) {
            list.push(parse_ref_line(line)?);
        }
        tracing::debug!(prefix, total = list.len(), "Enumerated refs");
        Ok(())
    }

    async fn merge_base_is_ancestor(
        &self,
        commit: &ObjectId,
        tip: &ObjectId,
    ) -> Result<bool, GitError> {
        let commit = commit.to_hex();
        let tip = tip.to_hex();
        let output = self
            .git(&["merge-base", "--is-ancestor", &commit, &tip])
            .await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GitError::CommandFailed {
                command: "merge-base".into(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

fn parse_ref_line(line: &str) -> Result<RefEntry, GitError> {
    let (oid, name) = line
        .split_once(' ')
        .ok_or_else(|| GitError::Parse(line.to_string()))?;
    let tip = ObjectId::from_hex(oid).map_err(|e| GitError::Parse(format!("{line}: {e}")))?;
    Ok(RefEntry {
        name: name.to_string(),
        tip,
    })
}

impl RefStore for GitRepo {
    fn canonicalize<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<CanonicalRef<'a>>, AuthzError>> + Send + 'a>>
    {
        Box::pin(async move {
            let resolved = self.resolve(name).await?;
            Ok(resolved.map(|full| {
                if full == name {
                    Cow::Borrowed(name)
                } else {
                    Cow::Owned(full)
                }
            }))
        })
    }

    fn collect_branch_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.for_each_ref("refs/heads/", list).await?) })
    }

    fn collect_remote_refs<'a>(
        &'a self,
        list: &'a mut RefList,
    ) -> Pin<Box<dyn Future<Output = Result<(), AuthzError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.for_each_ref("refs/remotes/", list).await?) })
    }

    fn is_ancestor<'a>(
        &'a self,
        commit: &'a ObjectId,
        tip: &'a ObjectId,
    ) -> Pin<Box<dyn Future<Output = Result<bool, AuthzError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.merge_base_is_ancestor(commit, tip).await?) })
    }
}
