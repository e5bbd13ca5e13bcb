//! Build worktree provisioning.
//!
//! Each build session gets an exclusive git worktree under
//! `.squads/worktrees/{squad_slug}/{card_slug}` on a fresh branch. The
//! engine refuses to reuse a path another card still claims; this module
//! only does the filesystem/git part.

use std::path::{Path, PathBuf};

use log::info;
use tokio::process::Command;

use crate::error::{Error, Result};

/// A provisioned worktree.
#[derive(Debug, Clone)]
pub struct Worktree {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
}

/// Create the worktree and its branch off `base_branch`.
pub async fn provision_worktree(
    project_path: &Path,
    squad_slug: &str,
    card_slug: &str,
    base_branch: &str,
) -> Result<Worktree> {
    let name = format!("{}/{}", squad_slug, card_slug);
    let path = project_path
        .join(".squads")
        .join("worktrees")
        .join(squad_slug)
        .join(card_slug);
    let branch = format!("squads/{}", card_slug);

    if path.exists() {
        return Err(Error::WorktreeClaimed(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Internal(anyhow::anyhow!("creating worktree parent: {}", e)))?;
    }

    let output = Command::new("git")
        .arg("worktree")
        .arg("add")
        .arg("-b")
        .arg(&branch)
        .arg(&path)
        .arg(base_branch)
        .current_dir(project_path)
        .output()
        .await
        .map_err(|e| Error::Internal(anyhow::anyhow!("invoking git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Validation(format!(
            "git worktree add failed: {}",
            stderr.trim()
        )));
    }

    info!(
        "Provisioned worktree {} at {} (branch {})",
        name,
        path.display(),
        branch
    );
    Ok(Worktree { name, path, branch })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .status()
            .await
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    async fn init_repo(dir: &Path) {
        git(dir, &["init", "-b", "main"]).await;
        git(dir, &["config", "user.email", "test@example.com"]).await;
        git(dir, &["config", "user.name", "Test"]).await;
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        git(dir, &["add", "."]).await;
        git(dir, &["commit", "-m", "init"]).await;
    }

    #[tokio::test]
    async fn test_provision_and_claim_conflict() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;

        let worktree = provision_worktree(dir.path(), "alpha", "rate-limit", "main")
            .await
            .unwrap();
        assert!(worktree.path.is_dir());
        assert_eq!(worktree.branch, "squads/rate-limit");
        assert_eq!(worktree.name, "alpha/rate-limit");

        // The same path cannot be provisioned twice.
        let err = provision_worktree(dir.path(), "alpha", "rate-limit", "main")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(err.code(), Some("worktree_claimed"));
    }

    #[tokio::test]
    async fn test_bad_base_branch_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;

        let err = provision_worktree(dir.path(), "alpha", "card", "does-not-exist")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}
