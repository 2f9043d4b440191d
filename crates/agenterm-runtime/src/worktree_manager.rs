//! Git worktree lifecycle: create/remove/list/status/log/diff. Grounded on
//! `engine/src/workspace.rs`'s create/delete-worktree effect functions and
//! `swarm-agents/src/worktree_bridge.rs`'s porcelain-output parsing; both
//! run git as an argv-level `tokio::process::Command`, never through a
//! shell, so branch/path values can't be interpreted as shell syntax.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use agenterm_core::error::{AgentTermError, Result};
use agenterm_types::worktree::{is_valid_branch_name, is_valid_worktree_path};
use tokio::process::Command;

pub struct WorktreeManager {
    repo_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct WorktreeListEntry {
    pub path: String,
    pub branch: Option<String>,
}

/// Parsed `git status --porcelain` for a worktree.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WorktreeStatusReport {
    pub modified: Vec<String>,
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    pub untracked: Vec<String>,
    pub clean: bool,
}

/// One entry from `git log`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub hash: String,
    pub message: String,
    pub author: String,
    pub date: String,
}

impl WorktreeManager {
    /// Verifies `repo_root` is a git worktree/repo root before accepting it.
    pub async fn new(repo_root: impl Into<PathBuf>) -> Result<Self> {
        let repo_root = repo_root.into();
        let output = run_git(&repo_root, &["rev-parse", "--git-dir"]).await?;
        if !output.status.success() {
            return Err(AgentTermError::Input(format!(
                "{} is not a git repository",
                repo_root.display()
            )));
        }
        Ok(Self { repo_root })
    }

    /// Creates `.worktrees/<slug>` on a new branch `{feature,bug}/<slug>`.
    /// Rejects any branch or path that fails validation before touching git.
    pub async fn create(&self, branch: &str, slug: &str) -> Result<String> {
        if !is_valid_branch_name(branch) {
            return Err(AgentTermError::Input(format!("invalid branch name: {branch}")));
        }
        let path = format!("{}/.worktrees/{}", self.repo_root.display(), slug);
        if !is_valid_worktree_path(&self.repo_root.display().to_string(), &path) {
            return Err(AgentTermError::Input(format!("invalid worktree path: {path}")));
        }

        let output = run_git(
            &self.repo_root,
            &["worktree", "add", "-b", branch, &path, "HEAD"],
        )
        .await?;
        if !output.status.success() {
            return Err(AgentTermError::Transient(format!(
                "git worktree add failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(path)
    }

    /// Removes the worktree and deletes its branch. Refuses to run against
    /// a path outside `.worktrees/` even if asked, matching `create`'s
    /// validation so a stored `Worktree.path` can never be weaponized.
    pub async fn remove(&self, path: &str, branch: &str) -> Result<()> {
        if !is_valid_worktree_path(&self.repo_root.display().to_string(), path) {
            return Err(AgentTermError::Input(format!("refusing to remove non-worktree path: {path}")));
        }
        let output = run_git(&self.repo_root, &["worktree", "remove", "--force", path]).await?;
        if !output.status.success() {
            return Err(AgentTermError::Transient(format!(
                "git worktree remove failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let branch_output = run_git(&self.repo_root, &["branch", "-D", branch]).await?;
        if !branch_output.status.success() {
            tracing::warn!(branch, "failed to delete branch after worktree removal");
        }
        Ok(())
    }

    /// Parses `git worktree list --porcelain`, tracking `worktree`/`branch`
    /// lines across the blank-line-delimited record blocks.
    pub async fn list(&self) -> Result<Vec<WorktreeListEntry>> {
        let output = run_git(&self.repo_root, &["worktree", "list", "--porcelain"]).await?;
        if !output.status.success() {
            return Err(AgentTermError::Transient(format!(
                "git worktree list failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        let mut current_path: Option<String> = None;
        let mut current_branch: Option<String> = None;
        for line in text.lines() {
            if let Some(path) = line.strip_prefix("worktree ") {
                if let Some(p) = current_path.take() {
                    entries.push(WorktreeListEntry { path: p, branch: current_branch.take() });
                }
                current_path = Some(path.to_string());
            } else if let Some(branch_ref) = line.strip_prefix("branch ") {
                current_branch = Some(branch_ref.trim_start_matches("refs/heads/").to_string());
            } else if line.is_empty() {
                if let Some(p) = current_path.take() {
                    entries.push(WorktreeListEntry { path: p, branch: current_branch.take() });
                }
            }
        }
        if let Some(p) = current_path.take() {
            entries.push(WorktreeListEntry { path: p, branch: current_branch.take() });
        }
        Ok(entries)
    }

    /// True if the worktree has no uncommitted changes (`git status --porcelain` is empty).
    pub async fn is_clean(&self, path: &str) -> Result<bool> {
        Ok(self.status(path).await?.clean)
    }

    /// Parses `git status --porcelain` into modified/added/deleted/untracked
    /// buckets. Rename lines (`R  old -> new`) are reported under `modified`
    /// by their new path.
    pub async fn status(&self, path: &str) -> Result<WorktreeStatusReport> {
        let output = run_git(Path::new(path), &["status", "--porcelain"]).await?;
        if !output.status.success() {
            return Err(AgentTermError::Transient(format!(
                "git status failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut report = WorktreeStatusReport::default();
        for line in text.lines() {
            if line.len() < 3 {
                continue;
            }
            let code = &line[..2];
            let file = line[3..].split(" -> ").next_back().unwrap_or("").to_string();
            if code == "??" {
                report.untracked.push(file);
                continue;
            }
            let (x, y) = (code.as_bytes()[0] as char, code.as_bytes()[1] as char);
            if x == 'D' || y == 'D' {
                report.deleted.push(file);
            } else if x == 'A' || y == 'A' {
                report.added.push(file);
            } else {
                report.modified.push(file);
            }
        }
        report.clean = report.modified.is_empty()
            && report.added.is_empty()
            && report.deleted.is_empty()
            && report.untracked.is_empty();
        Ok(report)
    }

    /// True once a `[READY_FOR_REVIEW]`-prefixed commit reaches `HEAD` or a
    /// `.ready_for_review` marker file is present at the worktree root.
    pub async fn is_ready_for_review(&self, path: &str) -> Result<bool> {
        if tokio::fs::try_exists(Path::new(path).join(".ready_for_review"))
            .await
            .unwrap_or(false)
        {
            return Ok(true);
        }
        let output = run_git(Path::new(path), &["log", "-1", "--pretty=%B"]).await?;
        if !output.status.success() {
            return Ok(false);
        }
        let message = String::from_utf8_lossy(&output.stdout);
        Ok(message.trim_start().starts_with("[READY_FOR_REVIEW]"))
    }

    pub async fn log(&self, path: &str, max_entries: u32) -> Result<Vec<LogEntry>> {
        const RS: char = '\u{1e}';
        const FS: char = '\u{1f}';
        let format = format!("--pretty=format:%H{FS}%s{FS}%an{FS}%aI{RS}");
        let output = run_git(Path::new(path), &["log", &format!("-{max_entries}"), &format]).await?;
        if !output.status.success() {
            return Err(AgentTermError::Transient(format!(
                "git log failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let mut entries = Vec::new();
        for record in text.split(RS) {
            let record = record.trim();
            if record.is_empty() {
                continue;
            }
            let fields: Vec<&str> = record.split(FS).collect();
            if let [hash, message, author, date] = fields[..] {
                entries.push(LogEntry {
                    hash: hash.to_string(),
                    message: message.to_string(),
                    author: author.to_string(),
                    date: date.to_string(),
                });
            }
        }
        Ok(entries)
    }

    pub async fn diff(&self, path: &str) -> Result<String> {
        let output = run_git(Path::new(path), &["diff"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

async fn run_git(cwd: &Path, args: &[&str]) -> Result<std::process::Output> {
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(AgentTermError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::process::Command as TestCommand;

    async fn init_repo(dir: &Path) {
        TestCommand::new("git").arg("init").arg("-q").current_dir(dir).output().await.unwrap();
        TestCommand::new("git").args(["config", "user.email", "test@example.com"]).current_dir(dir).output().await.unwrap();
        TestCommand::new("git").args(["config", "user.name", "test"]).current_dir(dir).output().await.unwrap();
        tokio::fs::write(dir.join("README.md"), "hello").await.unwrap();
        TestCommand::new("git").args(["add", "."]).current_dir(dir).output().await.unwrap();
        TestCommand::new("git").args(["commit", "-q", "-m", "init"]).current_dir(dir).output().await.unwrap();
    }

    #[tokio::test]
    async fn create_and_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let manager = WorktreeManager::new(dir.path()).await.unwrap();

        let path = manager.create("feature/add-login", "add-login").await.unwrap();
        let entries = manager.list().await.unwrap();
        assert!(entries.iter().any(|e| e.path == path));
        assert!(manager.is_clean(&path).await.unwrap());
    }

    #[tokio::test]
    async fn create_rejects_invalid_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let manager = WorktreeManager::new(dir.path()).await.unwrap();
        let result = manager.create("chore/bad", "bad").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn remove_deletes_worktree_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path()).await;
        let manager = WorktreeManager::new(dir.path()).await.unwrap();
        let path = manager.create("feature/add-login", "add-login").await.unwrap();

        manager.remove(&path, "feature/add-login").await.unwrap();
        let entries = manager.list().await.unwrap();
        assert!(!entries.iter().any(|e| e.path == path));
    }
}
