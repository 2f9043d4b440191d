use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorktreeStatus {
    Active,
    Merged,
    Abandoned,
}

/// Invariant: `path = repo_path/.worktrees/<task-slug>`; branch matches
/// `^(feature|bug)/[a-z0-9-]+$`; exactly one active worktree per branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worktree {
    pub id: Uuid,
    pub project_id: Uuid,
    pub branch: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    pub status: WorktreeStatus,
}

impl Worktree {
    pub fn new(project_id: Uuid, branch: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            branch: branch.into(),
            path: path.into(),
            task_id: None,
            status: WorktreeStatus::Active,
        }
    }
}

/// `^(feature|bug)/[a-z0-9-]+$`
pub fn is_valid_branch_name(branch: &str) -> bool {
    let Some((kind, slug)) = branch.split_once('/') else {
        return false;
    };
    if kind != "feature" && kind != "bug" {
        return false;
    }
    !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Worktree paths must be absolute and under `{repo_path}/.worktrees/`.
pub fn is_valid_worktree_path(repo_path: &str, candidate: &str) -> bool {
    let root = format!("{}/.worktrees/", repo_path.trim_end_matches('/'));
    candidate.starts_with('/') && candidate.starts_with(&root) && candidate.len() > root.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_branch_names() {
        assert!(is_valid_branch_name("feature/add-login"));
        assert!(is_valid_branch_name("bug/fix-123"));
    }

    #[test]
    fn rejects_invalid_branch_names() {
        assert!(!is_valid_branch_name("feature/Add_Login"));
        assert!(!is_valid_branch_name("chore/add-login"));
        assert!(!is_valid_branch_name("feature/"));
        assert!(!is_valid_branch_name("no-slash"));
    }

    #[test]
    fn enforces_worktrees_root() {
        assert!(is_valid_worktree_path("/repo", "/repo/.worktrees/add-login"));
        assert!(!is_valid_worktree_path("/repo", "/repo/.worktrees/"));
        assert!(!is_valid_worktree_path("/repo", "/repo/other/add-login"));
        assert!(!is_valid_worktree_path("/repo", "relative/.worktrees/add-login"));
    }
}
