use std::path::{Path, PathBuf};

/// A path confirmed by the engine to be inside a git working tree.
///
/// Only [`crate::external::GitEngine::open_repository`] hands these out, so
/// holding one means the check already happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryHandle {
    path: PathBuf,
    git_dir: PathBuf,
}

impl RepositoryHandle {
    pub(crate) fn new(path: impl Into<PathBuf>, git_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            git_dir: git_dir.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// Directory name of the working tree, used for default bundle names.
    pub fn name(&self) -> String {
        self.path
            .canonicalize()
            .ok()
            .as_deref()
            .unwrap_or(&self.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "repository".to_string())
    }

    /// Advisory lock file used by callers to serialize mutating operations.
    pub fn lock_path(&self) -> PathBuf {
        self.git_dir.join("git-carrier.lock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_lives_in_git_dir() {
        let repo = RepositoryHandle::new("/work/project", "/work/project/.git");
        assert_eq!(
            repo.lock_path(),
            PathBuf::from("/work/project/.git/git-carrier.lock")
        );
    }

    #[test]
    fn name_falls_back_to_path_component() {
        let repo = RepositoryHandle::new("/nonexistent/carrier-demo", "/nonexistent/carrier-demo/.git");
        assert_eq!(repo.name(), "carrier-demo");
    }
}
