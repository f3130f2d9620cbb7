use anyhow::Result;
/// Test harness for building throwaway git repositories in integration tests
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Owns a temporary directory holding any number of repositories and bundles.
pub struct TestHarness {
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestHarness {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where a bundle named `name` would live on the "drive".
    pub fn bundle_path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Run git in `repo` and return trimmed stdout, failing on non-zero exit.
    pub fn git(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()?;

        if !output.status.success() {
            anyhow::bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Initialize a repository with `main` as its unborn branch.
    pub fn init_repo(&self, name: &str) -> Result<PathBuf> {
        let repo_path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&repo_path)?;
        self.git(&repo_path, &["init", "--quiet", "-b", "main"])?;
        self.setup_git_config(&repo_path)?;
        Ok(repo_path)
    }

    /// Clone `source` next to it, as the destination machine's copy.
    pub fn clone_repo(&self, source: &Path, name: &str) -> Result<PathBuf> {
        let target = self.temp_dir.path().join(name);
        self.git(
            self.temp_dir.path(),
            &[
                "clone",
                "--quiet",
                &source.to_string_lossy(),
                &target.to_string_lossy(),
            ],
        )?;
        self.setup_git_config(&target)?;
        Ok(target)
    }

    /// Set up basic Git configuration for testing
    fn setup_git_config(&self, repo_path: &Path) -> Result<()> {
        self.git(repo_path, &["config", "user.name", "Test User"])?;
        self.git(repo_path, &["config", "user.email", "test@example.com"])?;
        Ok(())
    }

    /// Write a file and commit it on the checked-out branch. Returns the commit id.
    pub fn commit(&self, repo: &Path, message: &str) -> Result<String> {
        let file_name = format!(
            "{}.txt",
            message
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect::<String>()
        );
        std::fs::write(repo.join(&file_name), format!("{message}\n"))?;
        self.git(repo, &["add", &file_name])?;
        self.git(repo, &["commit", "--quiet", "-m", message])?;
        self.rev_parse(repo, "HEAD")
    }

    pub fn rev_parse(&self, repo: &Path, rev: &str) -> Result<String> {
        self.git(repo, &["rev-parse", "--verify", rev])
    }

    /// Every ref and its target, for before/after comparisons.
    pub fn refs_snapshot(&self, repo: &Path) -> Result<String> {
        self.git(repo, &["for-each-ref", "--format=%(refname) %(objectname)"])
    }

    /// Chop `bytes` off the end of a file, as an interrupted copy would.
    pub fn truncate(&self, path: &Path, bytes: usize) -> Result<()> {
        let data = std::fs::read(path)?;
        std::fs::write(path, &data[..data.len().saturating_sub(bytes)])?;
        Ok(())
    }
}
