//! Git command abstractions
//!
//! [`GitEngine`] is the one seam between the carrier and the installed git
//! toolchain. [`GitCli`] implements it by shelling out through a
//! [`CommandExecutor`] and parsing the small amount of text git prints.

use super::command::{os_args, CommandExecutor, CommandOutput, ProcessCommandExecutor};
use crate::bundling::errors::CarrierError;
use crate::bundling::repository::RepositoryHandle;
use crate::bundling::types::{
    BranchInfo, BranchName, BranchUpdate, BundleHead, BundleReport, CommitInfo, ResolvedRef,
};
use chrono::DateTime;
use regex::Regex;
use std::ffi::OsString;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

static OBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9a-f]{40}|[0-9a-f]{64})$").unwrap());

static HEAD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9a-f]{40}|[0-9a-f]{64}) (\S+)$").unwrap());

static ANY_OBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([0-9a-f]{40}|[0-9a-f]{64})\b").unwrap());

/// Field separator for `git log --format`.
const FIELD_SEP: char = '\x1f';

/// Typed operations the carrier needs from a version-control engine.
///
/// Every call blocks until the engine answers. Implementations hold no
/// per-repository state, so one engine may serve many repositories from many
/// threads; calls against the same repository must be serialized by the caller.
pub trait GitEngine: Send + Sync {
    /// Confirm `path` is inside a working tree and return a handle to it.
    fn open_repository(&self, path: &Path) -> Result<RepositoryHandle, CarrierError>;

    /// Resolve a branch, tag, `HEAD` or commit id; `None` when it does not resolve.
    fn resolve_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
    ) -> Result<Option<ResolvedRef>, CarrierError>;

    /// Checked-out branch, `None` on a detached HEAD.
    fn current_branch(&self, repo: &RepositoryHandle) -> Result<Option<BranchName>, CarrierError>;

    fn list_branches(&self, repo: &RepositoryHandle) -> Result<Vec<BranchInfo>, CarrierError>;

    /// Commits reachable from `tip` and not from `exclude`, newest first.
    fn list_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, CarrierError>;

    fn count_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
    ) -> Result<u64, CarrierError>;

    fn is_ancestor(
        &self,
        repo: &RepositoryHandle,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool, CarrierError>;

    fn commit_exists(&self, repo: &RepositoryHandle, id: &str) -> Result<bool, CarrierError>;

    /// Create `name` at `target`; fails if it already exists.
    fn create_ref(&self, repo: &RepositoryHandle, name: &str, target: &str)
        -> Result<(), CarrierError>;

    /// Delete `name` if it still points at `expected`.
    fn delete_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
        expected: &str,
    ) -> Result<(), CarrierError>;

    /// Write a bundle of `ref_name` minus the history of `exclude` to `output`.
    fn create_bundle(
        &self,
        repo: &RepositoryHandle,
        output: &Path,
        ref_name: &str,
        exclude: Option<&str>,
    ) -> Result<(), CarrierError>;

    /// Structural check that needs no repository.
    fn verify_bundle(&self, path: &Path) -> Result<BundleReport, CarrierError>;

    /// Check the bundle against a destination: its prerequisite commits must be present.
    fn inspect_bundle(&self, repo: &RepositoryHandle, path: &Path) -> Result<(), CarrierError>;

    /// Copy the objects behind `head_ref` into the repository without writing any ref.
    fn fetch_bundle(
        &self,
        repo: &RepositoryHandle,
        path: &Path,
        head_ref: &str,
    ) -> Result<(), CarrierError>;

    /// Create or fast-forward a branch. Never forced.
    fn update_branch(&self, repo: &RepositoryHandle, update: &BranchUpdate)
        -> Result<(), CarrierError>;
}

/// Real Git implementation
pub struct GitCli {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
}

impl GitCli {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            binary: "git".to_string(),
        }
    }

    /// Engine backed by real processes, with prompts disabled and messages in
    /// the C locale so diagnostics classify reliably.
    pub fn system(binary: &str) -> Self {
        let executor = ProcessCommandExecutor::new()
            .with_env("GIT_TERMINAL_PROMPT", "0")
            .with_env("LC_ALL", "C");
        Self::new(Arc::new(executor)).with_binary(binary)
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn run(
        &self,
        repo: Option<&Path>,
        args: Vec<OsString>,
        stdin: Option<File>,
    ) -> Result<CommandOutput, CarrierError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if let Some(dir) = repo {
            full.push(OsString::from("-C"));
            full.push(dir.as_os_str().to_os_string());
        }
        full.extend(args);
        Ok(self.executor.execute(&self.binary, &full, stdin)?)
    }

    /// Run inside `repo` and return trimmed stdout, classifying non-zero exits.
    fn run_ok(
        &self,
        repo: &RepositoryHandle,
        action: &str,
        args: Vec<OsString>,
    ) -> Result<String, CarrierError> {
        let output = self.run(Some(repo.path()), args, None)?;
        if !output.success() {
            return Err(self.classify_git_error(repo.path(), action, &output));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn classify_git_error(&self, path: &Path, action: &str, output: &CommandOutput) -> CarrierError {
        let diagnostic = output.diagnostic();
        if diagnostic.contains("not a git repository") {
            CarrierError::Repository {
                path: path.to_path_buf(),
                message: "not a git repository".to_string(),
                diagnostic: Some(diagnostic),
            }
        } else {
            CarrierError::external(
                format!("git {action} exited with status {}", output.status_code),
                Some(diagnostic),
            )
        }
    }

    fn unparseable(action: &str, text: &str) -> CarrierError {
        CarrierError::external(
            format!("could not parse output of git {action}"),
            Some(text.to_string()),
        )
    }

    fn exclusion_args(tip: &str, exclude: Option<&str>) -> Vec<OsString> {
        let mut args = vec![OsString::from(tip)];
        if let Some(base) = exclude {
            args.push(OsString::from(format!("^{base}")));
        }
        args.push(OsString::from("--"));
        args
    }

    pub(crate) fn parse_commit_line(line: &str) -> Option<CommitInfo> {
        let mut parts = line.splitn(4, FIELD_SEP);
        let id = parts.next()?;
        let timestamp = parts.next()?.parse::<i64>().ok()?;
        let author = parts.next()?;
        let summary = parts.next().unwrap_or("");
        if !OBJECT_ID.is_match(id) {
            return None;
        }
        Some(CommitInfo {
            id: id.to_string(),
            author: author.to_string(),
            timestamp: DateTime::from_timestamp(timestamp, 0)?,
            summary: summary.to_string(),
        })
    }

    pub(crate) fn parse_heads(text: &str) -> Option<Vec<BundleHead>> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                HEAD_LINE.captures(line.trim()).map(|caps| BundleHead {
                    id: caps[1].to_string(),
                    name: caps[2].to_string(),
                })
            })
            .collect()
    }

    /// Byte offset where the pack data starts, and whether the header
    /// declares sha256 object ids.
    fn pack_offset(path: &Path) -> Result<(u64, bool), CarrierError> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut offset = 0u64;
        let mut sha256 = false;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                return Err(CarrierError::corrupt(path, "bundle header is not terminated"));
            }
            offset += read as u64;
            if line == b"\n" {
                return Ok((offset, sha256));
            }
            if line.starts_with(b"@object-format=sha256") {
                sha256 = true;
            }
        }
    }
}

impl GitEngine for GitCli {
    fn open_repository(&self, path: &Path) -> Result<RepositoryHandle, CarrierError> {
        if !path.is_dir() {
            return Err(CarrierError::repository(path, "directory does not exist"));
        }
        let output = self.run(
            Some(path),
            os_args(["rev-parse", "--is-inside-work-tree", "--absolute-git-dir"]),
            None,
        )?;
        if !output.success() {
            return Err(match self.classify_git_error(path, "rev-parse", &output) {
                CarrierError::ExternalTool { diagnostic, .. } => CarrierError::Repository {
                    path: path.to_path_buf(),
                    message: "not a git repository".to_string(),
                    diagnostic,
                },
                other => other,
            });
        }
        let mut lines = output.stdout.lines();
        match (lines.next(), lines.next()) {
            (Some("true"), Some(git_dir)) => Ok(RepositoryHandle::new(path, git_dir.trim())),
            (Some("false"), _) => Err(CarrierError::repository(
                path,
                "repository has no working tree",
            )),
            _ => Err(Self::unparseable("rev-parse", &output.stdout)),
        }
    }

    fn resolve_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
    ) -> Result<Option<ResolvedRef>, CarrierError> {
        if name.is_empty() || name.starts_with('-') {
            return Ok(None);
        }
        let output = self.run(
            Some(repo.path()),
            os_args(["rev-parse", "--verify", "--quiet", &format!("{name}^{{commit}}")]),
            None,
        )?;
        match output.status_code {
            0 => {}
            1 => return Ok(None),
            _ => return Err(self.classify_git_error(repo.path(), "rev-parse", &output)),
        }
        let commit = output.stdout.trim().to_string();
        if !OBJECT_ID.is_match(&commit) {
            return Err(Self::unparseable("rev-parse", &output.stdout));
        }

        let symbolic = self.run_ok(
            repo,
            "rev-parse",
            os_args(["rev-parse", "--symbolic-full-name", name]),
        )?;
        let full_name = symbolic
            .lines()
            .next()
            .filter(|n| n.starts_with("refs/"))
            .map(str::to_string);

        debug!(name, %commit, ?full_name, "resolved reference");
        Ok(Some(ResolvedRef { commit, full_name }))
    }

    fn current_branch(&self, repo: &RepositoryHandle) -> Result<Option<BranchName>, CarrierError> {
        let output = self.run(
            Some(repo.path()),
            os_args(["symbolic-ref", "--quiet", "--short", "HEAD"]),
            None,
        )?;
        match output.status_code {
            0 => Ok(Some(output.stdout.trim().to_string())),
            1 => Ok(None),
            _ => Err(self.classify_git_error(repo.path(), "symbolic-ref", &output)),
        }
    }

    fn list_branches(&self, repo: &RepositoryHandle) -> Result<Vec<BranchInfo>, CarrierError> {
        let stdout = self.run_ok(
            repo,
            "for-each-ref",
            os_args([
                "for-each-ref",
                "--format=%(refname:short)%09%(objectname)%09%(HEAD)",
                "refs/heads",
            ]),
        )?;

        let mut branches = Vec::new();
        for line in stdout.lines().filter(|l| !l.is_empty()) {
            // %(HEAD) is a blank for other branches, which trimming may eat
            let mut parts = line.splitn(3, '\t');
            let (Some(name), Some(tip)) = (parts.next(), parts.next()) else {
                return Err(Self::unparseable("for-each-ref", &stdout));
            };
            if !OBJECT_ID.is_match(tip) {
                return Err(Self::unparseable("for-each-ref", &stdout));
            }
            branches.push(BranchInfo {
                name: name.to_string(),
                tip: tip.to_string(),
                is_current: parts.next().is_some_and(|marker| marker.trim() == "*"),
            });
        }
        Ok(branches)
    }

    fn list_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, CarrierError> {
        let mut args = os_args([
            "log".to_string(),
            "--format=%H%x1f%at%x1f%an%x1f%s".to_string(),
            format!("--skip={skip}"),
            format!("--max-count={limit}"),
        ]);
        args.extend(Self::exclusion_args(tip, exclude));
        let stdout = self.run_ok(repo, "log", args)?;

        stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(|line| Self::parse_commit_line(line).ok_or_else(|| Self::unparseable("log", line)))
            .collect()
    }

    fn count_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
    ) -> Result<u64, CarrierError> {
        let mut args = os_args(["rev-list", "--count"]);
        args.extend(Self::exclusion_args(tip, exclude));
        let stdout = self.run_ok(repo, "rev-list", args)?;
        stdout
            .parse()
            .map_err(|_| Self::unparseable("rev-list --count", &stdout))
    }

    fn is_ancestor(
        &self,
        repo: &RepositoryHandle,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool, CarrierError> {
        let output = self.run(
            Some(repo.path()),
            os_args(["merge-base", "--is-ancestor", ancestor, descendant]),
            None,
        )?;
        match output.status_code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(self.classify_git_error(repo.path(), "merge-base", &output)),
        }
    }

    fn commit_exists(&self, repo: &RepositoryHandle, id: &str) -> Result<bool, CarrierError> {
        let output = self.run(
            Some(repo.path()),
            os_args(["rev-parse", "--verify", "--quiet", &format!("{id}^{{commit}}")]),
            None,
        )?;
        Ok(output.success())
    }

    fn create_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
        target: &str,
    ) -> Result<(), CarrierError> {
        self.run_ok(repo, "update-ref", os_args(["update-ref", name, target, ""]))?;
        Ok(())
    }

    fn delete_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
        expected: &str,
    ) -> Result<(), CarrierError> {
        self.run_ok(repo, "update-ref", os_args(["update-ref", "-d", name, expected]))?;
        Ok(())
    }

    fn create_bundle(
        &self,
        repo: &RepositoryHandle,
        output: &Path,
        ref_name: &str,
        exclude: Option<&str>,
    ) -> Result<(), CarrierError> {
        let mut args = os_args(["bundle", "create"]);
        args.push(output.as_os_str().to_os_string());
        args.push(OsString::from(ref_name));
        if let Some(base) = exclude {
            args.push(OsString::from(format!("^{base}")));
        }
        self.run_ok(repo, "bundle create", args)?;
        Ok(())
    }

    fn verify_bundle(&self, path: &Path) -> Result<BundleReport, CarrierError> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| CarrierError::corrupt(path, format!("cannot read bundle: {e}")))?;
        if !metadata.is_file() {
            return Err(CarrierError::corrupt(path, "not a regular file"));
        }

        let mut args = os_args(["bundle", "list-heads"]);
        args.push(path.as_os_str().to_os_string());
        let listed = self.run(None, args, None)?;
        if !listed.success() {
            return Err(CarrierError::corrupt(path, listed.diagnostic()));
        }
        let heads = Self::parse_heads(&listed.stdout)
            .ok_or_else(|| CarrierError::corrupt(path, listed.stdout.clone()))?;
        if heads.is_empty() {
            return Err(CarrierError::corrupt(path, "bundle lists no refs"));
        }

        let (offset, sha256) = Self::pack_offset(path)?;
        let scratch = tempfile::Builder::new()
            .prefix("git-carrier-verify-")
            .tempdir()?;
        let mut init = os_args(["init", "--bare", "--quiet"]);
        if sha256 {
            init.push(OsString::from("--object-format=sha256"));
        }
        init.push(scratch.path().as_os_str().to_os_string());
        let created = self.run(None, init, None)?;
        if !created.success() {
            return Err(CarrierError::external(
                "could not create scratch repository for verification",
                Some(created.diagnostic()),
            ));
        }

        let mut pack = File::open(path)?;
        pack.seek(SeekFrom::Start(offset))?;
        let indexed = self.run(
            Some(scratch.path()),
            os_args(["index-pack", "--stdin"]),
            Some(pack),
        )?;

        let thin = if indexed.success() {
            false
        } else if indexed.stderr.contains("unresolved delta") {
            // Whole stream read and checksummed; bases live in the prerequisite history.
            true
        } else {
            warn!(path = %path.display(), "bundle pack data failed integrity check");
            return Err(CarrierError::corrupt(path, indexed.diagnostic()));
        };

        Ok(BundleReport {
            path: path.to_path_buf(),
            heads,
            size_bytes: metadata.len(),
            thin,
        })
    }

    fn inspect_bundle(&self, repo: &RepositoryHandle, path: &Path) -> Result<(), CarrierError> {
        // --quiet also silences the prerequisite report
        let mut args = os_args(["bundle", "verify"]);
        args.push(path.as_os_str().to_os_string());
        let output = self.run(Some(repo.path()), args, None)?;
        if output.success() {
            return Ok(());
        }
        let diagnostic = output.diagnostic();
        const LACKS: &str = "lacks these prerequisite commits";
        if let Some(at) = output.stderr.find(LACKS) {
            // stdout lists the bundle's own refs; only the report names missing ids
            let missing: Vec<String> = ANY_OBJECT_ID
                .captures_iter(&output.stderr[at + LACKS.len()..])
                .map(|caps| caps[1].to_string())
                .collect();
            return Err(CarrierError::InvalidBase {
                base: if missing.is_empty() {
                    "prerequisite".to_string()
                } else {
                    missing.join(", ")
                },
                diagnostic: Some(diagnostic),
            });
        }
        if diagnostic.contains("not a git repository") {
            return Err(self.classify_git_error(repo.path(), "bundle verify", &output));
        }
        Err(CarrierError::corrupt(path, diagnostic))
    }

    fn fetch_bundle(
        &self,
        repo: &RepositoryHandle,
        path: &Path,
        head_ref: &str,
    ) -> Result<(), CarrierError> {
        let mut args = os_args(["fetch", "--quiet", "--no-tags", "--no-write-fetch-head"]);
        args.push(path.as_os_str().to_os_string());
        args.push(OsString::from(head_ref));
        let output = self.run(Some(repo.path()), args, None)?;
        if output.success() {
            return Ok(());
        }
        let diagnostic = output.diagnostic();
        if diagnostic.contains("lacks these prerequisite commits") {
            return Err(CarrierError::InvalidBase {
                base: "prerequisite".to_string(),
                diagnostic: Some(diagnostic),
            });
        }
        if ["early EOF", "index-pack", "bad object", "corrupt", "does not look like"]
            .iter()
            .any(|marker| diagnostic.contains(marker))
        {
            return Err(CarrierError::corrupt(path, diagnostic));
        }
        Err(self.classify_git_error(repo.path(), "fetch", &output))
    }

    fn update_branch(
        &self,
        repo: &RepositoryHandle,
        update: &BranchUpdate,
    ) -> Result<(), CarrierError> {
        if update.checked_out {
            self.run_ok(
                repo,
                "merge --ff-only",
                os_args(["merge", "--ff-only", "--quiet", &update.new_tip]),
            )?;
            return Ok(());
        }
        let refname = format!("refs/heads/{}", update.branch);
        let reason = format!("git-carrier: apply bundle to {}", update.branch);
        let expected = update.expected_old.clone().unwrap_or_default();
        self.run_ok(
            repo,
            "update-ref",
            os_args([
                "update-ref",
                "-m",
                &reason,
                &refname,
                &update.new_tip,
                &expected,
            ]),
        )?;
        Ok(())
    }
}
