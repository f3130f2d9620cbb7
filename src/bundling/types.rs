use super::errors::{CarrierError, ErrorKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type CommitId = String;
pub type BranchName = String;

/// Short form used in listings, matching `git log --format=%h` closely enough
/// for operators to copy-paste.
pub fn short_id(id: &str) -> &str {
    &id[..id.len().min(10)]
}

/// One commit as shown in the base-commit picker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub id: CommitId,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

impl CommitInfo {
    pub fn short_id(&self) -> &str {
        short_id(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchInfo {
    pub name: BranchName,
    pub tip: CommitId,
    pub is_current: bool,
}

/// A reference resolved against a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRef {
    pub commit: CommitId,
    /// `refs/heads/...`, `refs/tags/...`; `None` for raw commit ids.
    pub full_name: Option<String>,
}

/// A ref recorded in a bundle header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleHead {
    pub id: CommitId,
    pub name: String,
}

impl BundleHead {
    /// Branch name when the head is a `refs/heads/*` ref.
    pub fn branch_name(&self) -> Option<&str> {
        self.name.strip_prefix("refs/heads/")
    }
}

/// Result of a structural bundle check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleReport {
    pub path: PathBuf,
    pub heads: Vec<BundleHead>,
    pub size_bytes: u64,
    /// Pack deltas against commits the bundle expects the recipient to have.
    pub thin: bool,
}

/// Commits reachable from `tip` and not from `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRange {
    pub reference: String,
    pub tip: CommitId,
    pub base: Option<CommitId>,
    pub count: u64,
}

impl CommitRange {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn describe(&self) -> String {
        match &self.base {
            None => format!("ALL history of {} ({} commits)", self.reference, self.count),
            Some(base) => format!(
                "{} commits of {} after {}",
                self.count,
                self.reference,
                short_id(base)
            ),
        }
    }
}

/// Branch pointer move requested from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchUpdate {
    pub branch: BranchName,
    pub new_tip: CommitId,
    /// Tip the branch must still point at; `None` means the branch must not exist.
    pub expected_old: Option<CommitId>,
    /// Branch is checked out in the working tree.
    pub checked_out: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackOutcome {
    pub path: PathBuf,
    pub reference: String,
    pub ref_name: String,
    pub tip: CommitId,
    pub base: Option<CommitId>,
    pub commit_count: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnpackOutcome {
    pub branch: BranchName,
    pub previous_tip: Option<CommitId>,
    pub new_tip: CommitId,
    pub commits_integrated: u64,
    pub created: bool,
}

impl UnpackOutcome {
    pub fn is_noop(&self) -> bool {
        self.previous_tip.as_deref() == Some(self.new_tip.as_str()) && !self.created
    }
}

/// Something that can be summarized for an operator.
pub trait Outcome: Serialize {
    fn message(&self) -> String;
}

impl Outcome for PackOutcome {
    fn message(&self) -> String {
        format!(
            "Packed {} commits of {} into {}",
            self.commit_count,
            self.reference,
            self.path.display()
        )
    }
}

impl Outcome for UnpackOutcome {
    fn message(&self) -> String {
        if self.commits_integrated == 0 && !self.created {
            return format!("{} is already up to date", self.branch);
        }
        let verb = if self.created { "Created" } else { "Fast-forwarded" };
        format!(
            "{verb} {} at {} ({} new commits)",
            self.branch,
            short_id(&self.new_tip),
            self.commits_integrated
        )
    }
}

impl Outcome for BundleReport {
    fn message(&self) -> String {
        format!(
            "{} is a valid bundle with {} ref(s)",
            self.path.display(),
            self.heads.len()
        )
    }
}

impl Outcome for CommitRange {
    fn message(&self) -> String {
        self.describe()
    }
}

/// Transient record returned to front ends for every operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub kind: Option<ErrorKind>,
    pub message: String,
    pub diagnostic: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl OperationResult {
    pub fn from_outcome<T: Outcome>(outcome: &T) -> Self {
        Self {
            success: true,
            kind: None,
            message: outcome.message(),
            diagnostic: None,
            details: serde_json::to_value(outcome).ok(),
        }
    }

    pub fn from_error(err: &CarrierError) -> Self {
        Self {
            success: false,
            kind: Some(err.kind()),
            message: err.to_string(),
            diagnostic: err.diagnostic().map(str::to_string),
            details: None,
        }
    }

    pub fn from_result<T: Outcome>(result: &Result<T, CarrierError>) -> Self {
        match result {
            Ok(outcome) => Self::from_outcome(outcome),
            Err(err) => Self::from_error(err),
        }
    }

    /// Failed but not fatal (e.g. nothing to pack).
    pub fn is_warning(&self) -> bool {
        !self.success && self.kind == Some(ErrorKind::EmptyRangeError)
    }
}
