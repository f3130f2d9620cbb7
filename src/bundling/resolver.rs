//! Base-commit selection and commit-range computation.

use super::errors::CarrierError;
use super::repository::RepositoryHandle;
use super::types::{BranchInfo, CommitId, CommitInfo, CommitRange, ResolvedRef};
use crate::external::GitEngine;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: usize = 15;

/// Answers "what would a bundle of X after B contain?" for one repository.
pub struct RangeResolver<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
    page_size: usize,
}

impl<'a> RangeResolver<'a> {
    pub fn new(engine: &'a dyn GitEngine, repo: &'a RepositoryHandle) -> Self {
        Self {
            engine,
            repo,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn branches(&self) -> Result<Vec<BranchInfo>, CarrierError> {
        self.engine.list_branches(self.repo)
    }

    /// The checked-out branch, or `HEAD` when detached.
    pub fn default_reference(&self) -> Result<String, CarrierError> {
        Ok(self
            .engine
            .current_branch(self.repo)?
            .unwrap_or_else(|| "HEAD".to_string()))
    }

    pub fn resolve(&self, reference: &str) -> Result<ResolvedRef, CarrierError> {
        self.engine
            .resolve_ref(self.repo, reference)?
            .ok_or_else(|| CarrierError::Repository {
                path: self.repo.path().to_path_buf(),
                message: format!("reference '{reference}' does not resolve to a commit"),
                diagnostic: None,
            })
    }

    /// Newest-first history of `reference`, fetched page by page on demand.
    pub fn list_commits(&self, reference: &str) -> Result<CommitLog<'a>, CarrierError> {
        let resolved = self.resolve(reference)?;
        Ok(CommitLog {
            engine: self.engine,
            repo: self.repo,
            tip: resolved.commit,
            exclude: None,
            page_size: self.page_size,
        })
    }

    /// Commits reachable from `reference` and not from `base`.
    ///
    /// Exclusion is directional: when `base` is not an ancestor of
    /// `reference`, everything reachable from `reference` but not from `base`
    /// is still included.
    pub fn compute_range(
        &self,
        reference: &str,
        base: Option<&str>,
    ) -> Result<CommitRange, CarrierError> {
        let tip = self.resolve(reference)?.commit;
        self.range_from(reference, tip, base)
    }

    /// [`RangeResolver::compute_range`] for a tip the caller already resolved.
    pub fn range_from(
        &self,
        reference: &str,
        tip: CommitId,
        base: Option<&str>,
    ) -> Result<CommitRange, CarrierError> {
        let base = match base {
            None => None,
            Some(name) => Some(
                self.engine
                    .resolve_ref(self.repo, name)?
                    .ok_or_else(|| CarrierError::InvalidBase {
                        base: name.to_string(),
                        diagnostic: None,
                    })?
                    .commit,
            ),
        };
        let count = self
            .engine
            .count_ancestors(self.repo, &tip, base.as_deref())?;
        debug!(reference, %tip, ?base, count, "computed commit range");
        Ok(CommitRange {
            reference: reference.to_string(),
            tip,
            base,
            count,
        })
    }

    /// Lazy listing of exactly the commits in `range`.
    pub fn range_log(&self, range: &CommitRange) -> CommitLog<'a> {
        CommitLog {
            engine: self.engine,
            repo: self.repo,
            tip: range.tip.clone(),
            exclude: range.base.clone(),
            page_size: self.page_size,
        }
    }
}

/// A finite, restartable commit sequence. Each call to [`CommitLog::iter`]
/// starts again from the tip.
pub struct CommitLog<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
    tip: CommitId,
    exclude: Option<CommitId>,
    page_size: usize,
}

impl<'a> CommitLog<'a> {
    pub fn tip(&self) -> &str {
        &self.tip
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// One page, zero-based.
    pub fn page(&self, index: usize) -> Result<Vec<CommitInfo>, CarrierError> {
        let Some(skip) = index.checked_mul(self.page_size) else {
            return Ok(Vec::new());
        };
        self.engine.list_ancestors(
            self.repo,
            &self.tip,
            self.exclude.as_deref(),
            skip,
            self.page_size,
        )
    }

    pub fn iter(&self) -> CommitIter<'a> {
        CommitIter {
            engine: self.engine,
            repo: self.repo,
            tip: self.tip.clone(),
            exclude: self.exclude.clone(),
            page_size: self.page_size,
            buffer: VecDeque::new(),
            fetched: 0,
            done: false,
        }
    }
}

impl<'a> IntoIterator for &CommitLog<'a> {
    type Item = Result<CommitInfo, CarrierError>;
    type IntoIter = CommitIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct CommitIter<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
    tip: CommitId,
    exclude: Option<CommitId>,
    page_size: usize,
    buffer: VecDeque<CommitInfo>,
    fetched: usize,
    done: bool,
}

impl Iterator for CommitIter<'_> {
    type Item = Result<CommitInfo, CarrierError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self.engine.list_ancestors(
                self.repo,
                &self.tip,
                self.exclude.as_deref(),
                self.fetched,
                self.page_size,
            ) {
                Ok(page) => {
                    self.done = page.len() < self.page_size;
                    self.fetched += page.len();
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
