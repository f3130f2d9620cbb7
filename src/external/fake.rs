//! In-memory engine for deterministic tests.
//!
//! `FakeGit` keeps a commit DAG and a ref table per repository path and writes
//! bundles as small JSON files, so packer and unpacker logic can be exercised
//! without a git installation. Truncating one of its bundle files breaks the
//! JSON and is reported as corruption, like a truncated pack.

use super::git::GitEngine;
use crate::bundling::errors::CarrierError;
use crate::bundling::repository::RepositoryHandle;
use crate::bundling::types::{
    BranchInfo, BranchName, BranchUpdate, BundleHead, BundleReport, CommitId, CommitInfo,
    ResolvedRef,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

const BUNDLE_FORMAT: &str = "git-carrier-fake-bundle/1";
const EPOCH: i64 = 1_700_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FakeCommit {
    id: CommitId,
    parents: Vec<CommitId>,
    author: String,
    timestamp: i64,
    summary: String,
}

#[derive(Debug, Clone, Default)]
struct FakeRepo {
    commits: HashMap<CommitId, FakeCommit>,
    refs: BTreeMap<String, CommitId>,
    head_branch: BranchName,
    detached: Option<CommitId>,
}

impl FakeRepo {
    fn ancestry(&self, tip: &str) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut stack = vec![tip.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(commit) = self.commits.get(&id) {
                if seen.insert(id) {
                    stack.extend(commit.parents.iter().cloned());
                }
            }
        }
        seen
    }

    fn range(&self, tip: &str, exclude: Option<&str>) -> Result<Vec<&FakeCommit>, CarrierError> {
        if !self.commits.contains_key(tip) {
            return Err(CarrierError::external(
                "bad revision",
                Some(format!("fatal: bad revision '{tip}'")),
            ));
        }
        let excluded = exclude.map(|b| self.ancestry(b)).unwrap_or_default();
        let mut commits: Vec<&FakeCommit> = self
            .ancestry(tip)
            .iter()
            .filter(|id| !excluded.contains(*id))
            .filter_map(|id| self.commits.get(id))
            .collect();
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        Ok(commits)
    }

    fn head_tip(&self) -> Option<(CommitId, Option<String>)> {
        if let Some(id) = &self.detached {
            return Some((id.clone(), None));
        }
        let name = format!("refs/heads/{}", self.head_branch);
        self.refs.get(&name).map(|id| (id.clone(), Some(name)))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FakeBundle {
    format: String,
    heads: Vec<BundleHead>,
    prerequisites: Vec<CommitId>,
    commits: Vec<FakeCommit>,
}

#[derive(Debug, Default)]
struct FakeState {
    repos: HashMap<PathBuf, FakeRepo>,
    next_id: u64,
}

/// Deterministic [`GitEngine`] test double.
#[derive(Debug, Default)]
pub struct FakeGit {
    state: Mutex<FakeState>,
    fail_verification: AtomicBool,
    race_next_bundle: AtomicBool,
}

impl FakeGit {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_repo<T>(
        &self,
        repo: &RepositoryHandle,
        f: impl FnOnce(&mut FakeRepo) -> Result<T, CarrierError>,
    ) -> Result<T, CarrierError> {
        let mut state = self.lock();
        let fake = state
            .repos
            .get_mut(repo.path())
            .ok_or_else(|| CarrierError::repository(repo.path(), "not a git repository"))?;
        f(fake)
    }

    /// Make every subsequent `verify_bundle` call fail.
    pub fn break_verification(&self, broken: bool) {
        self.fail_verification.store(broken, Ordering::SeqCst);
    }

    /// Have the next `create_bundle` of a branch see one more commit on it,
    /// as if another process committed mid-pack.
    pub fn race_next_bundle(&self) {
        self.race_next_bundle.store(true, Ordering::SeqCst);
    }

    /// Register an empty repository whose HEAD points at the unborn `branch`.
    pub fn init_repo(&self, path: impl Into<PathBuf>, branch: &str) -> RepositoryHandle {
        let path = path.into();
        let handle = RepositoryHandle::new(&path, path.join(".git"));
        self.lock().repos.insert(
            path,
            FakeRepo {
                head_branch: branch.to_string(),
                ..FakeRepo::default()
            },
        );
        handle
    }

    /// Copy every commit and ref of `source` into a new repository at `path`.
    pub fn clone_repo(&self, source: &RepositoryHandle, path: impl Into<PathBuf>) -> RepositoryHandle {
        let path = path.into();
        let handle = RepositoryHandle::new(&path, path.join(".git"));
        let mut state = self.lock();
        let copy = state.repos.get(source.path()).cloned().unwrap_or_default();
        state.repos.insert(path, copy);
        handle
    }

    /// Commit on top of `branch` (or as a root when unborn) and advance it.
    pub fn commit(&self, repo: &RepositoryHandle, branch: &str, summary: &str) -> CommitId {
        let refname = format!("refs/heads/{branch}");
        let parent = self
            .lock()
            .repos
            .get(repo.path())
            .and_then(|r| r.refs.get(&refname).cloned());
        let id = self.commit_with_parents(repo, &parent.into_iter().collect::<Vec<_>>(), summary);
        self.set_branch(repo, branch, &id);
        id
    }

    /// Add a commit with explicit parents without moving any ref.
    pub fn commit_with_parents(
        &self,
        repo: &RepositoryHandle,
        parents: &[CommitId],
        summary: &str,
    ) -> CommitId {
        let mut state = self.lock();
        state.next_id += 1;
        let n = state.next_id;
        let id = format!("{n:040x}");
        if let Some(fake) = state.repos.get_mut(repo.path()) {
            fake.commits.insert(
                id.clone(),
                FakeCommit {
                    id: id.clone(),
                    parents: parents.to_vec(),
                    author: "Test User".to_string(),
                    timestamp: EPOCH + n as i64 * 60,
                    summary: summary.to_string(),
                },
            );
        }
        id
    }

    pub fn set_branch(&self, repo: &RepositoryHandle, branch: &str, id: &str) {
        if let Some(fake) = self.lock().repos.get_mut(repo.path()) {
            fake.refs.insert(format!("refs/heads/{branch}"), id.to_string());
        }
    }

    pub fn set_tag(&self, repo: &RepositoryHandle, tag: &str, id: &str) {
        if let Some(fake) = self.lock().repos.get_mut(repo.path()) {
            fake.refs.insert(format!("refs/tags/{tag}"), id.to_string());
        }
    }

    pub fn checkout(&self, repo: &RepositoryHandle, branch: &str) {
        if let Some(fake) = self.lock().repos.get_mut(repo.path()) {
            fake.head_branch = branch.to_string();
            fake.detached = None;
        }
    }

    pub fn detach(&self, repo: &RepositoryHandle, id: &str) {
        if let Some(fake) = self.lock().repos.get_mut(repo.path()) {
            fake.detached = Some(id.to_string());
        }
    }

    pub fn branch_tip(&self, repo: &RepositoryHandle, branch: &str) -> Option<CommitId> {
        self.refs(repo).get(&format!("refs/heads/{branch}")).cloned()
    }

    /// Snapshot of every ref in the repository.
    pub fn refs(&self, repo: &RepositoryHandle) -> BTreeMap<String, CommitId> {
        self.lock()
            .repos
            .get(repo.path())
            .map(|r| r.refs.clone())
            .unwrap_or_default()
    }

    pub fn object_count(&self, repo: &RepositoryHandle) -> usize {
        self.lock()
            .repos
            .get(repo.path())
            .map(|r| r.commits.len())
            .unwrap_or_default()
    }

    fn read_bundle(path: &Path) -> Result<FakeBundle, CarrierError> {
        let bytes = std::fs::read(path)
            .map_err(|e| CarrierError::corrupt(path, format!("cannot read bundle: {e}")))?;
        let bundle: FakeBundle = serde_json::from_slice(&bytes)
            .map_err(|e| CarrierError::corrupt(path, format!("error: {e}")))?;
        if bundle.format != BUNDLE_FORMAT {
            return Err(CarrierError::corrupt(
                path,
                format!("unknown bundle format '{}'", bundle.format),
            ));
        }
        Ok(bundle)
    }

    fn missing_prerequisites(repo: &FakeRepo, bundle: &FakeBundle) -> Vec<CommitId> {
        bundle
            .prerequisites
            .iter()
            .filter(|id| !repo.commits.contains_key(*id))
            .cloned()
            .collect()
    }
}

impl GitEngine for FakeGit {
    fn open_repository(&self, path: &Path) -> Result<RepositoryHandle, CarrierError> {
        if self.lock().repos.contains_key(path) {
            Ok(RepositoryHandle::new(path, path.join(".git")))
        } else {
            Err(CarrierError::repository(path, "not a git repository"))
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
        self.with_repo(repo, |fake| {
            if name == "HEAD" {
                return Ok(fake
                    .head_tip()
                    .map(|(commit, full_name)| ResolvedRef { commit, full_name }));
            }
            for candidate in [
                name.to_string(),
                format!("refs/heads/{name}"),
                format!("refs/tags/{name}"),
            ] {
                if let Some(commit) = fake.refs.get(&candidate) {
                    return Ok(Some(ResolvedRef {
                        commit: commit.clone(),
                        full_name: Some(candidate),
                    }));
                }
            }
            if name.len() >= 4 {
                let matches: Vec<&CommitId> =
                    fake.commits.keys().filter(|id| id.starts_with(name)).collect();
                if let [only] = matches.as_slice() {
                    return Ok(Some(ResolvedRef {
                        commit: (*only).clone(),
                        full_name: None,
                    }));
                }
            }
            Ok(None)
        })
    }

    fn current_branch(&self, repo: &RepositoryHandle) -> Result<Option<BranchName>, CarrierError> {
        self.with_repo(repo, |fake| {
            Ok(match fake.detached {
                Some(_) => None,
                None => Some(fake.head_branch.clone()),
            })
        })
    }

    fn list_branches(&self, repo: &RepositoryHandle) -> Result<Vec<BranchInfo>, CarrierError> {
        self.with_repo(repo, |fake| {
            Ok(fake
                .refs
                .iter()
                .filter_map(|(name, tip)| {
                    name.strip_prefix("refs/heads/").map(|short| BranchInfo {
                        name: short.to_string(),
                        tip: tip.clone(),
                        is_current: fake.detached.is_none() && short == fake.head_branch,
                    })
                })
                .collect())
        })
    }

    fn list_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<CommitInfo>, CarrierError> {
        self.with_repo(repo, |fake| {
            Ok(fake
                .range(tip, exclude)?
                .into_iter()
                .skip(skip)
                .take(limit)
                .map(|c| CommitInfo {
                    id: c.id.clone(),
                    author: c.author.clone(),
                    timestamp: DateTime::from_timestamp(c.timestamp, 0).unwrap_or_default(),
                    summary: c.summary.clone(),
                })
                .collect())
        })
    }

    fn count_ancestors(
        &self,
        repo: &RepositoryHandle,
        tip: &str,
        exclude: Option<&str>,
    ) -> Result<u64, CarrierError> {
        self.with_repo(repo, |fake| Ok(fake.range(tip, exclude)?.len() as u64))
    }

    fn is_ancestor(
        &self,
        repo: &RepositoryHandle,
        ancestor: &str,
        descendant: &str,
    ) -> Result<bool, CarrierError> {
        self.with_repo(repo, |fake| Ok(fake.ancestry(descendant).contains(ancestor)))
    }

    fn commit_exists(&self, repo: &RepositoryHandle, id: &str) -> Result<bool, CarrierError> {
        self.with_repo(repo, |fake| Ok(fake.commits.contains_key(id)))
    }

    fn create_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
        target: &str,
    ) -> Result<(), CarrierError> {
        self.with_repo(repo, |fake| {
            if fake.refs.contains_key(name) {
                return Err(CarrierError::external(
                    "git update-ref exited with status 128",
                    Some(format!("fatal: cannot lock ref '{name}': reference already exists")),
                ));
            }
            fake.refs.insert(name.to_string(), target.to_string());
            Ok(())
        })
    }

    fn delete_ref(
        &self,
        repo: &RepositoryHandle,
        name: &str,
        expected: &str,
    ) -> Result<(), CarrierError> {
        self.with_repo(repo, |fake| {
            if fake.refs.get(name).map(String::as_str) != Some(expected) {
                return Err(CarrierError::external(
                    "git update-ref exited with status 128",
                    Some(format!("fatal: cannot lock ref '{name}'")),
                ));
            }
            fake.refs.remove(name);
            Ok(())
        })
    }

    fn create_bundle(
        &self,
        repo: &RepositoryHandle,
        output: &Path,
        ref_name: &str,
        exclude: Option<&str>,
    ) -> Result<(), CarrierError> {
        if self.race_next_bundle.swap(false, Ordering::SeqCst) {
            if let Some(branch) = ref_name.strip_prefix("refs/heads/") {
                self.commit(repo, branch, "concurrent commit");
            }
        }
        let bundle = self.with_repo(repo, |fake| {
            let tip = fake.refs.get(ref_name).cloned().ok_or_else(|| {
                CarrierError::external(
                    "git bundle create exited with status 128",
                    Some(format!("fatal: ambiguous argument '{ref_name}'")),
                )
            })?;
            let commits: Vec<FakeCommit> =
                fake.range(&tip, exclude)?.into_iter().cloned().collect();
            if commits.is_empty() {
                return Err(CarrierError::external(
                    "git bundle create exited with status 128",
                    Some("fatal: Refusing to create empty bundle.".to_string()),
                ));
            }
            let included: HashSet<&CommitId> = commits.iter().map(|c| &c.id).collect();
            let prerequisites: BTreeSet<CommitId> = commits
                .iter()
                .flat_map(|c| c.parents.iter())
                .filter(|p| !included.contains(p))
                .cloned()
                .collect();
            Ok(FakeBundle {
                format: BUNDLE_FORMAT.to_string(),
                heads: vec![BundleHead {
                    id: tip,
                    name: ref_name.to_string(),
                }],
                prerequisites: prerequisites.into_iter().collect(),
                commits,
            })
        })?;
        let bytes = serde_json::to_vec_pretty(&bundle)
            .map_err(|e| CarrierError::external("could not encode bundle", Some(e.to_string())))?;
        std::fs::write(output, bytes)?;
        Ok(())
    }

    fn verify_bundle(&self, path: &Path) -> Result<BundleReport, CarrierError> {
        if self.fail_verification.load(Ordering::SeqCst) {
            return Err(CarrierError::corrupt(path, "forced verification failure"));
        }
        let bundle = Self::read_bundle(path)?;
        if bundle.heads.is_empty() {
            return Err(CarrierError::corrupt(path, "bundle lists no refs"));
        }
        let size_bytes = std::fs::metadata(path)?.len();
        Ok(BundleReport {
            path: path.to_path_buf(),
            heads: bundle.heads,
            size_bytes,
            thin: !bundle.prerequisites.is_empty(),
        })
    }

    fn inspect_bundle(&self, repo: &RepositoryHandle, path: &Path) -> Result<(), CarrierError> {
        let bundle = Self::read_bundle(path)?;
        self.with_repo(repo, |fake| {
            let missing = Self::missing_prerequisites(fake, &bundle);
            if missing.is_empty() {
                Ok(())
            } else {
                Err(CarrierError::InvalidBase {
                    base: missing.join(", "),
                    diagnostic: Some(
                        "error: Repository lacks these prerequisite commits".to_string(),
                    ),
                })
            }
        })
    }

    fn fetch_bundle(
        &self,
        repo: &RepositoryHandle,
        path: &Path,
        head_ref: &str,
    ) -> Result<(), CarrierError> {
        let bundle = Self::read_bundle(path)?;
        if !bundle.heads.iter().any(|h| h.name == head_ref) {
            return Err(CarrierError::external(
                "git fetch exited with status 128",
                Some(format!("fatal: couldn't find remote ref {head_ref}")),
            ));
        }
        self.with_repo(repo, |fake| {
            let missing = Self::missing_prerequisites(fake, &bundle);
            if !missing.is_empty() {
                return Err(CarrierError::InvalidBase {
                    base: missing.join(", "),
                    diagnostic: None,
                });
            }
            for commit in bundle.commits {
                fake.commits.entry(commit.id.clone()).or_insert(commit);
            }
            Ok(())
        })
    }

    fn update_branch(
        &self,
        repo: &RepositoryHandle,
        update: &BranchUpdate,
    ) -> Result<(), CarrierError> {
        self.with_repo(repo, |fake| {
            let refname = format!("refs/heads/{}", update.branch);
            if fake.refs.get(&refname) != update.expected_old.as_ref() {
                return Err(CarrierError::external(
                    "git update-ref exited with status 128",
                    Some(format!("fatal: cannot lock ref '{refname}': value changed")),
                ));
            }
            if !fake.commits.contains_key(&update.new_tip) {
                return Err(CarrierError::external(
                    "git update-ref exited with status 128",
                    Some(format!("fatal: {}: not a valid SHA1", update.new_tip)),
                ));
            }
            if let Some(old) = &update.expected_old {
                if !fake.ancestry(&update.new_tip).contains(old) {
                    return Err(CarrierError::external(
                        "git merge --ff-only exited with status 128",
                        Some("fatal: Not possible to fast-forward, aborting.".to_string()),
                    ));
                }
            }
            fake.refs.insert(refname, update.new_tip.clone());
            Ok(())
        })
    }
}
