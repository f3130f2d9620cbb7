//! Verification and fast-forward-only integration of received bundles.

use super::errors::CarrierError;
use super::repository::RepositoryHandle;
use super::types::{BranchName, BranchUpdate, BundleHead, BundleReport, UnpackOutcome};
use crate::external::GitEngine;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Structural check of a bundle file, usable without any repository.
pub fn verify_bundle(engine: &dyn GitEngine, artifact: &Path) -> Result<BundleReport, CarrierError> {
    let path = absolute(artifact)?;
    let report = engine.verify_bundle(&path)?;
    debug!(path = %path.display(), heads = report.heads.len(), thin = report.thin, "bundle verified");
    Ok(report)
}

fn absolute(artifact: &Path) -> Result<PathBuf, CarrierError> {
    artifact
        .canonicalize()
        .map_err(|e| CarrierError::corrupt(artifact, format!("cannot read bundle: {e}")))
}

/// Picks which bundle head to apply and the local branch it lands on.
fn select_head<'h>(
    heads: &'h [BundleHead],
    target: Option<&str>,
    current: Option<&str>,
) -> Result<(&'h BundleHead, BranchName), CarrierError> {
    let names = || heads.iter().map(|h| h.name.clone()).collect::<Vec<_>>();

    if let Some(target) = target {
        if let Some(head) = heads.iter().find(|h| h.branch_name() == Some(target)) {
            return Ok((head, target.to_string()));
        }
        return match heads {
            [only] => Ok((only, target.to_string())),
            _ => Err(CarrierError::TargetBranchRequired { heads: names() }),
        };
    }

    let branches: Vec<(&BundleHead, &str)> = heads
        .iter()
        .filter_map(|h| h.branch_name().map(|b| (h, b)))
        .collect();
    match branches.as_slice() {
        [(head, branch)] => Ok((*head, branch.to_string())),
        [] => Err(CarrierError::TargetBranchRequired { heads: names() }),
        many => many
            .iter()
            .find(|(_, b)| Some(*b) == current)
            .map(|(head, branch)| (*head, branch.to_string()))
            .ok_or_else(|| CarrierError::TargetBranchRequired { heads: names() }),
    }
}

pub struct BundleUnpacker<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
}

impl<'a> BundleUnpacker<'a> {
    pub fn new(engine: &'a dyn GitEngine, repo: &'a RepositoryHandle) -> Self {
        Self { engine, repo }
    }

    pub fn verify(&self, artifact: &Path) -> Result<BundleReport, CarrierError> {
        verify_bundle(self.engine, artifact)
    }

    /// Apply a bundle as a fast-forward (or creation) of one local branch.
    ///
    /// Refs are written only in the final step; every failure before it
    /// leaves them as they were. Objects fetched before a divergence is
    /// detected stay unreferenced.
    pub fn unpack(
        &self,
        artifact: &Path,
        target: Option<&str>,
    ) -> Result<UnpackOutcome, CarrierError> {
        let report = self.verify(artifact)?;
        let path = report.path.clone();

        let current = self.engine.current_branch(self.repo)?;
        let (head, branch) = select_head(&report.heads, target, current.as_deref())?;
        let local_tip = self
            .engine
            .resolve_ref(self.repo, &format!("refs/heads/{branch}"))?
            .map(|r| r.commit);

        // An annotated tag head names the tag object; the ^{commit} lookup
        // fails until that object is present.
        if !self.engine.commit_exists(self.repo, &head.id)? {
            self.engine.inspect_bundle(self.repo, &path)?;
            self.engine.fetch_bundle(self.repo, &path, &head.name)?;
        }
        let bundle_tip = self
            .engine
            .resolve_ref(self.repo, &head.id)?
            .map(|r| r.commit)
            .ok_or_else(|| {
                CarrierError::corrupt(&path, format!("{} does not peel to a commit", head.id))
            })?;

        if let Some(tip) = &local_tip {
            if self.engine.is_ancestor(self.repo, &bundle_tip, tip)? {
                info!(%branch, "bundle already applied");
                return Ok(UnpackOutcome {
                    branch,
                    previous_tip: local_tip.clone(),
                    new_tip: tip.clone(),
                    commits_integrated: 0,
                    created: false,
                });
            }
            if !self.engine.is_ancestor(self.repo, tip, &bundle_tip)? {
                warn!(%branch, local = %tip, bundle = %bundle_tip, "history has diverged");
                return Err(CarrierError::DivergedHistory {
                    branch,
                    local_tip: tip.clone(),
                    bundle_tip,
                });
            }
        }

        let commits_integrated =
            self.engine
                .count_ancestors(self.repo, &bundle_tip, local_tip.as_deref())?;
        self.engine.update_branch(
            self.repo,
            &BranchUpdate {
                branch: branch.clone(),
                new_tip: bundle_tip.clone(),
                expected_old: local_tip.clone(),
                checked_out: current.as_deref() == Some(branch.as_str()),
            },
        )?;

        info!(%branch, commits = commits_integrated, "bundle applied");
        Ok(UnpackOutcome {
            created: local_tip.is_none(),
            branch,
            previous_tip: local_tip,
            new_tip: bundle_tip,
            commits_integrated,
        })
    }
}
