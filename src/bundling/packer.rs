//! Bundle creation with verify-before-publish.

use super::errors::CarrierError;
use super::repository::RepositoryHandle;
use super::resolver::RangeResolver;
use super::types::{CommitId, PackOutcome};
use crate::external::GitEngine;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const EXPORT_REF_PREFIX: &str = "refs/carrier/export/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRequest {
    pub reference: String,
    pub base: Option<String>,
    pub output: PathBuf,
    pub overwrite: bool,
}

/// `<repo>_<reference>_<YYYY-MM-DD_HH-MM>.bundle`, with `/` in the reference
/// replaced so the name stays a single path component.
pub fn default_output_name(repo: &RepositoryHandle, reference: &str, now: DateTime<Local>) -> String {
    let reference: String = reference
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '-' } else { c })
        .collect();
    format!(
        "{}_{}_{}.bundle",
        repo.name(),
        reference,
        now.format("%Y-%m-%d_%H-%M")
    )
}

/// Removes the transient ref used to bundle a raw commit.
struct ExportRef<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
    name: String,
    target: CommitId,
}

impl<'a> ExportRef<'a> {
    fn create(
        engine: &'a dyn GitEngine,
        repo: &'a RepositoryHandle,
        target: &str,
    ) -> Result<Self, CarrierError> {
        let name = format!("{EXPORT_REF_PREFIX}{target}");
        engine.create_ref(repo, &name, target)?;
        debug!(%name, "created export ref");
        Ok(Self {
            engine,
            repo,
            name,
            target: target.to_string(),
        })
    }
}

impl Drop for ExportRef<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.engine.delete_ref(self.repo, &self.name, &self.target) {
            warn!(name = %self.name, error = %e, "failed to remove export ref");
        }
    }
}

pub struct BundlePacker<'a> {
    engine: &'a dyn GitEngine,
    repo: &'a RepositoryHandle,
}

impl<'a> BundlePacker<'a> {
    pub fn new(engine: &'a dyn GitEngine, repo: &'a RepositoryHandle) -> Self {
        Self { engine, repo }
    }

    /// Write a verified bundle of `reference` minus the history of `base`.
    ///
    /// The bundle is staged in a temporary directory beside the output and
    /// renamed into place only after it verifies, so a failure at any step
    /// leaves the output path untouched.
    pub fn pack(&self, request: &PackRequest) -> Result<PackOutcome, CarrierError> {
        let resolver = RangeResolver::new(self.engine, self.repo);
        let resolved = resolver.resolve(&request.reference)?;
        let range = resolver.range_from(
            &request.reference,
            resolved.commit.clone(),
            request.base.as_deref(),
        )?;
        if range.is_empty() {
            info!(reference = %request.reference, "nothing to pack");
            return Err(CarrierError::EmptyRange {
                reference: request.reference.clone(),
                base: request.base.clone(),
            });
        }

        let target = self.prepare_output(&request.output, request.overwrite)?;
        let file_name = target
            .file_name()
            .ok_or_else(|| CarrierError::external("output path has no file name", None))?
            .to_owned();
        let parent = target.parent().unwrap_or(Path::new("."));

        let staging = tempfile::Builder::new()
            .prefix(".git-carrier-")
            .tempdir_in(parent)?;
        let staged = staging.path().join(&file_name);

        let export = match resolved.full_name {
            Some(_) => None,
            None => Some(ExportRef::create(self.engine, self.repo, &range.tip)?),
        };
        let ref_name = export
            .as_ref()
            .map(|guard| guard.name.clone())
            .or(resolved.full_name)
            .unwrap_or_default();

        self.engine
            .create_bundle(self.repo, &staged, &ref_name, range.base.as_deref())?;

        let report = self.engine.verify_bundle(&staged).map_err(|e| match e {
            CarrierError::CorruptBundle { diagnostic, .. } => CarrierError::CorruptBundle {
                path: target.clone(),
                diagnostic,
            },
            other => CarrierError::CorruptBundle {
                path: target.clone(),
                diagnostic: Some(other.to_string()),
            },
        })?;
        let head = report
            .heads
            .iter()
            .find(|h| h.name == ref_name)
            .ok_or_else(|| {
                CarrierError::corrupt(&target, format!("bundle does not record {ref_name}"))
            })?;
        // A tag head records the tag object; compare the commit it peels to.
        let bundled = self
            .engine
            .resolve_ref(self.repo, &head.id)?
            .map(|r| r.commit);
        if bundled.as_deref() != Some(range.tip.as_str()) {
            warn!(
                reference = %request.reference,
                expected = %range.tip,
                ?bundled,
                "reference moved during pack"
            );
            return Err(CarrierError::external(
                format!(
                    "{} moved while packing (expected {}); run pack again",
                    request.reference, range.tip
                ),
                None,
            ));
        }

        std::fs::rename(&staged, &target)?;

        info!(
            path = %target.display(),
            commits = range.count,
            bytes = report.size_bytes,
            "bundle written"
        );
        Ok(PackOutcome {
            path: target,
            reference: request.reference.clone(),
            ref_name,
            tip: range.tip,
            base: range.base,
            commit_count: range.count,
            size_bytes: report.size_bytes,
        })
    }

    /// Absolute output path with an existing parent; refuses to clobber
    /// unless asked.
    fn prepare_output(&self, output: &Path, overwrite: bool) -> Result<PathBuf, CarrierError> {
        let file_name = output
            .file_name()
            .ok_or_else(|| CarrierError::external("output path has no file name", None))?;
        let parent = match output.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let parent = parent.canonicalize().map_err(|e| {
            CarrierError::external(
                format!("output directory {} is not usable", parent.display()),
                Some(e.to_string()),
            )
        })?;
        let target = parent.join(file_name);
        if target.is_dir() {
            return Err(CarrierError::external(
                format!("{} is a directory", target.display()),
                None,
            ));
        }
        if target.exists() && !overwrite {
            return Err(CarrierError::OutputExists { path: target });
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::FakeGit;
    use crate::ErrorKind;
    use chrono::TimeZone;

    struct Setup {
        git: FakeGit,
        repo: RepositoryHandle,
        ids: Vec<CommitId>,
        out: tempfile::TempDir,
    }

    fn setup(commits: usize) -> Setup {
        let git = FakeGit::new();
        let repo = git.init_repo("/fake/source", "main");
        let ids = (0..commits)
            .map(|i| git.commit(&repo, "main", &format!("commit {i}")))
            .collect();
        Setup {
            git,
            repo,
            ids,
            out: tempfile::tempdir().unwrap(),
        }
    }

    fn request(reference: &str, base: Option<&str>, output: PathBuf) -> PackRequest {
        PackRequest {
            reference: reference.to_string(),
            base: base.map(str::to_string),
            output,
            overwrite: false,
        }
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn packs_full_history() {
        let s = setup(3);
        let output = s.out.path().join("full.bundle");
        let outcome = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", None, output.clone()))
            .unwrap();

        assert_eq!(outcome.commit_count, 3);
        assert_eq!(outcome.ref_name, "refs/heads/main");
        assert_eq!(outcome.tip, s.ids[2]);
        assert!(output.exists());
        assert_eq!(dir_entries(s.out.path()), vec!["full.bundle".to_string()]);
    }

    #[test]
    fn packs_incremental_range() {
        let s = setup(4);
        let outcome = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", Some(&s.ids[1]), s.out.path().join("inc.bundle")))
            .unwrap();
        assert_eq!(outcome.commit_count, 2);
        assert_eq!(outcome.base.as_deref(), Some(s.ids[1].as_str()));
    }

    #[test]
    fn branch_moving_mid_pack_is_refused() {
        let s = setup(3);
        s.git.race_next_bundle();
        let output = s.out.path().join("moved.bundle");

        let err = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", Some(&s.ids[0]), output.clone()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ExternalToolError);
        assert!(err.to_string().contains(&s.ids[2]));
        assert!(!output.exists());
        assert!(dir_entries(s.out.path()).is_empty());
    }

    #[test]
    fn empty_range_writes_nothing() {
        let s = setup(2);
        let err = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", Some("main"), s.out.path().join("x.bundle")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EmptyRangeError);
        assert!(!err.is_fatal());
        assert!(dir_entries(s.out.path()).is_empty());
    }

    #[test]
    fn failed_verification_leaves_no_artifact() {
        let s = setup(2);
        s.git.break_verification(true);
        let output = s.out.path().join("broken.bundle");

        let err = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", None, output.clone()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CorruptBundleError);
        assert!(!output.exists());
        assert!(dir_entries(s.out.path()).is_empty());
    }

    #[test]
    fn failed_verification_keeps_existing_file() {
        let s = setup(2);
        let output = s.out.path().join("keep.bundle");
        std::fs::write(&output, b"previous artifact").unwrap();
        s.git.break_verification(true);

        let mut req = request("main", None, output.clone());
        req.overwrite = true;
        BundlePacker::new(&s.git, &s.repo).pack(&req).unwrap_err();

        assert_eq!(std::fs::read(&output).unwrap(), b"previous artifact");
    }

    #[test]
    fn refuses_to_overwrite_without_permission() {
        let s = setup(1);
        let output = s.out.path().join("exists.bundle");
        std::fs::write(&output, b"x").unwrap();

        let packer = BundlePacker::new(&s.git, &s.repo);
        let err = packer.pack(&request("main", None, output.clone())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutputExistsError);

        let mut req = request("main", None, output.clone());
        req.overwrite = true;
        packer.pack(&req).unwrap();
        assert_ne!(std::fs::read(&output).unwrap(), b"x");
    }

    #[test]
    fn raw_commit_uses_transient_export_ref() {
        let s = setup(3);
        let before = s.git.refs(&s.repo);
        let outcome = BundlePacker::new(&s.git, &s.repo)
            .pack(&request(&s.ids[1], None, s.out.path().join("raw.bundle")))
            .unwrap();

        assert_eq!(outcome.commit_count, 2);
        assert!(outcome.ref_name.starts_with(EXPORT_REF_PREFIX));
        assert_eq!(s.git.refs(&s.repo), before);
    }

    #[test]
    fn export_ref_removed_on_failure() {
        let s = setup(2);
        s.git.break_verification(true);
        let before = s.git.refs(&s.repo);
        BundlePacker::new(&s.git, &s.repo)
            .pack(&request(&s.ids[0], None, s.out.path().join("raw.bundle")))
            .unwrap_err();
        assert_eq!(s.git.refs(&s.repo), before);
    }

    #[test]
    fn idempotent_packs_match() {
        let s = setup(4);
        let packer = BundlePacker::new(&s.git, &s.repo);
        let a = packer
            .pack(&request("main", Some(&s.ids[0]), s.out.path().join("a.bundle")))
            .unwrap();
        let b = packer
            .pack(&request("main", Some(&s.ids[0]), s.out.path().join("b.bundle")))
            .unwrap();
        assert_eq!(a.commit_count, b.commit_count);
        let ra = s.git.verify_bundle(&a.path).unwrap();
        let rb = s.git.verify_bundle(&b.path).unwrap();
        assert_eq!(ra.heads, rb.heads);
    }

    #[test]
    fn missing_output_directory_is_reported() {
        let s = setup(1);
        let err = BundlePacker::new(&s.git, &s.repo)
            .pack(&request("main", None, s.out.path().join("nope/x.bundle")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExternalToolError);
    }

    #[test]
    fn default_name_is_filesystem_safe() {
        let repo = RepositoryHandle::new("/work/project", "/work/project/.git");
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        assert_eq!(
            default_output_name(&repo, "feature/login", now),
            "project_feature-login_2024-03-09_14-05.bundle"
        );
    }
}
