//! Pack and unpack against the real git binary.

mod fixtures;

use fixtures::TestHarness;
use git_carrier::bundling::{BundlePacker, BundleUnpacker, PackRequest};
use git_carrier::{verify_bundle, CarrierError, ErrorKind, GitCli, GitEngine, RepositoryHandle};
use std::path::{Path, PathBuf};

struct Transfer {
    harness: TestHarness,
    git: GitCli,
    source: PathBuf,
    dest: PathBuf,
    shared_tip: String,
}

/// Source with three commits, a clone of it, then two more commits on the source.
fn transfer() -> Transfer {
    let harness = TestHarness::new().unwrap();
    let source = harness.init_repo("source").unwrap();
    harness.commit(&source, "initial").unwrap();
    harness.commit(&source, "second").unwrap();
    let shared_tip = harness.commit(&source, "third").unwrap();
    let dest = harness.clone_repo(&source, "dest").unwrap();
    harness.commit(&source, "fourth").unwrap();
    harness.commit(&source, "fifth").unwrap();

    Transfer {
        harness,
        git: GitCli::system("git"),
        source,
        dest,
        shared_tip,
    }
}

fn open(git: &GitCli, path: &Path) -> RepositoryHandle {
    git.open_repository(path).unwrap()
}

fn pack(t: &Transfer, reference: &str, base: Option<&str>, name: &str) -> PathBuf {
    let repo = open(&t.git, &t.source);
    BundlePacker::new(&t.git, &repo)
        .pack(&PackRequest {
            reference: reference.to_string(),
            base: base.map(str::to_string),
            output: t.harness.bundle_path(name),
            overwrite: false,
        })
        .unwrap()
        .path
}

#[test]
fn test_incremental_round_trip_fast_forwards_clone() {
    let t = transfer();
    let bundle = pack(&t, "main", Some(&t.shared_tip), "incremental.bundle");

    // whether the pack is thin depends on git's delta choices; only intact matters
    let report = verify_bundle(&t.git, &bundle).unwrap();
    assert_eq!(report.heads.len(), 1);
    assert_eq!(report.heads[0].name, "refs/heads/main");

    let repo = open(&t.git, &t.dest);
    let outcome = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap();

    let source_tip = t.harness.rev_parse(&t.source, "main").unwrap();
    assert_eq!(outcome.commits_integrated, 2);
    assert_eq!(outcome.previous_tip.as_deref(), Some(t.shared_tip.as_str()));
    assert_eq!(t.harness.rev_parse(&t.dest, "main").unwrap(), source_tip);
    // checked-out branch: the working tree follows
    assert!(t.dest.join("fifth.txt").exists());
}

#[test]
fn test_full_history_into_empty_repository() {
    let t = transfer();
    let bundle = pack(&t, "main", None, "full.bundle");
    let empty = t.harness.init_repo("empty").unwrap();

    let repo = open(&t.git, &empty);
    let outcome = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.commits_integrated, 5);
    assert_eq!(
        t.harness.rev_parse(&empty, "main").unwrap(),
        t.harness.rev_parse(&t.source, "main").unwrap()
    );
}

#[test]
fn test_second_unpack_is_a_noop() {
    let t = transfer();
    let bundle = pack(&t, "main", Some(&t.shared_tip), "incremental.bundle");
    let repo = open(&t.git, &t.dest);
    let unpacker = BundleUnpacker::new(&t.git, &repo);
    unpacker.unpack(&bundle, None).unwrap();
    let before = t.harness.refs_snapshot(&t.dest).unwrap();

    let again = unpacker.unpack(&bundle, None).unwrap();

    assert_eq!(again.commits_integrated, 0);
    assert!(again.is_noop());
    assert_eq!(t.harness.refs_snapshot(&t.dest).unwrap(), before);
}

#[test]
fn test_diverged_destination_is_refused() {
    let t = transfer();
    let bundle = pack(&t, "main", Some(&t.shared_tip), "incremental.bundle");
    let local = t.harness.commit(&t.dest, "local change").unwrap();
    let before = t.harness.refs_snapshot(&t.dest).unwrap();

    let repo = open(&t.git, &t.dest);
    let err = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap_err();

    match &err {
        CarrierError::DivergedHistory {
            branch,
            local_tip,
            bundle_tip,
        } => {
            assert_eq!(branch, "main");
            assert_eq!(local_tip, &local);
            assert_eq!(bundle_tip, &t.harness.rev_parse(&t.source, "main").unwrap());
        }
        other => panic!("expected divergence, got {other:?}"),
    }
    assert!(err.to_string().contains(&local));
    assert_eq!(t.harness.refs_snapshot(&t.dest).unwrap(), before);
    assert_eq!(t.harness.rev_parse(&t.dest, "HEAD").unwrap(), local);
}

#[test]
fn test_truncated_bundle_is_corrupt_and_refs_are_untouched() {
    let t = transfer();
    let bundle = pack(&t, "main", Some(&t.shared_tip), "incremental.bundle");
    t.harness.truncate(&bundle, 25).unwrap();
    let before = t.harness.refs_snapshot(&t.dest).unwrap();

    let err = verify_bundle(&t.git, &bundle).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptBundleError);
    assert!(err.diagnostic().is_some());

    let repo = open(&t.git, &t.dest);
    let err = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptBundleError);
    assert_eq!(t.harness.refs_snapshot(&t.dest).unwrap(), before);
}

#[test]
fn test_garbage_file_is_corrupt() {
    let t = transfer();
    let path = t.harness.bundle_path("garbage.bundle");
    std::fs::write(&path, b"this is not a bundle\n").unwrap();
    let err = verify_bundle(&t.git, &path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CorruptBundleError);
}

#[test]
fn test_repacking_is_idempotent() {
    let t = transfer();
    let first = pack(&t, "main", Some(&t.shared_tip), "first.bundle");
    let second = pack(&t, "main", Some(&t.shared_tip), "second.bundle");

    let a = verify_bundle(&t.git, &first).unwrap();
    let b = verify_bundle(&t.git, &second).unwrap();
    assert_eq!(a.heads, b.heads);
    assert_eq!(a.thin, b.thin);
}

#[test]
fn test_destination_without_base_reports_invalid_base() {
    let t = transfer();
    let source_head = t.harness.rev_parse(&t.source, "main~1").unwrap();
    t.harness.commit(&t.source, "sixth").unwrap();
    let bundle = pack(&t, "main", Some(&source_head), "ahead.bundle");
    let before = t.harness.refs_snapshot(&t.dest).unwrap();

    let repo = open(&t.git, &t.dest);
    let err = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidBaseError);
    assert!(err.to_string().contains(&source_head));
    assert_eq!(t.harness.refs_snapshot(&t.dest).unwrap(), before);
}

#[test]
fn test_empty_range_writes_no_file() {
    let t = transfer();
    let repo = open(&t.git, &t.source);
    let output = t.harness.bundle_path("empty.bundle");
    let err = BundlePacker::new(&t.git, &repo)
        .pack(&PackRequest {
            reference: "main".to_string(),
            base: Some("main".to_string()),
            output: output.clone(),
            overwrite: false,
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EmptyRangeError);
    assert!(!err.is_fatal());
    assert!(!output.exists());
}

#[test]
fn test_unknown_base_is_invalid_base() {
    let t = transfer();
    let repo = open(&t.git, &t.source);
    let err = BundlePacker::new(&t.git, &repo)
        .pack(&PackRequest {
            reference: "main".to_string(),
            base: Some("no-such-branch".to_string()),
            output: t.harness.bundle_path("x.bundle"),
            overwrite: false,
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidBaseError);
}

#[test]
fn test_raw_commit_pack_cleans_up_export_ref() {
    let t = transfer();
    let commit = t.harness.rev_parse(&t.source, "main~1").unwrap();
    let bundle = pack(&t, &commit, Some(&t.shared_tip), "raw.bundle");

    assert_eq!(
        t.harness
            .git(&t.source, &["for-each-ref", "refs/carrier"])
            .unwrap(),
        ""
    );

    let repo = open(&t.git, &t.dest);
    let unpacker = BundleUnpacker::new(&t.git, &repo);
    let err = unpacker.unpack(&bundle, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TargetBranchRequiredError);

    let outcome = unpacker.unpack(&bundle, Some("main")).unwrap();
    assert_eq!(outcome.commits_integrated, 1);
    assert_eq!(t.harness.rev_parse(&t.dest, "main").unwrap(), commit);
}

#[test]
fn test_new_branch_is_created_without_touching_checkout() {
    let t = transfer();
    t.harness
        .git(&t.source, &["checkout", "--quiet", "-b", "feature/login"])
        .unwrap();
    let feature_tip = t.harness.commit(&t.source, "login form").unwrap();
    let bundle = pack(&t, "feature/login", Some(&t.shared_tip), "feature.bundle");
    let dest_head = t.harness.rev_parse(&t.dest, "HEAD").unwrap();

    let repo = open(&t.git, &t.dest);
    let outcome = BundleUnpacker::new(&t.git, &repo)
        .unpack(&bundle, None)
        .unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.branch, "feature/login");
    assert_eq!(
        t.harness.rev_parse(&t.dest, "refs/heads/feature/login").unwrap(),
        feature_tip
    );
    assert_eq!(t.harness.rev_parse(&t.dest, "HEAD").unwrap(), dest_head);
}

#[test]
fn test_annotated_tag_lands_as_its_commit() {
    let t = transfer();
    t.harness
        .git(&t.source, &["tag", "-a", "v1", "-m", "release 1"])
        .unwrap();
    let tag_object = t.harness.rev_parse(&t.source, "v1").unwrap();
    let commit = t.harness.rev_parse(&t.source, "v1^{commit}").unwrap();
    assert_ne!(tag_object, commit);

    let bundle = pack(&t, "v1", Some(&t.shared_tip), "release.bundle");
    let repo = open(&t.git, &t.dest);
    let unpacker = BundleUnpacker::new(&t.git, &repo);

    let created = unpacker.unpack(&bundle, Some("release")).unwrap();
    assert!(created.created);
    assert_eq!(created.new_tip, commit);
    assert_eq!(created.commits_integrated, 5);
    assert_eq!(
        t.harness.rev_parse(&t.dest, "refs/heads/release").unwrap(),
        commit
    );

    // checked-out branch goes through the merge path
    let forwarded = unpacker.unpack(&bundle, Some("main")).unwrap();
    assert_eq!(forwarded.new_tip, commit);
    assert_eq!(forwarded.commits_integrated, 2);
    assert_eq!(t.harness.rev_parse(&t.dest, "main").unwrap(), commit);
}

#[test]
fn test_plain_directory_is_not_a_repository() {
    let harness = TestHarness::new().unwrap();
    let err = GitCli::system("git").open_repository(harness.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RepositoryError);
}

#[test]
fn test_missing_git_binary_is_external_tool_error() {
    let t = transfer();
    let err = GitCli::system("git-carrier-no-such-git")
        .open_repository(&t.source)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalToolError);
}
