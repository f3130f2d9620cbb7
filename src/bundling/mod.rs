//! Bundle packing and unpacking for git-carrier
//!
//! Moves history between machines with no shared network path, one verified
//! `git bundle` file at a time.

pub mod errors;
pub mod packer;
pub mod repository;
pub mod resolver;
pub mod types;
pub mod unpacker;

pub use errors::{CarrierError, ErrorKind};
pub use packer::{default_output_name, BundlePacker, PackRequest};
pub use repository::RepositoryHandle;
pub use resolver::{CommitIter, CommitLog, RangeResolver};
pub use types::{
    BranchInfo, BundleHead, BundleReport, CommitInfo, CommitRange, OperationResult, Outcome,
    PackOutcome, UnpackOutcome,
};
pub use unpacker::{verify_bundle, BundleUnpacker};
