// git-carrier library - offline history transfer with git bundles
// This exposes the core components for testing and integration

pub mod bundling;
pub mod cli;
pub mod config;
pub mod external;
pub mod telemetry;

// Re-export key types for easy access
pub use bundling::{
    verify_bundle, BundlePacker, BundleUnpacker, CarrierError, CommitRange, ErrorKind,
    OperationResult, PackRequest, RangeResolver, RepositoryHandle,
};
pub use config::CarrierConfig;
pub use external::{GitCli, GitEngine};
pub use telemetry::{create_operation_span, generate_correlation_id, init_telemetry};
