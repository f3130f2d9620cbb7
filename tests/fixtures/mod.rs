/// Shared fixtures for integration tests that drive the real git binary
pub mod test_harness;

pub use test_harness::TestHarness;
