/*!
# Zonewatch DevKit - Test doubles for the zonewatch kernel

- Stub monitoring backend (axum, ephemeral port) with call recording,
  latency injection, failure and flaky-empty modes
- JSON fixtures shaped like backend records
- Test harness bundling the stub with a scratch data directory
*/

pub mod backend_stub;
pub mod fixtures;
pub mod test_utils;

pub use backend_stub::BackendStub;
pub use test_utils::TestHarness;
