//! Host that performs nothing and logs what it was asked to do.

use tracing::info;
use wsbridge_rpc::{Host, HostCall, HostError};

/// Stand-in host for running the bridge without a chat client attached.
///
/// Every call succeeds with empty output, so queries reply with `""` or
/// `null` and actions are accepted.
#[derive(Debug, Default)]
pub struct DryRunHost;

impl Host for DryRunHost {
    fn execute(&self, call: &HostCall) -> Result<String, HostError> {
        info!(method = call.method(), ?call, "dry-run host call");
        Ok(String::new())
    }
}
