/// Tool Error Types
///
/// Failures raised while executing a tool. These are reported to the client
/// as tool results with `isError: true`, not as JSON-RPC protocol errors.

use thiserror::Error;

use crate::ledger::LedgerError;

#[derive(Error, Debug)]
pub enum ToolError {
    /// Arguments did not match the tool's input schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(#[from] serde_json::Error),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
