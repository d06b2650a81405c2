#[allow(clippy::module_inception)]
pub mod error;
pub mod executor;
pub mod stdio;
pub mod store;

pub use error::{BackendError, CliError};
pub use executor::ExecutorError;
pub use stdio::{ErrorCode, StdioError};
pub use store::StoreError;
