mod failure;
mod shutdown;

pub mod prelude {
    pub use crate::failure::WorkloadFailedError;
    pub use crate::shutdown::{DelegatedShutdownListener, ShutdownHandle, ShutdownSignalError};
}
