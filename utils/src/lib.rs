/// Error-handling utilities.
pub mod error;
/// A colored `log::Log` implementation shared by binaries that embed this crate.
pub mod logging;
