//! SSH and SFTP login notifications from the authentication log.
pub mod monitor;
pub mod parser;
pub mod tail;

pub use monitor::{FaillogCommand, FailedLoginSource, SshMonitor};
pub use tail::LogTailer;
