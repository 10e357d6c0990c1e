//! Supervision of an external long-running program.
//!
//! A [`SupervisedProcess`] owns exactly one child process. Its stdout and stderr
//! are copied line by line into a [`LogBuffer`] by background tasks, so callers
//! can block on [`SupervisedProcess::wait_for_log`] while the output keeps
//! growing. Stopping the process always persists the captured log to disk.

mod log_buffer;
pub use log_buffer::{LogBuffer, LogMatch};

mod supervisor;
pub use supervisor::{
    SupervisedProcess, DEFAULT_LOG_FILE_NAME, DEFAULT_STOP_GRACE_PERIOD,
    DEFAULT_WAIT_FOR_LOG_TIMEOUT,
};
