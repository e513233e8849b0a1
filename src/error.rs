use std::time::Duration;
use thiserror::Error;

/// failures at the `tf` call boundary
#[derive(Error, Debug)]
pub enum TfError {
    /// no `tf` executable was configured or found
    #[error("tf executable not configured (set --tf, TFVC_SCM_TF or tfPath in config)")]
    NotConfigured,

    /// the process could not be started
    #[error("failed to run `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// the process outlived its timeout and was killed
    #[error("`{command}` did not finish within {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    /// the process exited unsuccessfully; `message` is its error output
    #[error("`{command}` failed: {message}")]
    Execution { command: String, message: String },

    /// a command was invoked with neither an explicit path nor an active file
    #[error("no target: pass a path or set an active file")]
    NoTarget,
}
