// tf
pub const DEFAULT_TF_PROGRAM: &str = "tf";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

// state
pub const TOOL_DIR_NAME: &str = "tfvc-scm";
pub const STATE_DIR_NAME: &str = "state";
pub const STATE_KEY: &str = "tfsdata";
pub const CONFIG_FILE_NAME: &str = "config.json";

// ui
pub const MAX_COMMENT_LINE_LENGTH: usize = 72;
