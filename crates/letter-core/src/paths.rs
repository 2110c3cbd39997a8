/// Path constants and utilities for the letter data directory
use once_cell::sync::OnceCell;
use std::path::PathBuf;

// Static storage for configurable data root
static DATA_ROOT: OnceCell<String> = OnceCell::new();

// Default root constants
pub const DEFAULT_DATA_ROOT: &str = "/data/letters";
pub const APP_ROOT: &str = "/app";

/// Initialize the data root directory. Can only be called once.
/// If not called, the default `/data/letters` will be used.
pub fn init_data_root(path: String) -> Result<(), String> {
    DATA_ROOT.set(path).map_err(|_| "Data root already initialized".to_string())
}

/// Get the configured data root or the default
fn get_data_root() -> &'static str {
    DATA_ROOT.get().map(|s| s.as_str()).unwrap_or(DEFAULT_DATA_ROOT)
}

// Directory names (relative to the data root)
pub const TEMPLATES_DIR_NAME: &str = "templates";
pub const EMPLOYEES_DIR_NAME: &str = "employees";
pub const SIGNATURES_DIR_NAME: &str = "signatures";
pub const LETTERS_DIR_NAME: &str = "letters";
pub const HISTORY_DIR_NAME: &str = "history";
pub const BULK_DIR_NAME: &str = "bulk";
pub const FILES_DIR_NAME: &str = "files";
pub const TRIGGERS_DIR_NAME: &str = "triggers";
pub const PROCESSED_DIR_NAME: &str = "processed";
pub const FAILED_DIR_NAME: &str = "failed";

pub const SEQUENCES_FILE_NAME: &str = "sequences.json";

// App subdirectories
pub const CONFIG_DIR_NAME: &str = "config";

// Path builder functions
pub fn data_root() -> PathBuf {
    PathBuf::from(get_data_root())
}

pub fn app_root() -> PathBuf {
    PathBuf::from(APP_ROOT)
}

pub fn config_dir() -> PathBuf {
    app_root().join(CONFIG_DIR_NAME)
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("letters.json")
}

/// Store directories below a given root, in creation order
pub fn store_directories(root: &std::path::Path) -> Vec<PathBuf> {
    [
        TEMPLATES_DIR_NAME,
        EMPLOYEES_DIR_NAME,
        SIGNATURES_DIR_NAME,
        LETTERS_DIR_NAME,
        HISTORY_DIR_NAME,
        BULK_DIR_NAME,
        FILES_DIR_NAME,
    ]
    .iter()
    .map(|name| root.join(name))
    .collect()
}

/// Trigger directories below a given root
pub fn trigger_directories(root: &std::path::Path) -> Vec<PathBuf> {
    let triggers = root.join(TRIGGERS_DIR_NAME);
    vec![
        triggers.join(PROCESSED_DIR_NAME),
        triggers.join(FAILED_DIR_NAME),
        triggers,
    ]
}
