//! Environment constants and path utilities for tasksync.
//!
//! This module centralizes all hardcoded paths and file names used throughout
//! the application, making them easier to maintain and modify.

use std::path::{Path, PathBuf};

/// Main application directory name (hidden directory like .git, .vscode)
pub const TASKSYNC_DIR_NAME: &str = ".tasksync";

/// Configuration file name inside the application directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Local override file merged over [`CONFIG_FILE_NAME`]
pub const LOCAL_CONFIG_FILE_NAME: &str = "config.local.toml";

/// Stand-alone configuration file looked up in the current directory
pub const STANDALONE_CONFIG_FILE_NAME: &str = "tasksync.toml";

/// Local override for [`STANDALONE_CONFIG_FILE_NAME`]
pub const STANDALONE_LOCAL_CONFIG_FILE_NAME: &str = "tasksync.local.toml";

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "TASKSYNC_DATA_DIR";

/// State-related directory and file names
pub mod state {
    /// State directory name within .tasksync
    pub const STATE_DIR_NAME: &str = "state";

    /// SQLite database shared by the conflict queue and sync history
    pub const DATABASE_FILE_NAME: &str = "sync_history.db";

    /// JSON document backing the file outline store
    pub const OUTLINE_FILE_NAME: &str = "outline.json";
}

/// Outline layout names used by the task router
pub mod outline {
    /// Space used when none is given
    pub const DEFAULT_SPACE: &str = "0-personal";

    /// Directory holding org files inside a space
    pub const ORG_DIR_NAME: &str = "org";

    /// Unfiled destination for items no routing rule claims
    pub const INBOX_FILE_NAME: &str = "inbox.org";

    /// Destination for actionable items
    pub const NEXT_ACTIONS_FILE_NAME: &str = "next_actions.org";
}

/// Build the main .tasksync directory path from a data directory
pub fn tasksync_dir_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TASKSYNC_DIR_NAME)
}

/// Build the state directory path
pub fn state_dir_path(data_dir: &Path) -> PathBuf {
    tasksync_dir_path(data_dir).join(state::STATE_DIR_NAME)
}

/// Build the default database path
pub fn database_file_path(data_dir: &Path) -> PathBuf {
    state_dir_path(data_dir).join(state::DATABASE_FILE_NAME)
}

/// Build the default outline document path
pub fn outline_file_path(data_dir: &Path) -> PathBuf {
    state_dir_path(data_dir).join(state::OUTLINE_FILE_NAME)
}

/// Build the org file path for a destination inside a space
pub fn org_file_path(data_dir: &Path, space: &str, destination: &str) -> PathBuf {
    data_dir
        .join(space)
        .join(outline::ORG_DIR_NAME)
        .join(destination)
}

/// Build config directory path in user's home directory
pub fn user_config_dir_path(home_dir: &Path) -> PathBuf {
    home_dir.join(TASKSYNC_DIR_NAME)
}

/// Build config file path in user's home directory
pub fn user_config_file_path(home_dir: &Path) -> PathBuf {
    user_config_dir_path(home_dir).join(CONFIG_FILE_NAME)
}

/// Build local config file path in current directory
pub fn local_config_file_path(current_dir: &Path) -> PathBuf {
    current_dir.join(TASKSYNC_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Path of the override file that sits next to a base config file.
///
/// `tasksync.toml` pairs with `tasksync.local.toml`; every other file pairs
/// with `config.local.toml` in the same directory.
pub fn override_file_path(base: &Path) -> PathBuf {
    let override_name = match base.file_name().and_then(|n| n.to_str()) {
        Some(STANDALONE_CONFIG_FILE_NAME) => STANDALONE_LOCAL_CONFIG_FILE_NAME,
        _ => LOCAL_CONFIG_FILE_NAME,
    };
    base.with_file_name(override_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_construction() {
        let data_dir = Path::new("/home/user/Data");

        assert_eq!(
            tasksync_dir_path(data_dir),
            Path::new("/home/user/Data/.tasksync")
        );
        assert_eq!(
            database_file_path(data_dir),
            Path::new("/home/user/Data/.tasksync/state/sync_history.db")
        );
        assert_eq!(
            outline_file_path(data_dir),
            Path::new("/home/user/Data/.tasksync/state/outline.json")
        );
        assert_eq!(
            org_file_path(data_dir, "1-datafund", "next_actions.org"),
            Path::new("/home/user/Data/1-datafund/org/next_actions.org")
        );
    }

    #[test]
    fn test_config_paths() {
        let home_dir = Path::new("/home/user");
        let current_dir = Path::new("/current/project");

        assert_eq!(
            user_config_file_path(home_dir),
            Path::new("/home/user/.tasksync/config.toml")
        );
        assert_eq!(
            local_config_file_path(current_dir),
            Path::new("/current/project/.tasksync/config.toml")
        );
    }

    #[test]
    fn test_override_paths() {
        assert_eq!(
            override_file_path(Path::new("/p/tasksync.toml")),
            Path::new("/p/tasksync.local.toml")
        );
        assert_eq!(
            override_file_path(Path::new("/p/.tasksync/config.toml")),
            Path::new("/p/.tasksync/config.local.toml")
        );
    }
}
