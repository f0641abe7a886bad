use directories::ProjectDirs;
use std::path::PathBuf;

/// Centralized application directory resolution
pub struct AppDirs;

impl AppDirs {
    /// Default location of the shared session state database
    pub fn state_db_path() -> Option<PathBuf> {
        if let Ok(home) = std::env::var("HOME") {
            let state_dir = PathBuf::from(home)
                .join(".local")
                .join("state")
                .join("runoverlay");
            Some(state_dir.join("state.db"))
        } else {
            ProjectDirs::from("", "", "runoverlay")
                .map(|proj_dirs| proj_dirs.data_local_dir().join("state.db"))
        }
    }
}
