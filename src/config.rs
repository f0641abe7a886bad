use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::calories::CalorieModel;
use crate::store::DEFAULT_STORE_KEY;

/// What the progress bar measures
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressBasis {
    /// distance covered against the planned distance
    #[default]
    Distance,
    /// elapsed time against the planned duration
    Time,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub store_key: String,
    pub checkpoint_interval_ms: u64,
    pub max_frame_dt_ms: u64,
    pub frame_interval_ms: u64,
    pub progress_basis: ProgressBasis,
    pub calories: CalorieModel,
    pub speed_step_mph: f64,
    pub incline_step_pct: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store_key: DEFAULT_STORE_KEY.to_string(),
            checkpoint_interval_ms: 5_000,
            max_frame_dt_ms: 1_000,
            frame_interval_ms: 100,
            progress_basis: ProgressBasis::Distance,
            calories: CalorieModel::default(),
            speed_step_mph: 0.1,
            incline_step_pct: 0.5,
        }
    }
}

impl Config {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "runoverlay") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("runoverlay_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        if let Ok(bytes) = fs::read(&self.path) {
            match serde_json::from_slice::<Config>(&bytes) {
                Ok(cfg) => return cfg,
                Err(e) => log::warn!(
                    "ignoring unreadable config {}: {}",
                    self.path.display(),
                    e
                ),
            }
        }
        Config::default()
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg).unwrap_or_default();
        fs::write(&self.path, data)
    }
}
