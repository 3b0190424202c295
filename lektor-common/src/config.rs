//! Configuration loading and root folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(PathBuf::from(path));
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = load_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return Ok(PathBuf::from(root_folder));
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    Ok(default_root_folder())
}

/// Get default configuration file path for the platform
fn load_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/lektor/config.toml first, then /etc/lektor/config.toml
        if let Some(path) = dirs::config_dir().map(|d| d.join("lektor").join("config.toml")) {
            if path.exists() {
                return Ok(path);
            }
        }
        let system_config = PathBuf::from("/etc/lektor/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("lektor").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {:?}",
            config_path
        )))
    }
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("lektor"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/lektor"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("lektor"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lektor"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("lektor"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lektor"))
    } else {
        PathBuf::from("./lektor_data")
    }
}

/// Well-known locations under the root folder.
pub struct RootLayout {
    pub root: PathBuf,
}

impl RootLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Path of the shared SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.root.join("lektor.db")
    }

    /// Directory holding per-job output artifacts
    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    /// Directory of one job's artifacts
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.outputs_dir().join(job_id)
    }

    /// Directory holding reference voice audio
    pub fn voices_dir(&self) -> PathBuf {
        self.root.join("voices")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_wins_over_everything() {
        let root = resolve_root_folder(Some("/tmp/lektor-cli"), "LEKTOR_TEST_UNSET").unwrap();
        assert_eq!(root, PathBuf::from("/tmp/lektor-cli"));
    }

    #[test]
    fn default_root_folder_is_not_empty() {
        assert!(!default_root_folder().as_os_str().is_empty());
    }

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = RootLayout::new(PathBuf::from("/data/lektor"));
        assert_eq!(layout.database_path(), PathBuf::from("/data/lektor/lektor.db"));
        assert_eq!(
            layout.job_dir("abc"),
            PathBuf::from("/data/lektor/outputs/abc")
        );
        assert_eq!(layout.voices_dir(), PathBuf::from("/data/lektor/voices"));
    }
}
