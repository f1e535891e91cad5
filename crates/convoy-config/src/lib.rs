pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// ワークスペースのローカル状態を置くディレクトリ
pub const WORKSPACE_DIR: &str = ".convoy";

const CONFIG_FILE: &str = "config.yaml";

/// Convoyの設定ディレクトリ（初回利用時に作成）
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("convoy");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
    }

    Ok(config_dir)
}

/// 設定の読み込み元
///
/// `CONVOY_CONFIG_PATH` が優先。なければ `~/.config/convoy/config.yaml`
pub fn settings_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CONVOY_CONFIG_PATH") {
        return Ok(PathBuf::from(path));
    }
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("convoy")
        .join(CONFIG_FILE))
}

/// ユーザー設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub region: Option<String>,
    pub profile: Option<String>,
    /// スタック状態をポーリングする間隔
    pub poll_interval_ms: u64,
    /// 一時的なエラーで諦めるまでの再試行回数（初回を含まない）
    pub max_retries: u32,
    /// 追跡時にログを取得する間隔
    pub log_poll_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: None,
            profile: None,
            poll_interval_ms: 3000,
            max_retries: 3,
            log_poll_interval_ms: 1000,
        }
    }
}

impl Settings {
    /// [`settings_path`] から読み込み、環境変数で上書き
    ///
    /// デフォルトのファイルがなければデフォルト値。`CONVOY_CONFIG_PATH` で
    /// 指定したファイルがない場合はエラー
    pub fn load() -> Result<Self> {
        let path = settings_path()?;
        let settings = if path.exists() {
            Self::load_from(&path)?
        } else if std::env::var_os("CONVOY_CONFIG_PATH").is_some() {
            return Err(ConfigError::ConfigFileNotFound(path));
        } else {
            Self::default()
        };
        settings.apply_env()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `CONVOY_REGION` と `CONVOY_PROFILE` がファイルより優先。どちらも
    /// リージョンを決めない場合は `AWS_REGION` を使う
    pub fn apply_env(mut self) -> Result<Self> {
        if let Some(region) = non_empty_var("CONVOY_REGION") {
            self.region = Some(region);
        }
        if let Some(profile) = non_empty_var("CONVOY_PROFILE") {
            self.profile = Some(profile);
        }
        if self.region.is_none() {
            self.region = non_empty_var("AWS_REGION").or_else(|| non_empty_var("AWS_DEFAULT_REGION"));
        }
        if let Some(raw) = non_empty_var("CONVOY_POLL_INTERVAL_MS") {
            self.poll_interval_ms = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "CONVOY_POLL_INTERVAL_MS".to_string(),
                value: raw.clone(),
            })?;
        }
        Ok(self)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_interval_ms)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// `.convoy/` を含む `start` から最も近い祖先（自身を含む）
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_DIR).is_dir())
        .map(Path::to_path_buf)
}

/// カレントディレクトリのワークスペースルート
pub fn workspace_root() -> Result<PathBuf> {
    let current_dir = std::env::current_dir()?;
    find_workspace_root(&current_dir).ok_or(ConfigError::WorkspaceNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    #[test]
    fn test_get_config_dir() {
        let config_dir = get_config_dir().unwrap();
        assert!(config_dir.ends_with("convoy"));
        assert!(config_dir.exists());
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "region: eu-west-1\nmax_retries: 5\n").unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.poll_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_yaml_names_the_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "max_retries: [not, a, number]\n").unwrap();

        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.yaml");
        Settings {
            region: Some("us-east-1".to_string()),
            profile: Some("file".to_string()),
            ..Settings::default()
        }
        .save(&path)
        .unwrap();

        temp_env::with_vars(
            [
                ("CONVOY_CONFIG_PATH", Some(path.to_str().unwrap())),
                ("CONVOY_REGION", Some("us-west-2")),
                ("CONVOY_PROFILE", None),
                ("CONVOY_POLL_INTERVAL_MS", None),
            ],
            || {
                let settings = Settings::load().unwrap();
                assert_eq!(settings.region.as_deref(), Some("us-west-2"));
                assert_eq!(settings.profile.as_deref(), Some("file"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_missing_explicit_config_is_error() {
        temp_env::with_var("CONVOY_CONFIG_PATH", Some("/nonexistent/convoy.yaml"), || {
            let err = Settings::load().unwrap_err();
            assert!(matches!(err, ConfigError::ConfigFileNotFound(_)));
        });
    }

    #[test]
    #[serial]
    fn test_aws_region_is_fallback_only() {
        temp_env::with_vars(
            [
                ("CONVOY_REGION", None),
                ("AWS_REGION", Some("ap-northeast-1")),
            ],
            || {
                let settings = Settings::default().apply_env().unwrap();
                assert_eq!(settings.region.as_deref(), Some("ap-northeast-1"));

                let settings = Settings {
                    region: Some("us-west-2".to_string()),
                    ..Settings::default()
                }
                .apply_env()
                .unwrap();
                assert_eq!(settings.region.as_deref(), Some("us-west-2"));
            },
        );
    }

    #[test]
    #[serial]
    fn test_bad_poll_interval_is_rejected() {
        temp_env::with_var("CONVOY_POLL_INTERVAL_MS", Some("soon"), || {
            let err = Settings::default().apply_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidEnv { ref name, .. } if name == "CONVOY_POLL_INTERVAL_MS"));
        });
    }

    #[test]
    fn test_find_workspace_root_searches_upward() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::create_dir(temp_dir.path().join(WORKSPACE_DIR)).unwrap();
        let nested = temp_dir.path().join("services").join("api");
        fs::create_dir_all(&nested).unwrap();

        let root = find_workspace_root(&nested).unwrap();
        assert_eq!(root, temp_dir.path());
    }

    #[test]
    fn test_find_workspace_root_none_outside_workspace() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(find_workspace_root(temp_dir.path()).is_none());
    }
}
