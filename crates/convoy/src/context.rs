//! 全コマンド共通の設定・ワークスペース・バックエンドの組み立て

use anyhow::Context as _;
use clap::Args;
use convoy_cloud::store::{ApplicationStore, EnvironmentStore};
use convoy_cloud::{CloudError, FileStore, PollConfig, RetryConfig, Stacks};
use convoy_cloud_aws::{AwsBackend, SessionProvider};
use convoy_config::Settings;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Clone, Debug, Default)]
pub struct GlobalArgs {
    /// デバッグ出力を表示
    #[arg(short, long, global = true)]
    pub verbose: bool,
    /// 操作対象のリージョン（設定より優先）
    #[arg(long, global = true, env = "CONVOY_REGION")]
    pub region: Option<String>,
    /// 認証情報のプロファイル名（設定より優先）
    #[arg(long, global = true, env = "CONVOY_PROFILE")]
    pub profile: Option<String>,
}

pub struct Context {
    pub settings: Settings,
    pub root: PathBuf,
    pub store: Arc<FileStore>,
    pub backend: AwsBackend,
    region: String,
}

impl Context {
    /// 上位のワークスペースを起点にしたコンテキスト
    pub fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let root = convoy_config::workspace_root().context(
            "Not inside a convoy workspace\n\nHint:\n  • Run `convoy app init` in the project directory first",
        )?;
        Self::at(global, root)
    }

    /// 上位のワークスペース、なければカレントディレクトリを起点にしたコンテキスト
    pub fn load_or_current(global: &GlobalArgs) -> anyhow::Result<Self> {
        let current = std::env::current_dir()?;
        let root = convoy_config::find_workspace_root(&current).unwrap_or(current);
        Self::at(global, root)
    }

    fn at(global: &GlobalArgs, root: PathBuf) -> anyhow::Result<Self> {
        let settings = Settings::load()?;
        let region = resolve_region(global, &settings)?;
        let profile = global.profile.clone().or_else(|| settings.profile.clone());

        let session = SessionProvider::new()
            .with_profile(profile)
            .with_region(Some(region.clone()))
            .default_session();
        let backend = AwsBackend::new(session).with_poll_config(poll_config(&settings));
        tracing::debug!(root = %root.display(), region = %region, "Loaded context");

        Ok(Self {
            settings,
            store: Arc::new(FileStore::new(&root)),
            root,
            backend,
            region,
        })
    }

    /// ホームリージョン
    pub fn region(&self) -> &str {
        &self.region
    }

    /// ホームリージョンと `regions` のエンジン
    pub fn stacks(&self, regions: &[String]) -> Stacks {
        self.backend.stacks(&self.region, regions)
    }

    /// アプリケーションの環境があるリージョンすべてのエンジン
    pub async fn app_stacks(&self, app: &str) -> anyhow::Result<Stacks> {
        let regions: Vec<String> = self
            .store
            .list_environments(app)
            .await?
            .into_iter()
            .map(|env| env.region)
            .collect();
        Ok(self.stacks(&regions))
    }

    /// `name`、なければワークスペース内の唯一のアプリケーション
    pub async fn app_name(&self, name: Option<String>) -> anyhow::Result<String> {
        if let Some(name) = name {
            return Ok(name);
        }
        let apps = self.store.list_applications().await?;
        match apps.as_slice() {
            [only] => Ok(only.name.clone()),
            [] => Err(CloudError::precondition(
                "No application in this workspace",
                "Run `convoy app init --name <app>` first",
            )
            .into()),
            _ => anyhow::bail!(
                "Several applications exist, pass --app: {}",
                apps.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

fn resolve_region(global: &GlobalArgs, settings: &Settings) -> anyhow::Result<String> {
    global
        .region
        .clone()
        .or_else(|| settings.region.clone())
        .ok_or_else(|| {
            CloudError::precondition(
                "No region configured",
                "Pass --region, set CONVOY_REGION, or add `region:` to the settings file",
            )
            .into()
        })
}

pub fn poll_config(settings: &Settings) -> PollConfig {
    PollConfig {
        interval: settings.poll_interval(),
        retry: RetryConfig {
            max_attempts: settings.max_retries.saturating_add(1),
            ..RetryConfig::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flag_region_wins_over_settings() {
        let settings = Settings {
            region: Some("us-east-1".to_string()),
            ..Settings::default()
        };
        let global = GlobalArgs {
            region: Some("eu-west-1".to_string()),
            ..GlobalArgs::default()
        };
        assert_eq!(resolve_region(&global, &settings).unwrap(), "eu-west-1");
        assert_eq!(
            resolve_region(&GlobalArgs::default(), &settings).unwrap(),
            "us-east-1"
        );
    }

    #[test]
    fn test_missing_region_is_precondition() {
        let err = resolve_region(&GlobalArgs::default(), &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("--region"));
    }

    #[test]
    fn test_poll_config_from_settings() {
        let settings = Settings {
            poll_interval_ms: 500,
            max_retries: 0,
            ..Settings::default()
        };
        let poll = poll_config(&settings);
        assert_eq!(poll.interval, Duration::from_millis(500));
        assert_eq!(poll.retry.max_attempts, 1);

        let three_retries = Settings {
            max_retries: 3,
            ..Settings::default()
        };
        assert_eq!(poll_config(&three_retries).retry.max_attempts, 4);
    }
}
