//! Configuration store for application, environment and service records
//!
//! Records live in `.convoy/store.json` under the workspace root. They are
//! only used to validate existence and uniqueness before provisioning; the
//! backend stays the source of truth for the stacks themselves.

use crate::error::{CloudError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const STORE_VERSION: u32 = 1;
const STORE_DIR: &str = ".convoy";
const STORE_FILE: &str = "store.json";
const STORE_BACKUP: &str = "store.json.backup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub account_id: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Application {
    pub fn new(name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account_id: account_id.into(),
            domain: None,
            tags: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub app: String,
    pub name: String,
    pub region: String,
    pub account_id: String,
    #[serde(default)]
    pub prod: bool,
    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(
        app: impl Into<String>,
        name: impl Into<String>,
        region: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            region: region.into(),
            account_id: account_id.into(),
            prod: false,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub app: String,
    pub name: String,
    /// Workload type, e.g. "Load Balanced Web Service"
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

impl Service {
    pub fn new(app: impl Into<String>, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            name: name.into(),
            kind: kind.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn create_application(&self, app: &Application) -> Result<()>;
    async fn get_application(&self, name: &str) -> Result<Application>;
    async fn list_applications(&self) -> Result<Vec<Application>>;
    /// Removes the application together with its environments and services
    async fn delete_application(&self, name: &str) -> Result<()>;
}

#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    async fn create_environment(&self, env: &Environment) -> Result<()>;
    async fn get_environment(&self, app: &str, name: &str) -> Result<Environment>;
    async fn list_environments(&self, app: &str) -> Result<Vec<Environment>>;
    async fn delete_environment(&self, app: &str, name: &str) -> Result<()>;
}

#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn create_service(&self, svc: &Service) -> Result<()>;
    async fn get_service(&self, app: &str, name: &str) -> Result<Service>;
    async fn list_services(&self, app: &str) -> Result<Vec<Service>>;
    async fn delete_service(&self, app: &str, name: &str) -> Result<()>;
}

/// All three record stores
pub trait ConfigStore: ApplicationStore + EnvironmentStore + ServiceStore {}

impl<T> ConfigStore for T where T: ApplicationStore + EnvironmentStore + ServiceStore {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    applications: BTreeMap<String, Application>,
    /// Keyed by `app/env`
    #[serde(default)]
    environments: BTreeMap<String, Environment>,
    /// Keyed by `app/svc`
    #[serde(default)]
    services: BTreeMap<String, Service>,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            applications: BTreeMap::new(),
            environments: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }
}

impl StoreState {
    fn require_app(&self, app: &str) -> Result<()> {
        if self.applications.contains_key(app) {
            Ok(())
        } else {
            Err(CloudError::RecordNotFound(format!("application {}", app)))
        }
    }
}

fn record_key(app: &str, name: &str) -> String {
    format!("{}/{}", app, name)
}

/// JSON-file store rooted at a workspace directory
pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    fn store_path(&self) -> PathBuf {
        self.store_dir().join(STORE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.store_dir().join(STORE_BACKUP)
    }

    async fn load(&self) -> Result<StoreState> {
        let path = self.store_path();
        if !path.exists() {
            tracing::debug!("Store file not found, starting empty");
            return Ok(StoreState::default());
        }

        let content = fs::read_to_string(&path).await?;
        let state: StoreState = serde_json::from_str(&content)?;

        if state.version > STORE_VERSION {
            return Err(CloudError::StoreError(format!(
                "Store file version {} is newer than supported version {}",
                state.version, STORE_VERSION
            )));
        }
        Ok(state)
    }

    async fn save(&self, state: &mut StoreState) -> Result<()> {
        let dir = self.store_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!("Created store directory: {}", dir.display());
        }

        let path = self.store_path();
        let backup = self.backup_path();
        if path.exists() {
            if backup.exists() {
                fs::remove_file(&backup).await?;
            }
            fs::rename(&path, &backup).await?;
        }

        state.updated_at = Utc::now();
        let content = serde_json::to_string_pretty(state)?;
        fs::write(&path, content).await?;
        tracing::debug!(
            "Saved store with {} applications, {} environments, {} services",
            state.applications.len(),
            state.environments.len(),
            state.services.len()
        );
        Ok(())
    }

    async fn modify<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreState) -> Result<bool> + Send,
    {
        let _guard = self.guard.lock().await;
        let mut state = self.load().await?;
        if f(&mut state)? {
            self.save(&mut state).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ApplicationStore for FileStore {
    async fn create_application(&self, app: &Application) -> Result<()> {
        self.modify(|state| {
            if state.applications.contains_key(&app.name) {
                return Err(CloudError::RecordAlreadyExists(format!(
                    "application {}",
                    app.name
                )));
            }
            state.applications.insert(app.name.clone(), app.clone());
            Ok(true)
        })
        .await
    }

    async fn get_application(&self, name: &str) -> Result<Application> {
        self.load()
            .await?
            .applications
            .remove(name)
            .ok_or_else(|| CloudError::RecordNotFound(format!("application {}", name)))
    }

    async fn list_applications(&self) -> Result<Vec<Application>> {
        Ok(self.load().await?.applications.into_values().collect())
    }

    async fn delete_application(&self, name: &str) -> Result<()> {
        self.modify(|state| {
            let removed = state.applications.remove(name).is_some();
            let prefix = format!("{}/", name);
            state.environments.retain(|k, _| !k.starts_with(&prefix));
            state.services.retain(|k, _| !k.starts_with(&prefix));
            Ok(removed)
        })
        .await
    }
}

#[async_trait]
impl EnvironmentStore for FileStore {
    async fn create_environment(&self, env: &Environment) -> Result<()> {
        self.modify(|state| {
            state.require_app(&env.app)?;
            let key = record_key(&env.app, &env.name);
            if state.environments.contains_key(&key) {
                return Err(CloudError::RecordAlreadyExists(format!("environment {}", key)));
            }
            state.environments.insert(key, env.clone());
            Ok(true)
        })
        .await
    }

    async fn get_environment(&self, app: &str, name: &str) -> Result<Environment> {
        let key = record_key(app, name);
        self.load()
            .await?
            .environments
            .remove(&key)
            .ok_or_else(|| CloudError::RecordNotFound(format!("environment {}", key)))
    }

    async fn list_environments(&self, app: &str) -> Result<Vec<Environment>> {
        Ok(self
            .load()
            .await?
            .environments
            .into_values()
            .filter(|e| e.app == app)
            .collect())
    }

    async fn delete_environment(&self, app: &str, name: &str) -> Result<()> {
        self.modify(|state| Ok(state.environments.remove(&record_key(app, name)).is_some()))
            .await
    }
}

#[async_trait]
impl ServiceStore for FileStore {
    async fn create_service(&self, svc: &Service) -> Result<()> {
        self.modify(|state| {
            state.require_app(&svc.app)?;
            let key = record_key(&svc.app, &svc.name);
            if state.services.contains_key(&key) {
                return Err(CloudError::RecordAlreadyExists(format!("service {}", key)));
            }
            state.services.insert(key, svc.clone());
            Ok(true)
        })
        .await
    }

    async fn get_service(&self, app: &str, name: &str) -> Result<Service> {
        let key = record_key(app, name);
        self.load()
            .await?
            .services
            .remove(&key)
            .ok_or_else(|| CloudError::RecordNotFound(format!("service {}", key)))
    }

    async fn list_services(&self, app: &str) -> Result<Vec<Service>> {
        Ok(self
            .load()
            .await?
            .services
            .into_values()
            .filter(|s| s.app == app)
            .collect())
    }

    async fn delete_service(&self, app: &str, name: &str) -> Result<()> {
        self.modify(|state| Ok(state.services.remove(&record_key(app, name)).is_some()))
            .await
    }
}
