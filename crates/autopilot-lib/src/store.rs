//! Persistence for backend peers and application registrations
//!
//! Both tables keep insertion order; the scheduler migrates registrations
//! in that order.

use crate::error::StoreError;
use crate::models::AppRegistration;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Keep everything in process memory; lost on restart
    Memory,
    /// Persist to a sqlite database, created when missing
    Sqlite {
        database_url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    4
}

impl StoreConfig {
    pub fn sqlite(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Sqlite {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite { .. } => "sqlite",
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    backends: Vec<String>,
    apps: Vec<AppRegistration>,
}

#[derive(Debug, Clone)]
enum StoreBackend {
    Memory(Arc<RwLock<MemoryTables>>),
    Sqlite(SqliteStore),
}

/// Registration and backend-peer tables
#[derive(Debug, Clone)]
pub struct SchedulingStore {
    backend: StoreBackend,
}

impl SchedulingStore {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory(Arc::default()),
        }
    }

    pub async fn bootstrap(config: StoreConfig) -> Result<Self, StoreError> {
        match config {
            StoreConfig::Memory => Ok(Self::memory()),
            StoreConfig::Sqlite {
                database_url,
                max_connections,
            } => {
                let store = SqliteStore::connect(&database_url, max_connections).await?;
                store.ensure_schema().await?;
                Ok(Self {
                    backend: StoreBackend::Sqlite(store),
                })
            }
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.backend {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::Sqlite(_) => "sqlite",
        }
    }

    pub async fn list_backends(&self) -> Result<Vec<String>, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => Ok(tables.read().await.backends.clone()),
            StoreBackend::Sqlite(store) => store.list_backends().await,
        }
    }

    /// Add a peer. Returns false when it was already registered.
    pub async fn add_backend(&self, ip: &str) -> Result<bool, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => {
                let mut tables = tables.write().await;
                if tables.backends.iter().any(|b| b == ip) {
                    return Ok(false);
                }
                tables.backends.push(ip.to_string());
                Ok(true)
            }
            StoreBackend::Sqlite(store) => store.add_backend(ip).await,
        }
    }

    /// Remove a peer. Returns false when it was not registered.
    pub async fn remove_backend(&self, ip: &str) -> Result<bool, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => {
                let mut tables = tables.write().await;
                let before = tables.backends.len();
                tables.backends.retain(|b| b != ip);
                Ok(tables.backends.len() != before)
            }
            StoreBackend::Sqlite(store) => store.remove_backend(ip).await,
        }
    }

    pub async fn list_apps(&self) -> Result<Vec<AppRegistration>, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => Ok(tables.read().await.apps.clone()),
            StoreBackend::Sqlite(store) => store.list_apps().await,
        }
    }

    pub async fn get_app(&self, app_name: &str) -> Result<Option<AppRegistration>, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => Ok(tables
                .read()
                .await
                .apps
                .iter()
                .find(|a| a.app_name == app_name)
                .cloned()),
            StoreBackend::Sqlite(store) => store.get_app(app_name).await,
        }
    }

    /// Insert a registration; an existing `app_name` is a conflict
    pub async fn insert_app(&self, app: &AppRegistration) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => {
                let mut tables = tables.write().await;
                if tables.apps.iter().any(|a| a.app_name == app.app_name) {
                    return Err(StoreError::Conflict(format!("app {}", app.app_name)));
                }
                tables.apps.push(app.clone());
                Ok(())
            }
            StoreBackend::Sqlite(store) => store.insert_app(app).await,
        }
    }

    /// Delete a registration. Returns false when none matched.
    pub async fn delete_app(&self, app_name: &str, namespace: &str) -> Result<bool, StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => {
                let mut tables = tables.write().await;
                let before = tables.apps.len();
                tables
                    .apps
                    .retain(|a| !(a.app_name == app_name && a.namespace == namespace));
                Ok(tables.apps.len() != before)
            }
            StoreBackend::Sqlite(store) => store.delete_app(app_name, namespace).await,
        }
    }

    /// Record the backend now serving a registration
    pub async fn update_current_backend(
        &self,
        app_name: &str,
        namespace: &str,
        backend: &str,
    ) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::Memory(tables) => {
                let mut tables = tables.write().await;
                let app = tables
                    .apps
                    .iter_mut()
                    .find(|a| a.app_name == app_name && a.namespace == namespace)
                    .ok_or_else(|| StoreError::NotFound(format!("app {}/{}", namespace, app_name)))?;
                app.current_backend = backend.to_string();
                Ok(())
            }
            StoreBackend::Sqlite(store) => {
                store
                    .update_current_backend(app_name, namespace, backend)
                    .await
            }
        }
    }

    /// Cheap round trip used by readiness checks
    pub async fn ping(&self) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::Memory(_) => Ok(()),
            StoreBackend::Sqlite(store) => {
                sqlx::query("SELECT 1").execute(&store.pool).await?;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backends (
                ip TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS apps (
                app_name TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                app2 TEXT NOT NULL,
                namespace2 TEXT NOT NULL,
                url_key TEXT NOT NULL,
                current_backend TEXT NOT NULL,
                ports TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_backends(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT ip FROM backends ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("ip").map_err(StoreError::from))
            .collect()
    }

    async fn add_backend(&self, ip: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO backends (ip) VALUES (?) ON CONFLICT(ip) DO NOTHING")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove_backend(&self, ip: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM backends WHERE ip = ?")
            .bind(ip)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_apps(&self) -> Result<Vec<AppRegistration>, StoreError> {
        let rows = sqlx::query(
            "SELECT app_name, namespace, app2, namespace2, url_key, current_backend, ports \
             FROM apps ORDER BY rowid",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(app_from_row).collect()
    }

    async fn get_app(&self, app_name: &str) -> Result<Option<AppRegistration>, StoreError> {
        let row = sqlx::query(
            "SELECT app_name, namespace, app2, namespace2, url_key, current_backend, ports \
             FROM apps WHERE app_name = ?",
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(app_from_row).transpose()
    }

    async fn insert_app(&self, app: &AppRegistration) -> Result<(), StoreError> {
        let ports = serde_json::to_string(&app.ports)?;
        let result = sqlx::query(
            "INSERT INTO apps (app_name, namespace, app2, namespace2, url_key, current_backend, ports) \
             VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT(app_name) DO NOTHING",
        )
        .bind(&app.app_name)
        .bind(&app.namespace)
        .bind(&app.mirror_app)
        .bind(&app.mirror_namespace)
        .bind(&app.routing_env_key)
        .bind(&app.current_backend)
        .bind(ports)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!("app {}", app.app_name)));
        }
        Ok(())
    }

    async fn delete_app(&self, app_name: &str, namespace: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM apps WHERE app_name = ? AND namespace = ?")
            .bind(app_name)
            .bind(namespace)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_current_backend(
        &self,
        app_name: &str,
        namespace: &str,
        backend: &str,
    ) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE apps SET current_backend = ? WHERE app_name = ? AND namespace = ?")
                .bind(backend)
                .bind(app_name)
                .bind(namespace)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("app {}/{}", namespace, app_name)));
        }
        Ok(())
    }
}

fn app_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<AppRegistration, StoreError> {
    let ports: String = row.try_get("ports")?;
    let ports: BTreeMap<String, u16> = serde_json::from_str(&ports)?;
    Ok(AppRegistration {
        app_name: row.try_get("app_name")?,
        namespace: row.try_get("namespace")?,
        mirror_app: row.try_get("app2")?,
        mirror_namespace: row.try_get("namespace2")?,
        routing_env_key: row.try_get("url_key")?,
        current_backend: row.try_get("current_backend")?,
        ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registration(name: &str, backend: &str) -> AppRegistration {
        AppRegistration {
            app_name: name.into(),
            namespace: "ns-a".into(),
            mirror_app: format!("{}-mirror", name),
            mirror_namespace: "ns-b".into(),
            routing_env_key: "BACKEND_URL".into(),
            current_backend: backend.into(),
            ports: BTreeMap::from([("80".to_string(), 30080), ("443".to_string(), 30443)]),
        }
    }

    async fn sqlite_store(dir: &TempDir) -> SchedulingStore {
        let url = format!("sqlite://{}", dir.path().join("scheduling.db").display());
        SchedulingStore::bootstrap(StoreConfig::sqlite(url, 2))
            .await
            .unwrap()
    }

    async fn exercise_backends(store: &SchedulingStore) {
        assert!(store.add_backend("10.0.0.2").await.unwrap());
        assert!(store.add_backend("10.0.0.1").await.unwrap());
        assert!(!store.add_backend("10.0.0.2").await.unwrap());
        assert_eq!(store.list_backends().await.unwrap(), vec!["10.0.0.2", "10.0.0.1"]);

        assert!(store.remove_backend("10.0.0.2").await.unwrap());
        assert!(!store.remove_backend("10.0.0.2").await.unwrap());
        assert_eq!(store.list_backends().await.unwrap(), vec!["10.0.0.1"]);
    }

    async fn exercise_apps(store: &SchedulingStore) {
        store.insert_app(&registration("web", "10.0.0.1")).await.unwrap();
        store.insert_app(&registration("api", "10.0.0.1")).await.unwrap();
        assert!(matches!(
            store.insert_app(&registration("web", "10.0.0.9")).await,
            Err(StoreError::Conflict(_))
        ));

        let names: Vec<String> = store
            .list_apps()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.app_name)
            .collect();
        assert_eq!(names, vec!["web", "api"]);

        store
            .update_current_backend("web", "ns-a", "10.0.0.2")
            .await
            .unwrap();
        let web = store.get_app("web").await.unwrap().unwrap();
        assert_eq!(web.current_backend, "10.0.0.2");
        assert_eq!(web.ports, registration("web", "").ports);

        assert!(matches!(
            store.update_current_backend("nope", "ns-a", "10.0.0.2").await,
            Err(StoreError::NotFound(_))
        ));

        assert!(!store.delete_app("web", "other-ns").await.unwrap());
        assert!(store.delete_app("web", "ns-a").await.unwrap());
        assert!(store.get_app("web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_backends() {
        exercise_backends(&SchedulingStore::memory()).await;
    }

    #[tokio::test]
    async fn test_memory_apps() {
        exercise_apps(&SchedulingStore::memory()).await;
    }

    #[tokio::test]
    async fn test_sqlite_backends() {
        let dir = TempDir::new().unwrap();
        let store = sqlite_store(&dir).await;
        assert_eq!(store.backend_label(), "sqlite");
        exercise_backends(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_apps() {
        let dir = TempDir::new().unwrap();
        exercise_apps(&sqlite_store(&dir).await).await;
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = sqlite_store(&dir).await;
            store.add_backend("10.0.0.1").await.unwrap();
            store.insert_app(&registration("web", "10.0.0.1")).await.unwrap();
        }

        let store = sqlite_store(&dir).await;
        store.ping().await.unwrap();
        assert_eq!(store.list_backends().await.unwrap(), vec!["10.0.0.1"]);
        assert_eq!(store.list_apps().await.unwrap().len(), 1);
    }

    #[test]
    fn test_store_config_from_tagged_map() {
        let config: StoreConfig = serde_json::from_value(serde_json::json!({
            "backend": "sqlite",
            "database_url": "sqlite:///var/lib/autopilot/scheduling.db"
        }))
        .unwrap();
        assert_eq!(
            config,
            StoreConfig::sqlite("sqlite:///var/lib/autopilot/scheduling.db", 4)
        );

        let config: StoreConfig =
            serde_json::from_value(serde_json::json!({"backend": "memory"})).unwrap();
        assert_eq!(config.label(), "memory");
    }
}
