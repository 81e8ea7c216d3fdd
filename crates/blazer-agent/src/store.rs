use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use blazer_db::entities::instances;
use blazer_process::{Instance, InstanceId, InstanceStatus, LaunchConfig};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint (name or port) rejected the write.
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("instance {0} does not exist")]
    Missing(InstanceId),
    #[error("{0}")]
    Backend(String),
}

/// A record about to be inserted for a freshly confirmed process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstance {
    pub name: String,
    pub port: u16,
    pub pid: u32,
    pub folder: String,
    pub config: LaunchConfig,
}

/// Persistent instance records. Every mutating call is its own
/// all-or-nothing commit.
#[async_trait::async_trait]
pub trait InstanceStore: Send + Sync {
    async fn find_by_id(&self, id: InstanceId) -> Result<Option<Instance>, StoreError>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Instance>, StoreError>;
    async fn find_by_port(&self, port: u16) -> Result<Option<Instance>, StoreError>;
    async fn list(&self) -> Result<Vec<Instance>, StoreError>;
    /// Insert with `status = running`.
    async fn insert(&self, new: NewInstance) -> Result<Instance, StoreError>;
    async fn update_runtime(
        &self,
        id: InstanceId,
        pid: Option<u32>,
        status: InstanceStatus,
    ) -> Result<Instance, StoreError>;
}

fn map_db_err(err: DbErr) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(msg)) => StoreError::Conflict(msg),
        _ => StoreError::Backend(err.to_string()),
    }
}

fn to_instance(m: instances::Model) -> Result<Instance, StoreError> {
    let port = u16::try_from(m.port)
        .map_err(|_| StoreError::Backend(format!("instance {} has invalid port {}", m.id, m.port)))?;
    let pid = m
        .pid
        .map(u32::try_from)
        .transpose()
        .map_err(|_| StoreError::Backend(format!("instance {} has invalid pid", m.id)))?;
    let status = m
        .status
        .parse::<InstanceStatus>()
        .map_err(|e| StoreError::Backend(format!("instance {}: {e}", m.id)))?;

    Ok(Instance {
        id: InstanceId(m.id),
        name: m.name,
        port,
        pid,
        status,
        folder: m.folder,
        install_path: m.install_path,
        min_memory: m.min_memory,
        max_memory: m.max_memory,
        ip_address: m.ip_address,
    })
}

fn pid_column(pid: Option<u32>) -> Result<Option<i32>, StoreError> {
    pid.map(i32::try_from)
        .transpose()
        .map_err(|_| StoreError::Backend("pid out of range".to_string()))
}

#[derive(Clone)]
pub struct SeaOrmInstanceStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmInstanceStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl InstanceStore for SeaOrmInstanceStore {
    async fn find_by_id(&self, id: InstanceId) -> Result<Option<Instance>, StoreError> {
        instances::Entity::find_by_id(id.0)
            .one(&*self.db)
            .await
            .map_err(map_db_err)?
            .map(to_instance)
            .transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Instance>, StoreError> {
        instances::Entity::find()
            .filter(instances::Column::Name.eq(name))
            .one(&*self.db)
            .await
            .map_err(map_db_err)?
            .map(to_instance)
            .transpose()
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<Instance>, StoreError> {
        instances::Entity::find()
            .filter(instances::Column::Port.eq(i32::from(port)))
            .one(&*self.db)
            .await
            .map_err(map_db_err)?
            .map(to_instance)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        instances::Entity::find()
            .order_by_asc(instances::Column::Id)
            .all(&*self.db)
            .await
            .map_err(map_db_err)?
            .into_iter()
            .map(to_instance)
            .collect()
    }

    async fn insert(&self, new: NewInstance) -> Result<Instance, StoreError> {
        let now = chrono::Utc::now();
        let model = instances::ActiveModel {
            id: NotSet,
            name: Set(new.name),
            port: Set(i32::from(new.port)),
            pid: Set(pid_column(Some(new.pid))?),
            status: Set(InstanceStatus::Running.as_str().to_string()),
            folder: Set(new.folder),
            install_path: Set(new.config.install_path),
            min_memory: Set(new.config.min_memory),
            max_memory: Set(new.config.max_memory),
            ip_address: Set(new.config.ip_address),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        let txn = self.db.begin().await.map_err(map_db_err)?;
        let inserted = match model.insert(&txn).await {
            Ok(m) => m,
            Err(err) => {
                let _ = txn.rollback().await;
                return Err(map_db_err(err));
            }
        };
        txn.commit().await.map_err(map_db_err)?;
        to_instance(inserted)
    }

    async fn update_runtime(
        &self,
        id: InstanceId,
        pid: Option<u32>,
        status: InstanceStatus,
    ) -> Result<Instance, StoreError> {
        let pid = pid_column(pid)?;
        let txn = self.db.begin().await.map_err(map_db_err)?;

        let existing = match instances::Entity::find_by_id(id.0).one(&txn).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                let _ = txn.rollback().await;
                return Err(StoreError::Missing(id));
            }
            Err(err) => {
                let _ = txn.rollback().await;
                return Err(map_db_err(err));
            }
        };

        let mut update: instances::ActiveModel = existing.into();
        update.pid = Set(pid);
        update.status = Set(status.as_str().to_string());
        update.updated_at = Set(chrono::Utc::now().into());

        let updated = match update.update(&txn).await {
            Ok(m) => m,
            Err(err) => {
                let _ = txn.rollback().await;
                return Err(map_db_err(err));
            }
        };
        txn.commit().await.map_err(map_db_err)?;
        to_instance(updated)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i32,
    rows: BTreeMap<i32, Instance>,
}

/// In-process store with the same uniqueness rules as the database schema.
#[derive(Debug, Default)]
pub struct MemoryInstanceStore {
    state: Mutex<MemoryState>,
    fail_commits: AtomicBool,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert/update fail as if the backend were down.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store poisoned".to_string()))
    }

    fn check_commit(&self) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn find_by_id(&self, id: InstanceId) -> Result<Option<Instance>, StoreError> {
        Ok(self.lock()?.rows.get(&id.0).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.lock()?.rows.values().find(|i| i.name == name).cloned())
    }

    async fn find_by_port(&self, port: u16) -> Result<Option<Instance>, StoreError> {
        Ok(self.lock()?.rows.values().find(|i| i.port == port).cloned())
    }

    async fn list(&self) -> Result<Vec<Instance>, StoreError> {
        Ok(self.lock()?.rows.values().cloned().collect())
    }

    async fn insert(&self, new: NewInstance) -> Result<Instance, StoreError> {
        self.check_commit()?;
        let mut state = self.lock()?;
        if state.rows.values().any(|i| i.name == new.name) {
            return Err(StoreError::Conflict(format!("name {}", new.name)));
        }
        if state.rows.values().any(|i| i.port == new.port) {
            return Err(StoreError::Conflict(format!("port {}", new.port)));
        }

        state.next_id += 1;
        let inst = Instance {
            id: InstanceId(state.next_id),
            name: new.name,
            port: new.port,
            pid: Some(new.pid),
            status: InstanceStatus::Running,
            folder: new.folder,
            install_path: new.config.install_path,
            min_memory: new.config.min_memory,
            max_memory: new.config.max_memory,
            ip_address: new.config.ip_address,
        };
        state.rows.insert(inst.id.0, inst.clone());
        Ok(inst)
    }

    async fn update_runtime(
        &self,
        id: InstanceId,
        pid: Option<u32>,
        status: InstanceStatus,
    ) -> Result<Instance, StoreError> {
        self.check_commit()?;
        let mut state = self.lock()?;
        let row = state.rows.get_mut(&id.0).ok_or(StoreError::Missing(id))?;
        row.pid = pid;
        row.status = status;
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm_migration::MigratorTrait;

    fn new_instance(name: &str, port: u16, pid: u32) -> NewInstance {
        NewInstance {
            name: name.to_string(),
            port,
            pid,
            folder: format!("instances/team-a/{name}"),
            config: LaunchConfig {
                install_path: "team-a".to_string(),
                min_memory: Some("512m".to_string()),
                max_memory: Some("1024m".to_string()),
                ip_address: "localhost".to_string(),
            },
        }
    }

    async fn sqlite_store() -> SeaOrmInstanceStore {
        let db = blazer_db::connect_memory().await.unwrap();
        blazer_migration::Migrator::up(&db, None).await.unwrap();
        SeaOrmInstanceStore::new(Arc::new(db))
    }

    async fn exercise_uniqueness(store: &dyn InstanceStore) {
        let alpha = store.insert(new_instance("alpha", 9001, 100)).await.unwrap();
        assert_eq!(alpha.status, InstanceStatus::Running);
        assert_eq!(alpha.pid, Some(100));

        let same_name = store.insert(new_instance("alpha", 9002, 101)).await;
        assert!(matches!(same_name, Err(StoreError::Conflict(_))));

        let same_port = store.insert(new_instance("beta", 9001, 102)).await;
        assert!(matches!(same_port, Err(StoreError::Conflict(_))));

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }

    async fn exercise_runtime_updates(store: &dyn InstanceStore) {
        let alpha = store.insert(new_instance("alpha", 9001, 100)).await.unwrap();

        let stopped = store
            .update_runtime(alpha.id, None, InstanceStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(stopped.status, InstanceStatus::Stopped);
        assert_eq!(stopped.pid, None);
        assert_eq!(stopped.launch_config(), alpha.launch_config());

        let by_port = store.find_by_port(9001).await.unwrap().unwrap();
        assert_eq!(by_port.id, alpha.id);
        let by_name = store.find_by_name("alpha").await.unwrap().unwrap();
        assert_eq!(by_name.status, InstanceStatus::Stopped);

        let missing = store
            .update_runtime(InstanceId(alpha.id.0 + 100), Some(1), InstanceStatus::Running)
            .await;
        assert!(matches!(missing, Err(StoreError::Missing(_))));
        assert!(store.find_by_id(InstanceId(999)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sqlite_enforces_unique_name_and_port() {
        let store = sqlite_store().await;
        exercise_uniqueness(&store).await;
    }

    #[tokio::test]
    async fn sqlite_updates_runtime_fields_in_place() {
        let store = sqlite_store().await;
        exercise_runtime_updates(&store).await;
    }

    #[tokio::test]
    async fn memory_store_matches_schema_rules() {
        exercise_uniqueness(&MemoryInstanceStore::new()).await;
        exercise_runtime_updates(&MemoryInstanceStore::new()).await;
    }

    #[tokio::test]
    async fn memory_store_can_simulate_an_outage() {
        let store = MemoryInstanceStore::new();
        store.set_fail_commits(true);
        let res = store.insert(new_instance("alpha", 9001, 1)).await;
        assert!(matches!(res, Err(StoreError::Backend(_))));
        assert!(store.list().await.unwrap().is_empty());
    }
}
