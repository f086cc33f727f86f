//! Record store: users and datasets behind one async trait

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Dataset, DatasetChanges, DatasetOrdering, NewDataset, User};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("user {0} does not exist")]
    UnknownUser(Uuid),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence operations used by the handlers
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<User>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>>;
    async fn touch_last_login(&self, id: Uuid) -> StoreResult<()>;

    /// Remove a user and every dataset they last modified
    async fn delete_user(&self, id: Uuid) -> StoreResult<bool>;

    async fn list_datasets(&self, ordering: DatasetOrdering) -> StoreResult<Vec<Dataset>>;
    async fn find_dataset(&self, id: i64) -> StoreResult<Option<Dataset>>;
    async fn create_dataset(&self, data: NewDataset, modified_by: Uuid) -> StoreResult<Dataset>;
    async fn update_dataset(
        &self,
        id: i64,
        changes: DatasetChanges,
        modified_by: Uuid,
    ) -> StoreResult<Option<Dataset>>;
    async fn delete_dataset(&self, id: i64) -> StoreResult<bool>;
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}

/// modified_by must reference an existing user
fn modifier_error(err: sqlx::Error, modified_by: Uuid) -> StoreError {
    let fk_violation = err
        .as_database_error()
        .map(|e| e.is_foreign_key_violation())
        .unwrap_or(false);

    if fk_violation {
        StoreError::UnknownUser(modified_by)
    } else {
        StoreError::Database(err)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<User> {
        User::create(&self.pool, username, password_hash)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict("Username already taken".to_string())
                } else {
                    StoreError::Database(e)
                }
            })
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(User::find_by_username(&self.pool, username).await?)
    }

    async fn touch_last_login(&self, id: Uuid) -> StoreResult<()> {
        Ok(User::update_last_login(&self.pool, id).await?)
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        Ok(User::delete(&self.pool, id).await?)
    }

    async fn list_datasets(&self, ordering: DatasetOrdering) -> StoreResult<Vec<Dataset>> {
        Ok(Dataset::list(&self.pool, ordering).await?)
    }

    async fn find_dataset(&self, id: i64) -> StoreResult<Option<Dataset>> {
        Ok(Dataset::find_by_id(&self.pool, id).await?)
    }

    async fn create_dataset(&self, data: NewDataset, modified_by: Uuid) -> StoreResult<Dataset> {
        Dataset::create(&self.pool, data, modified_by)
            .await
            .map_err(|e| modifier_error(e, modified_by))
    }

    async fn update_dataset(
        &self,
        id: i64,
        changes: DatasetChanges,
        modified_by: Uuid,
    ) -> StoreResult<Option<Dataset>> {
        Dataset::update(&self.pool, id, changes, modified_by)
            .await
            .map_err(|e| modifier_error(e, modified_by))
    }

    async fn delete_dataset(&self, id: i64) -> StoreResult<bool> {
        Ok(Dataset::delete(&self.pool, id).await?)
    }
}

/// Row as held by the in-memory store; the username is joined on read
#[derive(Debug, Clone)]
struct StoredDataset {
    data: serde_json::Value,
    dataset_type: crate::models::DatasetType,
    from_date: DateTime<Utc>,
    to_date: DateTime<Utc>,
    modified_on: DateTime<Utc>,
    modified_by: Uuid,
}

#[derive(Default)]
struct MemoryTables {
    users: HashMap<Uuid, User>,
    datasets: BTreeMap<i64, StoredDataset>,
    next_dataset_id: i64,
}

impl MemoryTables {
    fn joined(&self, id: i64, row: &StoredDataset) -> Option<Dataset> {
        let user = self.users.get(&row.modified_by)?;
        Some(Dataset {
            id,
            data: row.data.clone(),
            dataset_type: row.dataset_type,
            from_date: row.from_date,
            to_date: row.to_date,
            modified_on: row.modified_on,
            modified_by: row.modified_by,
            modified_by_username: user.username.clone(),
        })
    }
}

/// In-memory store for tests and database-less runs
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Current time at the precision PostgreSQL keeps
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(StoreError::Conflict("Username already taken".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            last_login: None,
            date_joined: now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.username == username).cloned())
    }

    async fn touch_last_login(&self, id: Uuid) -> StoreResult<()> {
        if let Some(user) = self.tables.write().await.users.get_mut(&id) {
            user.last_login = Some(now());
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.datasets.retain(|_, row| row.modified_by != id);
        Ok(true)
    }

    async fn list_datasets(&self, ordering: DatasetOrdering) -> StoreResult<Vec<Dataset>> {
        let tables = self.tables.read().await;
        let mut datasets: Vec<Dataset> = tables
            .datasets
            .iter()
            .filter_map(|(id, row)| tables.joined(*id, row))
            .collect();

        match ordering {
            DatasetOrdering::FromDateDesc => {
                datasets.sort_by(|a, b| (b.from_date, b.id).cmp(&(a.from_date, a.id)))
            }
            DatasetOrdering::ModifiedOnDesc => {
                datasets.sort_by(|a, b| (b.modified_on, b.id).cmp(&(a.modified_on, a.id)))
            }
        }
        Ok(datasets)
    }

    async fn find_dataset(&self, id: i64) -> StoreResult<Option<Dataset>> {
        let tables = self.tables.read().await;
        Ok(tables.datasets.get(&id).and_then(|row| tables.joined(id, row)))
    }

    async fn create_dataset(&self, data: NewDataset, modified_by: Uuid) -> StoreResult<Dataset> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&modified_by) {
            return Err(StoreError::UnknownUser(modified_by));
        }

        tables.next_dataset_id += 1;
        let id = tables.next_dataset_id;
        let row = StoredDataset {
            data: data.data,
            dataset_type: data.dataset_type,
            from_date: data.from_date,
            to_date: data.to_date,
            modified_on: now(),
            modified_by,
        };
        let dataset = tables.joined(id, &row).ok_or_else(|| StoreError::UnknownUser(modified_by))?;
        tables.datasets.insert(id, row);
        Ok(dataset)
    }

    async fn update_dataset(
        &self,
        id: i64,
        changes: DatasetChanges,
        modified_by: Uuid,
    ) -> StoreResult<Option<Dataset>> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&modified_by) {
            return Err(StoreError::UnknownUser(modified_by));
        }

        let Some(row) = tables.datasets.get_mut(&id) else {
            return Ok(None);
        };

        if let Some(data) = changes.data {
            row.data = data;
        }
        if let Some(dataset_type) = changes.dataset_type {
            row.dataset_type = dataset_type;
        }
        if let Some(from_date) = changes.from_date {
            row.from_date = from_date;
        }
        if let Some(to_date) = changes.to_date {
            row.to_date = to_date;
        }
        row.modified_on = now();
        row.modified_by = modified_by;

        let row = row.clone();
        Ok(tables.joined(id, &row))
    }

    async fn delete_dataset(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.write().await.datasets.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetType;
    use chrono::TimeZone;
    use tokio_test::{assert_err, assert_ok};

    fn new_dataset(dataset_type: DatasetType, day: u32) -> NewDataset {
        NewDataset {
            data: serde_json::json!({"day": day}),
            dataset_type,
            from_date: Utc.with_ymd_and_hms(2024, 1, day, 8, 0, 0).unwrap(),
            to_date: Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        assert_ok!(store.create_user("alice", "hash").await);
        let err = assert_err!(store.create_user("alice", "other").await);
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_create_records_modifier() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "hash").await.unwrap();

        let dataset = store
            .create_dataset(new_dataset(DatasetType::NightDriving, 1), alice.id)
            .await
            .unwrap();
        assert_eq!(dataset.id, 1);
        assert_eq!(dataset.modified_by, alice.id);
        assert_eq!(dataset.modified_by_username, "alice");

        let found = store.find_dataset(dataset.id).await.unwrap();
        assert_eq!(found, Some(dataset));
    }

    #[tokio::test]
    async fn test_create_with_unknown_user_fails() {
        let store = MemoryStore::new();
        let result = store
            .create_dataset(new_dataset(DatasetType::NightDriving, 1), Uuid::new_v4())
            .await;
        let err = assert_err!(result);
        assert!(matches!(err, StoreError::UnknownUser(_)));
        assert!(store.list_datasets(DatasetOrdering::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_reassigns_modifier_and_keeps_untouched_fields() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "hash").await.unwrap();
        let bob = store.create_user("bob", "hash").await.unwrap();

        let created = store
            .create_dataset(new_dataset(DatasetType::HarshTurn, 2), alice.id)
            .await
            .unwrap();

        let changes = DatasetChanges {
            dataset_type: Some(DatasetType::DriverPanic),
            ..Default::default()
        };
        let updated = store
            .update_dataset(created.id, changes, bob.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.dataset_type, DatasetType::DriverPanic);
        assert_eq!(updated.data, created.data);
        assert_eq!(updated.from_date, created.from_date);
        assert_eq!(updated.modified_by_username, "bob");
        assert!(updated.modified_on >= created.modified_on);

        let missing = store
            .update_dataset(404, DatasetChanges::default(), bob.id)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_orderings() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "hash").await.unwrap();

        // Written in order day 3, day 1, day 2
        for day in [3, 1, 2] {
            store
                .create_dataset(new_dataset(DatasetType::CabinetOpen, day), alice.id)
                .await
                .unwrap();
        }

        let by_period: Vec<i64> = store
            .list_datasets(DatasetOrdering::FromDateDesc)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(by_period, vec![1, 3, 2]);

        let by_write: Vec<i64> = store
            .list_datasets(DatasetOrdering::ModifiedOnDesc)
            .await
            .unwrap()
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(by_write, vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "hash").await.unwrap();
        let bob = store.create_user("bob", "hash").await.unwrap();

        let owned = store
            .create_dataset(new_dataset(DatasetType::PowerDisconnect, 1), alice.id)
            .await
            .unwrap();
        let kept = store
            .create_dataset(new_dataset(DatasetType::PowerDisconnect, 2), bob.id)
            .await
            .unwrap();

        assert!(store.delete_user(alice.id).await.unwrap());
        assert!(!store.delete_user(alice.id).await.unwrap());

        assert_eq!(store.find_dataset(owned.id).await.unwrap(), None);
        assert!(store.find_dataset(kept.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_dataset() {
        let store = MemoryStore::new();
        let alice = store.create_user("alice", "hash").await.unwrap();
        let dataset = store
            .create_dataset(new_dataset(DatasetType::DeviceRemoved, 1), alice.id)
            .await
            .unwrap();

        assert!(store.delete_dataset(dataset.id).await.unwrap());
        assert!(!store.delete_dataset(dataset.id).await.unwrap());
    }
}
