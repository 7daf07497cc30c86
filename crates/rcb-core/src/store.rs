//! Credential store port.
//!
//! One record per user holding the exported session plus the application
//! credentials it was created with. The store itself reports whether it is
//! reachable: callers never hold a nullable handle.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{UserId, UserRecord};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("credential store unavailable")]
    Unavailable,

    #[error("credential store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Per-user credential storage.
///
/// Every write is keyed by user id and behaves as an upsert, so re-applying
/// the same write is safe and a write for an unknown user creates the record.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a fresh record unless one already exists.
    async fn add_user(&self, id: UserId, name: &str) -> StoreResult<()>;
    async fn record_exists(&self, id: UserId) -> StoreResult<bool>;
    async fn count_all(&self) -> StoreResult<u64>;
    async fn list_users(&self) -> StoreResult<Vec<UserRecord>>;
    /// Administrative purge. Returns the number of removed records.
    async fn delete_user(&self, id: UserId) -> StoreResult<u64>;

    async fn get_session(&self, id: UserId) -> StoreResult<Option<String>>;
    async fn set_session(&self, id: UserId, session: Option<&str>) -> StoreResult<()>;
    async fn get_app_id(&self, id: UserId) -> StoreResult<Option<i32>>;
    async fn set_app_id(&self, id: UserId, app_id: Option<i32>) -> StoreResult<()>;
    async fn get_app_hash(&self, id: UserId) -> StoreResult<Option<String>>;
    async fn set_app_hash(&self, id: UserId, app_hash: Option<&str>) -> StoreResult<()>;

    /// Null out session, app id and app hash together.
    ///
    /// Backends that can do this in one statement should override it.
    async fn clear_credentials(&self, id: UserId) -> StoreResult<()> {
        self.set_session(id, None).await?;
        self.set_app_id(id, None).await?;
        self.set_app_hash(id, None).await
    }
}

/// Store used when the database could not be reached at startup.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableCredentialStore;

#[async_trait]
impl CredentialStore for UnavailableCredentialStore {
    async fn add_user(&self, _id: UserId, _name: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable)
    }

    async fn record_exists(&self, _id: UserId) -> StoreResult<bool> {
        Err(StoreError::Unavailable)
    }

    async fn count_all(&self) -> StoreResult<u64> {
        Err(StoreError::Unavailable)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        Err(StoreError::Unavailable)
    }

    async fn delete_user(&self, _id: UserId) -> StoreResult<u64> {
        Err(StoreError::Unavailable)
    }

    async fn get_session(&self, _id: UserId) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable)
    }

    async fn set_session(&self, _id: UserId, _session: Option<&str>) -> StoreResult<()> {
        Err(StoreError::Unavailable)
    }

    async fn get_app_id(&self, _id: UserId) -> StoreResult<Option<i32>> {
        Err(StoreError::Unavailable)
    }

    async fn set_app_id(&self, _id: UserId, _app_id: Option<i32>) -> StoreResult<()> {
        Err(StoreError::Unavailable)
    }

    async fn get_app_hash(&self, _id: UserId) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable)
    }

    async fn set_app_hash(&self, _id: UserId, _app_hash: Option<&str>) -> StoreResult<()> {
        Err(StoreError::Unavailable)
    }

    async fn clear_credentials(&self, _id: UserId) -> StoreResult<()> {
        Err(StoreError::Unavailable)
    }
}

/// Process-local store. Used by tests and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: UserId) -> Option<UserRecord> {
        self.users.read().await.get(&id).cloned()
    }

    async fn update(&self, id: UserId, f: impl FnOnce(&mut UserRecord) + Send) {
        let mut users = self.users.write().await;
        let rec = users.entry(id).or_insert_with(|| UserRecord::new(id, ""));
        f(rec);
    }

    async fn read<T>(&self, id: UserId, f: impl FnOnce(&UserRecord) -> Option<T>) -> Option<T> {
        self.users.read().await.get(&id).and_then(f)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn add_user(&self, id: UserId, name: &str) -> StoreResult<()> {
        self.users
            .write()
            .await
            .entry(id)
            .or_insert_with(|| UserRecord::new(id, name));
        Ok(())
    }

    async fn record_exists(&self, id: UserId) -> StoreResult<bool> {
        Ok(self.users.read().await.contains_key(&id))
    }

    async fn count_all(&self) -> StoreResult<u64> {
        Ok(self.users.read().await.len() as u64)
    }

    async fn list_users(&self) -> StoreResult<Vec<UserRecord>> {
        let mut out: Vec<UserRecord> = self.users.read().await.values().cloned().collect();
        out.sort_by_key(|u| u.id);
        Ok(out)
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<u64> {
        Ok(u64::from(self.users.write().await.remove(&id).is_some()))
    }

    async fn get_session(&self, id: UserId) -> StoreResult<Option<String>> {
        Ok(self.read(id, |u| u.session.clone()).await)
    }

    async fn set_session(&self, id: UserId, session: Option<&str>) -> StoreResult<()> {
        let session = session.map(str::to_string);
        self.update(id, move |u| u.session = session).await;
        Ok(())
    }

    async fn get_app_id(&self, id: UserId) -> StoreResult<Option<i32>> {
        Ok(self.read(id, |u| u.app_id).await)
    }

    async fn set_app_id(&self, id: UserId, app_id: Option<i32>) -> StoreResult<()> {
        self.update(id, move |u| u.app_id = app_id).await;
        Ok(())
    }

    async fn get_app_hash(&self, id: UserId) -> StoreResult<Option<String>> {
        Ok(self.read(id, |u| u.app_hash.clone()).await)
    }

    async fn set_app_hash(&self, id: UserId, app_hash: Option<&str>) -> StoreResult<()> {
        let app_hash = app_hash.map(str::to_string);
        self.update(id, move |u| u.app_hash = app_hash).await;
        Ok(())
    }

    async fn clear_credentials(&self, id: UserId) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if let Some(u) = users.get_mut(&id) {
            u.session = None;
            u.app_id = None;
            u.app_hash = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_user_is_insert_if_absent() {
        let store = MemoryCredentialStore::new();
        store.add_user(UserId(1), "alice").await.unwrap();
        store.set_session(UserId(1), Some("s")).await.unwrap();
        store.add_user(UserId(1), "renamed").await.unwrap();

        let rec = store.get(UserId(1)).await.unwrap();
        assert_eq!(rec.name, "alice");
        assert_eq!(rec.session.as_deref(), Some("s"));
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn writes_upsert_unknown_users() {
        let store = MemoryCredentialStore::new();
        assert!(!store.record_exists(UserId(9)).await.unwrap());
        store.set_app_id(UserId(9), Some(42)).await.unwrap();
        store.set_app_id(UserId(9), Some(42)).await.unwrap();
        assert!(store.record_exists(UserId(9)).await.unwrap());
        assert_eq!(store.get_app_id(UserId(9)).await.unwrap(), Some(42));
        assert_eq!(store.get_session(UserId(9)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn clear_credentials_nulls_all_three_fields() {
        let store = MemoryCredentialStore::new();
        let id = UserId(5);
        store.set_session(id, Some("sess")).await.unwrap();
        store.set_app_id(id, Some(1)).await.unwrap();
        store.set_app_hash(id, Some("hash")).await.unwrap();

        store.clear_credentials(id).await.unwrap();
        store.clear_credentials(id).await.unwrap();

        let rec = store.get(id).await.unwrap();
        assert_eq!((rec.session, rec.app_id, rec.app_hash), (None, None, None));
    }

    #[tokio::test]
    async fn delete_and_list() {
        let store = MemoryCredentialStore::new();
        store.add_user(UserId(2), "b").await.unwrap();
        store.add_user(UserId(1), "a").await.unwrap();
        let ids: Vec<_> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(ids, vec![UserId(1), UserId(2)]);

        assert_eq!(store.delete_user(UserId(1)).await.unwrap(), 1);
        assert_eq!(store.delete_user(UserId(1)).await.unwrap(), 0);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_reports_unavailable_everywhere() {
        let store = UnavailableCredentialStore;
        assert_eq!(
            store.get_session(UserId(1)).await,
            Err(StoreError::Unavailable)
        );
        assert_eq!(store.count_all().await, Err(StoreError::Unavailable));
        assert_eq!(
            store.clear_credentials(UserId(1)).await,
            Err(StoreError::Unavailable)
        );
    }
}
