//! Key Repository

use surrealdb::RecordId;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;
use uuid::Uuid;

use super::{BaseRepository, RepoError, RepoResult};
use crate::db::models::{Key, KeyCreate};

const TABLE: &str = "key";

#[derive(Clone)]
pub struct KeyRepository {
    base: BaseRepository,
}

impl KeyRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Find key by id
    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Key>> {
        let key: Option<Key> = self.base.db().select((TABLE, id)).await?;
        Ok(key)
    }

    /// Find all keys of a register, ordered by name
    pub async fn find_all_by_register(&self, register_id: &str) -> RepoResult<Vec<Key>> {
        let keys: Vec<Key> = self
            .base
            .db()
            .query("SELECT * FROM key WHERE register_id = $register ORDER BY name")
            .bind(("register", register_id.to_string()))
            .await?
            .take(0)?;
        Ok(keys)
    }

    /// Find key by name within a register
    pub async fn find_by_name(&self, register_id: &str, name: &str) -> RepoResult<Option<Key>> {
        let mut result = self
            .base
            .db()
            .query("SELECT * FROM key WHERE register_id = $register AND name = $name LIMIT 1")
            .bind(("register", register_id.to_string()))
            .bind(("name", name.to_string()))
            .await?;
        let keys: Vec<Key> = result.take(0)?;
        Ok(keys.into_iter().next())
    }

    /// Create a new key
    pub async fn create(&self, data: KeyCreate) -> RepoResult<Key> {
        // Check duplicate name within the register
        if self.find_by_name(&data.register_id, &data.name).await?.is_some() {
            return Err(RepoError::Duplicate(format!(
                "Key '{}' already exists in register {}",
                data.name, data.register_id
            )));
        }

        let key = Key {
            id: None,
            register_id: data.register_id,
            name: data.name,
            schema: data.schema,
            access_mode: data.access_mode.unwrap_or_default(),
            is_encrypted: data.is_encrypted.unwrap_or(false),
            meta: data.meta.unwrap_or_default(),
        };

        let id = Uuid::new_v4().to_string();
        let created: Option<Key> = self
            .base
            .db()
            .create(RecordId::from_table_key(TABLE, id))
            .content(key)
            .await?;
        created.ok_or_else(|| RepoError::Database("Failed to create key".to_string()))
    }

    /// Update a key's meta (afterhandler enablement lives here)
    pub async fn update_meta(&self, id: &str, meta: crate::db::models::KeyMeta) -> RepoResult<Key> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Key {} not found", id)))?;

        let thing = RecordId::from_table_key(TABLE, id);
        self.base
            .db()
            .query("UPDATE $thing MERGE { meta: $meta }")
            .bind(("thing", thing))
            .bind(("meta", meta))
            .await?;

        self.find_by_id(id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Key {} not found", id)))
    }
}
