//! Entity metadata operations.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use lore_types::{EntityMetadata, Id};

use crate::error::{MemoryError, Result};

use super::SqliteStore;

impl SqliteStore {
    /// Get an entity's metadata.
    pub fn get_metadata(&self, entity_id: &str) -> Result<Option<EntityMetadata>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                r#"
                SELECT entity_id, entity_type, properties, spaces, created_at, updated_at
                FROM entity_metadata
                WHERE entity_id = ?1
                "#,
                params![entity_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((entity_id, entity_type, properties, spaces, created_at, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(EntityMetadata {
            entity_id,
            entity_type,
            properties: serde_json::from_str(&properties)?,
            spaces: serde_json::from_str(&spaces)?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    /// Upsert an entity's metadata, replacing any previous record.
    pub fn save_metadata(&self, metadata: &EntityMetadata) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute(
            r#"
            INSERT OR REPLACE INTO entity_metadata
                (entity_id, entity_type, properties, spaces, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                metadata.entity_id,
                metadata.entity_type,
                serde_json::to_string(&metadata.properties)?,
                serde_json::to_string(&metadata.spaces)?,
                metadata.created_at.to_rfc3339(),
                metadata.updated_at.to_rfc3339(),
            ],
        )?;

        debug!(entity_id = %metadata.entity_id, "Saved entity metadata");
        Ok(())
    }

    /// Delete an entity's metadata.
    pub fn delete_metadata(&self, entity_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute(
            "DELETE FROM entity_metadata WHERE entity_id = ?1",
            params![entity_id],
        )?;
        Ok(rows > 0)
    }

    /// List entity ids, optionally restricted to one type.
    pub fn list_metadata_entities(&self, entity_type: Option<&str>) -> Result<Vec<Id>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            r#"
            SELECT entity_id FROM entity_metadata
            WHERE ?1 IS NULL OR entity_type = ?1
            ORDER BY entity_id
            "#,
        )?;
        let ids = stmt
            .query_map(params![entity_type], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::InvalidData(format!("bad timestamp {:?}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use crate::backend::MetadataStore;
    use crate::store::SqliteStore;
    use lore_types::{EntityMetadata, Space};
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_metadata_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let meta = EntityMetadata::new("user-1", "user")
            .with_property("name", "Ada")
            .with_property("languages", serde_json::json!(["rust", "ocaml"]))
            .with_spaces(vec![Space::Personal]);
        store.save(&meta).unwrap();

        let loaded = MetadataStore::get(&store, "user-1").unwrap().unwrap();
        assert_eq!(loaded.entity_type, "user");
        assert_eq!(loaded.get("name").unwrap(), "Ada");
        assert_eq!(loaded.spaces, vec![Space::Personal]);
        assert_eq!(loaded.created_at, meta.created_at);
    }

    #[test]
    #[serial]
    fn test_metadata_save_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .save(&EntityMetadata::new("e", "user").with_property("a", 1))
            .unwrap();
        store
            .save(&EntityMetadata::new("e", "user").with_property("b", 2))
            .unwrap();

        let loaded = MetadataStore::get(&store, "e").unwrap().unwrap();
        assert!(loaded.get("a").is_none());
        assert_eq!(loaded.get("b").unwrap(), 2);
    }

    #[test]
    #[serial]
    fn test_metadata_list_and_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&EntityMetadata::new("u2", "user")).unwrap();
        store.save(&EntityMetadata::new("u1", "user")).unwrap();
        store.save(&EntityMetadata::new("r1", "repo")).unwrap();

        assert_eq!(store.list_entities(None).unwrap(), vec!["r1", "u1", "u2"]);
        assert_eq!(store.list_entities(Some("user")).unwrap(), vec!["u1", "u2"]);
        assert!(MetadataStore::delete(&store, "u1").unwrap());
        assert!(!MetadataStore::delete(&store, "u1").unwrap());
    }
}
