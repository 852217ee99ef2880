//! Knowledge piece CRUD operations.

use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use tracing::debug;

use lore_types::{Id, KnowledgePiece, Space};

use crate::backend::{EntityScope, PieceFilter};
use crate::error::{MemoryError, Result};
use crate::validation::validate_piece_result;
use crate::vector::{embedding_from_bytes, embedding_to_bytes};

use super::SqliteStore;

/// Columns needed to rebuild a piece, in the order [`row_to_piece`] reads them.
pub(crate) const PIECE_COLUMNS: &str = "p.data, p.embedding";

impl SqliteStore {
    /// Insert a new piece. Fails with `Duplicate` if the id exists.
    pub fn insert_piece(&self, piece: &KnowledgePiece) -> Result<Id> {
        validate_piece_result(piece, self.embedding_dims)?;

        self.with_transaction(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM pieces WHERE id = ?1",
                    params![piece.piece_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if exists {
                return Err(MemoryError::Duplicate(piece.piece_id.clone()));
            }

            write_piece(conn, piece, "INSERT")?;
            Ok(())
        })?;

        debug!(piece_id = %piece.piece_id, "Inserted piece");
        Ok(piece.piece_id.clone())
    }

    /// Get a piece by id, active or not.
    pub fn get_piece(&self, piece_id: &str) -> Result<Option<KnowledgePiece>> {
        let conn = self.conn.lock();

        let sql = format!("SELECT {} FROM pieces p WHERE p.id = ?1", PIECE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![piece_id])?;

        match rows.next()? {
            Some(row) => Ok(Some(row_to_piece(row)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an existing piece. Returns `false` if the id is unknown.
    pub fn update_piece(&self, piece: &KnowledgePiece) -> Result<bool> {
        validate_piece_result(piece, self.embedding_dims)?;

        let updated = self.with_transaction(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT 1 FROM pieces WHERE id = ?1",
                    params![piece.piece_id],
                    |_| Ok(true),
                )
                .optional()?
                .unwrap_or(false);
            if !exists {
                return Ok(false);
            }

            write_piece(conn, piece, "INSERT OR REPLACE")?;
            Ok(true)
        })?;

        if updated {
            debug!(piece_id = %piece.piece_id, "Updated piece");
        }
        Ok(updated)
    }

    /// Physically delete a piece and its full-text entry.
    pub fn delete_piece(&self, piece_id: &str) -> Result<bool> {
        let removed = self.with_transaction(|conn| {
            conn.execute(
                "DELETE FROM pieces_fts WHERE piece_id = ?1",
                params![piece_id],
            )?;
            let rows = conn.execute("DELETE FROM pieces WHERE id = ?1", params![piece_id])?;
            Ok(rows > 0)
        })?;

        if removed {
            debug!(piece_id = %piece_id, "Deleted piece");
        }
        Ok(removed)
    }

    /// List pieces matching a filter, ordered by id.
    pub fn list_pieces(&self, filter: &PieceFilter) -> Result<Vec<KnowledgePiece>> {
        let conn = self.conn.lock();

        let mut sql_filter = SqlFilter::new();
        sql_filter.push_filter(filter);
        let sql = format!(
            "SELECT {} FROM pieces p{} ORDER BY p.id",
            PIECE_COLUMNS,
            sql_filter.where_clause()
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(sql_filter.params))?;
        let mut pieces = Vec::new();
        while let Some(row) = rows.next()? {
            pieces.push(row_to_piece(row)?);
        }
        Ok(pieces)
    }

    /// Indexed lookup of an active piece by content hash.
    pub fn find_piece_by_hash(
        &self,
        content_hash: &str,
        scope: &EntityScope,
    ) -> Result<Option<KnowledgePiece>> {
        let conn = self.conn.lock();

        let mut sql_filter = SqlFilter::new();
        sql_filter.push("p.content_hash = ?", [Value::Text(content_hash.to_string())]);
        sql_filter.push_filter(&PieceFilter::new().with_scope(scope.clone()));
        let sql = format!(
            "SELECT {} FROM pieces p{} ORDER BY p.id LIMIT 1",
            PIECE_COLUMNS,
            sql_filter.where_clause()
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(sql_filter.params))?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_piece(row)?)),
            None => Ok(None),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row Mapping
// ─────────────────────────────────────────────────────────────────────────────

fn spaces_of(piece: &KnowledgePiece) -> Vec<Space> {
    if piece.spaces.is_empty() {
        vec![piece.space]
    } else {
        piece.spaces.clone()
    }
}

/// Write the row and its full-text mirror. `verb` is `INSERT` or `INSERT OR REPLACE`.
fn write_piece(conn: &Connection, piece: &KnowledgePiece, verb: &str) -> Result<()> {
    // The embedding lives in its own BLOB column.
    let mut record = piece.clone();
    let embedding = record.embedding.take();

    let sql = format!(
        r#"
        {} INTO pieces (id, entity_id, knowledge_type, info_type, domain, secondary_domains,
                        tags, spaces, content_hash, is_active, merge_processed, supersedes,
                        embedding, embedding_dims, data, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
        verb
    );
    conn.execute(
        &sql,
        params![
            record.piece_id,
            record.entity_id,
            record.knowledge_type.as_str(),
            record.info_type,
            record.domain,
            serde_json::to_string(&record.secondary_domains)?,
            serde_json::to_string(&record.tags)?,
            serde_json::to_string(&spaces_of(&record))?,
            record.content_hash,
            record.is_active,
            record.merge_processed,
            record.supersedes,
            embedding.as_deref().map(embedding_to_bytes),
            embedding.as_ref().map(|e| e.len() as i64),
            serde_json::to_string(&record)?,
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339(),
        ],
    )?;

    conn.execute(
        "DELETE FROM pieces_fts WHERE piece_id = ?1",
        params![record.piece_id],
    )?;
    conn.execute(
        "INSERT INTO pieces_fts (piece_id, content, tags) VALUES (?1, ?2, ?3)",
        params![record.piece_id, record.content, record.tags.join(" ")],
    )?;
    Ok(())
}

/// Rebuild a piece from [`PIECE_COLUMNS`].
pub(crate) fn row_to_piece(row: &Row<'_>) -> Result<KnowledgePiece> {
    let data: String = row.get(0)?;
    let blob: Option<Vec<u8>> = row.get(1)?;

    let mut piece: KnowledgePiece = serde_json::from_str(&data)?;
    piece.embedding = blob.as_deref().map(embedding_from_bytes).transpose()?;
    Ok(piece)
}

// ─────────────────────────────────────────────────────────────────────────────
// Filter Translation
// ─────────────────────────────────────────────────────────────────────────────

/// `WHERE` clauses with anonymous `?` placeholders and their parameters, in order.
#[derive(Debug, Default)]
pub(crate) struct SqlFilter {
    clauses: Vec<String>,
    pub(crate) params: Vec<Value>,
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn text_values<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
    items
        .into_iter()
        .map(|s| Value::Text(s.to_string()))
        .collect()
}

impl SqlFilter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) {
        self.clauses.push(clause.into());
        self.params.extend(params);
    }

    /// Translate every constraint of `filter`, spaces included.
    pub(crate) fn push_filter(&mut self, filter: &PieceFilter) {
        if !filter.include_inactive {
            self.push("p.is_active = 1", []);
        }

        match &filter.scope {
            EntityScope::Any => {}
            EntityScope::Global => self.push("p.entity_id IS NULL", []),
            EntityScope::Entity(id) => self.push("p.entity_id = ?", [Value::Text(id.clone())]),
        }

        if !filter.knowledge_types.is_empty() {
            self.push(
                format!(
                    "p.knowledge_type IN ({})",
                    placeholders(filter.knowledge_types.len())
                ),
                text_values(filter.knowledge_types.iter().map(|t| t.as_str())),
            );
        }

        if !filter.info_types.is_empty() {
            self.push(
                format!("p.info_type IN ({})", placeholders(filter.info_types.len())),
                text_values(filter.info_types.iter().map(String::as_str)),
            );
        }

        if !filter.tags.is_empty() {
            self.push(
                format!(
                    "EXISTS (SELECT 1 FROM json_each(p.tags) WHERE value IN ({}))",
                    placeholders(filter.tags.len())
                ),
                text_values(filter.tags.iter().map(String::as_str)),
            );
        }

        if !filter.domains.is_empty() {
            let marks = placeholders(filter.domains.len());
            let mut params = text_values(filter.domains.iter().map(String::as_str));
            params.extend(text_values(filter.domains.iter().map(String::as_str)));
            self.push(
                format!(
                    "(p.domain IN ({marks}) OR EXISTS \
                     (SELECT 1 FROM json_each(p.secondary_domains) WHERE value IN ({marks})))"
                ),
                params,
            );
        }

        if !filter.spaces.is_empty() {
            self.push(
                format!(
                    "EXISTS (SELECT 1 FROM json_each(p.spaces) WHERE value IN ({}))",
                    placeholders(filter.spaces.len())
                ),
                text_values(filter.spaces.iter().map(|s| s.as_str())),
            );
        }

        if let Some(processed) = filter.merge_processed {
            self.push("p.merge_processed = ?", [Value::Integer(processed as i64)]);
        }
    }

    /// `" WHERE a AND b"`, or empty when unconstrained.
    pub(crate) fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    /// `" AND a AND b"`, for appending to an existing `WHERE`.
    pub(crate) fn and_clause(&self) -> String {
        self.clauses
            .iter()
            .map(|c| format!(" AND {}", c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{EntityScope, KnowledgePieceStore, PieceFilter};
    use crate::error::MemoryError;
    use crate::store::SqliteStore;
    use lore_types::{KnowledgePiece, KnowledgeType, Space};
    use serial_test::serial;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn piece(id: &str, content: &str) -> KnowledgePiece {
        KnowledgePiece::new(content, KnowledgeType::Fact).with_id(id)
    }

    #[test]
    #[serial]
    fn test_add_get_roundtrip_with_embedding() {
        let store = store();
        let p = piece("p1", "Rust uses cargo")
            .with_tags(["Rust", "build"])
            .with_domain("tooling")
            .with_embedding(vec![0.5, -0.25, 1.0])
            .with_spaces(vec![Space::Personal, Space::Main]);
        store.add(&p).unwrap();

        let loaded = KnowledgePieceStore::get(&store, "p1").unwrap().unwrap();
        assert_eq!(loaded, p);
        assert_eq!(loaded.space, Space::Personal);
    }

    #[test]
    #[serial]
    fn test_add_duplicate_id_fails() {
        let store = store();
        store.add(&piece("p1", "one")).unwrap();
        assert!(matches!(
            store.add(&piece("p1", "two")),
            Err(MemoryError::Duplicate(_))
        ));
    }

    #[test]
    #[serial]
    fn test_add_rejects_empty_content_and_bad_dims() {
        let store = store().with_embedding_dims(3);
        let mut blank = piece("p1", "x");
        blank.content = "  ".into();
        assert!(matches!(store.add(&blank), Err(MemoryError::InvalidData(_))));

        let wrong = piece("p2", "ok").with_embedding(vec![1.0]);
        assert!(matches!(store.add(&wrong), Err(MemoryError::InvalidData(_))));
    }

    #[test]
    #[serial]
    fn test_update_and_remove() {
        let store = store();
        assert!(!store.update(&piece("missing", "x")).unwrap());

        store.add(&piece("p1", "before")).unwrap();
        let mut p = KnowledgePieceStore::get(&store, "p1").unwrap().unwrap();
        p.set_content("after");
        p.is_active = false;
        assert!(store.update(&p).unwrap());

        let loaded = KnowledgePieceStore::get(&store, "p1").unwrap().unwrap();
        assert_eq!(loaded.content, "after");
        assert!(!loaded.is_active);

        assert!(store.remove("p1").unwrap());
        assert!(!store.remove("p1").unwrap());
        assert!(KnowledgePieceStore::get(&store, "p1").unwrap().is_none());
    }

    #[test]
    #[serial]
    fn test_list_all_filters() {
        let store = store();
        store
            .add(&piece("a", "global fact").with_tags(["x"]))
            .unwrap();
        store
            .add(&piece("b", "owned fact").with_entity("user-1").with_domain("rust"))
            .unwrap();
        let mut retired = piece("c", "retired");
        retired.is_active = false;
        store.add(&retired).unwrap();
        store
            .add(
                &KnowledgePiece::new("a procedure", KnowledgeType::Procedure)
                    .with_id("d")
                    .with_space(Space::Developmental)
                    .with_secondary_domains(["rust"]),
            )
            .unwrap();

        let ids = |filter: PieceFilter| -> Vec<String> {
            store
                .list_all(&filter)
                .unwrap()
                .into_iter()
                .map(|p| p.piece_id)
                .collect()
        };

        assert_eq!(ids(PieceFilter::new()), vec!["a", "b", "d"]);
        assert_eq!(ids(PieceFilter::new().including_inactive()).len(), 4);
        assert_eq!(
            ids(PieceFilter::new().with_scope(EntityScope::Global)),
            vec!["a", "d"]
        );
        assert_eq!(
            ids(PieceFilter::new().with_scope(EntityScope::Entity("user-1".into()))),
            vec!["b"]
        );
        assert_eq!(
            ids(PieceFilter::new().with_types(vec![KnowledgeType::Procedure])),
            vec!["d"]
        );
        assert_eq!(ids(PieceFilter::new().with_tags(vec!["X".into()])), vec!["a"]);
        assert_eq!(
            ids(PieceFilter::new().with_domains(vec!["rust".into()])),
            vec!["b", "d"]
        );
        assert_eq!(
            ids(PieceFilter::new().with_spaces(vec![Space::Developmental])),
            vec!["d"]
        );
        assert_eq!(ids(PieceFilter::new().with_merge_processed(true)), Vec::<String>::new());
    }

    #[test]
    #[serial]
    fn test_find_by_content_hash_indexed() {
        let store = store();
        store.add(&piece("p1", "Hello   world")).unwrap();

        let hash = lore_types::content_hash("Hello world");
        let found = store
            .find_by_content_hash(&hash, &EntityScope::Global)
            .unwrap()
            .unwrap();
        assert_eq!(found.piece_id, "p1");
        assert!(
            store
                .find_by_content_hash(&hash, &EntityScope::Entity("someone".into()))
                .unwrap()
                .is_none()
        );
    }
}
