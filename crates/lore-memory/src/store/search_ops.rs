//! Vector, keyword and hybrid search over pieces.

use std::collections::HashMap;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;

use lore_types::{KnowledgePiece, ScoredPiece, sort_scored};

use crate::backend::{PieceQuery, StoreStats};
use crate::error::Result;
use crate::scoring::{blend, max_normalize, tokenize};
use crate::vector::embedding_to_bytes;

use super::SqliteStore;
use super::piece_ops::{PIECE_COLUMNS, SqlFilter, row_to_piece};

/// Each signal fetches this many times `top_k` candidates before blending.
const CANDIDATE_MULTIPLIER: usize = 4;

impl SqliteStore {
    /// Rank by cosine similarity (`1 - vec_distance_cosine`), clamped to `[0, 1]`.
    ///
    /// Only pieces whose embedding has the query's dimensionality are
    /// compared. Returns nothing when the query has no embedding.
    pub fn search_vectors(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let Some(embedding) = query.embedding.as_ref() else {
            return Ok(Vec::new());
        };
        if query.top_k == 0 || embedding.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();

        let mut sql_filter = SqlFilter::new();
        sql_filter.push_filter(&query.filter);
        let sql = format!(
            r#"
            SELECT {}, vec_distance_cosine(p.embedding, ?) AS distance
            FROM pieces p
            WHERE p.embedding IS NOT NULL AND p.embedding_dims = ?{}
            ORDER BY distance ASC, p.id ASC
            LIMIT ?
            "#,
            PIECE_COLUMNS,
            sql_filter.and_clause()
        );

        let mut params = vec![
            Value::Blob(embedding_to_bytes(embedding)),
            Value::Integer(embedding.len() as i64),
        ];
        params.extend(sql_filter.params);
        params.push(Value::Integer(query.top_k as i64));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let piece = row_to_piece(row)?;
            let distance: f64 = row.get(2)?;
            let score = (1.0 - distance as f32).clamp(0.0, 1.0);
            results.push(ScoredPiece::new(piece, score).with_sub_scores(Some(score), None));
        }

        sort_scored(&mut results);
        debug!(count = results.len(), "Vector search complete");
        Ok(results)
    }

    /// Rank by FTS5 `bm25()`, max-normalized so the best match scores 1.0.
    pub fn search_keywords(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let Some(match_expr) = fts_match_expression(&query.text) else {
            return Ok(Vec::new());
        };
        if query.top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();

        let mut sql_filter = SqlFilter::new();
        sql_filter.push_filter(&query.filter);
        let sql = format!(
            r#"
            SELECT {}, bm25(pieces_fts) AS rank
            FROM pieces_fts
            JOIN pieces p ON p.id = pieces_fts.piece_id
            WHERE pieces_fts MATCH ?{}
            ORDER BY rank ASC, p.id ASC
            LIMIT ?
            "#,
            PIECE_COLUMNS,
            sql_filter.and_clause()
        );

        let mut params = vec![Value::Text(match_expr)];
        params.extend(sql_filter.params);
        params.push(Value::Integer(query.top_k as i64));

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut pieces: Vec<KnowledgePiece> = Vec::new();
        let mut relevance: Vec<f32> = Vec::new();
        while let Some(row) = rows.next()? {
            pieces.push(row_to_piece(row)?);
            // bm25() is lower-is-better and usually negative
            let rank: f64 = row.get(2)?;
            relevance.push((-rank as f32).max(0.0));
        }

        if relevance.iter().all(|r| *r <= 0.0) {
            relevance.iter_mut().for_each(|r| *r = 1.0);
        } else {
            max_normalize(&mut relevance);
        }

        let mut results: Vec<ScoredPiece> = pieces
            .into_iter()
            .zip(relevance)
            .map(|(p, s)| ScoredPiece::new(p, s).with_sub_scores(None, Some(s)))
            .collect();
        sort_scored(&mut results);
        debug!(count = results.len(), "Keyword search complete");
        Ok(results)
    }

    /// Blend vector and keyword rankings: `α·v + (1-α)·k`.
    ///
    /// Both signals are max-normalized over the candidate pool first. A
    /// candidate missing from one list scores 0 for that signal; when the
    /// query carries only one signal it is used unweighted.
    pub fn hybrid_search(&self, query: &PieceQuery) -> Result<Vec<ScoredPiece>> {
        let pool = query.clone().with_top_k(
            query
                .top_k
                .saturating_mul(CANDIDATE_MULTIPLIER)
                .max(query.top_k),
        );

        let use_vector = query.embedding.is_some();
        let use_keyword = !query.text.trim().is_empty();

        let mut vector = if use_vector {
            self.search_vectors(&pool)?
        } else {
            Vec::new()
        };
        let mut keyword = if use_keyword {
            self.search_keywords(&pool)?
        } else {
            Vec::new()
        };
        normalize_scores(&mut vector);
        normalize_scores(&mut keyword);

        let mut candidates: HashMap<String, (KnowledgePiece, f32, f32)> = HashMap::new();
        for r in vector {
            candidates
                .entry(r.piece.piece_id.clone())
                .or_insert_with(|| (r.piece.clone(), 0.0, 0.0))
                .1 = r.score;
        }
        for r in keyword {
            candidates
                .entry(r.piece.piece_id.clone())
                .or_insert_with(|| (r.piece.clone(), 0.0, 0.0))
                .2 = r.score;
        }

        let mut results: Vec<ScoredPiece> = candidates
            .into_values()
            .filter_map(|(piece, v, k)| {
                let v = use_vector.then_some(v);
                let k = use_keyword.then_some(k);
                let score = blend(self.alpha, v, k);
                (score > 0.0).then(|| ScoredPiece::new(piece, score).with_sub_scores(v, k))
            })
            .collect();

        sort_scored(&mut results);
        results.truncate(query.top_k);
        Ok(results)
    }

    /// Piece counts from the database.
    pub fn piece_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();

        let (total, active, with_embeddings): (i64, i64, i64) = conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(is_active), 0),
                   COUNT(embedding)
            FROM pieces
            "#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt = conn.prepare(
            r#"
            SELECT j.value, COUNT(*)
            FROM pieces p, json_each(p.spaces) j
            WHERE p.is_active = 1
            GROUP BY j.value
            "#,
        )?;
        let per_space = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<_, _>>()?;

        Ok(StoreStats {
            total: total as usize,
            active: active as usize,
            inactive: (total - active) as usize,
            with_embeddings: with_embeddings as usize,
            per_space,
        })
    }
}

fn normalize_scores(results: &mut [ScoredPiece]) {
    let mut scores: Vec<f32> = results.iter().map(|r| r.score).collect();
    max_normalize(&mut scores);
    for (r, s) in results.iter_mut().zip(scores) {
        r.score = s;
    }
}

/// Quote each query term and OR them, so user text cannot inject FTS5 syntax.
fn fts_match_expression(text: &str) -> Option<String> {
    let terms = tokenize(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KnowledgePieceStore, PieceFilter};
    use lore_types::{KnowledgeType, Space};
    use serial_test::serial;

    fn piece(id: &str, content: &str) -> KnowledgePiece {
        KnowledgePiece::new(content, KnowledgeType::Fact).with_id(id)
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add(&piece("deploy", "deploy the service with cargo").with_embedding(vec![1.0, 0.0, 0.0]))
            .unwrap();
        store
            .add(&piece("test", "run the tests with cargo").with_embedding(vec![0.0, 1.0, 0.0]))
            .unwrap();
        store
            .add(
                &piece("coffee", "coffee preferences")
                    .with_embedding(vec![0.0, 0.0, 1.0])
                    .with_space(Space::Personal),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_fts_match_expression() {
        assert_eq!(fts_match_expression("  "), None);
        assert_eq!(
            fts_match_expression("cargo AND \"deploy\"").as_deref(),
            Some("\"and\" OR \"cargo\" OR \"deploy\"")
        );
    }

    #[test]
    #[serial]
    fn test_vector_search_ranks_by_cosine() {
        let store = seeded();
        let q = PieceQuery::new("", 2).with_embedding(vec![0.9, 0.1, 0.0]);
        let results = store.vector_search(&q).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), "deploy");
        assert!(results[0].score > results[1].score);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    #[serial]
    fn test_vector_search_skips_other_dimensions() {
        let store = seeded();
        let q = PieceQuery::new("", 5).with_embedding(vec![1.0, 0.0]);
        assert!(store.vector_search(&q).unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_keyword_search_normalized() {
        let store = seeded();
        let results = store.keyword_search(&PieceQuery::new("cargo deploy", 10)).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), "deploy");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results[1].score <= 1.0);
    }

    #[test]
    #[serial]
    fn test_hybrid_search_blends_and_filters_spaces() {
        let store = seeded();
        let q = PieceQuery::new("coffee", 5)
            .with_embedding(vec![0.0, 0.0, 1.0])
            .with_filter(PieceFilter::new().with_spaces(vec![Space::Main]));
        let results = store.search(&q).unwrap();
        assert!(results.iter().all(|r| r.id() != "coffee"));

        let q = PieceQuery::new("coffee", 5).with_embedding(vec![0.0, 0.0, 1.0]);
        let results = store.search(&q).unwrap();
        assert_eq!(results[0].id(), "coffee");
        assert!((results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(results[0].vector_score, Some(1.0));
        assert_eq!(results[0].keyword_score, Some(1.0));
    }

    #[test]
    #[serial]
    fn test_hybrid_search_keyword_only() {
        let store = seeded();
        let results = store.search(&PieceQuery::new("tests", 5)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id(), "test");
        assert!(results[0].vector_score.is_none());
    }

    #[test]
    #[serial]
    fn test_search_excludes_inactive() {
        let store = seeded();
        let mut p = KnowledgePieceStore::get(&store, "test").unwrap().unwrap();
        p.is_active = false;
        store.update(&p).unwrap();
        assert!(store.search(&PieceQuery::new("tests", 5)).unwrap().is_empty());
    }

    #[test]
    #[serial]
    fn test_stats() {
        let store = seeded();
        let mut p = KnowledgePieceStore::get(&store, "test").unwrap().unwrap();
        p.is_active = false;
        store.update(&p).unwrap();

        let stats = KnowledgePieceStore::stats(&store).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.with_embeddings, 3);
        assert_eq!(stats.per_space.get("main"), Some(&1));
        assert_eq!(stats.per_space.get("personal"), Some(&1));
    }
}
