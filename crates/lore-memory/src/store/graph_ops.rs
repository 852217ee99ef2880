//! Entity graph operations.

use rusqlite::{OptionalExtension, Row, params};
use tracing::debug;

use crate::error::Result;
use crate::graph::{EdgeDirection, GraphEdge, GraphNode};

use super::SqliteStore;

impl SqliteStore {
    /// Get a graph node by id.
    pub fn get_graph_node(&self, node_id: &str) -> Result<Option<GraphNode>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT node_id, node_type, label, properties FROM graph_nodes WHERE node_id = ?1",
                params![node_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((node_id, node_type, label, properties)) => Ok(Some(GraphNode {
                node_id,
                node_type,
                label,
                properties: serde_json::from_str(&properties)?,
            })),
            None => Ok(None),
        }
    }

    /// Edges touching a node, ordered by (source, target, type).
    pub fn get_graph_edges(&self, node_id: &str, direction: EdgeDirection) -> Result<Vec<GraphEdge>> {
        let conn = self.conn.lock();

        let condition = match direction {
            EdgeDirection::Outgoing => "source_id = ?1",
            EdgeDirection::Incoming => "target_id = ?1",
            EdgeDirection::Both => "(source_id = ?1 OR target_id = ?1)",
        };
        let sql = format!(
            r#"
            SELECT source_id, target_id, edge_type, properties
            FROM graph_edges
            WHERE {}
            ORDER BY source_id, target_id, edge_type
            "#,
            condition
        );

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params![node_id])?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next()? {
            edges.push(row_to_edge(row)?);
        }
        Ok(edges)
    }

    /// Insert or replace a node.
    pub fn upsert_graph_node(&self, node: &GraphNode) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO graph_nodes (node_id, node_type, label, properties)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                node.node_id,
                node.node_type,
                node.label,
                serde_json::to_string(&node.properties)?,
            ],
        )?;
        debug!(node_id = %node.node_id, "Upserted graph node");
        Ok(())
    }

    /// Insert or replace an edge keyed by (source, target, type).
    pub fn upsert_graph_edge(&self, edge: &GraphEdge) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT OR REPLACE INTO graph_edges (source_id, target_id, edge_type, properties)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                edge.source_id,
                edge.target_id,
                edge.edge_type,
                serde_json::to_string(&edge.properties)?,
            ],
        )?;
        debug!(
            source = %edge.source_id,
            target = %edge.target_id,
            edge_type = %edge.edge_type,
            "Upserted graph edge"
        );
        Ok(())
    }

    /// Delete a node and every edge touching it.
    pub fn delete_graph_node(&self, node_id: &str) -> Result<bool> {
        self.with_transaction(|conn| {
            let edges = conn.execute(
                "DELETE FROM graph_edges WHERE source_id = ?1 OR target_id = ?1",
                params![node_id],
            )?;
            let nodes = conn.execute(
                "DELETE FROM graph_nodes WHERE node_id = ?1",
                params![node_id],
            )?;
            Ok(edges + nodes > 0)
        })
    }
}

fn row_to_edge(row: &Row<'_>) -> Result<GraphEdge> {
    let properties: String = row.get(3)?;
    Ok(GraphEdge {
        source_id: row.get(0)?,
        target_id: row.get(1)?,
        edge_type: row.get(2)?,
        properties: serde_json::from_str(&properties)?,
    })
}
