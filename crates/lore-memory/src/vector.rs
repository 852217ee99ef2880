//! sqlite-vec integration and embedding (de)serialization.
//!
//! Embeddings are stored as native-endian `f32` BLOBs in the `pieces`
//! table and compared with sqlite-vec's `vec_distance_cosine`.

use std::sync::Once;

use rusqlite::Connection;
use tracing::debug;
use zerocopy::IntoBytes;

use crate::error::{MemoryError, Result};

static VEC_INIT: Once = Once::new();

/// Register the sqlite-vec extension for every new connection.
///
/// `sqlite3_auto_extension` applies process-wide, so registration happens
/// at most once.
pub fn init_vector_extension() {
    VEC_INIT.call_once(|| {
        use rusqlite::ffi::sqlite3_auto_extension;
        use sqlite_vec::sqlite3_vec_init;

        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }
        debug!("sqlite-vec auto extension registered");
    });
}

/// sqlite-vec version string, confirming the extension is loaded.
pub fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// Encode an embedding as a BLOB.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.as_bytes().to_vec()
}

/// Decode a BLOB written by [`embedding_to_bytes`].
pub fn embedding_from_bytes(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(MemoryError::InvalidData(format!(
            "embedding blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
