use async_trait::async_trait;
use rusqlite::{Connection, params};

use murmur_types::Result;
use murmur_types::models::{File, Location, Media};

use crate::Database;
use crate::repo::AttachmentRepository;

/// Inserts a row and binds it to the message in one transaction,
/// so the binding never exists without its attachment.
fn insert_bound(
    conn: &mut Connection,
    insert: impl FnOnce(&Connection) -> rusqlite::Result<usize>,
    bind_sql: &str,
    message_id: i64,
) -> rusqlite::Result<i64> {
    let tx = conn.transaction()?;
    insert(&*tx)?;
    let id = tx.last_insert_rowid();
    tx.execute(bind_sql, params![message_id, id])?;
    tx.commit()?;
    Ok(id)
}

#[async_trait]
impl AttachmentRepository for Database {
    async fn add_file(&self, message_id: i64, file: &File) -> Result<i64> {
        self.with_conn_mut(|conn| {
            insert_bound(
                conn,
                |c| {
                    c.execute(
                        "INSERT INTO files (url, file_type, size, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
                        params![file.url, file.file_type, file.size, file.uploaded_at],
                    )
                },
                "INSERT INTO message_files (message_id, file_id) VALUES (?1, ?2)",
                message_id,
            )
        })
    }

    async fn add_media(&self, message_id: i64, media: &Media) -> Result<i64> {
        self.with_conn_mut(|conn| {
            insert_bound(
                conn,
                |c| {
                    c.execute(
                        "INSERT INTO media (url, media_type, size, uploaded_at) VALUES (?1, ?2, ?3, ?4)",
                        params![media.url, media.media_type, media.size, media.uploaded_at],
                    )
                },
                "INSERT INTO message_media (message_id, media_id) VALUES (?1, ?2)",
                message_id,
            )
        })
    }

    async fn add_location(&self, message_id: i64, location: &Location) -> Result<i64> {
        self.with_conn_mut(|conn| {
            insert_bound(
                conn,
                |c| {
                    c.execute(
                        "INSERT INTO locations (latitude, longitude, created_at) VALUES (?1, ?2, ?3)",
                        params![location.latitude, location.longitude, location.created_at],
                    )
                },
                "INSERT INTO message_locations (message_id, location_id) VALUES (?1, ?2)",
                message_id,
            )
        })
    }

    async fn files(&self, message_id: i64) -> Result<Vec<File>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT f.id, f.url, f.file_type, f.size, f.uploaded_at FROM files f
                 JOIN message_files mf ON mf.file_id = f.id
                 WHERE mf.message_id = ?1 ORDER BY f.id",
            )?;
            let rows = stmt.query_map(params![message_id], |row| {
                Ok(File {
                    file_id: row.get(0)?,
                    url: row.get(1)?,
                    file_type: row.get(2)?,
                    size: row.get(3)?,
                    uploaded_at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn media(&self, message_id: i64) -> Result<Vec<Media>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.url, m.media_type, m.size, m.uploaded_at FROM media m
                 JOIN message_media mm ON mm.media_id = m.id
                 WHERE mm.message_id = ?1 ORDER BY m.id",
            )?;
            let rows = stmt.query_map(params![message_id], |row| {
                Ok(Media {
                    media_id: row.get(0)?,
                    url: row.get(1)?,
                    media_type: row.get(2)?,
                    size: row.get(3)?,
                    uploaded_at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn locations(&self, message_id: i64) -> Result<Vec<Location>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT l.id, l.latitude, l.longitude, l.created_at FROM locations l
                 JOIN message_locations ml ON ml.location_id = l.id
                 WHERE ml.message_id = ?1 ORDER BY l.id",
            )?;
            let rows = stmt.query_map(params![message_id], |row| {
                Ok(Location {
                    location_id: row.get(0)?,
                    latitude: row.get(1)?,
                    longitude: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}
