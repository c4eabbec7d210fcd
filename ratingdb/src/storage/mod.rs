use crate::document::merge_fields;
use crate::error::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

/// The SQLite layer that stores documents and their write versions.
/// Businesses live in the `businesses` collection; reviews in
/// `businesses/{bizId}/reviews`.
pub struct DocumentDb {
    conn: Connection,
}

/// A raw document row: JSON payload plus the version used for
/// compare-and-swap writes.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub collection: String,
    pub data_json: String,
    pub version: i64,
    pub created_at: String,
    pub modified_at: String,
}

impl DocumentRecord {
    /// Parse the data_json column into a JSON value.
    pub fn parse_data(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.data_json)?)
    }
}

impl DocumentDb {
    /// Open or create the document database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = DocumentDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    /// Open an in-memory document database (for testing and ephemeral stores).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = DocumentDb { conn };
        db.initialize_tables()?;
        Ok(db)
    }

    fn initialize_tables(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT NOT NULL,
                collection TEXT NOT NULL,
                data_json TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                modified_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            ",
        )?;
        Ok(())
    }

    /// Get a document by collection and id.
    pub fn get(&self, collection: &str, id: &str) -> Result<Option<DocumentRecord>> {
        let result = self
            .conn
            .query_row(
                "SELECT id, collection, data_json, version, created_at, modified_at
                 FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                row_to_record,
            )
            .optional()?;
        Ok(result)
    }

    /// List all documents in a collection, ordered by id.
    pub fn list(&self, collection: &str) -> Result<Vec<DocumentRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, collection, data_json, version, created_at, modified_at
             FROM documents WHERE collection = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![collection], row_to_record)?;

        let mut docs = Vec::new();
        for row in rows {
            docs.push(row?);
        }
        Ok(docs)
    }

    /// Count documents in a collection.
    pub fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Write a document wholesale, returning the previous data if the
    /// document already existed. Read-then-write runs as one SQLite
    /// transaction so the returned snapshot is the one actually replaced.
    pub fn upsert(
        &self,
        collection: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<Option<serde_json::Value>> {
        let data_json = serde_json::to_string(data)?;
        let now = Utc::now().to_rfc3339();

        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<Option<serde_json::Value>> {
            let previous = self.get(collection, id)?;
            match &previous {
                Some(_) => {
                    self.conn.execute(
                        "UPDATE documents
                         SET data_json = ?3, version = version + 1, modified_at = ?4
                         WHERE collection = ?1 AND id = ?2",
                        params![collection, id, data_json, now],
                    )?;
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO documents (id, collection, data_json, version, created_at, modified_at)
                         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                        params![id, collection, data_json, now],
                    )?;
                }
            }
            previous.map(|r| r.parse_data()).transpose()
        })();

        self.finish_transaction(result)
    }

    /// Delete a document, returning the previous data if it existed.
    pub fn delete(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<Option<serde_json::Value>> {
            let previous = self.get(collection, id)?;
            if previous.is_some() {
                self.conn.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                )?;
            }
            previous.map(|r| r.parse_data()).transpose()
        })();

        self.finish_transaction(result)
    }

    /// Merge-write: shallow-merge the patch into the existing document,
    /// creating it if absent. Fields not named in the patch are untouched.
    pub fn merge(
        &self,
        collection: &str,
        id: &str,
        patch: &serde_json::Value,
    ) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<()> {
            let now = Utc::now().to_rfc3339();
            match self.get(collection, id)? {
                Some(record) => {
                    let mut data = record.parse_data()?;
                    merge_fields(&mut data, patch);
                    self.conn.execute(
                        "UPDATE documents
                         SET data_json = ?3, version = version + 1, modified_at = ?4
                         WHERE collection = ?1 AND id = ?2",
                        params![collection, id, serde_json::to_string(&data)?, now],
                    )?;
                }
                None => {
                    self.conn.execute(
                        "INSERT INTO documents (id, collection, data_json, version, created_at, modified_at)
                         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                        params![id, collection, serde_json::to_string(patch)?, now],
                    )?;
                }
            }
            Ok(())
        })();

        self.finish_transaction(result)
    }

    /// Compare-and-swap merge: apply the patch only if the document's version
    /// still equals `expected_version` (0 meaning "absent"). Returns false on
    /// a version mismatch, leaving the document untouched — the caller retries
    /// its whole read-modify-write cycle.
    pub fn cas_merge(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        patch: &serde_json::Value,
    ) -> Result<bool> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<bool> {
            let now = Utc::now().to_rfc3339();
            let current = self.get(collection, id)?;

            match current {
                Some(record) => {
                    if record.version != expected_version {
                        return Ok(false);
                    }
                    let mut data = record.parse_data()?;
                    merge_fields(&mut data, patch);
                    self.conn.execute(
                        "UPDATE documents
                         SET data_json = ?3, version = version + 1, modified_at = ?4
                         WHERE collection = ?1 AND id = ?2",
                        params![collection, id, serde_json::to_string(&data)?, now],
                    )?;
                    Ok(true)
                }
                None => {
                    if expected_version != 0 {
                        return Ok(false);
                    }
                    self.conn.execute(
                        "INSERT INTO documents (id, collection, data_json, version, created_at, modified_at)
                         VALUES (?1, ?2, ?3, 1, ?4, ?4)",
                        params![id, collection, serde_json::to_string(patch)?, now],
                    )?;
                    Ok(true)
                }
            }
        })();

        self.finish_transaction(result)
    }

    fn finish_transaction<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: row.get(0)?,
        collection: row.get(1)?,
        data_json: row.get(2)?,
        version: row.get(3)?,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_and_get() {
        let db = DocumentDb::open_in_memory().unwrap();

        let previous = db
            .upsert("businesses", "acme", &json!({ "name": "Acme" }))
            .unwrap();
        assert!(previous.is_none());

        let record = db.get("businesses", "acme").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.parse_data().unwrap()["name"], "Acme");
    }

    #[test]
    fn test_upsert_returns_previous_and_bumps_version() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses", "acme", &json!({ "name": "Acme" }))
            .unwrap();

        let previous = db
            .upsert("businesses", "acme", &json!({ "name": "Acme Diner" }))
            .unwrap()
            .unwrap();
        assert_eq!(previous["name"], "Acme");

        let record = db.get("businesses", "acme").unwrap().unwrap();
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_delete_returns_previous() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses/acme/reviews", "u1", &json!({ "rating": 5 }))
            .unwrap();

        let previous = db.delete("businesses/acme/reviews", "u1").unwrap().unwrap();
        assert_eq!(previous["rating"], 5);

        assert!(db.get("businesses/acme/reviews", "u1").unwrap().is_none());
        assert!(db.delete("businesses/acme/reviews", "u1").unwrap().is_none());
    }

    #[test]
    fn test_merge_preserves_unrelated_fields() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses", "acme", &json!({ "name": "Acme", "city": "Lisbon" }))
            .unwrap();

        db.merge("businesses", "acme", &json!({ "ratingCount": 1 }))
            .unwrap();

        let data = db
            .get("businesses", "acme")
            .unwrap()
            .unwrap()
            .parse_data()
            .unwrap();
        assert_eq!(data["name"], "Acme");
        assert_eq!(data["city"], "Lisbon");
        assert_eq!(data["ratingCount"], 1);
    }

    #[test]
    fn test_merge_creates_absent_document() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.merge("businesses", "acme", &json!({ "ratingCount": 0 }))
            .unwrap();
        assert!(db.get("businesses", "acme").unwrap().is_some());
    }

    #[test]
    fn test_cas_merge_succeeds_on_matching_version() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses", "acme", &json!({ "name": "Acme" }))
            .unwrap();

        let applied = db
            .cas_merge("businesses", "acme", 1, &json!({ "ratingCount": 1 }))
            .unwrap();
        assert!(applied);

        let record = db.get("businesses", "acme").unwrap().unwrap();
        assert_eq!(record.version, 2);
    }

    #[test]
    fn test_cas_merge_rejects_stale_version() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses", "acme", &json!({ "name": "Acme" }))
            .unwrap();
        db.merge("businesses", "acme", &json!({ "city": "Lisbon" }))
            .unwrap();

        // Version is now 2; a writer that read version 1 must lose.
        let applied = db
            .cas_merge("businesses", "acme", 1, &json!({ "ratingCount": 9 }))
            .unwrap();
        assert!(!applied);

        let data = db
            .get("businesses", "acme")
            .unwrap()
            .unwrap()
            .parse_data()
            .unwrap();
        assert!(data.get("ratingCount").is_none());
    }

    #[test]
    fn test_cas_merge_on_absent_document() {
        let db = DocumentDb::open_in_memory().unwrap();

        // Expecting version 0 creates the document.
        assert!(db
            .cas_merge("businesses", "acme", 0, &json!({ "ratingCount": 1 }))
            .unwrap());
        // Expecting 0 again must now fail.
        assert!(!db
            .cas_merge("businesses", "acme", 0, &json!({ "ratingCount": 2 }))
            .unwrap());
    }

    #[test]
    fn test_list_and_count() {
        let db = DocumentDb::open_in_memory().unwrap();
        db.upsert("businesses/acme/reviews", "u2", &json!({ "rating": 3 }))
            .unwrap();
        db.upsert("businesses/acme/reviews", "u1", &json!({ "rating": 5 }))
            .unwrap();
        db.upsert("businesses/other/reviews", "u1", &json!({ "rating": 1 }))
            .unwrap();

        let reviews = db.list("businesses/acme/reviews").unwrap();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].id, "u1");

        assert_eq!(db.count("businesses/acme/reviews").unwrap(), 2);
        assert_eq!(db.count("businesses").unwrap(), 0);
    }
}
