use crate::document::Document;
use crate::error::{RatingDbError, Result};
use crate::storage::{DocumentDb, DocumentRecord};
use crate::trigger;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

const BUSINESSES: &str = "businesses";

/// How many times a conflicting read-modify-write cycle is retried before
/// the transaction is reported as contended.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 5;

/// A lifecycle event on a review document: before/after snapshots plus the
/// owning business. Presence of the snapshots classifies the event
/// (create/update/delete).
#[derive(Debug, Clone)]
pub struct ReviewEvent {
    pub biz_id: String,
    pub review_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

/// The main entry point for RatingDB.
/// Owns the document database and dispatches review write events to the
/// aggregation trigger. Shareable across threads via `Arc`.
pub struct Store {
    db: Mutex<DocumentDb>,
}

fn reviews_collection(biz_id: &str) -> String {
    format!("businesses/{biz_id}/reviews")
}

impl Store {
    /// Open a store in the given data directory (creates `ratings.db` inside).
    pub fn open(path: &str) -> Result<Self> {
        let root = PathBuf::from(path);
        if !root.exists() {
            return Err(RatingDbError::Other(format!(
                "Data directory does not exist: {}",
                root.display()
            )));
        }
        let db = DocumentDb::open(&root.join("ratings.db"))?;
        Ok(Store { db: Mutex::new(db) })
    }

    /// Open an in-memory store (for testing and ephemeral use).
    pub fn open_in_memory() -> Result<Self> {
        let db = DocumentDb::open_in_memory()?;
        Ok(Store { db: Mutex::new(db) })
    }

    /// Lock the storage layer for a single call. The lock is never held
    /// across a whole transaction cycle; concurrency between cycles is
    /// resolved by the version check in `cas_merge`.
    fn db(&self) -> Result<MutexGuard<'_, DocumentDb>> {
        self.db
            .lock()
            .map_err(|_| RatingDbError::Other("storage lock poisoned".into()))
    }

    // ── Businesses ───────────────────────────────────────────────────

    /// Get a business document, if it exists.
    pub fn business(&self, biz_id: &str) -> Result<Option<Document<serde_json::Value>>> {
        let record = self.db()?.get(BUSINESSES, biz_id)?;
        record.map(record_to_document).transpose()
    }

    /// List all business documents.
    pub fn list_businesses(&self) -> Result<Vec<Document<serde_json::Value>>> {
        let records = self.db()?.list(BUSINESSES)?;
        records.into_iter().map(record_to_document).collect()
    }

    /// Merge-write fields onto a business document, creating it if absent.
    /// Plain write with no version check; used by the backfill.
    pub fn merge_business(&self, biz_id: &str, patch: &serde_json::Value) -> Result<()> {
        self.db()?.merge(BUSINESSES, biz_id, patch)
    }

    // ── Reviews ──────────────────────────────────────────────────────

    /// Get a review document, if it exists.
    pub fn get_review(
        &self,
        biz_id: &str,
        review_id: &str,
    ) -> Result<Option<Document<serde_json::Value>>> {
        let record = self.db()?.get(&reviews_collection(biz_id), review_id)?;
        record.map(record_to_document).transpose()
    }

    /// List all reviews of a business.
    pub fn list_reviews(&self, biz_id: &str) -> Result<Vec<Document<serde_json::Value>>> {
        let records = self.db()?.list(&reviews_collection(biz_id))?;
        records.into_iter().map(record_to_document).collect()
    }

    /// Create or replace a review, then fire the aggregation trigger with
    /// the before/after snapshots. A trigger failure fails the write; the
    /// caller decides whether to redeliver.
    pub fn put_review(
        &self,
        biz_id: &str,
        review_id: &str,
        fields: serde_json::Value,
    ) -> Result<()> {
        let before = self
            .db()?
            .upsert(&reviews_collection(biz_id), review_id, &fields)?;

        let event = ReviewEvent {
            biz_id: biz_id.to_string(),
            review_id: review_id.to_string(),
            before,
            after: Some(fields),
        };
        trigger::on_review_write(self, &event)
    }

    /// Insert a review with an auto-generated id. Returns the id.
    pub fn insert_review(&self, biz_id: &str, fields: serde_json::Value) -> Result<String> {
        let id = ulid::Ulid::new().to_string().to_lowercase();
        self.put_review(biz_id, &id, fields)?;
        Ok(id)
    }

    /// Delete a review, then fire the aggregation trigger.
    pub fn delete_review(&self, biz_id: &str, review_id: &str) -> Result<()> {
        let collection = reviews_collection(biz_id);
        let before =
            self.db()?
                .delete(&collection, review_id)?
                .ok_or_else(|| RatingDbError::NotFound {
                    collection,
                    id: review_id.to_string(),
                })?;

        let event = ReviewEvent {
            biz_id: biz_id.to_string(),
            review_id: review_id.to_string(),
            before: Some(before),
            after: None,
        };
        trigger::on_review_write(self, &event)
    }

    // ── Transactions ─────────────────────────────────────────────────

    /// Run an optimistic single-document transaction: read the current
    /// snapshot, let `body` compute a merge patch from it, and apply the
    /// patch only if no other writer touched the document in between. On a
    /// version conflict the whole cycle reruns, up to
    /// `MAX_TRANSACTION_ATTEMPTS` times.
    pub fn run_transaction<F>(&self, collection: &str, id: &str, mut body: F) -> Result<()>
    where
        F: FnMut(Option<&serde_json::Value>) -> Result<serde_json::Value>,
    {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (snapshot, version) = match self.db()?.get(collection, id)? {
                Some(record) => (Some(record.parse_data()?), record.version),
                None => (None, 0),
            };

            let patch = body(snapshot.as_ref())?;

            if self.db()?.cas_merge(collection, id, version, &patch)? {
                return Ok(());
            }
            log::debug!(
                "Transaction conflict on {collection}/{id} (attempt {attempt}), retrying"
            );
        }

        Err(RatingDbError::Contention {
            collection: collection.to_string(),
            id: id.to_string(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    /// Run a transaction scoped to a business document.
    pub fn run_business_transaction<F>(&self, biz_id: &str, body: F) -> Result<()>
    where
        F: FnMut(Option<&serde_json::Value>) -> Result<serde_json::Value>,
    {
        self.run_transaction(BUSINESSES, biz_id, body)
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Collection stats: business count plus per-business review counts.
    pub fn status(&self) -> Result<serde_json::Value> {
        let db = self.db()?;
        let businesses = db.list(BUSINESSES)?;

        let mut reviews = serde_json::Map::new();
        for biz in &businesses {
            let count = db.count(&reviews_collection(&biz.id))?;
            reviews.insert(biz.id.clone(), serde_json::json!(count));
        }

        Ok(serde_json::json!({
            "businesses": businesses.len(),
            "reviews": reviews,
        }))
    }
}

fn record_to_document(record: DocumentRecord) -> Result<Document<serde_json::Value>> {
    let data = record.parse_data()?;
    Ok(Document {
        id: record.id,
        created_at: parse_timestamp(&record.created_at)?,
        modified_at: parse_timestamp(&record.modified_at)?,
        data,
    })
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RatingDbError::Other(format!("Bad timestamp '{raw}': {e}")))
}
