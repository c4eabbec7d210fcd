//! Aggregation trigger engine.
//!
//! One unified handler covers review create, update, and delete: the event
//! is classified by the presence of its before/after snapshots, turned into
//! a `(count, sum)` delta, and applied to the owning business document in a
//! single optimistic transaction.

use crate::error::Result;
use crate::store::{ReviewEvent, Store};

/// The signed change to apply to a business aggregate for one review event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub count: i64,
    pub sum: f64,
}

impl Delta {
    pub fn is_zero(&self) -> bool {
        self.count == 0 && self.sum == 0.0
    }
}

/// Total, non-failing rating coercion: finite numbers pass through, numeric
/// strings parse, booleans map to 1/0, everything else is 0.
pub fn rating_of(value: Option<&serde_json::Value>) -> f64 {
    let n = match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(serde_json::Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn rating_field(snapshot: &serde_json::Value) -> f64 {
    rating_of(snapshot.get("rating"))
}

/// Classify a review event by snapshot presence and compute its delta.
/// Returns `None` when neither snapshot is present (malformed invocation,
/// handled as a no-op).
pub fn classify(
    before: Option<&serde_json::Value>,
    after: Option<&serde_json::Value>,
) -> Option<Delta> {
    match (before, after) {
        // Create
        (None, Some(after)) => Some(Delta {
            count: 1,
            sum: rating_field(after),
        }),
        // Update
        (Some(before), Some(after)) => Some(Delta {
            count: 0,
            sum: rating_field(after) - rating_field(before),
        }),
        // Delete
        (Some(before), None) => Some(Delta {
            count: -1,
            sum: -rating_field(before),
        }),
        (None, None) => None,
    }
}

/// Unified review-write handler. A zero delta (e.g. an update that did not
/// change the rating) skips the business write entirely; the outcome is the
/// same either way.
pub fn on_review_write(store: &Store, event: &ReviewEvent) -> Result<()> {
    let delta = match classify(event.before.as_ref(), event.after.as_ref()) {
        Some(delta) if !delta.is_zero() => delta,
        Some(_) => {
            log::debug!(
                "Review {}/{}: zero delta, skipping aggregate write",
                event.biz_id,
                event.review_id
            );
            return Ok(());
        }
        None => return Ok(()),
    };

    update_aggregates(store, &event.biz_id, delta)
}

/// Apply a delta to the business aggregate in one optimistic transaction.
/// A missing business document (and malformed stored counters) reads as a
/// zero baseline; the write merges exactly the three aggregate fields and
/// creates the document if absent.
pub fn update_aggregates(store: &Store, biz_id: &str, delta: Delta) -> Result<()> {
    store.run_business_transaction(biz_id, |snapshot| {
        let count = rating_of(snapshot.and_then(|s| s.get("ratingCount"))) as i64 + delta.count;
        let sum = rating_of(snapshot.and_then(|s| s.get("ratingSum"))) + delta.sum;
        let avg = if count > 0 { sum / count as f64 } else { 0.0 };

        Ok(serde_json::json!({
            "ratingCount": count,
            "ratingSum": sum,
            "ratingAvg": avg,
        }))
    })?;

    log::debug!(
        "Applied delta ({:+}, {:+}) to business {biz_id}",
        delta.count,
        delta.sum
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_rating_of_numbers() {
        assert_eq!(rating_of(Some(&json!(5))), 5.0);
        assert_eq!(rating_of(Some(&json!(3.5))), 3.5);
        assert_eq!(rating_of(Some(&json!(-2))), -2.0);
    }

    #[test]
    fn test_rating_of_strings() {
        assert_eq!(rating_of(Some(&json!("4"))), 4.0);
        assert_eq!(rating_of(Some(&json!(" 2.5 "))), 2.5);
        assert_eq!(rating_of(Some(&json!("abc"))), 0.0);
        assert_eq!(rating_of(Some(&json!(""))), 0.0);
    }

    #[test]
    fn test_rating_of_non_numeric() {
        assert_eq!(rating_of(None), 0.0);
        assert_eq!(rating_of(Some(&json!(null))), 0.0);
        assert_eq!(rating_of(Some(&json!({ "v": 5 }))), 0.0);
        assert_eq!(rating_of(Some(&json!([5]))), 0.0);
        assert_eq!(rating_of(Some(&json!(true))), 1.0);
        assert_eq!(rating_of(Some(&json!(false))), 0.0);
    }

    #[test]
    fn test_rating_of_non_finite_string() {
        assert_eq!(rating_of(Some(&json!("inf"))), 0.0);
        assert_eq!(rating_of(Some(&json!("NaN"))), 0.0);
    }

    #[test]
    fn test_classify_create() {
        let delta = classify(None, Some(&json!({ "rating": 5 }))).unwrap();
        assert_eq!(delta, Delta { count: 1, sum: 5.0 });
    }

    #[test]
    fn test_classify_update() {
        let delta = classify(
            Some(&json!({ "rating": 5 })),
            Some(&json!({ "rating": 3 })),
        )
        .unwrap();
        assert_eq!(delta, Delta { count: 0, sum: -2.0 });
    }

    #[test]
    fn test_classify_update_same_rating_is_zero_delta() {
        let delta = classify(
            Some(&json!({ "rating": 4, "text": "ok" })),
            Some(&json!({ "rating": 4, "text": "edited" })),
        )
        .unwrap();
        assert!(delta.is_zero());
    }

    #[test]
    fn test_classify_delete() {
        let delta = classify(Some(&json!({ "rating": 3 })), None).unwrap();
        assert_eq!(delta, Delta { count: -1, sum: -3.0 });
    }

    #[test]
    fn test_classify_neither_snapshot_is_skip() {
        assert!(classify(None, None).is_none());
    }

    #[test]
    fn test_classify_missing_rating_coerces_to_zero() {
        let delta = classify(None, Some(&json!({ "text": "no rating" }))).unwrap();
        assert_eq!(delta, Delta { count: 1, sum: 0.0 });
    }

    #[test]
    fn test_on_review_write_neither_snapshot_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let event = ReviewEvent {
            biz_id: "acme".into(),
            review_id: "u1".into(),
            before: None,
            after: None,
        };

        on_review_write(&store, &event).unwrap();
        assert!(store.business("acme").unwrap().is_none());
    }

    #[test]
    fn test_on_review_write_zero_delta_skips_write() {
        let store = Store::open_in_memory().unwrap();
        let event = ReviewEvent {
            biz_id: "acme".into(),
            review_id: "u1".into(),
            before: Some(json!({ "rating": 4 })),
            after: Some(json!({ "rating": 4, "text": "edited" })),
        };

        on_review_write(&store, &event).unwrap();
        // No aggregate document was ever created.
        assert!(store.business("acme").unwrap().is_none());
    }

    #[test]
    fn test_update_aggregates_from_missing_document() {
        let store = Store::open_in_memory().unwrap();
        update_aggregates(&store, "acme", Delta { count: 1, sum: 5.0 }).unwrap();

        let doc = store.business("acme").unwrap().unwrap();
        assert_eq!(doc.data["ratingCount"], 1);
        assert_eq!(doc.data["ratingSum"], 5.0);
        assert_eq!(doc.data["ratingAvg"], 5.0);
    }

    #[test]
    fn test_update_aggregates_zero_guard_on_empty_count() {
        let store = Store::open_in_memory().unwrap();
        update_aggregates(&store, "acme", Delta { count: 1, sum: 3.0 }).unwrap();
        update_aggregates(&store, "acme", Delta { count: -1, sum: -3.0 }).unwrap();

        let doc = store.business("acme").unwrap().unwrap();
        assert_eq!(doc.data["ratingCount"], 0);
        assert_eq!(doc.data["ratingAvg"], 0.0);
    }

    #[test]
    fn test_update_aggregates_tolerates_malformed_counters() {
        let store = Store::open_in_memory().unwrap();
        store
            .merge_business("acme", &json!({ "ratingCount": "garbage", "ratingSum": null }))
            .unwrap();

        update_aggregates(&store, "acme", Delta { count: 1, sum: 4.0 }).unwrap();

        let doc = store.business("acme").unwrap().unwrap();
        assert_eq!(doc.data["ratingCount"], 1);
        assert_eq!(doc.data["ratingSum"], 4.0);
        assert_eq!(doc.data["ratingAvg"], 4.0);
    }
}
