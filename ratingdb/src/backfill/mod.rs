//! Full recomputation of business aggregates from their reviews.
//!
//! Businesses are processed sequentially; each one has all of its reviews
//! read before its aggregate is overwritten with a plain merge-write. The
//! run is not serialized against concurrent incremental triggers — an
//! interleaved write can leave a transiently stale aggregate that corrects
//! itself on the next review event. A failure on one business aborts the
//! remaining scan.

use crate::error::Result;
use crate::store::Store;
use crate::trigger::rating_of;

/// Outcome of a backfill run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackfillSummary {
    pub businesses: usize,
}

/// Recompute every business aggregate from scratch. Idempotent: two runs
/// with no writes in between produce identical aggregates.
///
/// Ratings that coerce to 0 (missing or non-numeric) are excluded from both
/// the count and the sum.
pub fn run_backfill(store: &Store) -> Result<BackfillSummary> {
    let businesses = store.list_businesses()?;

    for biz in &businesses {
        let reviews = store.list_reviews(&biz.id)?;

        let mut count: i64 = 0;
        let mut sum: f64 = 0.0;
        for review in &reviews {
            let v = rating_of(review.data.get("rating"));
            if v != 0.0 {
                count += 1;
                sum += v;
            }
        }
        let avg = if count > 0 { sum / count as f64 } else { 0.0 };

        store.merge_business(
            &biz.id,
            &serde_json::json!({
                "ratingCount": count,
                "ratingSum": sum,
                "ratingAvg": avg,
            }),
        )?;
        log::info!(
            "Backfilled business {}: count={count} sum={sum} avg={avg}",
            biz.id
        );
    }

    Ok(BackfillSummary {
        businesses: businesses.len(),
    })
}
