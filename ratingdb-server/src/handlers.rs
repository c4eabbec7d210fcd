use actix_web::{web, HttpResponse};
use ratingdb::{run_backfill, RatingDbError};

use crate::AppState;

/// Configure all API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            // Status
            .route("/status", web::get().to(status))
            // Businesses (aggregates are read-only; only triggers write them)
            .route("/businesses", web::get().to(list_businesses))
            .route("/businesses/{biz}", web::get().to(get_business))
            // Reviews
            .route("/businesses/{biz}/reviews", web::get().to(list_reviews))
            .route("/businesses/{biz}/reviews", web::post().to(create_review))
            .route("/businesses/{biz}/reviews/{id}", web::get().to(get_review))
            .route("/businesses/{biz}/reviews/{id}", web::put().to(put_review))
            .route(
                "/businesses/{biz}/reviews/{id}",
                web::delete().to(delete_review),
            )
            // Backfill
            .route("/backfill", web::post().to(backfill)),
    );
}

// ── Helpers ─────────────────────────────────────────────────────────

fn ok_json(value: serde_json::Value) -> HttpResponse {
    HttpResponse::Ok().json(value)
}

fn not_found(message: String) -> HttpResponse {
    HttpResponse::NotFound().json(serde_json::json!({ "error": message }))
}

fn err_response(e: RatingDbError) -> HttpResponse {
    match &e {
        RatingDbError::NotFound { .. } => not_found(e.to_string()),
        RatingDbError::Contention { .. } => HttpResponse::Conflict().json(serde_json::json!({
            "error": e.to_string()
        })),
        _ => {
            log::error!("Internal error: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": "Internal server error"
            }))
        }
    }
}

fn doc_json<T: serde::Serialize>(doc: &T) -> HttpResponse {
    match serde_json::to_value(doc) {
        Ok(v) => ok_json(v),
        Err(e) => err_response(e.into()),
    }
}

// ── Status ──────────────────────────────────────────────────────────

async fn status(state: web::Data<AppState>) -> HttpResponse {
    match state.store.status() {
        Ok(v) => ok_json(v),
        Err(e) => err_response(e),
    }
}

// ── Businesses ──────────────────────────────────────────────────────

async fn list_businesses(state: web::Data<AppState>) -> HttpResponse {
    match state.store.list_businesses() {
        Ok(docs) => doc_json(&docs),
        Err(e) => err_response(e),
    }
}

async fn get_business(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let biz_id = path.into_inner();
    match state.store.business(&biz_id) {
        Ok(Some(doc)) => doc_json(&doc),
        Ok(None) => not_found(format!("Business not found: {biz_id}")),
        Err(e) => err_response(e),
    }
}

// ── Reviews ─────────────────────────────────────────────────────────

async fn list_reviews(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    match state.store.list_reviews(&path) {
        Ok(docs) => doc_json(&docs),
        Err(e) => err_response(e),
    }
}

async fn get_review(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (biz_id, review_id) = path.into_inner();
    match state.store.get_review(&biz_id, &review_id) {
        Ok(Some(doc)) => doc_json(&doc),
        Ok(None) => not_found(format!("Review not found: {biz_id}/{review_id}")),
        Err(e) => err_response(e),
    }
}

async fn create_review(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    match state.store.insert_review(&path, body.into_inner()) {
        Ok(id) => HttpResponse::Created().json(serde_json::json!({ "id": id })),
        Err(e) => err_response(e),
    }
}

async fn put_review(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    let (biz_id, review_id) = path.into_inner();
    match state.store.put_review(&biz_id, &review_id, body.into_inner()) {
        Ok(()) => ok_json(serde_json::json!({ "ok": true, "id": review_id })),
        Err(e) => err_response(e),
    }
}

async fn delete_review(
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (biz_id, review_id) = path.into_inner();
    match state.store.delete_review(&biz_id, &review_id) {
        Ok(()) => ok_json(serde_json::json!({ "ok": true, "deleted": review_id })),
        Err(e) => err_response(e),
    }
}

// ── Backfill ────────────────────────────────────────────────────────

async fn backfill(state: web::Data<AppState>) -> HttpResponse {
    match run_backfill(&state.store) {
        Ok(summary) => {
            log::info!("Backfill finished over {} businesses", summary.businesses);
            HttpResponse::Ok()
                .content_type("text/plain; charset=utf-8")
                .body("Backfill complete")
        }
        Err(e) => err_response(e),
    }
}
