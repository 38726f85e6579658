//! Format catalog listing.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use rf_core::FormatSpec;

use crate::context::AppContext;

/// GET /api/formats -- the catalog grouped by platform.
pub async fn list_formats(State(ctx): State<AppContext>) -> Json<BTreeMap<String, Vec<FormatSpec>>> {
    Json(ctx.orchestrator.catalog().grouped())
}
