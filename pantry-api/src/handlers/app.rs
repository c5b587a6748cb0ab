use std::convert::Infallible;

use axum::{extract::DefaultBodyLimit, routing, Router};
use tower::limit::ConcurrencyLimitLayer;

use super::{devices, products, upload, AppState};

/// Room for multipart framing on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn add_routes(router: Router, state: AppState, concurrency_limit: usize) -> Router {
    let body_limit = state.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;

    let api = Router::new()
        .route(
            "/products/upload",
            routing::post(upload::post_csv)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(
            "/products",
            routing::get(products::list_products).post(products::post_product),
        )
        .route(
            "/products/:id",
            routing::get(products::get_product)
                .put(products::put_product)
                .delete(products::delete_product),
        )
        .route("/devices", routing::post(devices::post_device))
        .with_state(state);

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop, just check axum health
        .merge(api)
}

pub async fn index() -> &'static str {
    "pantry api"
}
