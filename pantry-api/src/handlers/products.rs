use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use pantry_common::product::{NewProduct, Product, ProductUpdate};
use pantry_common::store::{ProductOrder, StoreError};

use super::{error_response, internal_error, AppState, HandlerError, MessageResponse};

fn store_error(err: StoreError) -> HandlerError {
    match err {
        StoreError::Duplicate { .. } => error_response(StatusCode::CONFLICT, err.to_string()),
        err => internal_error(err),
    }
}

fn not_found() -> HandlerError {
    error_response(StatusCode::NOT_FOUND, "product not found")
}

pub async fn post_product(
    State(state): State<AppState>,
    Json(payload): Json<NewProduct>,
) -> Result<(StatusCode, Json<Product>), HandlerError> {
    let payload = payload.normalized();
    if payload.name.is_empty() {
        return Err(error_response(StatusCode::BAD_REQUEST, "name is required"));
    }

    state.store.ensure_connected().await.map_err(internal_error)?;
    let product = state
        .store
        .insert_product(payload)
        .await
        .map_err(store_error)?;

    Ok((StatusCode::CREATED, Json(product)))
}

/// All products, soonest expiry first.
pub async fn list_products(
    State(state): State<AppState>,
) -> Result<Json<Vec<Product>>, HandlerError> {
    state.store.ensure_connected().await.map_err(internal_error)?;
    let products = state
        .store
        .list_products(ProductOrder::ExpiryAscending)
        .await
        .map_err(store_error)?;

    Ok(Json(products))
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Product>, HandlerError> {
    state.store.ensure_connected().await.map_err(internal_error)?;
    state
        .store
        .get_product(id)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(not_found)
}

pub async fn put_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ProductUpdate>,
) -> Result<Json<Product>, HandlerError> {
    let payload = payload.normalized();
    if payload.name.as_deref() == Some("") {
        return Err(error_response(StatusCode::BAD_REQUEST, "name is required"));
    }

    state.store.ensure_connected().await.map_err(internal_error)?;
    state
        .store
        .update_product(id, payload)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(not_found)
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, HandlerError> {
    state.store.ensure_connected().await.map_err(internal_error)?;
    if !state.store.delete_product(id).await.map_err(store_error)? {
        return Err(not_found());
    }

    Ok(Json(MessageResponse {
        message: "product deleted".to_owned(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use http_body_util::BodyExt; // for `collect`
    use pantry_common::memstore::MemoryStore;
    use pantry_common::product::Product;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use crate::handlers::{add_routes, AppState};

    fn app() -> Router {
        add_routes(
            Router::new(),
            AppState {
                store: Arc::new(MemoryStore::new()),
                max_upload_bytes: 1024,
            },
            10,
        )
    }

    fn json_request(method: http::Method, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn empty_request(method: http::Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    const MILK: &str = r#"{"name": " Milk ", "quantity": 5, "price": 2, "expiryDate": "2099-01-05T00:00:00Z", "notifyBeforeDays": 3}"#;
    const EGGS: &str = r#"{"name": "Eggs", "quantity": 12, "price": 3, "expiryDate": "2099-01-01T00:00:00Z", "notifyBeforeDays": 2}"#;

    #[tokio::test]
    async fn create_list_update_delete() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(http::Method::POST, "/products", MILK))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let milk: Product = serde_json::from_slice(&body).unwrap();
        assert_eq!(milk.name, "Milk");

        let response = app
            .clone()
            .oneshot(json_request(http::Method::POST, "/products", EGGS))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(empty_request(http::Method::GET, "/products"))
            .await
            .unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let products: Vec<Product> = serde_json::from_slice(&body).unwrap();
        let names: Vec<&str> = products.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Eggs", "Milk"]);

        let uri = format!("/products/{}", milk.id);
        let response = app
            .clone()
            .oneshot(json_request(http::Method::PUT, &uri, r#"{"quantity": 2}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let updated: Product = serde_json::from_slice(&body).unwrap();
        assert_eq!(updated.quantity, 2.0);

        let response = app
            .clone()
            .oneshot(empty_request(http::Method::DELETE, &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(empty_request(http::Method::GET, &uri))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_duplicate_is_conflict() {
        let app = app();

        let response = app
            .clone()
            .oneshot(json_request(http::Method::POST, "/products", MILK))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let shouting = MILK.replace(" Milk ", "MILK");
        let response = app
            .oneshot(json_request(http::Method::POST, "/products", &shouting))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
