//! The record store both pantry services read from and write to.
//!
//! Uniqueness of product names (ignoring case) and of device tokens is a
//! property of the store: an insert either lands or is rejected as a
//! duplicate in one step, there is no separate lookup to race against.
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::memstore::MemoryStore;
use crate::pgstore::PgStore;
use crate::product::{Device, NewProduct, Product, ProductUpdate};

/// Enumeration of errors for operations with a record store.
/// Errors from sqlx are wrapped to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query {
        command: String,
        error: sqlx::Error,
    },
    #[error("migrations failed with: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("a product named {name} already exists")]
    Duplicate { name: String },
    #[error("{0} is not a valid store backend")]
    ParseBackendError(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Order of a full product scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductOrder {
    /// Store-scan order: oldest record first.
    Insertion,
    /// Soonest expiry first.
    ExpiryAscending,
}

/// Outcome of registering a device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRegistration {
    Registered(Device),
    AlreadyRegistered,
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert a product, or fail with `StoreError::Duplicate` when its name is taken.
    async fn insert_product(&self, product: NewProduct) -> StoreResult<Product>;

    /// Case-insensitive exact lookup by name.
    async fn find_product_by_name(&self, name: &str) -> StoreResult<Option<Product>>;

    async fn list_products(&self, order: ProductOrder) -> StoreResult<Vec<Product>>;

    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>>;

    async fn update_product(&self, id: i64, update: ProductUpdate)
        -> StoreResult<Option<Product>>;

    /// Returns whether a product was deleted.
    async fn delete_product(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn register_device(&self, token: &str) -> StoreResult<DeviceRegistration>;

    /// All devices in store-scan order.
    async fn list_devices(&self) -> StoreResult<Vec<Device>>;
}

/// A store holding both collections.
#[async_trait]
pub trait Store: ProductStore + DeviceStore {
    /// Connect on first use. Later calls return immediately.
    async fn ensure_connected(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Backend names, used by config parsing to verify the backend is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_ref() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            invalid => Err(StoreError::ParseBackendError(invalid.to_owned())),
        }
    }
}

/// Build the store a service runs against. Does no I/O, see `Store::ensure_connected`.
pub fn build_store(
    backend: StoreBackend,
    database_url: &str,
    max_connections: u32,
) -> StoreResult<Arc<dyn Store>> {
    Ok(match backend {
        StoreBackend::Postgres => Arc::new(PgStore::new(database_url, max_connections)?),
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
    })
}
