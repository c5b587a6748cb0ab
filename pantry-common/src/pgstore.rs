use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::OnceCell;

use crate::product::{Device, NewProduct, Product, ProductUpdate};
use crate::store::{
    DeviceRegistration, DeviceStore, ProductOrder, ProductStore, Store, StoreError, StoreResult,
};

const UNIQUE_VIOLATION: &str = "23505";

/// A record store implemented on top of PostgreSQL tables.
///
/// Building a `PgStore` does no I/O. The first call to `ensure_connected`
/// opens a connection and applies the migrations; the result is memoized so
/// every later call is free.
pub struct PgStore {
    pool: PgPool,
    connected: OnceCell<()>,
}

impl PgStore {
    pub fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|error| StoreError::Connection { error })?;

        Ok(Self::new_from_pool(pool))
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            connected: OnceCell::new(),
        }
    }

    async fn connect(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Connection { error })?;

        sqlx::migrate!("../migrations").run(&self.pool).await?;

        Ok(())
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => db_error.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

fn write_error(command: &str, name: &str, error: sqlx::Error) -> StoreError {
    if is_unique_violation(&error) {
        StoreError::Duplicate {
            name: name.to_owned(),
        }
    } else {
        StoreError::Query {
            command: command.to_owned(),
            error,
        }
    }
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |error| StoreError::Query {
        command: command.to_owned(),
        error,
    }
}

#[async_trait]
impl ProductStore for PgStore {
    async fn insert_product(&self, product: NewProduct) -> StoreResult<Product> {
        let product = product.normalized();

        sqlx::query_as::<_, Product>(
            r#"
INSERT INTO products
    (name, category, subcategory, quantity, weight, price, expiry_date, notify_before_days)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8)
RETURNING *
            "#,
        )
        .bind(&product.name)
        .bind(&product.category)
        .bind(&product.subcategory)
        .bind(product.quantity)
        .bind(product.weight)
        .bind(product.price)
        .bind(product.expiry_date)
        .bind(product.notify_before_days)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| write_error("INSERT", &product.name, error))
    }

    async fn find_product_by_name(&self, name: &str) -> StoreResult<Option<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE lower(name) = lower($1)")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn list_products(&self, order: ProductOrder) -> StoreResult<Vec<Product>> {
        let query = match order {
            ProductOrder::Insertion => "SELECT * FROM products ORDER BY id",
            ProductOrder::ExpiryAscending => "SELECT * FROM products ORDER BY expiry_date, id",
        };

        sqlx::query_as::<_, Product>(query)
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>> {
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn update_product(
        &self,
        id: i64,
        update: ProductUpdate,
    ) -> StoreResult<Option<Product>> {
        let update = update.normalized();
        let name = update.name.clone().unwrap_or_default();

        sqlx::query_as::<_, Product>(
            r#"
UPDATE
    products
SET
    name = COALESCE($2, name),
    category = COALESCE($3, category),
    subcategory = COALESCE($4, subcategory),
    quantity = COALESCE($5, quantity),
    weight = COALESCE($6, weight),
    price = COALESCE($7, price),
    expiry_date = COALESCE($8, expiry_date),
    notify_before_days = COALESCE($9, notify_before_days)
WHERE
    id = $1
RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.name)
        .bind(update.category)
        .bind(update.subcategory)
        .bind(update.quantity)
        .bind(update.weight)
        .bind(update.price)
        .bind(update.expiry_date)
        .bind(update.notify_before_days)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| write_error("UPDATE", &name, error))
    }

    async fn delete_product(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(query_error("DELETE"))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DeviceStore for PgStore {
    async fn register_device(&self, token: &str) -> StoreResult<DeviceRegistration> {
        let device = sqlx::query_as::<_, Device>(
            r#"
INSERT INTO devices
    (fcm_token)
VALUES
    ($1)
ON CONFLICT (fcm_token) DO NOTHING
RETURNING *
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error("INSERT"))?;

        Ok(match device {
            Some(device) => DeviceRegistration::Registered(device),
            None => DeviceRegistration::AlreadyRegistered,
        })
    }

    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error("SELECT"))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ensure_connected(&self) -> StoreResult<()> {
        self.connected
            .get_or_try_init(|| self.connect())
            .await
            .map(|_| ())
    }
}
