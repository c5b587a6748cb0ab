use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::product::{name_key, Device, NewProduct, Product, ProductUpdate};
use crate::store::{
    DeviceRegistration, DeviceStore, ProductOrder, ProductStore, Store, StoreError, StoreResult,
};

#[derive(Default)]
struct Collections {
    products: Vec<Product>,
    devices: Vec<Device>,
    next_product_id: i64,
    next_device_id: i64,
}

/// A record store kept in process memory.
///
/// Uniqueness checks and writes happen under the same lock, so this store
/// gives the same insert-or-reject guarantee as the unique indexes in
/// Postgres.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Collections> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert_product(&self, product: NewProduct) -> StoreResult<Product> {
        let product = product.normalized();
        let key = name_key(&product.name);
        let mut collections = self.lock();

        if collections
            .products
            .iter()
            .any(|existing| name_key(&existing.name) == key)
        {
            return Err(StoreError::Duplicate { name: product.name });
        }

        collections.next_product_id += 1;
        let created = Product {
            id: collections.next_product_id,
            name: product.name,
            category: product.category,
            subcategory: product.subcategory,
            quantity: product.quantity,
            weight: product.weight,
            price: product.price,
            expiry_date: product.expiry_date,
            notify_before_days: product.notify_before_days,
            created_at: Utc::now(),
        };
        collections.products.push(created.clone());

        Ok(created)
    }

    async fn find_product_by_name(&self, name: &str) -> StoreResult<Option<Product>> {
        let key = name_key(name);

        Ok(self
            .lock()
            .products
            .iter()
            .find(|product| name_key(&product.name) == key)
            .cloned())
    }

    async fn list_products(&self, order: ProductOrder) -> StoreResult<Vec<Product>> {
        let mut products = self.lock().products.clone();
        if order == ProductOrder::ExpiryAscending {
            products.sort_by(|a, b| a.expiry_date.cmp(&b.expiry_date).then(a.id.cmp(&b.id)));
        }

        Ok(products)
    }

    async fn get_product(&self, id: i64) -> StoreResult<Option<Product>> {
        Ok(self
            .lock()
            .products
            .iter()
            .find(|product| product.id == id)
            .cloned())
    }

    async fn update_product(
        &self,
        id: i64,
        update: ProductUpdate,
    ) -> StoreResult<Option<Product>> {
        let update = update.normalized();
        let mut collections = self.lock();

        if let Some(name) = &update.name {
            let key = name_key(name);
            if collections
                .products
                .iter()
                .any(|existing| existing.id != id && name_key(&existing.name) == key)
            {
                return Err(StoreError::Duplicate { name: name.clone() });
            }
        }

        Ok(collections
            .products
            .iter_mut()
            .find(|product| product.id == id)
            .map(|product| {
                update.apply(product);
                product.clone()
            }))
    }

    async fn delete_product(&self, id: i64) -> StoreResult<bool> {
        let mut collections = self.lock();
        let before = collections.products.len();
        collections.products.retain(|product| product.id != id);

        Ok(collections.products.len() < before)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn register_device(&self, token: &str) -> StoreResult<DeviceRegistration> {
        let mut collections = self.lock();

        if collections
            .devices
            .iter()
            .any(|device| device.fcm_token == token)
        {
            return Ok(DeviceRegistration::AlreadyRegistered);
        }

        collections.next_device_id += 1;
        let device = Device {
            id: collections.next_device_id,
            fcm_token: token.to_owned(),
            created_at: Utc::now(),
        };
        collections.devices.push(device.clone());

        Ok(DeviceRegistration::Registered(device))
    }

    async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        Ok(self.lock().devices.clone())
    }
}

impl Store for MemoryStore {}
