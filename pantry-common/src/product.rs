use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A perishable item tracked by the pantry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub subcategory: String,
    pub quantity: f64,
    pub weight: Option<f64>,
    pub price: f64,
    pub expiry_date: DateTime<Utc>,
    /// Days before `expiry_date` at which alerts start going out.
    pub notify_before_days: i32,
    pub created_at: DateTime<Utc>,
}

/// A Product that has not been written to a store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub quantity: f64,
    #[serde(default)]
    pub weight: Option<f64>,
    pub price: f64,
    pub expiry_date: DateTime<Utc>,
    pub notify_before_days: i32,
}

impl NewProduct {
    /// Trim every string field. Stores only ever see normalized products.
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.trim().to_owned(),
            category: self.category.trim().to_owned(),
            subcategory: self.subcategory.trim().to_owned(),
            ..self
        }
    }
}

/// Partial update of a Product; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub quantity: Option<f64>,
    pub weight: Option<f64>,
    pub price: Option<f64>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub notify_before_days: Option<i32>,
}

impl ProductUpdate {
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.map(|s| s.trim().to_owned()),
            category: self.category.map(|s| s.trim().to_owned()),
            subcategory: self.subcategory.map(|s| s.trim().to_owned()),
            ..self
        }
    }

    pub(crate) fn apply(self, product: &mut Product) {
        if let Some(name) = self.name {
            product.name = name;
        }
        if let Some(category) = self.category {
            product.category = category;
        }
        if let Some(subcategory) = self.subcategory {
            product.subcategory = subcategory;
        }
        if let Some(quantity) = self.quantity {
            product.quantity = quantity;
        }
        if let Some(weight) = self.weight {
            product.weight = Some(weight);
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(expiry_date) = self.expiry_date {
            product.expiry_date = expiry_date;
        }
        if let Some(notify_before_days) = self.notify_before_days {
            product.notify_before_days = notify_before_days;
        }
    }
}

/// A registered push notification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    pub fcm_token: String,
    pub created_at: DateTime<Utc>,
}

/// The key product names are unique under.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
