use chrono::{DateTime, Utc};

use pantry_common::notification::PushMessage;
use pantry_common::product::Product;

pub const ALERT_TITLE: &str = "Expiry Alert";

const MILLISECONDS_PER_DAY: f64 = 86_400_000.0;

/// Fractional days from `now` until `expiry`. Negative once expired.
pub fn days_remaining(expiry: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (expiry - now).num_milliseconds() as f64 / MILLISECONDS_PER_DAY
}

/// A product is eligible while it has not expired yet and its lead window has opened.
pub fn is_eligible(days_remaining: f64, notify_before_days: i32) -> bool {
    days_remaining > 0.0 && days_remaining <= f64::from(notify_before_days)
}

/// Whole days shown to users; partial days round up.
pub fn days_label(days_remaining: f64) -> i64 {
    days_remaining.ceil() as i64
}

pub fn alert_body(name: &str, days_remaining: f64) -> String {
    match days_label(days_remaining) {
        1 => format!("{name} expires in 1 day"),
        days => format!("{name} expires in {days} days"),
    }
}

pub fn alert_message(product: &Product, days_remaining: f64, token: &str) -> PushMessage {
    PushMessage {
        token: token.to_owned(),
        title: ALERT_TITLE.to_owned(),
        body: alert_body(&product.name, days_remaining),
    }
}

/// Eligible products with their remaining days, in the order given.
pub fn eligible_products(
    products: &[Product],
    now: DateTime<Utc>,
) -> impl Iterator<Item = (&Product, f64)> {
    products.iter().filter_map(move |product| {
        let days = days_remaining(product.expiry_date, now);
        is_eligible(days, product.notify_before_days).then_some((product, days))
    })
}
