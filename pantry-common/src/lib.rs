pub mod memstore;
pub mod metrics;
pub mod notification;
pub mod pgstore;
pub mod product;
pub mod store;
