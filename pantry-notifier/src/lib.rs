pub mod config;
pub mod expiry;
pub mod handlers;
pub mod notifier;
pub mod schedule;
