pub mod access;
pub mod approval;
pub mod availability;
pub mod bootstrap;
pub mod breaks;
pub mod commands;
pub mod notifications;
pub mod requests;
pub mod slot_resolver;

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type IdProvider = Arc<dyn Fn(&str) -> String + Send + Sync>;

pub(crate) fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

pub(crate) fn default_id_provider() -> IdProvider {
    Arc::new(next_id)
}
