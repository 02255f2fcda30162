//! Fire-and-forget persistence of rejected attendance attempts.
//!
//! The log write rides a detached task so a storage hiccup can never turn a
//! clean rejection into a server error. Failures are traced and dropped.

use db::models::proxy_attempt::{Model as ProxyAttempt, NewProxyAttempt};
use sea_orm::DatabaseConnection;

/// Appends `entry` to the proxy attempt log on a detached task. Returns
/// immediately; the caller's response never waits on (or learns about) the
/// write.
pub fn record_rejection(db: DatabaseConnection, entry: NewProxyAttempt) {
    tokio::spawn(async move {
        let attempt_type = entry.attempt_type;
        if let Err(err) = ProxyAttempt::log(&db, entry).await {
            tracing::warn!(%attempt_type, "failed to persist proxy attempt: {err}");
        }
    });
}
