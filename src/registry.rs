use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

// ─── Public types ────────────────────────────────────────────────

/// Everything the server knows about one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    /// Session identifier (registry key)
    pub id: String,
    /// Display name, fixed at creation
    pub user: String,
    /// Latest reported mean RTT in ms; `None` until the first report
    pub latency_result: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("latency result must be a finite, non-negative number of ms (got {0})")]
    InvalidResult(f64),
}

/// In-memory map of session id → [`UserRecord`].
///
/// Constructed once at startup and shared through `AppState`. Records are
/// never evicted; the map lives as long as the process.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    users: HashMap<String, UserRecord>,
    /// Insertion order, so listings are stable
    order: Vec<String>,
    /// Next suffix handed out to an anonymous session
    next_anonymous: u64,
}

// ─── SessionRegistry impl ────────────────────────────────────────

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                users: HashMap::new(),
                order: Vec::new(),
                next_anonymous: 1,
            }),
        }
    }

    /// Returns the record for `session_id`, creating it on first contact.
    ///
    /// `requested_name` is only honored when the record is created; later
    /// calls return the stored record untouched.
    pub fn get_or_create(&self, session_id: &str, requested_name: Option<&str>) -> UserRecord {
        self.inner.lock().get_or_create(session_id, requested_name).clone()
    }

    /// Stores `mean_ms` as the session's latest result, creating an
    /// anonymous record first if needed.
    pub fn log_result(&self, session_id: &str, mean_ms: f64) -> Result<UserRecord, RegistryError> {
        if !mean_ms.is_finite() || mean_ms < 0.0 {
            return Err(RegistryError::InvalidResult(mean_ms));
        }

        let mut inner = self.inner.lock();
        let record = inner.get_or_create(session_id, None);
        record.latency_result = Some(mean_ms);
        record.updated_at = Some(Utc::now());

        info!(user = %record.user, avg_ms = mean_ms, "Logged avg of {mean_ms} for {}'s test", record.user);
        Ok(record.clone())
    }

    /// Display name for `session_id`.
    ///
    /// Not a pure query: an unseen id gets an anonymous record.
    pub fn get_display_name(&self, session_id: &str) -> String {
        self.inner.lock().get_or_create(session_id, None).user.clone()
    }

    /// Side-effect-free lookup.
    pub fn get(&self, session_id: &str) -> Option<UserRecord> {
        self.inner.lock().users.get(session_id).cloned()
    }

    /// All records in creation order.
    pub fn list(&self) -> Vec<UserRecord> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.users.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn get_or_create(&mut self, session_id: &str, requested_name: Option<&str>) -> &mut UserRecord {
        let next_anonymous = &mut self.next_anonymous;
        let order = &mut self.order;

        self.users.entry(session_id.to_owned()).or_insert_with(|| {
            // JS-style falsy check: an empty name counts as no name
            let user = match requested_name.filter(|n| !n.is_empty()) {
                Some(name) => name.to_owned(),
                None => {
                    let name = format!("anonymous{next_anonymous}");
                    *next_anonymous += 1;
                    name
                }
            };
            debug!(session_id, user = %user, "registered new session");

            order.push(session_id.to_owned());
            UserRecord {
                id: session_id.to_owned(),
                user,
                latency_result: None,
                created_at: Utc::now(),
                updated_at: None,
            }
        })
    }
}
