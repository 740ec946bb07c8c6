//! Leased, stateful entities.
//!
//! Every record driven by the state machine embeds an [`EntityCore`] holding
//! the protocol state, retry accounting, the pending flag and the current
//! lease. Concrete entities expose it through [`StatefulEntity`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Time-bounded exclusive claim on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Identity of the worker holding the lease.
    pub leased_by: String,
    /// When the lease was acquired.
    pub leased_at: DateTime<Utc>,
    /// Lease duration in milliseconds.
    pub lease_duration_ms: i64,
}

impl Lease {
    pub fn new(leased_by: impl Into<String>, leased_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            leased_by: leased_by.into(),
            leased_at,
            lease_duration_ms: duration.num_milliseconds(),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.leased_at + Duration::milliseconds(self.lease_duration_ms)
    }

    /// An expired lease no longer protects the entity.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.leased_by == holder
    }
}

/// State shared by all stateful entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCore {
    pub id: String,
    pub state: i32,
    /// Times the current state has been re-entered. Zero on first entry.
    pub state_count: u32,
    pub state_timestamp: DateTime<Utc>,
    pub pending: bool,
    pub error_detail: Option<String>,
    pub lease: Option<Lease>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trace_context: HashMap<String, String>,
}

impl EntityCore {
    pub fn new(id: impl Into<String>, state: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            state,
            state_count: 0,
            state_timestamp: now,
            pending: false,
            error_detail: None,
            lease: None,
            created_at: now,
            updated_at: now,
            trace_context: HashMap::new(),
        }
    }

    /// Move to `state`, maintaining retry accounting.
    ///
    /// Callers are responsible for checking that the edge is legal.
    pub fn transition(&mut self, state: i32, now: DateTime<Utc>) {
        if self.state == state {
            self.state_count += 1;
        } else {
            self.state_count = 0;
        }
        self.state = state;
        // state_timestamp never goes backwards, even if clocks disagree
        self.state_timestamp = self.state_timestamp.max(now);
        self.updated_at = now;
    }

    /// Queryable view of the shared fields.
    pub fn field(&self, path: &str) -> Option<Value> {
        match path {
            "id" => Some(Value::from(self.id.clone())),
            "state" => Some(Value::from(self.state)),
            "state_count" => Some(Value::from(self.state_count)),
            "state_timestamp" => Some(Value::from(self.state_timestamp.timestamp_millis())),
            "pending" => Some(Value::from(self.pending)),
            "error_detail" => Some(
                self.error_detail
                    .clone()
                    .map(Value::from)
                    .unwrap_or(Value::Null),
            ),
            "created_at" => Some(Value::from(self.created_at.timestamp_millis())),
            "updated_at" => Some(Value::from(self.updated_at.timestamp_millis())),
            _ => None,
        }
    }
}

/// A record processed by the leased state machine.
pub trait StatefulEntity: Clone + Send + Sync + 'static {
    /// Fields resolvable through [`StatefulEntity::field`], used to reject
    /// misconfigured queries up front.
    const FIELDS: &'static [&'static str];

    fn core(&self) -> &EntityCore;
    fn core_mut(&mut self) -> &mut EntityCore;

    /// Look up a field by its query path.
    fn field(&self, path: &str) -> Option<Value> {
        self.core().field(path)
    }

    fn id(&self) -> &str {
        &self.core().id
    }

    fn state(&self) -> i32 {
        self.core().state
    }

    fn state_count(&self) -> u32 {
        self.core().state_count
    }

    fn state_timestamp(&self) -> DateTime<Utc> {
        self.core().state_timestamp
    }

    fn is_pending(&self) -> bool {
        self.core().pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.core_mut().pending = pending;
    }

    fn error_detail(&self) -> Option<&str> {
        self.core().error_detail.as_deref()
    }

    fn set_error_detail(&mut self, detail: impl Into<String>) {
        self.core_mut().error_detail = Some(detail.into());
    }

    fn lease(&self) -> Option<&Lease> {
        self.core().lease.as_ref()
    }

    fn set_lease(&mut self, lease: Option<Lease>) {
        self.core_mut().lease = lease;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_count_resets_on_new_state_and_increments_on_reentry() {
        let now = Utc::now();
        let mut core = EntityCore::new("e-1", 100, now);
        assert_eq!(core.state_count, 0);

        core.transition(100, now);
        core.transition(100, now);
        assert_eq!(core.state_count, 2);

        core.transition(200, now);
        assert_eq!(core.state_count, 0);
        assert_eq!(core.state, 200);
    }

    #[test]
    fn state_timestamp_is_monotonic() {
        let now = Utc::now();
        let mut core = EntityCore::new("e-1", 100, now);
        core.transition(200, now - Duration::seconds(30));
        assert_eq!(core.state_timestamp, now);
    }

    #[test]
    fn lease_expiry() {
        let now = Utc::now();
        let lease = Lease::new("worker-a", now, Duration::seconds(10));
        assert!(!lease.is_expired(now + Duration::seconds(9)));
        assert!(lease.is_expired(now + Duration::seconds(10)));
        assert!(lease.is_held_by("worker-a"));
    }
}
