//! Authoritative session registry.
//!
//! The registry owns the in-memory map of session records and is the only
//! writer of both the map and the store. All mutations are serialized under
//! one coarse lock; each mutation clones the current record, applies the
//! change, persists it, and only then commits it back to the map, so the map
//! and the store never diverge on a failed write.
//!
//! Reads hand out deep copies. Callers never see live references into the
//! map.
//!
//! ## Liveness
//!
//! The heartbeat sweeper stamps `suspended`/`hung` flags from heartbeat age;
//! any accepted mutation or heartbeat clears them again and appends a single
//! `application_recovered` event per silence episode. When a new session
//! arrives from a machine that still has silent sessions, those sessions are
//! closed as crashed (see [`SessionRegistry::create_session`]): a reawakened
//! application would have resumed its session rather than started a new one.

pub mod sweep;

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use session_pulse_core::config::ServerConfig;
use session_pulse_core::schema::event::{EVENT_APPEARS_HUNG, EVENT_CRASH_DETECTED, EVENT_RECOVERED};
use session_pulse_core::wire::{CreateSessionRequest, EventBody, MetricBody};
use session_pulse_core::{ApiError, EventRecord, SessionRecord};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::store::SessionStore;

/// Reason recorded when crash inference closes a silent session.
const INFERRED_CRASH_REASON: &str = "parent_process_terminated_or_lost";

/// Registry over the session map and its backing store.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionRecord>>,
    store: SessionStore,
    suspend_threshold: chrono::Duration,
    hung_threshold: chrono::Duration,
    retention_horizon: chrono::Duration,
}

impl SessionRegistry {
    /// Rebuild the registry from the store. Undecodable records were already
    /// skipped by the store layer.
    pub fn open(store: SessionStore, config: &ServerConfig) -> Result<Self, ApiError> {
        let records = store.load_all()?;
        let mut sessions = HashMap::with_capacity(records.len());
        for record in records {
            sessions.insert(record.id.clone(), record);
        }
        info!("Recovered {} session(s) from store", sessions.len());
        Ok(Self {
            sessions: Mutex::new(sessions),
            store,
            suspend_threshold: config.suspend_threshold(),
            hung_threshold: config.hung_threshold(),
            retention_horizon: config.retention_horizon(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionRecord>> {
        // A poisoning panic can only have happened outside a committed write;
        // the map is still consistent with the store, so keep serving.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sessions currently tracked.
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    /// Create a new active session and run crash inference against prior
    /// silent sessions from the same machine.
    pub fn create_session(
        &self,
        req: CreateSessionRequest,
        now: DateTime<Utc>,
    ) -> Result<SessionRecord, ApiError> {
        if req.product.trim().is_empty() {
            return Err(ApiError::InvalidInput("product must not be empty".into()));
        }
        if req.version.trim().is_empty() {
            return Err(ApiError::InvalidInput("version must not be empty".into()));
        }

        let mut sessions = self.lock();

        if let Some(fingerprint) = req.host_fingerprint.as_deref() {
            let candidates: Vec<String> = sessions
                .values()
                .filter(|other| Self::matches_crash_key(other, fingerprint))
                .map(|other| other.id.clone())
                .collect();

            for id in candidates {
                let Some(current) = sessions.get(&id) else {
                    continue;
                };
                let mut crashed = current.clone();
                crashed.mark_crashed(now);
                let mut data = Map::new();
                data.insert(
                    "reason".to_string(),
                    Value::String(INFERRED_CRASH_REASON.to_string()),
                );
                crashed.push_event(EventRecord::synthetic(EVENT_CRASH_DETECTED, Some(data), now), now);
                match self.store.put(&crashed) {
                    Ok(()) => {
                        info!("Closed silent session {id} as crashed (new session from same host)");
                        sessions.insert(id, crashed);
                    }
                    Err(e) => {
                        warn!("Failed to persist inferred crash for {id}: {e}");
                    }
                }
            }
        }

        let record = SessionRecord::new(
            Uuid::new_v4().to_string(),
            req.product,
            req.version,
            req.host_name,
            req.host_fingerprint,
            now,
        );
        self.store.put(&record)?;
        sessions.insert(record.id.clone(), record.clone());
        debug!("Created session {} ({} {})", record.id, record.product, record.version);
        Ok(record)
    }

    /// Snapshot read. The returned record is an independent deep copy.
    pub fn get_session(&self, id: &str) -> Result<SessionRecord, ApiError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    /// Enumerate all sessions, newest first, id as tiebreak — deterministic
    /// for a given set.
    pub fn list_sessions(&self) -> Vec<SessionRecord> {
        let mut out: Vec<SessionRecord> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Deep-merge a state update; appends a history snapshot on success.
    pub fn update_state(
        &self,
        id: &str,
        update: Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        self.mutate_live(id, now, |record| {
            record.apply_state_update(update, now);
            Ok(())
        })
    }

    /// Append an event.
    pub fn log_event(&self, id: &str, body: EventBody, now: DateTime<Utc>) -> Result<(), ApiError> {
        if body.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("event name must not be empty".into()));
        }
        self.mutate_live(id, now, |record| {
            record.push_event(body.into_record(now), now);
            Ok(())
        })
    }

    /// Append a metric sample.
    pub fn log_metric(&self, id: &str, body: MetricBody, now: DateTime<Utc>) -> Result<(), ApiError> {
        if body.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("metric name must not be empty".into()));
        }
        if let Some(bounds) = &body.bucket_boundaries {
            let sorted_finite = bounds.iter().all(|b| b.is_finite())
                && bounds.windows(2).all(|w| w[0] <= w[1]);
            if !sorted_finite {
                return Err(ApiError::InvalidInput(
                    "bucket_boundaries must be a sorted sequence of finite numbers".into(),
                ));
            }
        }
        self.mutate_live(id, now, |record| {
            record.push_metric(body.into_sample(now), now);
            Ok(())
        })
    }

    /// Record a liveness proof.
    pub fn heartbeat(&self, id: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        self.mutate_live(id, now, |record| {
            record.record_heartbeat(now);
            Ok(())
        })
    }

    /// Transition to Ended. A second call on an ended session is a no-op; a
    /// crashed session rejects it.
    pub fn end(&self, id: &str, now: DateTime<Utc>) -> Result<(), ApiError> {
        let mut sessions = self.lock();
        let current = sessions
            .get(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        if current.flags.crashed {
            return Err(ApiError::Terminal(id.to_string()));
        }
        if current.flags.ended {
            return Ok(());
        }
        let mut record = current.clone();
        record.mark_ended(now);
        self.store.put(&record)?;
        sessions.insert(id.to_string(), record);
        Ok(())
    }

    /// Transition to Crashed (agent-reported). A second call on a crashed
    /// session is a no-op; an ended session rejects it.
    pub fn mark_crashed(
        &self,
        id: &str,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        let mut sessions = self.lock();
        let current = sessions
            .get(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        if current.flags.crashed {
            return Ok(());
        }
        if current.flags.ended {
            return Err(ApiError::Terminal(id.to_string()));
        }
        let mut record = current.clone();
        record.mark_crashed(now);
        let mut data = Map::new();
        data.insert(
            "reason".to_string(),
            Value::String(reason.unwrap_or_else(|| "agent_reported".to_string())),
        );
        record.push_event(EventRecord::synthetic(EVENT_CRASH_DETECTED, Some(data), now), now);
        self.store.put(&record)?;
        sessions.insert(id.to_string(), record);
        Ok(())
    }

    /// One pass of the heartbeat sweeper. Returns how many sessions had a
    /// flag newly stamped.
    pub fn heartbeat_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let ids: Vec<String> = sessions.keys().cloned().collect();
        let mut stamped = 0;

        for id in ids {
            let Some(current) = sessions.get(&id) else {
                continue;
            };
            if current.is_terminal() {
                continue;
            }
            let age = current.heartbeat_age(now);
            let newly_suspended = age >= self.suspend_threshold && !current.flags.suspended;
            let newly_hung = age >= self.hung_threshold && !current.flags.hung;
            if !newly_suspended && !newly_hung {
                continue;
            }

            let mut record = current.clone();
            if newly_suspended {
                record.flags.suspended = true;
            }
            if newly_hung {
                record.flags.hung = true;
                let mut data = Map::new();
                data.insert(
                    "last_heartbeat".to_string(),
                    record
                        .last_heartbeat
                        .map(|t| Value::String(t.to_rfc3339()))
                        .unwrap_or(Value::Null),
                );
                data.insert(
                    "age_seconds".to_string(),
                    Value::from(age.num_seconds()),
                );
                record.push_event(EventRecord::synthetic(EVENT_APPEARS_HUNG, Some(data), now), now);
            }
            match self.store.put(&record) {
                Ok(()) => {
                    debug!("Session {id} flagged silent (age {}s)", age.num_seconds());
                    sessions.insert(id, record);
                    stamped += 1;
                }
                Err(e) => {
                    warn!("Failed to persist liveness flags for {id}: {e}");
                }
            }
        }
        stamped
    }

    /// One pass of the retention sweeper. Deletes terminal sessions whose
    /// `ended_at` is past the horizon; never touches live sessions. Returns
    /// the number deleted.
    pub fn retention_sweep(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let expired: Vec<String> = sessions
            .values()
            .filter(|record| record.is_terminal())
            .filter(|record| {
                record
                    .ended_at
                    .is_some_and(|ended| now - ended >= self.retention_horizon)
            })
            .map(|record| record.id.clone())
            .collect();

        let mut deleted = 0;
        for id in expired {
            match self.store.delete(&id) {
                Ok(()) => {
                    sessions.remove(&id);
                    deleted += 1;
                }
                Err(e) => {
                    warn!("Retention failed to delete session {id}: {e}");
                }
            }
        }
        if deleted > 0 {
            info!("Retention removed {deleted} expired session(s)");
        }
        deleted
    }

    /// The crash-inference match key. Kept in one place so a future
    /// `(fingerprint, product)` refinement does not touch call sites.
    fn matches_crash_key(other: &SessionRecord, fingerprint: &str) -> bool {
        other.host_fingerprint.as_deref() == Some(fingerprint)
            && !other.is_terminal()
            && (other.flags.suspended || other.flags.hung)
    }

    /// Shared mutation path: resolve, reject terminal, clear silence flags
    /// (appending one recovery event), apply, persist, commit.
    fn mutate_live<F>(&self, id: &str, now: DateTime<Utc>, op: F) -> Result<(), ApiError>
    where
        F: FnOnce(&mut SessionRecord) -> Result<(), ApiError>,
    {
        let mut sessions = self.lock();
        let current = sessions
            .get(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        if current.is_terminal() {
            return Err(ApiError::Terminal(id.to_string()));
        }
        let mut record = current.clone();
        if record.clear_silence(now) {
            record.push_event(EventRecord::synthetic(EVENT_RECOVERED, None, now), now);
        }
        op(&mut record)?;
        self.store.put(&record)?;
        sessions.insert(id.to_string(), record);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;
    use session_pulse_core::LivenessState;
    use session_pulse_core::schema::MetricKind;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> SessionRegistry {
        let store = SessionStore::open(dir.path()).unwrap();
        SessionRegistry::open(store, &ServerConfig::default()).unwrap()
    }

    fn create_req(fingerprint: Option<&str>) -> CreateSessionRequest {
        CreateSessionRequest {
            product: "editor".to_string(),
            version: "1.0".to_string(),
            host_name: Some("workstation-7".to_string()),
            host_fingerprint: fingerprint.map(str::to_string),
        }
    }

    fn obj(value: serde_json::Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    /// Backdate a session so the sweeper sees it as silent.
    fn backdate(reg: &SessionRegistry, id: &str, by: Duration) {
        let mut sessions = reg.lock();
        let record = sessions.get_mut(id).unwrap();
        record.created_at -= by;
        record.updated_at -= by;
        if let Some(hb) = record.last_heartbeat.as_mut() {
            *hb -= by;
        }
    }

    #[test]
    fn test_create_rejects_empty_product_and_version() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let mut req = create_req(None);
        req.product = "".to_string();
        assert!(matches!(
            reg.create_session(req, now),
            Err(ApiError::InvalidInput(_))
        ));

        let mut req = create_req(None);
        req.version = "  ".to_string();
        assert!(matches!(
            reg.create_session(req, now),
            Err(ApiError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_create_assigns_unique_active_sessions() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let a = reg.create_session(create_req(None), now).unwrap();
        let b = reg.create_session(create_req(None), now).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.liveness(), LivenessState::Active);
        assert_eq!(reg.session_count(), 2);
    }

    #[test]
    fn test_get_returns_independent_snapshot() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let created = reg.create_session(create_req(None), now).unwrap();

        let mut snapshot = reg.get_session(&created.id).unwrap();
        snapshot
            .state
            .insert("local".to_string(), Value::Bool(true));
        let fresh = reg.get_session(&created.id).unwrap();
        assert!(fresh.state.is_empty());
    }

    #[test]
    fn test_update_state_merges_and_preserves_siblings() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();

        reg.update_state(
            &session.id,
            obj(json!({"window_state": {"open": ["w1", "w2"], "active": "w1"}})),
            now,
        )
        .unwrap();
        reg.update_state(
            &session.id,
            obj(json!({"window_state": {"open": ["w1", "w2", "w3"]}})),
            now,
        )
        .unwrap();

        let record = reg.get_session(&session.id).unwrap();
        assert_eq!(record.state["window_state"]["active"], json!("w1"));
        assert_eq!(record.state["window_state"]["open"], json!(["w1", "w2", "w3"]));
    }

    #[test]
    fn test_update_state_null_deletes_key() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();

        reg.update_state(
            &session.id,
            obj(json!({"window_state": {"open": ["w1"], "active": "w1"}})),
            now,
        )
        .unwrap();
        reg.update_state(
            &session.id,
            obj(json!({"window_state": {"active": null}})),
            now,
        )
        .unwrap();

        let record = reg.get_session(&session.id).unwrap();
        let window = record.state["window_state"].as_object().unwrap();
        assert!(!window.contains_key("active"));
        assert_eq!(window["open"], json!(["w1"]));
    }

    #[test]
    fn test_history_grows_per_accepted_update() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();
        assert!(reg.get_session(&session.id).unwrap().state_history.is_empty());

        for i in 0..3 {
            reg.update_state(&session.id, obj(json!({ "step": i })), Utc::now())
                .unwrap();
        }
        let record = reg.get_session(&session.id).unwrap();
        assert_eq!(record.state_history.len(), 3);
        let stamps: Vec<_> = record.state_history.iter().map(|s| s.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_unknown_session_is_not_found() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        assert!(matches!(
            reg.get_session("ghost"),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            reg.heartbeat("ghost", Utc::now()),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_terminal_sessions_reject_mutations() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();
        reg.update_state(&session.id, obj(json!({"a": 1})), now)
            .unwrap();
        reg.end(&session.id, now).unwrap();

        let before = reg.get_session(&session.id).unwrap();
        assert!(matches!(
            reg.update_state(&session.id, obj(json!({"a": 2})), now),
            Err(ApiError::Terminal(_))
        ));
        assert!(matches!(
            reg.log_event(&session.id, EventBody::named("late"), now),
            Err(ApiError::Terminal(_))
        ));
        assert!(matches!(
            reg.heartbeat(&session.id, now),
            Err(ApiError::Terminal(_))
        ));
        let after = reg.get_session(&session.id).unwrap();
        assert_eq!(after.state, before.state);
        assert_eq!(after.events.len(), before.events.len());
        assert_eq!(after.metrics.len(), before.metrics.len());
    }

    #[test]
    fn test_end_is_idempotent_but_crash_wins() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let ended = reg.create_session(create_req(None), now).unwrap();
        reg.end(&ended.id, now).unwrap();
        reg.end(&ended.id, now).unwrap(); // no-op
        assert!(matches!(
            reg.mark_crashed(&ended.id, None, now),
            Err(ApiError::Terminal(_))
        ));

        let crashed = reg.create_session(create_req(None), now).unwrap();
        reg.mark_crashed(&crashed.id, Some("parent_process_terminated".into()), now)
            .unwrap();
        reg.mark_crashed(&crashed.id, None, now).unwrap(); // no-op
        assert!(matches!(
            reg.end(&crashed.id, now),
            Err(ApiError::Terminal(_))
        ));

        let record = reg.get_session(&crashed.id).unwrap();
        assert_eq!(record.liveness(), LivenessState::Crashed);
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].name, EVENT_CRASH_DETECTED);
        let data = record.events[0].data.as_ref().unwrap();
        assert_eq!(data["reason"], json!("parent_process_terminated"));
    }

    #[test]
    fn test_sweeper_stamps_silent_sessions_once() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();
        backdate(&reg, &session.id, Duration::seconds(120));

        assert_eq!(reg.heartbeat_sweep(now), 1);
        let record = reg.get_session(&session.id).unwrap();
        assert!(record.flags.suspended);
        assert!(record.flags.hung);
        assert_eq!(record.liveness(), LivenessState::Hung);
        assert_eq!(record.events.len(), 1);
        assert_eq!(record.events[0].name, EVENT_APPEARS_HUNG);
        let data = record.events[0].data.as_ref().unwrap();
        assert!(data["age_seconds"].as_i64().unwrap() >= 120);

        // A second sweep must not re-stamp or duplicate the event.
        assert_eq!(reg.heartbeat_sweep(now), 0);
        let record = reg.get_session(&session.id).unwrap();
        assert_eq!(record.events.len(), 1);
    }

    #[test]
    fn test_sweeper_leaves_fresh_sessions_alone() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();

        assert_eq!(reg.heartbeat_sweep(now), 0);
        let record = reg.get_session(&session.id).unwrap();
        assert!(!record.flags.suspended);
        assert!(!record.flags.hung);
    }

    #[test]
    fn test_heartbeat_recovers_hung_session_exactly_once() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();
        backdate(&reg, &session.id, Duration::seconds(120));
        reg.heartbeat_sweep(now);

        reg.heartbeat(&session.id, now).unwrap();
        let record = reg.get_session(&session.id).unwrap();
        assert!(!record.flags.hung);
        assert!(!record.flags.suspended);
        assert_eq!(record.liveness(), LivenessState::Active);
        assert_eq!(record.last_heartbeat, Some(now));
        let recovered: Vec<_> = record
            .events
            .iter()
            .filter(|e| e.name == EVENT_RECOVERED)
            .collect();
        assert_eq!(recovered.len(), 1);

        // Another heartbeat on the now-healthy session adds nothing.
        reg.heartbeat(&session.id, now).unwrap();
        let record = reg.get_session(&session.id).unwrap();
        let recovered = record
            .events
            .iter()
            .filter(|e| e.name == EVENT_RECOVERED)
            .count();
        assert_eq!(recovered, 1);
    }

    #[test]
    fn test_mutation_recovers_silent_session() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();
        backdate(&reg, &session.id, Duration::seconds(120));
        reg.heartbeat_sweep(now);

        reg.update_state(&session.id, obj(json!({"alive": true})), now)
            .unwrap();
        let record = reg.get_session(&session.id).unwrap();
        assert_eq!(record.liveness(), LivenessState::Active);
        assert_eq!(
            record
                .events
                .iter()
                .filter(|e| e.name == EVENT_RECOVERED)
                .count(),
            1
        );
    }

    #[test]
    fn test_crash_inference_closes_silent_sessions_from_same_host() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let silent = reg.create_session(create_req(Some("fp-h")), now).unwrap();
        backdate(&reg, &silent.id, Duration::seconds(120));
        reg.heartbeat_sweep(now);
        assert!(reg.get_session(&silent.id).unwrap().flags.suspended);

        let fresh = reg.create_session(create_req(Some("fp-h")), now).unwrap();

        let closed = reg.get_session(&silent.id).unwrap();
        assert_eq!(closed.liveness(), LivenessState::Crashed);
        assert!(!closed.flags.active);
        assert_eq!(closed.ended_at, Some(now));
        let crash_events: Vec<_> = closed
            .events
            .iter()
            .filter(|e| e.name == EVENT_CRASH_DETECTED)
            .collect();
        assert_eq!(crash_events.len(), 1);
        assert_eq!(
            crash_events[0].data.as_ref().unwrap()["reason"],
            json!("parent_process_terminated_or_lost")
        );

        let fresh = reg.get_session(&fresh.id).unwrap();
        assert_eq!(fresh.liveness(), LivenessState::Active);
    }

    #[test]
    fn test_crash_inference_spares_healthy_and_foreign_sessions() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let healthy_same_host = reg.create_session(create_req(Some("fp-h")), now).unwrap();
        let silent_other_host = reg.create_session(create_req(Some("fp-x")), now).unwrap();
        backdate(&reg, &silent_other_host.id, Duration::seconds(120));
        reg.heartbeat_sweep(now);

        reg.create_session(create_req(Some("fp-h")), now).unwrap();

        assert_eq!(
            reg.get_session(&healthy_same_host.id).unwrap().liveness(),
            LivenessState::Active
        );
        assert_eq!(
            reg.get_session(&silent_other_host.id).unwrap().liveness(),
            LivenessState::Hung
        );
    }

    #[test]
    fn test_missing_fingerprint_disables_inference() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let silent = reg.create_session(create_req(Some("fp-h")), now).unwrap();
        backdate(&reg, &silent.id, Duration::seconds(120));
        reg.heartbeat_sweep(now);

        reg.create_session(create_req(None), now).unwrap();
        assert_eq!(
            reg.get_session(&silent.id).unwrap().liveness(),
            LivenessState::Hung
        );
    }

    #[test]
    fn test_retention_deletes_only_expired_terminal_sessions() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();

        let expired = reg.create_session(create_req(None), now).unwrap();
        reg.end(&expired.id, now).unwrap();
        {
            let mut sessions = reg.lock();
            sessions.get_mut(&expired.id).unwrap().ended_at =
                Some(now - Duration::days(400));
        }

        let recent = reg.create_session(create_req(None), now).unwrap();
        reg.end(&recent.id, now).unwrap();

        let live = reg.create_session(create_req(None), now).unwrap();
        backdate(&reg, &live.id, Duration::days(400));

        assert_eq!(reg.retention_sweep(now), 1);
        assert!(matches!(
            reg.get_session(&expired.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(reg.get_session(&recent.id).is_ok());
        assert!(reg.get_session(&live.id).is_ok());
    }

    #[test]
    fn test_list_sessions_order_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);

        let t0 = Utc::now();
        let older = reg.create_session(create_req(None), t0).unwrap();
        let newer = reg
            .create_session(create_req(None), t0 + Duration::seconds(5))
            .unwrap();

        let listed = reg.list_sessions();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);

        let again = reg.list_sessions();
        let ids: Vec<_> = listed.iter().map(|r| r.id.clone()).collect();
        let ids_again: Vec<_> = again.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, ids_again);
    }

    #[test]
    fn test_counter_samples_append_without_collapsing() {
        // Aggregation is the agent's job; the registry appends verbatim.
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();

        for _ in 0..3 {
            reg.log_metric(
                &session.id,
                MetricBody {
                    name: "requests".to_string(),
                    value: 1.0,
                    kind: MetricKind::Counter,
                    unit: None,
                    tags: Vec::new(),
                    bucket_boundaries: None,
                    count: None,
                    timestamp: None,
                },
                now,
            )
            .unwrap();
        }
        let record = reg.get_session(&session.id).unwrap();
        assert_eq!(record.metrics.len(), 3);
    }

    #[test]
    fn test_metric_rejects_unsorted_bucket_boundaries() {
        let dir = TempDir::new().unwrap();
        let reg = registry(&dir);
        let now = Utc::now();
        let session = reg.create_session(create_req(None), now).unwrap();

        let result = reg.log_metric(
            &session.id,
            MetricBody {
                name: "latency".to_string(),
                value: 0.2,
                kind: MetricKind::Histogram,
                unit: Some("s".to_string()),
                tags: Vec::new(),
                bucket_boundaries: Some(vec![0.5, 0.1]),
                count: None,
                timestamp: None,
            },
            now,
        );
        assert!(matches!(result, Err(ApiError::InvalidInput(_))));
    }
}
