//! Booking and cancellation outcomes as audit records.
//!
//! Every book or cancel attempt through [`crate::Allocator`] leaves exactly one
//! [`AuditEvent`], successful or not. Rejections carry the stable error code from
//! [`AllocationError::code`], so the trail can be grepped the same way API clients branch.

use std::sync::{Arc, Mutex};

use log::info;
use serde::Serialize;

use crate::error::AllocationError;
use crate::types::{now_secs, BookingResult, CabId, CancelResult, RequestId, TripId};

/// Outcome recorded for accepted operations.
pub const OUTCOME_SUCCESS: &str = "success";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    RideBook,
    RideCancel,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::RideBook => "ride_book",
            AuditAction::RideCancel => "ride_cancel",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuditEvent {
    pub at_secs: u64,
    pub actor: &'static str,
    pub action: AuditAction,
    pub request_id: RequestId,
    /// Trip the seat was booked on, or released from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<TripId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cab_id: Option<CabId>,
    /// [`OUTCOME_SUCCESS`] or the rejection's error code.
    pub outcome: &'static str,
}

impl AuditEvent {
    pub fn booking(
        actor: &'static str,
        request_id: RequestId,
        outcome: &Result<BookingResult, AllocationError>,
    ) -> Self {
        let (trip_id, cab_id) = match outcome {
            Ok(b) => (Some(b.trip_id), Some(b.cab_id)),
            Err(_) => (None, None),
        };
        Self::new(actor, AuditAction::RideBook, request_id, trip_id, cab_id, outcome)
    }

    pub fn cancellation(
        actor: &'static str,
        request_id: RequestId,
        outcome: &Result<CancelResult, AllocationError>,
    ) -> Self {
        let trip_id = outcome.as_ref().ok().and_then(|c| c.previous_trip_id);
        Self::new(actor, AuditAction::RideCancel, request_id, trip_id, None, outcome)
    }

    fn new<T>(
        actor: &'static str,
        action: AuditAction,
        request_id: RequestId,
        trip_id: Option<TripId>,
        cab_id: Option<CabId>,
        outcome: &Result<T, AllocationError>,
    ) -> Self {
        Self {
            at_secs: now_secs(),
            actor,
            action,
            request_id,
            trip_id,
            cab_id,
            outcome: match outcome {
                Ok(_) => OUTCOME_SUCCESS,
                Err(e) => e.code(),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == OUTCOME_SUCCESS
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Logs each event under the `audit` target.
pub struct LogAuditSink;

impl AuditSink for LogAuditSink {
    fn emit(&self, event: &AuditEvent) {
        info!(
            target: "audit",
            "action={} request_id={} trip_id={} cab_id={} actor={} outcome={}",
            event.action.as_str(),
            event.request_id,
            event.trip_id.map_or_else(|| "-".to_string(), |t| t.to_string()),
            event.cab_id.map_or_else(|| "-".to_string(), |c| c.to_string()),
            event.actor,
            event.outcome
        );
    }
}

/// Keeps events in memory; clones share the buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns and forgets everything recorded so far.
    pub fn drain(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
