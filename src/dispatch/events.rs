//! Booking lifecycle events
//!
//! Every state change made by the engine, the escalation chain or the
//! lifecycle manager is published on a broadcast channel. Publishing never
//! blocks and never fails; with no subscribers the event is dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Something that happened to a booking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingEvent {
    /// Initial assignment by the engine
    Assigned {
        booking_id: String,
        helper_id: String,
        distance_km: f64,
        eta_minutes: u32,
    },
    /// Escalation moved the booking to another helper
    Reassigned {
        booking_id: String,
        from_helper_id: String,
        to_helper_id: String,
        reassignment_count: u32,
    },
    /// Escalation passed over a candidate that was no longer available
    CandidateSkipped {
        booking_id: String,
        helper_id: String,
        index: usize,
    },
    /// Escalation ran out of candidates
    Exhausted { booking_id: String },
    /// Requester completed the booking
    Completed {
        booking_id: String,
        helper_id: String,
        rating: f64,
    },
}

impl BookingEvent {
    pub fn booking_id(&self) -> &str {
        match self {
            Self::Assigned { booking_id, .. }
            | Self::Reassigned { booking_id, .. }
            | Self::CandidateSkipped { booking_id, .. }
            | Self::Exhausted { booking_id }
            | Self::Completed { booking_id, .. } => booking_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assigned { .. } => "assigned",
            Self::Reassigned { .. } => "reassigned",
            Self::CandidateSkipped { .. } => "candidate_skipped",
            Self::Exhausted { .. } => "exhausted",
            Self::Completed { .. } => "completed",
        }
    }
}

/// Event with its publication time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: BookingEvent,
}

/// Fan-out channel for booking events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus; slow subscribers lag after `capacity` buffered events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: BookingEvent) {
        tracing::debug!(booking_id = %event.booking_id(), kind = event.kind(), "Booking event");
        let _ = self.sender.send(EventEnvelope {
            at: Utc::now(),
            event,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
