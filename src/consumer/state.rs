use crate::event::Position;
use crate::ChainedError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsumerStatus {
    /// Not processing; either never started or explicitly stopped
    Stopped,
    /// Actively processing batches
    Started,
    /// Halted by a fault; requires explicit reactivation
    Failed,
}

/// Fault recorded when a consumer enters [`ConsumerStatus::Failed`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerFault {
    /// Flattened cause chain of the fault
    pub cause: ChainedError,
    /// When the fault was observed
    pub occurred_at: DateTime<Utc>,
}

/// Immutable snapshot of a consumer's progress and status
///
/// States are replaced wholesale on every transition and compared by value to
/// decide whether a checkpoint write is due. The position only advances
/// through [`handled`](EventConsumerState::handled) and a `Failed` state
/// always carries a [`ConsumerFault`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConsumerState {
    position: Option<Position>,
    status: ConsumerStatus,
    error: Option<ConsumerFault>,
    events_handled: u64,
}

impl Default for EventConsumerState {
    /// The initial state: stopped, at the start of the log, nothing handled
    fn default() -> Self {
        Self {
            position: None,
            status: ConsumerStatus::Stopped,
            error: None,
            events_handled: 0,
        }
    }
}

impl EventConsumerState {
    /// Cursor after the last successfully handled batch, `None` at the log start
    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Current lifecycle status
    pub fn status(&self) -> ConsumerStatus {
        self.status
    }

    /// Recorded fault, present exactly when the status is `Failed`
    pub fn error(&self) -> Option<&ConsumerFault> {
        self.error.as_ref()
    }

    /// Total number of events handled since the last reset
    pub fn events_handled(&self) -> u64 {
        self.events_handled
    }

    /// Whether the status is [`ConsumerStatus::Stopped`]
    pub fn is_stopped(&self) -> bool {
        self.status == ConsumerStatus::Stopped
    }

    /// Whether the status is [`ConsumerStatus::Started`]
    pub fn is_started(&self) -> bool {
        self.status == ConsumerStatus::Started
    }

    /// Whether the status is [`ConsumerStatus::Failed`]
    pub fn is_failed(&self) -> bool {
        self.status == ConsumerStatus::Failed
    }

    /// Transition to `Started`, clearing any recorded fault
    pub fn started(self) -> Self {
        Self {
            status: ConsumerStatus::Started,
            error: None,
            ..self
        }
    }

    /// Transition to `Stopped`, clearing any recorded fault
    pub fn stopped(self) -> Self {
        Self {
            status: ConsumerStatus::Stopped,
            error: None,
            ..self
        }
    }

    /// Transition to `Failed`, recording the cause with a timestamp
    pub fn failed(self, cause: ChainedError) -> Self {
        Self {
            status: ConsumerStatus::Failed,
            error: Some(ConsumerFault {
                cause,
                occurred_at: Utc::now(),
            }),
            ..self
        }
    }

    /// Advances the cursor past a successfully handled batch of `count` events
    pub fn handled(self, position: Position, count: u64) -> Self {
        Self {
            position: Some(position),
            events_handled: self.events_handled + count,
            ..self
        }
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_at_the_log_start() {
        let state = EventConsumerState::default();

        assert_eq!(state.position(), None);
        assert_eq!(state.status(), ConsumerStatus::Stopped);
        assert_eq!(state.error(), None);
        assert_eq!(state.events_handled(), 0);
    }

    #[test]
    fn advance_only_through_handling() {
        let state = EventConsumerState::default()
            .started()
            .handled(Position::new("3"), 3)
            .handled(Position::new("5"), 2);

        assert_eq!(state.position(), Some(&Position::new("5")));
        assert_eq!(state.events_handled(), 5);
        assert!(state.is_started());
    }

    #[test]
    fn carry_a_fault_exactly_when_failed() {
        let failed = EventConsumerState::default()
            .started()
            .failed(ChainedError::message("disk full"));

        assert!(failed.is_failed());
        assert_eq!(failed.error().unwrap().cause.head(), Some("disk full"));

        let restarted = failed.started();
        assert!(restarted.is_started());
        assert_eq!(restarted.error(), None);

        let stopped = EventConsumerState::default()
            .failed(ChainedError::message("x"))
            .stopped();
        assert_eq!(stopped.error(), None);
    }

    #[test]
    fn keep_progress_across_status_changes() {
        let state = EventConsumerState::default()
            .started()
            .handled(Position::new("7"), 7)
            .stopped()
            .started();

        assert_eq!(state.position(), Some(&Position::new("7")));
        assert_eq!(state.events_handled(), 7);
    }

    #[test]
    fn compare_by_value() {
        let a = EventConsumerState::default().started();
        let b = EventConsumerState::default().started();

        assert_eq!(a, b);
        assert_ne!(a, b.clone().handled(Position::new("1"), 1));
    }
}
