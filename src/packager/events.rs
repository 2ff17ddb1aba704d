//! Progress and lifecycle events emitted while packaging.
//!
//! Events travel over an unbounded channel so a slow observer never stalls a
//! run. A dropped receiver is ignored.

use super::builder::{PackagerState, Step};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Events observable by a UI or logger.
#[derive(Debug, Clone, PartialEq)]
pub enum PackagerEvent {
    /// A declared asset is being fetched (`large-asset-fetch`).
    LargeAssetFetch {
        /// Logical asset name
        asset: String,
        /// Fraction of this asset retrieved, 0..=1
        progress: f64,
    },

    /// The output archive is being written (`archive-progress`).
    ArchiveProgress {
        /// Fraction of entries written, 0..=1
        progress: f64,
    },

    /// Cumulative progress across the whole run.
    Progress {
        /// Step reporting progress
        step: Step,
        /// Progress within the step, 0..=1
        fraction: f64,
        /// Position on the overall 0..=1 scale
        overall: f64,
    },

    /// The orchestrator moved to a new state.
    StateChanged {
        /// New state
        state: PackagerState,
    },

    /// The final artifact is complete.
    ArtifactReady {
        /// Suggested file name of the artifact
        filename: String,
    },
}

impl PackagerEvent {
    /// Wire name of the event, matching the names observers subscribe to.
    pub fn name(&self) -> &'static str {
        match self {
            PackagerEvent::LargeAssetFetch { .. } => "large-asset-fetch",
            PackagerEvent::ArchiveProgress { .. } => "archive-progress",
            PackagerEvent::Progress { .. } => "progress",
            PackagerEvent::StateChanged { .. } => "state",
            PackagerEvent::ArtifactReady { .. } => "artifact",
        }
    }
}

/// Sending half of the event channel
pub type EventSender = UnboundedSender<PackagerEvent>;

/// Receiving half of the event channel
pub type EventReceiver = UnboundedReceiver<PackagerEvent>;

/// Creates a new event channel
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Anything that can emit packager events.
pub trait EventEmitter {
    /// The sender, if an observer is attached.
    fn event_sender(&self) -> Option<&EventSender>;

    /// Emits an event, ignoring a departed observer.
    fn emit(&self, event: PackagerEvent) {
        if let Some(sender) = self.event_sender() {
            let _ = sender.send(event);
        }
    }
}

impl EventEmitter for Option<EventSender> {
    fn event_sender(&self) -> Option<&EventSender> {
        self.as_ref()
    }
}

impl EventEmitter for EventSender {
    fn event_sender(&self) -> Option<&EventSender> {
        Some(self)
    }
}
