//! Engine-facing actions.
//!
//! The reconciler narrates its work to the rest of the application as a
//! stream of actions: object lifecycle, build started, build completed.
//! Consumers drain the channel; the reconciler never blocks on them.

use apis::LiveUpdate;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::debug;

pub const LIVE_UPDATE_SOURCE: &str = "liveupdate";
pub const BUILD_REASON_CHANGED_FILES: &str = "ChangedFiles";

#[derive(Debug, Clone)]
pub enum Action {
    BuildStarted {
        manifest_name: String,
        start_time: DateTime<Utc>,
        files_changed: Vec<String>,
        reason: &'static str,
        span_id: String,
        source: &'static str,
    },
    BuildCompleted {
        manifest_name: String,
        source: &'static str,
        span_id: String,
        /// Per-target build results. Always empty for live updates;
        /// reserved for image builds.
        result_set: BTreeMap<String, String>,
        error: Option<String>,
    },
    LiveUpdateUpsert(Box<LiveUpdate>),
    LiveUpdateDelete {
        name: String,
    },
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Action>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Action>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, action: Action) {
        if self.tx.send(action).is_err() {
            debug!("action dropped: store receiver closed");
        }
    }
}
