//! Contains retry and replay metrics, notably [`RecoveryMetrics`].

use lazy_static::lazy_static;
use prometheus_client::encoding::LabelValueEncoder;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::fmt::{Display, Formatter, Write};

lazy_static! {
    static ref RECOVERY_EVENTS: Family<Labels, Counter> = Family::default();
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    stage: String,
    action: RecoveryAction,
}

/// What happened to a retry event.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum RecoveryAction {
    /// A first failure was published to the retry stream.
    Published,
    /// A retry attempt succeeded.
    Recovered,
    /// A retry attempt failed and was published again.
    Requeued,
    /// Retries were exhausted and the event was parked on the replay stream.
    Escalated,
    /// The event cannot succeed on another attempt and was discarded.
    Dropped,
    /// A parked event was moved back to the retry stream.
    Replayed,
}

impl EncodeLabelValue for RecoveryAction {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryAction::Published => write!(f, "published"),
            RecoveryAction::Recovered => write!(f, "recovered"),
            RecoveryAction::Requeued => write!(f, "requeued"),
            RecoveryAction::Escalated => write!(f, "escalated"),
            RecoveryAction::Dropped => write!(f, "dropped"),
            RecoveryAction::Replayed => write!(f, "replayed"),
        }
    }
}

pub(crate) fn register_recovery_metrics(registry: &mut Registry) {
    registry.register(
        "recovery_events",
        "Number of retry and replay transitions, by stage",
        RECOVERY_EVENTS.clone(),
    );
}

#[derive(Default)]
pub struct RecoveryMetrics;

impl RecoveryMetrics {
    pub fn track<S: AsRef<str>>(stage: S, action: RecoveryAction) {
        RECOVERY_EVENTS
            .get_or_create(&Labels {
                stage: stage.as_ref().to_string(),
                action,
            })
            .inc();
    }
}
