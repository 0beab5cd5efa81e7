//! Contains relocation metrics, notably [`CopyMetrics`].

use lazy_static::lazy_static;
use prometheus_client::encoding::LabelValueEncoder;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::{Registry, Unit};
use std::fmt::{Display, Formatter, Write};

lazy_static! {
    static ref COPY_COUNT: Family<Labels, Counter> = Family::default();
    static ref COPY_SIZES: Family<StageLabels, Counter> = Family::default();
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    stage: String,
    outcome: CopyOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct StageLabels {
    stage: String,
}

/// The result of a single copy hop.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum CopyOutcome {
    Success,
    Failure,
    /// The target was disabled by a feature toggle.
    Skipped,
}

impl EncodeLabelValue for CopyOutcome {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for CopyOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyOutcome::Success => write!(f, "success"),
            CopyOutcome::Failure => write!(f, "failure"),
            CopyOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Register the `copies` metric families with the registry.
pub(crate) fn register_copy_metrics(registry: &mut Registry) {
    registry.register(
        "copies",
        "Number of copy hops attempted, by stage and outcome",
        COPY_COUNT.clone(),
    );

    registry.register_with_unit(
        "copy_size",
        "Number of bytes relocated",
        Unit::Bytes,
        COPY_SIZES.clone(),
    );
}

/// Copy metrics.
#[derive(Default)]
pub struct CopyMetrics;

impl CopyMetrics {
    /// Tracks one copy hop of the specified stage.
    pub fn track_copy<S: AsRef<str>>(stage: S, outcome: CopyOutcome) {
        COPY_COUNT
            .get_or_create(&Labels {
                stage: stage.as_ref().to_string(),
                outcome,
            })
            .inc();
    }

    /// Tracks an increase in relocated payload size.
    pub fn track_bytes_copied<S: AsRef<str>>(stage: S, bytes: u64) {
        COPY_SIZES
            .get_or_create(&StageLabels {
                stage: stage.as_ref().to_string(),
            })
            .inc_by(bytes);
    }
}
