//! Contains processing status report metrics.

use lazy_static::lazy_static;
use prometheus_client::encoding::LabelValueEncoder;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::fmt::{Display, Formatter, Write};

lazy_static! {
    static ref REPORTS: Family<Labels, Counter> = Family::default();
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    outcome: ReportOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum ReportOutcome {
    Published,
    Failed,
}

impl EncodeLabelValue for ReportOutcome {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.to_string().as_str())
    }
}

impl Display for ReportOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportOutcome::Published => write!(f, "published"),
            ReportOutcome::Failed => write!(f, "failed"),
        }
    }
}

pub(crate) fn register_report_metrics(registry: &mut Registry) {
    registry.register(
        "reports",
        "Number of processing status reports",
        REPORTS.clone(),
    );
}

#[derive(Default)]
pub struct ReportMetrics;

impl ReportMetrics {
    pub fn track(outcome: ReportOutcome) {
        REPORTS.get_or_create(&Labels { outcome }).inc();
    }
}
