//! Publication of copy reports.

use crate::error::Timeouts;
use crate::model::{
    CopyPrerequisites, CopyReport, ReportEnvelope, SpanMark, SpanPhase, Trace, REPORT_SCHEMA_NAME,
};
use app_config::{Feature, FeatureFlags};
use bytes::Bytes;
use chrono::Utc;
use event_stream::DynEventStream;
use metrics::report::{ReportMetrics, ReportOutcome};
use serde::Serialize;
use tracing::{debug, warn};

/// The upload a report is about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSubject {
    pub upload_id: String,
    pub data_stream_id: String,
    pub data_stream_route: String,
    pub trace: Option<Trace>,
}

impl From<&CopyPrerequisites> for ReportSubject {
    fn from(prereqs: &CopyPrerequisites) -> Self {
        Self {
            upload_id: prereqs.upload_id.clone(),
            data_stream_id: prereqs.destination_id.clone(),
            data_stream_route: prereqs.event_type.clone(),
            trace: prereqs.trace.clone(),
        }
    }
}

/// Publishes copy reports to the status service, if enabled.
///
/// Publication failures are logged and otherwise ignored.
#[derive(Clone)]
pub struct ReportEmitter {
    stream: DynEventStream,
    enabled: bool,
    timeouts: Timeouts,
}

impl ReportEmitter {
    pub fn new(stream: DynEventStream, features: &FeatureFlags, timeouts: Timeouts) -> Self {
        Self {
            stream,
            enabled: features.is_enabled(Feature::ProcessingStatusReports),
            timeouts,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn emit(&self, subject: &ReportSubject, report: CopyReport) {
        if !self.enabled {
            debug!(upload_id = %subject.upload_id, "Status reports are disabled");
            return;
        }

        debug!(
            upload_id = %subject.upload_id,
            result = ?report.result,
            destination = %report.destination,
            "Publishing copy report"
        );

        let envelope = ReportEnvelope {
            upload_id: subject.upload_id.clone(),
            data_stream_id: subject.data_stream_id.clone(),
            data_stream_route: subject.data_stream_route.clone(),
            stage_name: REPORT_SCHEMA_NAME.to_string(),
            trace_id: subject.trace.as_ref().map(|t| t.trace_id.clone()),
            span_id: subject.trace.as_ref().and_then(|t| t.span_id.clone()),
            content: report,
        };
        self.publish(&subject.upload_id, &envelope).await;
    }

    /// Opens or closes the copy stage span of an upload that carries a trace.
    pub async fn mark_span(&self, subject: &ReportSubject, phase: SpanPhase) {
        if !self.enabled {
            return;
        }

        let Some(trace) = &subject.trace else {
            debug!(upload_id = %subject.upload_id, "Upload carries no trace, skipping span");
            return;
        };

        let mark = SpanMark {
            upload_id: subject.upload_id.clone(),
            trace_id: trace.trace_id.clone(),
            parent_span_id: trace.span_id.clone(),
            stage_name: REPORT_SCHEMA_NAME.to_string(),
            span: phase,
            emitted_at: Utc::now(),
        };
        self.publish(&subject.upload_id, &mark).await;
    }

    async fn publish<T: Serialize>(&self, upload_id: &str, message: &T) {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => Bytes::from(payload),
            Err(e) => {
                ReportMetrics::track(ReportOutcome::Failed);
                warn!(upload_id, "Unable to serialize status message: {e}");
                return;
            }
        };

        match self
            .timeouts
            .stream("publish", self.stream.name(), self.stream.publish(payload))
            .await
        {
            Ok(_) => ReportMetrics::track(ReportOutcome::Published),
            Err(e) => {
                ReportMetrics::track(ReportOutcome::Failed);
                warn!(upload_id, "Failed to publish status message: {}", e.describe());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CopyResult;
    use event_stream::{EventStream, MemoryEventStream};
    use std::sync::Arc;

    fn subject() -> ReportSubject {
        ReportSubject {
            upload_id: "u1".into(),
            data_stream_id: "dextesting".into(),
            data_stream_route: "testevent1".into(),
            trace: None,
        }
    }

    #[tokio::test]
    async fn publishes_envelope() {
        let stream = Arc::new(MemoryEventStream::new("reports"));
        let emitter = ReportEmitter::new(
            DynEventStream::from(stream.clone() as Arc<dyn EventStream>),
            &FeatureFlags::default(),
            Timeouts::default(),
        );

        emitter
            .emit(&subject(), CopyReport::success("dex", "src", "dst"))
            .await;

        let pending = stream.pending().await;
        assert_eq!(pending.len(), 1);
        let envelope: ReportEnvelope = serde_json::from_slice(&pending[0].payload).unwrap();
        assert_eq!(envelope.upload_id, "u1");
        assert_eq!(envelope.stage_name, "dex-file-copy");
        assert_eq!(envelope.content.result, CopyResult::Success);
    }

    #[tokio::test]
    async fn traced_uploads_get_span_marks() {
        let stream = Arc::new(MemoryEventStream::new("reports"));
        let emitter = ReportEmitter::new(
            DynEventStream::from(stream.clone() as Arc<dyn EventStream>),
            &FeatureFlags::default(),
            Timeouts::default(),
        );
        let traced = ReportSubject {
            trace: Some(Trace {
                trace_id: "t1".into(),
                span_id: Some("s1".into()),
            }),
            ..subject()
        };

        emitter.mark_span(&subject(), SpanPhase::Start).await;
        assert!(stream.pending().await.is_empty());

        emitter.mark_span(&traced, SpanPhase::Start).await;
        emitter
            .emit(&traced, CopyReport::success("dex", "src", "dst"))
            .await;
        emitter.mark_span(&traced, SpanPhase::Stop).await;

        let pending = stream.pending().await;
        assert_eq!(pending.len(), 3);
        let start: SpanMark = serde_json::from_slice(&pending[0].payload).unwrap();
        assert_eq!(start.span, SpanPhase::Start);
        assert_eq!(start.trace_id, "t1");
        assert_eq!(start.parent_span_id.as_deref(), Some("s1"));

        let envelope: ReportEnvelope = serde_json::from_slice(&pending[1].payload).unwrap();
        assert_eq!(envelope.trace_id.as_deref(), Some("t1"));
        assert_eq!(envelope.span_id.as_deref(), Some("s1"));

        let stop: SpanMark = serde_json::from_slice(&pending[2].payload).unwrap();
        assert_eq!(stop.span, SpanPhase::Stop);
    }

    #[tokio::test]
    async fn disabled_reports_are_not_published() {
        let stream = Arc::new(MemoryEventStream::new("reports"));
        let features = FeatureFlags {
            processing_status_reports: false,
            ..Default::default()
        };
        let emitter = ReportEmitter::new(
            DynEventStream::from(stream.clone() as Arc<dyn EventStream>),
            &features,
            Timeouts::default(),
        );

        let traced = ReportSubject {
            trace: Some(Trace {
                trace_id: "t1".into(),
                span_id: None,
            }),
            ..subject()
        };
        emitter.mark_span(&traced, SpanPhase::Start).await;
        emitter
            .emit(&traced, CopyReport::failure("edav", "src", "upload", "boom"))
            .await;

        assert!(stream.pending().await.is_empty());
    }
}
