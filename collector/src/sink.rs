use crate::reporter::OutputMetric;
use metrics::Label;
use shared::metrics_defs::MetricType;
use std::io::Write;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write records: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination of the records built in one cycle.
pub trait MetricSink {
    fn emit(&mut self, records: &[OutputMetric]) -> Result<(), SinkError>;
}

/// Forwards records to the installed `metrics` recorder. Dimensions and the
/// host become labels.
#[derive(Debug, Default)]
pub struct RecorderSink;

impl MetricSink for RecorderSink {
    fn emit(&mut self, records: &[OutputMetric]) -> Result<(), SinkError> {
        for record in records {
            let labels = labels(record);
            match record.kind {
                // Gateway counters are cumulative since its start.
                MetricType::Counter => metrics::counter!(record.name, labels).absolute(record.value),
                MetricType::Gauge => metrics::gauge!(record.name, labels).set(record.value as f64),
                MetricType::Histogram => {
                    metrics::histogram!(record.name, labels).record(record.value as f64)
                }
            }
        }
        Ok(())
    }
}

fn labels(record: &OutputMetric) -> Vec<Label> {
    let mut labels: Vec<Label> = record
        .dimensions
        .iter()
        .map(|(k, v)| Label::new(k.clone(), v.clone()))
        .collect();
    if let Some(host) = &record.host {
        labels.push(Label::new("host", host.clone()));
    }
    labels
}

/// Writes one JSON object per record and line.
pub struct JsonLinesSink<W> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MetricSink for JsonLinesSink<W> {
    fn emit(&mut self, records: &[OutputMetric]) -> Result<(), SinkError> {
        for record in records {
            serde_json::to_writer(&mut self.writer, record)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl MetricSink for Vec<OutputMetric> {
    fn emit(&mut self, records: &[OutputMetric]) -> Result<(), SinkError> {
        self.extend_from_slice(records);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use metrics::{
        Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata,
        Recorder, SharedString, Unit,
    };
    use std::sync::{Arc, Mutex};

    #[derive(Debug, PartialEq)]
    enum Op {
        Increment(u64),
        Absolute(u64),
        Set(f64),
        Adjust(f64),
        Record(f64),
    }

    type Calls = Arc<Mutex<Vec<(String, Vec<(String, String)>, Op)>>>;

    /// Records every call made on the handles it hands out.
    #[derive(Default)]
    struct CapturingRecorder {
        calls: Calls,
    }

    struct Handle {
        key: Key,
        calls: Calls,
    }

    impl Handle {
        fn push(&self, op: Op) {
            let labels = self
                .key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect();
            self.calls
                .lock()
                .unwrap()
                .push((self.key.name().to_string(), labels, op));
        }
    }

    impl CounterFn for Handle {
        fn increment(&self, value: u64) {
            self.push(Op::Increment(value));
        }

        fn absolute(&self, value: u64) {
            self.push(Op::Absolute(value));
        }
    }

    impl GaugeFn for Handle {
        fn increment(&self, value: f64) {
            self.push(Op::Adjust(value));
        }

        fn decrement(&self, value: f64) {
            self.push(Op::Adjust(-value));
        }

        fn set(&self, value: f64) {
            self.push(Op::Set(value));
        }
    }

    impl HistogramFn for Handle {
        fn record(&self, value: f64) {
            self.push(Op::Record(value));
        }
    }

    impl CapturingRecorder {
        fn handle(&self, key: &Key) -> Arc<Handle> {
            Arc::new(Handle {
                key: key.clone(),
                calls: self.calls.clone(),
            })
        }
    }

    impl Recorder for CapturingRecorder {
        fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
        fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

        fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
            Counter::from_arc(self.handle(key))
        }

        fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
            Gauge::from_arc(self.handle(key))
        }

        fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
            Histogram::from_arc(self.handle(key))
        }
    }

    fn record(kind: MetricType, host: Option<&str>) -> OutputMetric {
        OutputMetric {
            name: "kong.responses.count",
            kind,
            value: 7,
            host: host.map(String::from),
            dimensions: IndexMap::from([
                ("api_id".to_string(), "a1".to_string()),
                ("status_code".to_string(), "2xx".to_string()),
            ]),
        }
    }

    #[test]
    fn json_lines() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&[
            record(MetricType::Counter, Some("myhost")),
            record(MetricType::Gauge, None),
        ])
        .unwrap();
        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines,
            [
                r#"{"name":"kong.responses.count","kind":"counter","value":7,"host":"myhost","dimensions":{"api_id":"a1","status_code":"2xx"}}"#,
                r#"{"name":"kong.responses.count","kind":"gauge","value":7,"dimensions":{"api_id":"a1","status_code":"2xx"}}"#,
            ]
        );
    }

    #[test]
    fn host_becomes_label() {
        let labels = labels(&record(MetricType::Counter, Some("myhost")));
        let pairs: Vec<_> = labels.iter().map(|l| (l.key(), l.value())).collect();
        assert_eq!(
            pairs,
            [("api_id", "a1"), ("status_code", "2xx"), ("host", "myhost")]
        );
    }

    #[test]
    fn recorder_sink_without_recorder() {
        let mut sink = RecorderSink;
        sink.emit(&[record(MetricType::Counter, None), record(MetricType::Gauge, None)])
            .unwrap();
    }

    #[test]
    fn recorder_sink_sets_absolute_values() {
        let recorder = CapturingRecorder::default();
        metrics::with_local_recorder(&recorder, || {
            RecorderSink
                .emit(&[
                    record(MetricType::Counter, Some("myhost")),
                    record(MetricType::Gauge, None),
                ])
                .unwrap();
        });

        let labels = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        let calls = recorder.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                (
                    "kong.responses.count".to_string(),
                    labels(&[("api_id", "a1"), ("status_code", "2xx"), ("host", "myhost")]),
                    Op::Absolute(7),
                ),
                (
                    "kong.responses.count".to_string(),
                    labels(&[("api_id", "a1"), ("status_code", "2xx")]),
                    Op::Set(7.0),
                ),
            ]
        );
    }

    #[test]
    fn vec_sink_collects() {
        let mut sink: Vec<OutputMetric> = Vec::new();
        sink.emit(&[record(MetricType::Counter, None)]).unwrap();
        sink.emit(&[record(MetricType::Gauge, None)]).unwrap();
        assert_eq!(sink.len(), 2);
    }
}
