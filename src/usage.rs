use std::sync::Arc;

use serde::Serialize;

pub const ENGINE_ID_ENV: &str = "CDSW_ENGINE_ID";

/// A Copilot usage event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CopilotEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_selection: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_word_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_id: Option<String>,
}

/// Destination of usage events
pub trait EventSink: Send + Sync {
    fn send_copilot_event(&self, event: &CopilotEvent);
}

/// Writes every present event field to the log
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn send_copilot_event(&self, event: &CopilotEvent) {
        tracing::info!(
            engine_id = event.engine_id.as_deref(),
            event_details = event.event_details.as_deref(),
            event_type = event.event_type.as_deref(),
            include_selection = event.include_selection,
            model_name = event.model_name.as_deref(),
            model_provider_id = event.model_provider_id.as_deref(),
            model_type = event.model_type.as_deref(),
            prompt_word_count = event.prompt_word_count,
            "Copilot event"
        );
    }
}

#[derive(Clone)]
pub struct UsageTracker {
    engine_id: Option<String>,
    sink: Arc<dyn EventSink>,
}

impl UsageTracker {
    /// Tracker stamping the engine id found in the environment.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self::with_engine_id(std::env::var(ENGINE_ID_ENV).ok(), sink)
    }

    pub fn with_engine_id(engine_id: Option<String>, sink: Arc<dyn EventSink>) -> Self {
        Self { engine_id, sink }
    }

    pub fn send_copilot_event(&self, mut event: CopilotEvent) {
        event.engine_id = self.engine_id.clone();
        self.sink.send_copilot_event(&event);
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(Arc::new(LogEventSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<CopilotEvent>>);

    impl EventSink for RecordingSink {
        fn send_copilot_event(&self, event: &CopilotEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_engine_id_is_stamped() {
        let sink = Arc::new(RecordingSink::default());
        let tracker = UsageTracker::with_engine_id(Some("engine-1".into()), sink.clone());
        tracker.send_copilot_event(CopilotEvent {
            event_details: Some("/ask".into()),
            engine_id: Some("spoofed".into()),
            ..Default::default()
        });

        let events = sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].engine_id.as_deref(), Some("engine-1"));
        assert_eq!(events[0].event_details.as_deref(), Some("/ask"));
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let event = CopilotEvent { event_type: Some("slash".into()), ..Default::default() };
        assert_eq!(serde_json::to_value(&event).unwrap(), serde_json::json!({"event_type": "slash"}));
    }
}
