/// Sinks receive events from engine worker threads, so implementations must
/// be `Send + Sync`.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
}

/// Prints one line per event to stderr, leaving stdout to reports.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        eprintln!("{}", event.message);
    }
}

pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}
