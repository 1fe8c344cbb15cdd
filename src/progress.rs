use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Debug => write!(f, "debug"),
            Level::Info => write!(f, "info"),
            Level::Warn => write!(f, "warn"),
            Level::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub level: Level,
    pub message: String,
}

/// Receives diagnostics from every operation in the crate.
///
/// Operations take the sink as an argument rather than logging through a
/// process-wide logger, so callers decide where events go.
pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);

    fn debug(&self, message: String) {
        self.event(ProgressEvent {
            level: Level::Debug,
            message,
        });
    }

    fn info(&self, message: String) {
        self.event(ProgressEvent {
            level: Level::Info,
            message,
        });
    }

    fn warn(&self, message: String) {
        self.event(ProgressEvent {
            level: Level::Warn,
            message,
        });
    }

    fn error(&self, message: String) {
        self.event(ProgressEvent {
            level: Level::Error,
            message,
        });
    }
}
