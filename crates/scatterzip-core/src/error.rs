use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScatterError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("writer is closed; no new entries accepted")]
    ClosedWriter,
    #[error("entry #{sequence} ({name}): content read failed: {source}")]
    EntryRead {
        sequence: usize,
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("entry #{sequence} ({name}): compression failed: {source}")]
    Compression {
        sequence: usize,
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("backing store error: {0}")]
    BackingStore(#[source] std::io::Error),
    #[error("scatter buffer {buffer} exhausted after {drained} entries")]
    ExhaustedBuffer { buffer: usize, drained: usize },
    #[error("merge expected entry #{expected} but buffer {buffer} yielded #{actual}")]
    OrderViolation {
        buffer: usize,
        expected: usize,
        actual: usize,
    },
    #[error("entry #{sequence}: compression task panicked: {details}")]
    TaskPanicked { sequence: usize, details: String },
    #[error("{pending} compression tasks still running after shutdown wait of {waited_ms} ms")]
    ShutdownTimeout { pending: usize, waited_ms: u128 },
    #[error("final sink error: {0}")]
    Sink(#[source] std::io::Error),
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),
    #[error("archive limit exceeded: {0}")]
    ArchiveLimit(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ScatterError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ScatterError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping any context layers.
    pub fn root(&self) -> &ScatterError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True for errors raised by an individual compression task.
    pub fn is_task_error(&self) -> bool {
        matches!(
            self.root(),
            Self::EntryRead { .. }
                | Self::Compression { .. }
                | Self::BackingStore(_)
                | Self::TaskPanicked { .. }
                | Self::Other(_)
        )
    }
}
