use std::{fmt, sync::Arc};

/// Things the engine reports while it works.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// Sum of the sizes every segment announced, 0 when unknown.
    SizeProbed { segments: usize, total_bytes: u64 },
    SegmentStarted { index: usize },
    SegmentFinished { index: usize, bytes: usize },
    SegmentFailed { index: usize, reason: String },
    /// Bytes written to the output sink, in order.
    BytesWritten { bytes: usize },
    Incomplete { expected: usize, written: usize },
    Stage(Stage),
}

/// Steps of a download.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    ResolvingManifest,
    AcquiringLicense,
    Downloading,
    Decrypting,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ResolvingManifest => "resolving manifest",
            Self::AcquiringLicense => "acquiring license",
            Self::Downloading => "downloading",
            Self::Decrypting => "decrypting",
            Self::Done => "done",
        })
    }
}

type Listener = dyn Fn(&Event) + Send + Sync;

/// Cheap to clone handle delivering [`Event`]s to an optional listener.
#[derive(Clone, Default)]
pub struct Events(Option<Arc<Listener>>);

impl Events {
    pub fn new<F>(listener: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self(Some(Arc::new(listener)))
    }

    /// A handle that drops every event.
    pub fn none() -> Self {
        Self(None)
    }

    pub fn emit(&self, event: Event) {
        if let Some(listener) = &self.0 {
            listener(&event);
        }
    }

    pub fn stage(&self, stage: Stage) {
        self.emit(Event::Stage(stage));
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Events").field(&self.0.is_some()).finish()
    }
}
