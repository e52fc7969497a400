use colored::Colorize;
use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Instant,
};
use wvdl::{Event, Events, Stage};

/// Single line progress renderer subscribed to engine events.
pub struct Progress {
    label: String,
    total_bytes: u64,
    written_bytes: u64,
    segments: usize,
    finished: usize,
    failed: usize,
    started: Instant,
    visible: bool,
}

impl Progress {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_owned(),
            total_bytes: 0,
            written_bytes: 0,
            segments: 0,
            finished: 0,
            failed: 0,
            started: Instant::now(),
            visible: false,
        }
    }

    /// Wrap `self` into an [`Events`] handle.
    pub fn into_events(self) -> Events {
        let progress = Arc::new(Mutex::new(self));

        Events::new(move |event| {
            if let Ok(mut progress) = progress.lock() {
                progress.handle(event);
            }
        })
    }

    fn handle(&mut self, event: &Event) {
        match event {
            Event::SizeProbed {
                segments,
                total_bytes,
            } => {
                self.segments = *segments;
                self.total_bytes = *total_bytes;
                self.written_bytes = 0;
                self.finished = 0;
                self.failed = 0;
                self.started = Instant::now();
            }
            Event::SegmentStarted { .. } => (),
            Event::SegmentFinished { .. } => self.finished += 1,
            Event::SegmentFailed { .. } => self.failed += 1,
            Event::BytesWritten { bytes } => {
                self.written_bytes += *bytes as u64;
                self.render();
            }
            Event::Incomplete { .. } => self.render(),
            Event::Stage(stage) => {
                self.clear();

                if *stage != Stage::Done {
                    eprintln!("{} {}", format!("[{}]", self.label).magenta(), stage);
                }
            }
        }
    }

    fn render(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = if elapsed > 0.0 {
            self.written_bytes as f64 / elapsed
        } else {
            0.0
        };

        let remaining = self.total_bytes.saturating_sub(self.written_bytes);
        let eta = if speed > 0.0 {
            (remaining as f64 / speed) as u64
        } else {
            0
        };

        let percent = if self.total_bytes > 0 {
            (self.written_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0) as u64
        } else {
            0
        };

        let mut stderr = io::stderr().lock();
        let _ = write!(
            stderr,
            "\r\x1B[2K{}{} {}/{}{} SG:{} DL:{} ETA:{}{}",
            "[".magenta(),
            self.label,
            ByteSize(self.written_bytes),
            ByteSize(self.total_bytes),
            format!("({}%)", percent).cyan(),
            self.segment_text().cyan(),
            format!("{}/s", ByteSize(speed as u64)).green(),
            Eta(eta).to_string().yellow(),
            "]".magenta(),
        );
        let _ = stderr.flush();
        self.visible = true;
    }

    fn segment_text(&self) -> String {
        if self.failed > 0 {
            format!("{}/{} ({} failed)", self.finished, self.segments, self.failed)
        } else {
            format!("{}/{}", self.finished, self.segments)
        }
    }

    fn clear(&mut self) {
        if self.visible {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr);
            self.visible = false;
        }
    }
}

struct ByteSize(u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const KIB: f64 = 1024.0;
        const MIB: f64 = KIB * 1024.0;
        const GIB: f64 = MIB * 1024.0;

        let bytes = self.0 as f64;

        if bytes >= GIB {
            write!(f, "{:.1}GiB", bytes / GIB)
        } else if bytes >= MIB {
            write!(f, "{:.1}MiB", bytes / MIB)
        } else if bytes >= KIB {
            write!(f, "{:.1}KiB", bytes / KIB)
        } else {
            write!(f, "{}B", self.0)
        }
    }
}

struct Eta(u64);

impl fmt::Display for Eta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.0 / 3600;
        let minutes = (self.0 % 3600) / 60;
        let seconds = self.0 % 60;

        if hours > 0 {
            write!(f, "{}h{}m{}s", hours, minutes, seconds)
        } else if minutes > 0 {
            write!(f, "{}m{}s", minutes, seconds)
        } else {
            write!(f, "{}s", seconds)
        }
    }
}
