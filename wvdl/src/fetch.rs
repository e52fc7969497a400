//! Bounded concurrency segment fetcher feeding the ordered writer.

use crate::{
    Error, Result,
    client::describe_reqwest_error,
    config::EngineConfig,
    events::{Event, Events},
    writer::{Segment, WriteReport, write_ordered},
};
use bytes::Bytes;
use log::{debug, error};
use reqwest::{Client, StatusCode, header};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::{
    io::AsyncWrite,
    sync::{Semaphore, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

/// Summary of one fetch run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub write: WriteReport,
    /// Highest number of requests holding an admission slot at once.
    pub peak_in_flight: usize,
}

/// Counting admission gate that remembers how crowded it got.
struct Admission {
    semaphore: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Admission {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
pub struct Fetcher {
    client: Client,
    concurrency: usize,
    probe_concurrency: usize,
    queue_capacity: usize,
    events: Events,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(
        client: Client,
        config: &EngineConfig,
        events: Events,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            concurrency: config.concurrency.max(1),
            probe_concurrency: config.probe_concurrency.max(1),
            queue_capacity: config.queue_capacity.max(1),
            events,
            cancel,
        }
    }

    /// Sum of the announced sizes of `urls`. Failures count as 0.
    pub async fn probe_size(&self, urls: &[String]) -> u64 {
        self.sizes(urls).await.0
    }

    /// Total announced size and the peak number of HEAD requests in flight.
    async fn sizes(&self, urls: &[String]) -> (u64, usize) {
        let admission = Arc::new(Admission::new(self.probe_concurrency));
        let mut set = JoinSet::new();

        for url in urls {
            let client = self.client.clone();
            let admission = admission.clone();
            let cancel = self.cancel.clone();
            let url = url.clone();

            set.spawn(async move {
                let Ok(_permit) = admission.semaphore.clone().acquire_owned().await else {
                    return 0;
                };

                admission.enter();
                let response = tokio::select! {
                    _ = cancel.cancelled() => None,
                    x = client.head(&url).send() => Some(x),
                };
                admission.leave();

                let Some(response) = response else {
                    return 0;
                };

                match response {
                    Ok(response) if response.status() == StatusCode::OK => {
                        content_length(response.headers()).unwrap_or(0)
                    }
                    Ok(response) => {
                        debug!("size probe {} returned HTTP {}", url, response.status());
                        0
                    }
                    Err(e) => {
                        debug!("size probe {} failed ({})", url, describe_reqwest_error(&e));
                        0
                    }
                }
            });
        }

        let mut total = 0;

        while let Some(size) = set.join_next().await {
            total += size.unwrap_or(0);
        }

        self.events.emit(Event::SizeProbed {
            segments: urls.len(),
            total_bytes: total,
        });
        (total, admission.peak.load(Ordering::SeqCst))
    }

    /// Download `urls` and write them to `sink` in order.
    ///
    /// A segment that fails is logged and skipped, so the result can be
    /// incomplete, see [`WriteReport::check`]. Returns [`Error::Cancelled`]
    /// when the cancellation token fires.
    pub async fn fetch<W>(&self, urls: &[String], sink: &mut W) -> Result<FetchReport>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let admission = Arc::new(Admission::new(self.concurrency));
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let mut set = JoinSet::new();
        // Also fired when the writer fails, so queued segments stop early.
        let cancel = self.cancel.child_token();

        for (index, url) in urls.iter().enumerate() {
            set.spawn(fetch_segment(
                self.client.clone(),
                index,
                url.clone(),
                admission.clone(),
                sender.clone(),
                self.events.clone(),
                cancel.clone(),
            ));
        }

        drop(sender);

        let write = write_ordered(receiver, sink, urls.len(), &self.events).await;

        if let Err(e) = &write {
            error!("writer failed, stopping segment tasks: {}", e);
            cancel.cancel();
        }

        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                error!("segment task panicked: {}", e);
            }
        }

        let write = write?;

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        Ok(FetchReport {
            write,
            peak_in_flight: admission.peak.load(Ordering::SeqCst),
        })
    }
}

async fn fetch_segment(
    client: Client,
    index: usize,
    url: String,
    admission: Arc<Admission>,
    sender: mpsc::Sender<Segment>,
    events: Events,
    cancel: CancellationToken,
) {
    let permit = tokio::select! {
        _ = cancel.cancelled() => return,
        x = admission.semaphore.clone().acquire_owned() => match x {
            Ok(x) => x,
            Err(_) => return,
        },
    };

    admission.enter();
    events.emit(Event::SegmentStarted { index });

    let payload = tokio::select! {
        _ = cancel.cancelled() => None,
        x = download(&client, &url) => match x {
            Ok(x) => Some(x),
            Err(reason) => {
                error!("segment {} failed {} ({})", index, url, reason);
                events.emit(Event::SegmentFailed { index, reason });
                None
            }
        },
    };

    admission.leave();
    drop(permit);

    let Some(payload) = payload else {
        return;
    };

    events.emit(Event::SegmentFinished {
        index,
        bytes: payload.len(),
    });

    // The receiver only goes away when the writer failed.
    let _ = sender.send(Segment { index, payload }).await;
}

async fn download(client: &Client, url: &str) -> std::result::Result<Bytes, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|x| describe_reqwest_error(&x))?;
    let status = response.status();

    if status != StatusCode::OK {
        return Err(format!("HTTP {}", status));
    }

    response.bytes().await.map_err(|x| describe_reqwest_error(&x))
}

fn content_length(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}
