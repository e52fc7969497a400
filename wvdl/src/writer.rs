use crate::{
    Error, Result,
    events::{Event, Events},
};
use bytes::Bytes;
use log::{trace, warn};
use std::collections::BTreeMap;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

/// Payload of one fetched segment. Owned by the writer once sent.
#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub payload: Bytes,
}

/// Segments that arrived ahead of the write cursor.
#[derive(Debug, Default)]
pub struct ReassemblyBuffer {
    pending: BTreeMap<usize, Bytes>,
    next_expected: usize,
}

impl ReassemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_expected(&self) -> usize {
        self.next_expected
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Accept a segment and return every payload that can now be written, in order.
    pub fn push(&mut self, segment: Segment) -> Vec<Bytes> {
        if segment.index < self.next_expected || self.pending.contains_key(&segment.index) {
            warn!("dropping duplicate segment {}", segment.index);
            return Vec::new();
        }

        if segment.index != self.next_expected {
            self.pending.insert(segment.index, segment.payload);
            return Vec::new();
        }

        let mut ready = vec![segment.payload];
        self.next_expected += 1;

        while let Some(payload) = self.pending.remove(&self.next_expected) {
            ready.push(payload);
            self.next_expected += 1;
        }

        ready
    }
}

/// What the writer managed to put into the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub expected: usize,
    pub written: usize,
    pub bytes: u64,
}

impl WriteReport {
    pub fn is_complete(&self) -> bool {
        self.written == self.expected
    }

    /// Turn a partial write into [`Error::Incomplete`].
    pub fn check(self) -> Result<Self> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::Incomplete {
                expected: self.expected,
                written: self.written,
            })
        }
    }
}

/// Drain `receiver` into `sink` in index order until every sender is gone.
pub async fn write_ordered<W>(
    mut receiver: mpsc::Receiver<Segment>,
    sink: &mut W,
    expected: usize,
    events: &Events,
) -> Result<WriteReport>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buffer = ReassemblyBuffer::new();
    let mut bytes = 0;

    while let Some(segment) = receiver.recv().await {
        trace!("segment {} arrived", segment.index);

        for payload in buffer.push(segment) {
            sink.write_all(&payload).await?;
            bytes += payload.len() as u64;
            events.emit(Event::BytesWritten {
                bytes: payload.len(),
            });
        }
    }

    sink.flush().await?;

    let report = WriteReport {
        expected,
        written: buffer.next_expected(),
        bytes,
    };

    if !report.is_complete() {
        warn!(
            "incomplete output: wrote {} of {} segments ({} held back)",
            report.written,
            report.expected,
            buffer.pending()
        );
        events.emit(Event::Incomplete {
            expected: report.expected,
            written: report.written,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn payloads(n: usize) -> Vec<Bytes> {
        (0..n)
            .map(|x| Bytes::from(format!("<segment {}>", x)))
            .collect()
    }

    async fn run(order: &[usize], total: usize, events: &Events) -> (Vec<u8>, WriteReport) {
        let payloads = payloads(total);
        let (sender, receiver) = mpsc::channel(4);

        let order = order.to_vec();
        let producer = tokio::spawn(async move {
            for index in order {
                let payload = payloads[index].clone();
                sender.send(Segment { index, payload }).await.unwrap();
            }
        });

        let mut sink = Vec::new();
        let report = write_ordered(receiver, &mut sink, total, events)
            .await
            .unwrap();
        producer.await.unwrap();
        (sink, report)
    }

    #[test]
    fn buffer_drains_consecutive_runs() {
        let mut buffer = ReassemblyBuffer::new();
        let segment = |index: usize| Segment {
            index,
            payload: Bytes::from(vec![index as u8]),
        };

        assert!(buffer.push(segment(2)).is_empty());
        assert!(buffer.push(segment(1)).is_empty());
        assert_eq!(buffer.pending(), 2);

        assert_eq!(buffer.push(segment(0)).concat(), vec![0, 1, 2]);
        assert_eq!(buffer.next_expected(), 3);
        assert_eq!(buffer.pending(), 0);

        assert!(buffer.push(segment(1)).is_empty());
        assert_eq!(buffer.next_expected(), 3);
    }

    #[tokio::test]
    async fn out_of_order_arrival() {
        let (sink, report) = run(&[2, 0, 4, 1, 3], 5, &Events::none()).await;

        assert_eq!(sink, payloads(5).concat());
        assert_eq!(
            report,
            WriteReport {
                expected: 5,
                written: 5,
                bytes: sink.len() as u64
            }
        );
        assert!(report.check().is_ok());
    }

    #[tokio::test]
    async fn missing_segment_leaves_gap() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let events = {
            let seen = seen.clone();
            Events::new(move |x| seen.lock().unwrap().push(x.clone()))
        };

        let (sink, report) = run(&[4, 1, 0, 2], 5, &events).await;

        assert_eq!(sink, payloads(3).concat());
        assert_eq!(report.written, 3);
        assert!(matches!(
            report.check(),
            Err(Error::Incomplete {
                expected: 5,
                written: 3
            })
        ));
        assert!(seen.lock().unwrap().contains(&Event::Incomplete {
            expected: 5,
            written: 3
        }));
    }

    #[tokio::test]
    async fn nothing_arrives() {
        let (sink, report) = run(&[], 3, &Events::none()).await;

        assert!(sink.is_empty());
        assert_eq!(report.written, 0);
    }
}
