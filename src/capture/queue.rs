use std::sync::mpsc::{self, Receiver, RecvError, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::time::Duration;

use super::types::{DroppedSample, SampleBuffer};

/// Receiver of captured samples
///
/// Both callbacks run on the thread draining the [`MainQueue`].
pub trait SampleBufferDelegate {
    /// A sample was captured and delivered
    fn capture_output(&mut self, sample: SampleBuffer);

    /// A sample was discarded before it could be delivered
    fn capture_dropped(&mut self, sample: DroppedSample);
}

/// Outcome of handing a sample to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue was full; the sample was discarded and a drop notice queued
    Dropped,
    /// The main queue no longer exists
    Closed,
}

/// Producer side, held by the frame-output sink
#[derive(Debug, Clone)]
pub struct QueueHandle {
    samples: SyncSender<SampleBuffer>,
    drops: Sender<DroppedSample>,
}

impl QueueHandle {
    /// Hand a sample over without blocking the capture thread
    pub fn deliver(&self, sample: SampleBuffer) -> Delivery {
        match self.samples.try_send(sample) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(sample)) => {
                let notice = DroppedSample {
                    sequence: sample.sequence,
                };
                drop(sample);
                match self.drops.send(notice) {
                    Ok(()) => Delivery::Dropped,
                    Err(_) => Delivery::Closed,
                }
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }
}

/// Consumer side, drained on the main thread
pub struct MainQueue {
    samples: Receiver<SampleBuffer>,
    drops: Receiver<DroppedSample>,
}

impl MainQueue {
    /// Create a queue holding at most `depth` undelivered samples
    pub fn new(depth: usize) -> (Self, QueueHandle) {
        let (sample_tx, sample_rx) = mpsc::sync_channel(depth.max(1));
        let (drop_tx, drop_rx) = mpsc::channel();

        (
            Self {
                samples: sample_rx,
                drops: drop_rx,
            },
            QueueHandle {
                samples: sample_tx,
                drops: drop_tx,
            },
        )
    }

    /// Dispatch everything already queued without blocking
    ///
    /// Returns the number of delivered (not dropped) samples.
    pub fn drain<D>(&self, delegate: &mut D) -> usize
    where
        D: SampleBufferDelegate + ?Sized,
    {
        let mut delivered = 0;
        while let Ok(sample) = self.samples.try_recv() {
            delegate.capture_output(sample);
            delivered += 1;
        }
        self.dispatch_drops(delegate);
        delivered
    }

    /// Block until one sample arrives, then dispatch it
    pub fn recv<D>(&self, delegate: &mut D) -> Result<(), RecvError>
    where
        D: SampleBufferDelegate + ?Sized,
    {
        let sample = self.samples.recv()?;
        delegate.capture_output(sample);
        self.dispatch_drops(delegate);
        Ok(())
    }

    /// Like [`MainQueue::recv`] but gives up after `timeout`
    pub fn recv_timeout<D>(&self, delegate: &mut D, timeout: Duration) -> Result<(), RecvTimeoutError>
    where
        D: SampleBufferDelegate + ?Sized,
    {
        let sample = self.samples.recv_timeout(timeout)?;
        delegate.capture_output(sample);
        self.dispatch_drops(delegate);
        Ok(())
    }

    fn dispatch_drops<D>(&self, delegate: &mut D)
    where
        D: SampleBufferDelegate + ?Sized,
    {
        while let Ok(notice) = self.drops.try_recv() {
            delegate.capture_dropped(notice);
        }
    }
}
