// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO of batches between the intake server and the dispatcher.
//!
//! The intake server is the only writer and the dispatcher the only reader. The queue closes
//! once the intake server releases its last [`BatchSender`]; the receiver still yields every
//! batch buffered before the close and only then reports the end of the stream.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::QueueError;
use crate::records::Batch;

/// Creates a queue holding up to `capacity` batches.
pub fn channel(capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx }, BatchReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
}

impl BatchSender {
    /// Queues a batch, waiting for room when the buffer is full.
    ///
    /// The wait ends early with [`QueueError::Cancelled`] once `cancel_token` fires, in which case
    /// the batch is dropped. When room is available the batch is queued even during shutdown.
    pub async fn send(
        &self,
        batch: Batch,
        cancel_token: &CancellationToken,
    ) -> Result<(), QueueError> {
        tokio::select! {
            biased;
            res = self.tx.send(batch) => res.map_err(|_| QueueError::Closed),
            () = cancel_token.cancelled() => Err(QueueError::Cancelled),
        }
    }

    /// Releases this handle. The queue is closed when the last handle is released.
    pub fn close(self) {
        drop(self.tx);
    }
}

#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::Receiver<Batch>,
}

impl BatchReceiver {
    /// Waits for the next batch. `None` means the queue is closed and fully drained.
    pub async fn recv(&mut self) -> Option<Batch> {
        self.rx.recv().await
    }
}
