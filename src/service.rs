//! Speak queue: many submitters, one worker.
//!
//! submit → bounded FIFO (QUEUE_MAX) → worker → SpeakerBox::process → handle
//!
//! Submission never waits: a full queue is rejected with [`Error::QueueFull`].
//! The worker runs one request at a time and keeps going after failures.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::speaker_box::{request_id, SpeakRequest, SpeakResult, SpeakerBox};

struct Job {
    request: SpeakRequest,
    done: oneshot::Sender<SpeakResult>,
}

/// Handle to an admitted request.
pub struct PendingSpeak {
    rx: oneshot::Receiver<SpeakResult>,
}

impl PendingSpeak {
    /// Wait for the worker to finish this request.
    pub async fn wait(self) -> Result<SpeakResult> {
        self.rx.await.map_err(|_| Error::WorkerStopped)
    }
}

#[derive(Clone)]
pub struct SpeakService {
    tx: mpsc::Sender<Job>,
    speaker_box: Arc<SpeakerBox>,
}

impl SpeakService {
    /// Spawn the worker. Must be called inside a Tokio runtime.
    pub fn start(speaker_box: Arc<SpeakerBox>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        tokio::spawn(worker_loop(speaker_box.clone(), rx));
        info!("Speak worker started (queue capacity {capacity})");
        Self { tx, speaker_box }
    }

    /// Admit a request, or reject it immediately when the queue is full.
    pub fn submit(&self, request: SpeakRequest) -> Result<PendingSpeak> {
        let (done, rx) = oneshot::channel();
        self.tx
            .try_send(Job { request, done })
            .map_err(|e| match e {
                TrySendError::Full(_) => Error::QueueFull,
                TrySendError::Closed(_) => Error::WorkerStopped,
            })?;
        Ok(PendingSpeak { rx })
    }

    /// Submit and wait.
    pub async fn speak(&self, request: SpeakRequest) -> Result<SpeakResult> {
        self.submit(request)?.wait().await
    }

    pub fn speaker_box(&self) -> &Arc<SpeakerBox> {
        &self.speaker_box
    }
}

async fn worker_loop(speaker_box: Arc<SpeakerBox>, mut rx: mpsc::Receiver<Job>) {
    while let Some(Job { request, done }) = rx.recv().await {
        // A panic inside one request must not take the worker down
        let task = tokio::spawn({
            let speaker_box = speaker_box.clone();
            let request = request.clone();
            async move { speaker_box.process(request).await }
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!("Speak request aborted: {e}");
                SpeakResult::failed(
                    request_id(&request.text),
                    &request,
                    format!("internal error: {e}"),
                )
            }
        };

        if done.send(result).is_err() {
            debug!("Submitter left before the result was ready");
        }
    }
    info!("Speak worker stopped");
}
