//! Notification dispatch.
//!
//! The frame loop must never wait on speech synthesis. `NotificationDispatcher`
//! owns a bounded queue and one worker thread that speaks requests strictly
//! one at a time, in acceptance order. A full queue rejects the newest request
//! immediately instead of blocking the producer.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::AlertError;
use crate::speech::SpeechEngine;

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Text to be spoken. Consumed exactly once, or dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationRequest {
    pub text: String,
}

impl NotificationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

enum DispatchMessage {
    Notify(NotificationRequest),
    Shutdown,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    spoken: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Snapshot of dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Requests accepted into the queue.
    pub accepted: u64,
    /// Requests rejected because the queue was full.
    pub dropped: u64,
    pub spoken: u64,
    /// Requests whose synthesis failed.
    pub failed: u64,
    /// Accepted requests thrown away during shutdown.
    pub discarded: u64,
}

/// Cloneable producer side of the dispatcher queue.
#[derive(Clone)]
pub struct Notifier {
    sender: SyncSender<DispatchMessage>,
    counters: Arc<Counters>,
    closing: Arc<AtomicBool>,
    capacity: usize,
}

impl Notifier {
    /// Queue a request without blocking.
    ///
    /// Fails with `DispatchOverflow` when the queue is full and
    /// `DispatcherClosed` once shutdown has begun; the request is dropped.
    pub fn enqueue(&self, request: NotificationRequest) -> Result<(), AlertError> {
        if self.closing.load(Ordering::SeqCst) {
            return Err(AlertError::DispatcherClosed);
        }
        match self.sender.try_send(DispatchMessage::Notify(request)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(DispatchMessage::Notify(request))) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::warn!(
                    "NotificationDispatcher: queue full, dropped \"{}\"",
                    request.text
                );
                Err(AlertError::DispatchOverflow {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Full(DispatchMessage::Shutdown)) => Err(AlertError::DispatcherClosed),
            Err(TrySendError::Disconnected(_)) => Err(AlertError::DispatcherClosed),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            spoken: self.counters.spoken.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

pub struct NotificationDispatcher {
    notifier: Notifier,
    worker: Option<JoinHandle<()>>,
}

impl NotificationDispatcher {
    /// Start the worker thread that drives `engine`.
    pub fn spawn<E: SpeechEngine + 'static>(engine: E, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AlertError::Config("notification queue capacity must be at least 1".into()).into());
        }
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let counters = Arc::new(Counters::default());
        let closing = Arc::new(AtomicBool::new(false));

        let worker_counters = counters.clone();
        let worker_closing = closing.clone();
        let worker = thread::Builder::new()
            .name("speech-dispatch".into())
            .spawn(move || run_worker(engine, receiver, worker_counters, worker_closing))
            .map_err(|e| anyhow!("failed to spawn speech worker: {}", e))?;

        Ok(Self {
            notifier: Notifier {
                sender,
                counters,
                closing,
                capacity,
            },
            worker: Some(worker),
        })
    }

    pub fn enqueue(&self, request: NotificationRequest) -> Result<(), AlertError> {
        self.notifier.enqueue(request)
    }

    /// Producer handle for the frame loop.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    pub fn stats(&self) -> DispatchStats {
        self.notifier.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    /// Stop the worker and release the engine. Idempotent.
    ///
    /// The request being spoken finishes, so this waits for the whole of a
    /// synthesis call already in progress; still-queued requests are discarded.
    pub fn close(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.notifier.closing.store(true, Ordering::SeqCst);
        // Blocks until any in-progress speak call returns; queued requests
        // behind it are then drained without speaking.
        let _ = self.notifier.sender.send(DispatchMessage::Shutdown);
        if worker.join().is_err() {
            log::error!("NotificationDispatcher: speech worker panicked");
        }
    }
}

impl Drop for NotificationDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker<E: SpeechEngine>(
    mut engine: E,
    receiver: Receiver<DispatchMessage>,
    counters: Arc<Counters>,
    closing: Arc<AtomicBool>,
) {
    log::info!("NotificationDispatcher: worker started (engine={})", engine.name());
    while let Ok(message) = receiver.recv() {
        let request = match message {
            DispatchMessage::Notify(request) => request,
            DispatchMessage::Shutdown => break,
        };
        if closing.load(Ordering::SeqCst) {
            counters.discarded.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        match engine.speak(&request.text) {
            Ok(()) => {
                counters.spoken.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let err = AlertError::SynthesisFailure(format!("{:#}", err));
                log::warn!("NotificationDispatcher: \"{}\": {}", request.text, err);
            }
        }
    }
    engine.release();
    log::info!("NotificationDispatcher: worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Clone, Default)]
    struct Recorder {
        spoken: Arc<Mutex<Vec<String>>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }

    struct RecordingEngine {
        recorder: Recorder,
        fail_on: Option<&'static str>,
    }

    impl SpeechEngine for RecordingEngine {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn speak(&mut self, text: &str) -> Result<()> {
            let now_active = self.recorder.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.recorder.max_active.fetch_max(now_active, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            self.recorder.active.fetch_sub(1, Ordering::SeqCst);
            if self.fail_on == Some(text) {
                return Err(anyhow!("engine exploded"));
            }
            self.recorder.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn release(&mut self) {
            self.recorder.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Blocks inside `speak` until the test drops the gate sender.
    struct GatedEngine {
        started: Arc<AtomicUsize>,
        gate: Receiver<()>,
    }

    impl SpeechEngine for GatedEngine {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn speak(&mut self, _text: &str) -> Result<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(())
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn speaks_one_at_a_time_in_fifo_order() {
        let recorder = Recorder::default();
        let mut dispatcher = NotificationDispatcher::spawn(
            RecordingEngine {
                recorder: recorder.clone(),
                fail_on: None,
            },
            DEFAULT_QUEUE_CAPACITY,
        )
        .unwrap();

        let notifier = dispatcher.notifier();
        let texts: Vec<String> = (0..10).map(|i| format!("alert {i}")).collect();
        for text in &texts {
            notifier.enqueue(NotificationRequest::new(text.clone())).unwrap();
        }
        wait_until(|| dispatcher.stats().spoken == 10);
        dispatcher.close();

        assert_eq!(*recorder.spoken.lock().unwrap(), texts);
        assert_eq!(recorder.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (gate_tx, gate_rx) = mpsc::channel();
        let started = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = NotificationDispatcher::spawn(
            GatedEngine {
                started: started.clone(),
                gate: gate_rx,
            },
            2,
        )
        .unwrap();

        dispatcher.enqueue(NotificationRequest::new("first")).unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1);
        dispatcher.enqueue(NotificationRequest::new("second")).unwrap();
        dispatcher.enqueue(NotificationRequest::new("third")).unwrap();

        let begin = Instant::now();
        let err = dispatcher
            .enqueue(NotificationRequest::new("fourth"))
            .unwrap_err();
        assert!(begin.elapsed() < Duration::from_millis(100));
        assert!(matches!(err, AlertError::DispatchOverflow { capacity: 2 }));

        let stats = dispatcher.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.dropped, 1);

        drop(gate_tx);
        dispatcher.close();
    }

    #[test]
    fn synthesis_failures_do_not_stop_the_worker() {
        let recorder = Recorder::default();
        let mut dispatcher = NotificationDispatcher::spawn(
            RecordingEngine {
                recorder: recorder.clone(),
                fail_on: Some("boom"),
            },
            8,
        )
        .unwrap();

        for text in ["Exit", "boom", "Stairs"] {
            dispatcher.enqueue(NotificationRequest::new(text)).unwrap();
        }
        wait_until(|| {
            let stats = dispatcher.stats();
            stats.spoken + stats.failed == 3
        });
        dispatcher.close();

        assert_eq!(*recorder.spoken.lock().unwrap(), vec!["Exit", "Stairs"]);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[test]
    fn close_is_idempotent_and_rejects_later_requests() {
        let recorder = Recorder::default();
        let mut dispatcher = NotificationDispatcher::spawn(
            RecordingEngine {
                recorder: recorder.clone(),
                fail_on: None,
            },
            4,
        )
        .unwrap();
        let notifier = dispatcher.notifier();

        dispatcher.close();
        dispatcher.close();
        assert!(dispatcher.is_closed());
        assert_eq!(recorder.released.load(Ordering::SeqCst), 1);
        assert!(matches!(
            notifier.enqueue(NotificationRequest::new("late")),
            Err(AlertError::DispatcherClosed)
        ));
    }

    #[test]
    fn close_waits_for_the_speech_in_progress() {
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let started = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = NotificationDispatcher::spawn(
            GatedEngine {
                started: started.clone(),
                gate: gate_rx,
            },
            4,
        )
        .unwrap();

        dispatcher.enqueue(NotificationRequest::new("first")).unwrap();
        wait_until(|| started.load(Ordering::SeqCst) == 1);
        dispatcher.enqueue(NotificationRequest::new("second")).unwrap();

        let opener = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            drop(gate_tx);
        });
        let begin = Instant::now();
        dispatcher.close();
        assert!(begin.elapsed() >= Duration::from_millis(100));
        opener.join().unwrap();

        let stats = dispatcher.stats();
        assert_eq!(stats.spoken, 1);
        assert_eq!(stats.discarded, 1);
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let recorder = Recorder::default();
        let engine = RecordingEngine {
            recorder,
            fail_on: None,
        };
        assert!(NotificationDispatcher::spawn(engine, 0).is_err());
    }
}
