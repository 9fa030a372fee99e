//! Periodic sampling worker.
//!
//! Runs the breath detector once per tick on a dedicated thread. Enabling
//! the monitor starts the detector and the worker; disabling stops the
//! worker and then the detector.

use crate::core::{BreathDetector, BreathEvent, DetectorState};
use crate::sampler::SampleSource;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct Pipeline {
    detector: BreathDetector,
    source: Box<dyn SampleSource>,
    events: Option<Sender<BreathEvent>>,
}

impl Pipeline {
    fn tick(&mut self) {
        let outcome = self.detector.run_tick(self.source.as_mut());

        if let Some(ref events) = self.events {
            for event in outcome.breaths {
                if let Err(TrySendError::Full(_)) = events.try_send(event) {
                    tracing::debug!("Breath event queue full, dropping event");
                }
            }
        }
    }
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns a detector and its sample source and drives them periodically.
pub struct Monitor {
    pipeline: Arc<Mutex<Pipeline>>,
    tick_interval: Duration,
    worker: Option<Worker>,
}

impl Monitor {
    /// Create a stopped monitor. The detector is initialized if needed.
    pub fn new(
        mut detector: BreathDetector,
        source: impl SampleSource + 'static,
        tick_interval: Duration,
    ) -> Self {
        detector.init(None);

        Self {
            pipeline: Arc::new(Mutex::new(Pipeline {
                detector,
                source: Box::new(source),
                events: None,
            })),
            tick_interval,
            worker: None,
        }
    }

    /// Receive confirmed breaths on a bounded queue.
    ///
    /// Events are dropped rather than blocking the worker when the queue
    /// is full. Replaces any earlier subscription.
    pub fn breath_events(&mut self, capacity: usize) -> Receiver<BreathEvent> {
        let (sender, receiver) = bounded(capacity);
        self.lock().events = Some(sender);
        receiver
    }

    /// Start the detector and the worker thread. No-op if already running.
    pub fn enable(&mut self) -> Result<(), std::io::Error> {
        if self.worker.is_some() {
            return Ok(());
        }

        self.lock().detector.enable();

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let ticker = tick(self.tick_interval);
        let pipeline = Arc::clone(&self.pipeline);

        let spawned = thread::Builder::new()
            .name("breath-detector".to_string())
            .spawn(move || loop {
                select! {
                    recv(ticker) -> _ => {
                        lock_pipeline(&pipeline).tick();
                    }
                    recv(stop_rx) -> _ => break,
                }
            });

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    stop: stop_tx,
                    handle,
                });
                Ok(())
            }
            Err(e) => {
                self.lock().detector.disable();
                Err(e)
            }
        }
    }

    /// Stop the worker thread and the detector. No-op if not running.
    pub fn disable(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                tracing::error!("Breath detector worker panicked");
            }
            self.lock().detector.disable();
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn detector_state(&self) -> DetectorState {
        self.lock().detector.state()
    }

    /// Run `f` with exclusive access to the detector.
    pub fn with_detector<R>(&self, f: impl FnOnce(&BreathDetector) -> R) -> R {
        f(&self.lock().detector)
    }

    fn lock(&self) -> MutexGuard<'_, Pipeline> {
        lock_pipeline(&self.pipeline)
    }
}

fn lock_pipeline(pipeline: &Mutex<Pipeline>) -> MutexGuard<'_, Pipeline> {
    pipeline.lock().unwrap_or_else(|e| e.into_inner())
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.disable();
    }
}
