use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use flume::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::instrument;

use crate::{
    locate_word, CursorPosition, DebugSink, LocateError, ResultSet, ScreenPoint, ScreenReader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Canceled,
}

type Outcome = Result<ResultSet, LocateError>;

struct Job {
    generation: u64,
    anchor: ScreenPoint,
    status: Arc<Mutex<RequestStatus>>,
    reply: Sender<Outcome>,
}

/// Handle to a capture started by [`RequestCoordinator::begin`].
#[derive(Debug)]
pub struct PendingRequest {
    generation: u64,
    anchor: ScreenPoint,
    status: Arc<Mutex<RequestStatus>>,
    outcome: Receiver<Outcome>,
}

impl PendingRequest {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn anchor(&self) -> ScreenPoint {
        self.anchor
    }

    pub fn status(&self) -> RequestStatus {
        *self.status.lock()
    }
}

/// Runs captures on a single background worker and makes sure only the most
/// recently started one is ever handed back.
///
/// Captures run strictly one at a time. Starting a new request cancels the
/// previous one if it has not begun yet; one that is already running is left
/// to finish and its result is discarded.
pub struct RequestCoordinator {
    current: Arc<AtomicU64>,
    pending: Mutex<Option<Arc<Mutex<RequestStatus>>>>,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
    debug: DebugSink,
}

impl RequestCoordinator {
    pub fn new(reader: ScreenReader) -> io::Result<Self> {
        let current = Arc::new(AtomicU64::new(0));
        let debug = reader.debug_sink().clone();
        let (jobs, queue) = flume::unbounded();
        let worker = {
            let current = current.clone();
            thread::Builder::new()
                .name("ocr-worker".into())
                .spawn(move || run_worker(reader, queue, current))?
        };
        Ok(Self {
            current,
            pending: Mutex::new(None),
            jobs: Some(jobs),
            worker: Some(worker),
            debug,
        })
    }

    pub fn current_generation(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Starts reading the screen around `anchor` and returns immediately.
    #[instrument(skip(self))]
    pub fn begin(&self, anchor: ScreenPoint) -> PendingRequest {
        let generation = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let status = Arc::new(Mutex::new(RequestStatus::Scheduled));

        if let Some(previous) = self.pending.lock().replace(status.clone()) {
            let mut previous = previous.lock();
            if *previous == RequestStatus::Scheduled {
                *previous = RequestStatus::Canceled;
                log::debug!("Canceled request {} before it ran", generation - 1);
            } else {
                log::debug!(
                    "Request {} is already {:?}, its result will be dropped",
                    generation - 1,
                    *previous
                );
            }
        }

        let (reply, outcome) = flume::bounded(1);
        let job = Job {
            generation,
            anchor,
            status: status.clone(),
            reply,
        };
        // A missing or closed queue drops the job's reply sender, which
        // `await_result` reports as a stopped worker.
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_err() {
                log::warn!("OCR worker is gone, request {generation} will not run");
            }
        }

        PendingRequest {
            generation,
            anchor,
            status,
            outcome,
        }
    }

    /// Blocks until `request` finishes and returns its result set, unless a
    /// newer request has been started in the meantime.
    #[instrument(skip(self, request), fields(generation = request.generation))]
    pub fn await_result(&self, request: PendingRequest) -> Result<ResultSet, LocateError> {
        self.check_current(&request)?;
        let outcome = request.outcome.recv();
        self.check_current(&request)?;
        match outcome {
            Ok(outcome) => outcome,
            Err(_) if request.status() == RequestStatus::Canceled => Err(LocateError::Superseded {
                requested: request.generation,
                current: self.current_generation(),
            }),
            Err(_) => Err(LocateError::WorkerStopped),
        }
    }

    fn check_current(&self, request: &PendingRequest) -> Result<(), LocateError> {
        let current = self.current_generation();
        if request.generation == current {
            return Ok(());
        }
        log::warn!(
            "Discarding result of request {}, superseded by request {current}",
            request.generation
        );
        Err(LocateError::Superseded {
            requested: request.generation,
            current,
        })
    }

    /// [`locate_word`], also recorded in the debug sink when one is configured.
    pub fn locate_word(
        &self,
        result_set: &ResultSet,
        query: &str,
        anchor: ScreenPoint,
        position: CursorPosition,
    ) -> Option<ScreenPoint> {
        let location = locate_word(result_set, query, anchor, position);
        self.debug
            .save_query(result_set, query, anchor, position, location);
        location
    }
}

impl Drop for RequestCoordinator {
    fn drop(&mut self) {
        // Closing the queue lets the worker exit after its current job.
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("OCR worker panicked");
            }
        }
    }
}

fn run_worker(reader: ScreenReader, queue: Receiver<Job>, current: Arc<AtomicU64>) {
    for job in queue.iter() {
        {
            let mut status = job.status.lock();
            if *status == RequestStatus::Canceled {
                log::trace!("Skipping canceled request {}", job.generation);
                continue;
            }
            if job.generation != current.load(Ordering::SeqCst) {
                log::trace!("Skipping stale request {}", job.generation);
                *status = RequestStatus::Canceled;
                continue;
            }
            *status = RequestStatus::Running;
        }

        let outcome = reader.read_nearby(job.anchor, job.generation);
        *job.status.lock() = match &outcome {
            Ok(_) => RequestStatus::Completed,
            Err(e) => {
                log::warn!("Request {} failed: {e}", job.generation);
                RequestStatus::Failed
            }
        };
        // The caller may have given up on this request already.
        let _ = job.reply.send(outcome);
    }
    log::debug!("OCR worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageCapture, OcrEngine, OcrError, RawWord};
    use image::{DynamicImage, GrayImage};
    use std::time::Duration;

    /// Waits for permission before every recognition, so tests can hold the
    /// worker in the `Running` state.
    struct GatedEngine {
        started: Sender<()>,
        gate: Receiver<()>,
    }

    impl OcrEngine for GatedEngine {
        fn recognize(&self, _image: &GrayImage) -> Result<Vec<RawWord>, OcrError> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            Ok(vec![])
        }
    }

    struct FailingEngine;

    impl OcrEngine for FailingEngine {
        fn recognize(&self, _image: &GrayImage) -> Result<Vec<RawWord>, OcrError> {
            Err(OcrError::MalformedOutput {
                line: 1,
                reason: "garbage".into(),
            })
        }
    }

    fn reader(engine: impl OcrEngine + 'static) -> ScreenReader {
        ScreenReader::builder()
            .radius(20)
            .capture(ImageCapture::new(DynamicImage::new_rgb8(400, 400)))
            .ocr_engine(engine)
            .build()
            .unwrap()
    }

    fn gated() -> (RequestCoordinator, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = flume::unbounded();
        let (gate_tx, gate_rx) = flume::unbounded();
        let coordinator = RequestCoordinator::new(reader(GatedEngine {
            started: started_tx,
            gate: gate_rx,
        }))
        .unwrap();
        (coordinator, started_rx, gate_tx)
    }

    #[test]
    fn single_request_completes() {
        let (coordinator, _started, gate) = gated();
        gate.send(()).unwrap();
        let request = coordinator.begin(ScreenPoint::new(100, 100));
        assert_eq!(request.generation(), 1);
        assert_eq!(request.anchor(), ScreenPoint::new(100, 100));
        let results = coordinator.await_result(request).unwrap();
        assert_eq!(results.generation(), 1);
        assert_eq!(results.capture_bounds().origin(), ScreenPoint::new(80, 80));
    }

    #[test]
    fn running_request_is_superseded() {
        let (coordinator, started, gate) = gated();
        let first = coordinator.begin(ScreenPoint::new(100, 100));
        started.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(first.status(), RequestStatus::Running);

        let second = coordinator.begin(ScreenPoint::new(300, 300));
        // Still running, so cancellation could not stop it.
        assert_eq!(first.status(), RequestStatus::Running);
        gate.send(()).unwrap();
        gate.send(()).unwrap();

        assert!(matches!(
            coordinator.await_result(first),
            Err(LocateError::Superseded {
                requested: 1,
                current: 2
            })
        ));
        let results = coordinator.await_result(second).unwrap();
        assert_eq!(results.generation(), 2);
        assert_eq!(results.capture_bounds().origin(), ScreenPoint::new(280, 280));
    }

    #[test]
    fn scheduled_request_is_canceled() {
        let (coordinator, started, gate) = gated();
        let blocker = coordinator.begin(ScreenPoint::new(50, 50));
        started.recv_timeout(Duration::from_secs(10)).unwrap();

        let queued = coordinator.begin(ScreenPoint::new(100, 100));
        assert_eq!(queued.status(), RequestStatus::Scheduled);
        let latest = coordinator.begin(ScreenPoint::new(200, 200));
        assert_eq!(queued.status(), RequestStatus::Canceled);

        gate.send(()).unwrap();
        gate.send(()).unwrap();
        let results = coordinator.await_result(latest).unwrap();
        assert_eq!(results.generation(), 3);
        assert_eq!(queued.status(), RequestStatus::Canceled);
        assert!(matches!(
            coordinator.await_result(queued),
            Err(LocateError::Superseded { requested: 2, .. })
        ));
        assert!(matches!(
            coordinator.await_result(blocker),
            Err(LocateError::Superseded { requested: 1, .. })
        ));
    }

    #[test]
    fn failures_are_reported_to_the_caller() {
        let coordinator = RequestCoordinator::new(reader(FailingEngine)).unwrap();
        let request = coordinator.begin(ScreenPoint::new(100, 100));
        assert!(matches!(
            coordinator.await_result(request),
            Err(LocateError::Ocr(OcrError::MalformedOutput { .. }))
        ));

        let off_screen = coordinator.begin(ScreenPoint::new(-1000, -1000));
        assert!(matches!(
            coordinator.await_result(off_screen),
            Err(LocateError::Capture(crate::CaptureError::EmptyRegion { .. }))
        ));
    }
}
