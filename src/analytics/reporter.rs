use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError},
        Arc, Mutex, OnceLock, PoisonError,
    },
    time::{Duration, Instant},
};

use super::{
    AnalyticsConfig, ImpressionEvent, ImpressionSink, MIN_BUFFER_SIZE, MIN_FLUSH_INTERVAL,
};

enum Command {
    Track(ImpressionEvent),
    Shutdown,
}

/// Handle to the running analytics worker thread.
pub(crate) struct ReporterClient {
    sender: SyncSender<Command>,
    stopping: Arc<AtomicBool>,
    /// Receives once the worker has delivered everything and exited.
    done: Mutex<Receiver<()>>,
    dropped: AtomicU64,
}

impl ReporterClient {
    pub(crate) fn start(
        sink: Arc<dyn ImpressionSink + Send + Sync>,
        config: &AnalyticsConfig,
    ) -> std::io::Result<ReporterClient> {
        // Fields are public, so values that bypassed the setters are clamped here as well.
        let (sender, receiver) =
            std::sync::mpsc::sync_channel(config.buffer_size.max(MIN_BUFFER_SIZE));
        let (done_sender, done) = std::sync::mpsc::sync_channel(1);
        let stopping = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            receiver,
            sink,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval.max(MIN_FLUSH_INTERVAL),
            stopping: Arc::clone(&stopping),
            batch: Vec::with_capacity(config.batch_size),
        };
        std::thread::Builder::new()
            .name("rox-analytics".to_owned())
            .spawn(move || {
                worker.run();
                let _ = done_sender.send(());
            })?;

        Ok(ReporterClient {
            sender,
            stopping,
            done: Mutex::new(done),
            dropped: AtomicU64::new(0),
        })
    }

    /// Enqueue `event` without blocking. A full buffer drops the event.
    pub(crate) fn track(&self, event: ImpressionEvent) {
        match self.sender.try_send(Command::Track(event)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!(target: "rox", dropped; "analytics buffer full, dropping impression");
            }
            Err(TrySendError::Disconnected(_)) => {
                log::debug!(target: "rox", "analytics worker has exited, dropping impression");
            }
        }
    }

    /// Number of events dropped because the buffer was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the worker to deliver buffered events and exit, waiting at most `timeout`.
    ///
    /// Returns `true` if the worker finished in time.
    pub(crate) fn shutdown(&self, timeout: Duration) -> bool {
        self.stopping.store(true, Ordering::Release);
        // A full buffer means the worker is busy and will notice `stopping` after the next event.
        let _ = self.sender.try_send(Command::Shutdown);

        let done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(target: "rox", "analytics worker did not finish within {:?}", timeout);
                false
            }
        }
    }
}

struct Worker {
    receiver: Receiver<Command>,
    sink: Arc<dyn ImpressionSink + Send + Sync>,
    batch_size: usize,
    flush_interval: Duration,
    stopping: Arc<AtomicBool>,
    batch: Vec<ImpressionEvent>,
}

impl Worker {
    fn run(mut self) {
        let mut deadline = Instant::now() + self.flush_interval;
        loop {
            let timeout = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(timeout) {
                Ok(Command::Track(event)) => {
                    self.batch.push(event);
                    if self.batch.len() >= self.batch_size {
                        self.flush();
                        deadline = Instant::now() + self.flush_interval;
                    }
                }
                Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    self.flush();
                    deadline = Instant::now() + self.flush_interval;
                }
            }
            if self.stopping.load(Ordering::Acquire) {
                break;
            }
        }

        // Drain whatever is still buffered.
        loop {
            match self.receiver.try_recv() {
                Ok(Command::Track(event)) => {
                    self.batch.push(event);
                    if self.batch.len() >= self.batch_size {
                        self.flush();
                    }
                }
                Ok(Command::Shutdown) => {}
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        self.flush();
        log::debug!(target: "rox", "analytics worker exited");
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let events = std::mem::take(&mut self.batch);
        match self.sink.deliver(&events) {
            Ok(()) => log::debug!(target: "rox", count = events.len(); "delivered impressions"),
            // At-most-once: a failed batch is not retried.
            Err(err) => log::warn!(target: "rox",
                                   count = events.len();
                                   "failed to deliver impressions, dropping batch: {}", err),
        }
    }
}

/// Front for the analytics worker. Starts the worker on first use and turns every call into a
/// no-op after shutdown.
pub struct ClientProxy {
    sink: Arc<dyn ImpressionSink + Send + Sync>,
    config: AnalyticsConfig,
    client: OnceLock<Option<ReporterClient>>,
    shut_down: AtomicBool,
    /// Held while starting the worker and while shutting down, so a worker is never started
    /// after `shutdown` has looked for one.
    lifecycle: Mutex<()>,
}

impl ClientProxy {
    /// Create a proxy delivering to `sink`. No thread is started until the first event.
    pub fn new(
        sink: Arc<dyn ImpressionSink + Send + Sync>,
        config: AnalyticsConfig,
    ) -> ClientProxy {
        ClientProxy {
            sink,
            config,
            client: OnceLock::new(),
            shut_down: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Enqueue `event` for delivery. Never blocks on I/O.
    pub fn track(&self, event: ImpressionEvent) {
        if self.shut_down.load(Ordering::Acquire) {
            return;
        }
        let client = match self.client.get() {
            Some(client) => client,
            None => {
                let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
                if self.shut_down.load(Ordering::Acquire) {
                    return;
                }
                self.client.get_or_init(|| {
                    ReporterClient::start(Arc::clone(&self.sink), &self.config)
                        .map_err(|err| {
                            log::warn!(target: "rox", "failed to start analytics worker: {}", err);
                        })
                        .ok()
                })
            }
        };
        if let Some(client) = client {
            client.track(event);
        }
    }

    /// `true` once the worker thread has been started.
    pub fn is_started(&self) -> bool {
        matches!(self.client.get(), Some(Some(_)))
    }

    /// Number of events dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        match self.client.get() {
            Some(Some(client)) => client.dropped(),
            _ => 0,
        }
    }

    /// Deliver buffered events and stop the worker, waiting at most `timeout`.
    ///
    /// Only the first call does anything. Returns `false` if the worker did not finish in time.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return true;
        }
        // Waits for a worker start in progress. Any later start sees `shut_down`.
        let _lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        match self.client.get() {
            Some(Some(client)) => client.shutdown(timeout),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::Ordering, Arc, Barrier, Mutex},
        time::Duration,
    };

    use chrono::Utc;

    use super::ClientProxy;
    use crate::{
        analytics::{AnalyticsConfig, ImpressionEvent, ImpressionSink},
        Context, Error, Result,
    };

    fn event(value: &str) -> ImpressionEvent {
        ImpressionEvent {
            flag_name: "app.flag".to_owned(),
            value: value.to_owned(),
            experiment: None,
            context: Context::new(),
            timestamp: Utc::now(),
        }
    }

    fn recording_sink() -> (Arc<dyn ImpressionSink + Send + Sync>, Arc<Mutex<Vec<Vec<String>>>>) {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let batches = Arc::clone(&batches);
            move |events: &[ImpressionEvent]| -> Result<()> {
                batches
                    .lock()
                    .unwrap()
                    .push(events.iter().map(|e| e.value.clone()).collect());
                Ok(())
            }
        };
        (Arc::new(sink), batches)
    }

    #[test]
    fn starts_lazily() {
        let (sink, _) = recording_sink();
        let proxy = ClientProxy::new(sink, AnalyticsConfig::new("http://localhost", "key"));

        assert!(!proxy.is_started());
        proxy.track(event("a"));
        assert!(proxy.is_started());
        assert!(proxy.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn batches_by_size() {
        let (sink, batches) = recording_sink();
        let config = AnalyticsConfig::new("http://localhost", "key")
            .with_batch_size(2)
            .with_flush_interval(Duration::from_secs(3600));
        let proxy = ClientProxy::new(sink, config);

        for value in ["a", "b", "c"] {
            proxy.track(event(value));
        }
        assert!(proxy.shutdown(Duration::from_secs(5)));

        let batches = batches.lock().unwrap();
        assert_eq!(batches.concat(), vec!["a", "b", "c"]);
        assert!(batches.iter().all(|batch| batch.len() <= 2));
    }

    #[test]
    fn flushes_on_interval() {
        let (sink, batches) = recording_sink();
        let config = AnalyticsConfig::new("http://localhost", "key")
            .with_flush_interval(Duration::from_millis(20));
        let proxy = ClientProxy::new(sink, config);

        proxy.track(event("a"));
        std::thread::sleep(Duration::from_millis(200));

        assert_eq!(batches.lock().unwrap().concat(), vec!["a"]);
        proxy.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn track_after_shutdown_is_noop() {
        let (sink, batches) = recording_sink();
        let proxy = ClientProxy::new(sink, AnalyticsConfig::new("http://localhost", "key"));

        proxy.track(event("a"));
        assert!(proxy.shutdown(Duration::from_secs(5)));
        assert!(proxy.shutdown(Duration::from_secs(5)));
        proxy.track(event("b"));

        assert_eq!(batches.lock().unwrap().concat(), vec!["a"]);
    }

    #[test]
    fn shutdown_without_events_starts_nothing() {
        let (sink, _) = recording_sink();
        let proxy = ClientProxy::new(sink, AnalyticsConfig::new("http://localhost", "key"));

        assert!(proxy.shutdown(Duration::from_millis(10)));
        proxy.track(event("a"));
        assert!(!proxy.is_started());
    }

    #[test]
    fn full_buffer_drops_newest() {
        let gate = Arc::new(Mutex::new(()));
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let gate = Arc::clone(&gate);
            let delivered = Arc::clone(&delivered);
            move |events: &[ImpressionEvent]| -> Result<()> {
                let _gate = gate.lock().unwrap();
                delivered
                    .lock()
                    .unwrap()
                    .extend(events.iter().map(|e| e.value.clone()));
                Ok(())
            }
        };
        let config = AnalyticsConfig::new("http://localhost", "key")
            .with_batch_size(1)
            .with_buffer_size(1);
        let proxy = ClientProxy::new(Arc::new(sink), config);

        let blocked = gate.lock().unwrap();
        proxy.track(event("first"));
        // Give the worker time to pick up the first event and block in the sink.
        std::thread::sleep(Duration::from_millis(100));
        proxy.track(event("buffered"));
        proxy.track(event("dropped"));
        drop(blocked);

        assert!(proxy.shutdown(Duration::from_secs(5)));
        assert_eq!(proxy.dropped(), 1);
        assert_eq!(*delivered.lock().unwrap(), vec!["first", "buffered"]);
    }

    #[test]
    fn failed_delivery_is_dropped() {
        let sink =
            |_: &[ImpressionEvent]| -> Result<()> { Err(Error::Delivery("boom".to_owned())) };
        let proxy = ClientProxy::new(
            Arc::new(sink),
            AnalyticsConfig::new("http://localhost", "key").with_batch_size(1),
        );

        proxy.track(event("a"));

        assert!(proxy.shutdown(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_racing_first_track_leaves_no_worker_running() {
        for _ in 0..500 {
            let (sink, _) = recording_sink();
            let proxy = Arc::new(ClientProxy::new(
                sink,
                AnalyticsConfig::new("http://localhost", "key"),
            ));
            let barrier = Arc::new(Barrier::new(2));

            let tracker = {
                let proxy = Arc::clone(&proxy);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    proxy.track(event("a"));
                })
            };
            barrier.wait();
            assert!(proxy.shutdown(Duration::from_secs(5)));
            tracker.join().unwrap();

            if let Some(Some(client)) = proxy.client.get() {
                assert!(client.stopping.load(Ordering::Acquire));
            }
        }
    }
}
