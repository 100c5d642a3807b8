//! A background poller thread that periodically runs [`ConfigurationSync`] cycles.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
        Arc, Condvar, Mutex,
    },
    time::{Duration, Instant},
};

use rand::{thread_rng, Rng};

use super::ConfigurationSync;
use crate::{Error, Result};

/// Configuration for [`PollerThread`].
#[derive(Debug, Clone)]
pub struct PollerThreadConfig {
    /// Time between the starts of two consecutive sync cycles.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Random duration subtracted from each interval so that many processes do not poll in
    /// lockstep.
    ///
    /// Defaults to [`PollerThreadConfig::DEFAULT_POLL_JITTER`].
    pub jitter: Duration,
}

impl PollerThreadConfig {
    /// Default value for [`PollerThreadConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
    /// Default value for [`PollerThreadConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::from_secs(3);

    /// Create a new `PollerThreadConfig` using default configuration.
    pub fn new() -> PollerThreadConfig {
        PollerThreadConfig::default()
    }

    /// Update poll interval with `interval`.
    pub fn with_interval(mut self, interval: Duration) -> PollerThreadConfig {
        self.interval = interval;
        self
    }

    /// Update poll interval jitter with `jitter`.
    pub fn with_jitter(mut self, jitter: Duration) -> PollerThreadConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for PollerThreadConfig {
    fn default() -> PollerThreadConfig {
        PollerThreadConfig {
            interval: PollerThreadConfig::DEFAULT_POLL_INTERVAL,
            jitter: PollerThreadConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// A configuration poller thread.
///
/// Use [`Engine::start_poller_thread`](crate::Engine::start_poller_thread) to get an instance of
/// it.
pub struct PollerThread {
    join_handle: std::thread::JoinHandle<()>,

    /// Used to wake the poller thread up when stopping.
    stop_sender: std::sync::mpsc::SyncSender<()>,

    /// Checked before every fetch, so no cycle starts once `stop()` has returned.
    stopped: Arc<AtomicBool>,

    /// Holds `None` until the first cycle finishes, then the result of the latest cycle that
    /// changed it: any success, or a failure of the very first cycle.
    result: Arc<(Mutex<Option<Result<()>>>, Condvar)>,
}

impl PollerThread {
    /// Starts the poller thread with default configuration.
    ///
    /// # Errors
    ///
    /// IO error if the thread failed to start.
    pub fn start(sync: Arc<ConfigurationSync>) -> std::io::Result<PollerThread> {
        PollerThread::start_with_config(sync, PollerThreadConfig::default())
    }

    /// Starts the poller thread with the provided configuration.
    ///
    /// The first cycle runs immediately.
    ///
    /// # Errors
    ///
    /// IO error if the thread failed to start.
    pub fn start_with_config(
        sync: Arc<ConfigurationSync>,
        config: PollerThreadConfig,
    ) -> std::io::Result<PollerThread> {
        // `sync_channel` makes `stop_sender` `Sync`. A buffer of 1 is enough: a full buffer means
        // another stop command is already pending.
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);
        let stopped = Arc::new(AtomicBool::new(false));

        let result = Arc::new((Mutex::new(None), Condvar::new()));

        let join_handle = {
            let result = Arc::clone(&result);
            let stopped = Arc::clone(&stopped);
            let update_result = move |value: Result<()>, overwrite: bool| {
                let (slot, condvar) = &*result;
                let mut slot = slot.lock().unwrap_or_else(|err| err.into_inner());
                if slot.is_none() || overwrite {
                    *slot = Some(value);
                }
                condvar.notify_all();
            };

            std::thread::Builder::new()
                .name("rox-poller".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                        if stopped.load(Ordering::Acquire) {
                            log::debug!(target: "rox", "poller thread stopped");
                            return;
                        }

                        let started = Instant::now();
                        match sync.sync_once() {
                            Ok(_) => update_result(Ok(()), true),
                            // Failures are retried on the next cycle. Only the first one is
                            // reported to waiters, so they are not blocked forever.
                            Err(err) => update_result(Err(err), false),
                        }

                        // An overrunning cycle triggers the next one immediately.
                        let timeout = jitter(config.interval, config.jitter)
                            .saturating_sub(started.elapsed());
                        match stop_receiver.recv_timeout(timeout) {
                            Err(RecvTimeoutError::Timeout) => {
                                // Timed out. Loop back to fetch a new configuration.
                            }
                            Ok(()) => {
                                log::debug!(target: "rox", "poller thread received stop command");
                                return;
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                log::debug!(target: "rox", "poller thread received disconnected");
                                return;
                            }
                        }
                    }));

                    match result {
                        // Wakes waiters if the thread was stopped before the first cycle.
                        Ok(()) => update_result(Err(Error::PollerThreadStopped), false),
                        Err(_) => update_result(Err(Error::PollerThreadPanicked), true),
                    }
                })?
        };

        Ok(PollerThread {
            join_handle,
            stop_sender,
            stopped,
            result,
        })
    }

    /// Block until the first sync cycle has finished.
    ///
    /// # Errors
    ///
    /// - The error of the first cycle if it failed and no later cycle has succeeded yet.
    /// - [`Error::PollerThreadStopped`] if the thread was stopped before the first cycle finished.
    /// - [`Error::PollerThreadPanicked`].
    pub fn wait_for_configuration(&self) -> Result<()> {
        let (slot, condvar) = &*self.result;
        let mut lock = slot.lock().map_err(|_| Error::PollerThreadPanicked)?;
        loop {
            match &*lock {
                Some(result) => return result.clone(),
                None => {
                    lock = condvar
                        .wait(lock)
                        .map_err(|_| Error::PollerThreadPanicked)?;
                }
            }
        }
    }

    /// Stop the poller thread.
    ///
    /// Does not wait for the thread to exit. A cycle already in progress completes; no new cycle
    /// starts. Calling it more than once is harmless.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        // Error means that the thread has exited or a stop command is already pending.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the poller thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// [`Error::PollerThreadPanicked`] if the thread has panicked.
    pub fn shutdown(self) -> Result<()> {
        self.stop();

        self.join_handle
            .join()
            .map_err(|_| Error::PollerThreadPanicked)?;

        Ok(())
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
