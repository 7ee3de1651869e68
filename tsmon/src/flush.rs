//! The background flush thread.
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, error};

use crate::{clock::Clock, errors::Error};

/// Returns how long to wait before the next flush, given how long the last one took.
///
/// Flushes are paced on a fixed wall-clock cadence: a slow flush shortens the following wait, down to zero.
pub fn next_timeout(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// A thread that calls a flush function on a fixed interval.
///
/// Failed flushes are logged and never stop the thread. Stopping the thread performs one final flush.
#[derive(Debug)]
pub struct FlushThread {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FlushThread {
    /// Spawns the flush thread.
    ///
    /// The first flush happens one full `interval` after spawning.
    ///
    /// # Errors
    ///
    /// If the thread cannot be spawned, an error is returned.
    pub fn spawn<F>(interval: Duration, clock: Arc<dyn Clock>, flush: F) -> io::Result<Self>
    where
        F: Fn() -> Result<(), Error> + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new().name("tsmon-flush".to_string()).spawn(move || {
            let mut timeout = interval;
            loop {
                match stop_rx.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Flush thread stopping, performing final flush.");
                        run_flush(&flush);
                        return;
                    }
                }

                let started = clock.now();
                run_flush(&flush);
                let elapsed = Duration::try_from_secs_f64(clock.now() - started).unwrap_or_default();
                timeout = next_timeout(interval, elapsed);
            }
        })?;

        Ok(Self { stop: Some(stop_tx), handle: Some(handle) })
    }

    /// Returns `true` if called from the flush thread itself.
    pub fn is_current(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Signals the thread to stop, waits for its final flush, and joins it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Flush thread panicked.");
            }
        }
    }
}

impl Drop for FlushThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_flush<F>(flush: &F)
where
    F: Fn() -> Result<(), Error>,
{
    if let Err(e) = flush() {
        error!(error = %e, "Failed to flush metrics.");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::{next_timeout, FlushThread};
    use crate::{
        clock::{MockClock, SystemClock},
        errors::Error,
    };

    #[test]
    fn timeout_shrinks_with_flush_duration() {
        let interval = Duration::from_secs(60);
        assert_eq!(next_timeout(interval, Duration::ZERO), Duration::from_secs(60));
        assert_eq!(next_timeout(interval, Duration::from_secs(5)), Duration::from_secs(55));
        assert_eq!(next_timeout(interval, Duration::from_secs(90)), Duration::ZERO);
    }

    #[test]
    fn flushes_periodically() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let flusher = FlushThread::spawn(Duration::from_millis(10), Arc::new(SystemClock), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        thread::sleep(Duration::from_millis(200));
        flusher.stop();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn stop_performs_a_final_flush() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let flusher = FlushThread::spawn(Duration::from_secs(3600), Arc::new(MockClock::new(0.0)), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        assert!(!flusher.is_current());
        flusher.stop();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_do_not_stop_the_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let flusher = FlushThread::spawn(Duration::from_millis(5), Arc::new(SystemClock), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::NoConfiguredMonitor)
        })
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        flusher.stop();
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn dropping_stops_the_thread() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let flusher = FlushThread::spawn(Duration::from_secs(3600), Arc::new(SystemClock), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        drop(flusher);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
