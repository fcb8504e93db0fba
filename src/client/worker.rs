//! Background units of work.
//!
//! A unit runs one closure on its own thread. At most one instance of a unit
//! is alive: starting it again first joins the previous run.
//!
//! A [`Watchdog`] runs a closure once a deadline passes unless it is disarmed
//! first.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;

/// Restartable background thread slot.
#[derive(Debug)]
pub(crate) struct BackgroundUnit {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundUnit {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Join the current run, if any.
    ///
    /// A unit waiting on itself detaches its own handle instead.
    pub(crate) fn wait_for_finish(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(handle) = handle else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            tracing::trace!("{} unit finishing on its own thread", self.name);
            return;
        }
        if handle.join().is_err() {
            tracing::error!("{} unit panicked", self.name);
        }
    }

    /// Join the previous run, then spawn `work`.
    pub(crate) fn start<F>(&self, work: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.wait_for_finish();

        let handle = thread::Builder::new()
            .name(format!("simsync-{}", self.name))
            .spawn(work)?;
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Whether a run is still executing.
    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Whether a handle is waiting to be joined.
    pub(crate) fn is_pending(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// One-shot deadline on its own thread.
#[derive(Debug)]
pub(crate) struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<bool>>,
}

impl Watchdog {
    /// Run `on_expiry` after `timeout` unless disarmed before.
    pub(crate) fn arm<F>(name: &'static str, timeout: Duration, on_expiry: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("simsync-{name}"))
            .spawn(move || match cancelled.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    tracing::debug!("{} watchdog expired after {:?}", name, timeout);
                    on_expiry();
                    true
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
            })?;

        Ok(Self {
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    /// Stop the countdown. Returns whether the deadline had already fired.
    pub(crate) fn disarm(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        // Dropping the sender wakes the countdown
        self.cancel.take();
        self.handle
            .take()
            .is_some_and(|handle| handle.join().unwrap_or(false))
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
