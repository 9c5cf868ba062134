//! Background timers.
//!
//! CRL refresh, session-key eviction and the rotation schedule each run as a
//! `PeriodicTask`: a named thread that invokes a closure every `interval`
//! until the task is stopped or dropped.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{error_codes, CryptoError, CryptoResult};

pub struct PeriodicTask {
    name: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> CryptoResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(CryptoError::invalid_input(
                "interval",
                "periodic task interval must be positive",
                error_codes::INVALID_PARAMETER,
            ));
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name(format!("docseal-{}", name))
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| CryptoError::operation_failed(name, &e.to_string(), error_codes::WORKER_FAILED))?;

        log::info!("started periodic task '{}' every {:?}", name, interval);
        Ok(Self {
            name: name.to_string(),
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task and wait for an in-flight tick to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("periodic task '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
