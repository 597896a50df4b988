use std::thread::JoinHandle;

use async_channel::{bounded, Sender};
use cpal::traits::StreamTrait;
use cpal::Stream;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use super::AudioError;

/// Run blocking `f`. On a multi-threaded runtime worker the worker's other
/// tasks are moved off first so they keep running meanwhile.
pub(crate) fn run_blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

/// Owns a cpal stream on its own OS thread.
///
/// cpal streams are not `Send` on every host, so the stream is built, played
/// and dropped on the thread that owns it. Dropping the handle stops it.
pub(crate) struct StreamThread {
    stop: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread and wait until the stream is playing.
    /// `build` returns the stream plus whatever the caller needs to know
    /// about it (e.g. the negotiated sample rate).
    pub(crate) fn spawn<F, T>(name: &str, build: F) -> Result<(Self, T), AudioError>
    where
        F: FnOnce() -> Result<(Stream, T), AudioError> + Send + 'static,
        T: Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let started = build().and_then(|(stream, info)| {
                    stream.play().map_err(|e| AudioError::Stream(e.to_string()))?;
                    Ok((stream, info))
                });
                let stream = match started {
                    Ok((stream, info)) => {
                        let _ = ready_tx.send_blocking(Ok(info));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send_blocking(Err(e));
                        return;
                    }
                };

                // Returns once the handle is dropped.
                let _ = stop_rx.recv_blocking();
                drop(stream);
                debug!("Audio stream stopped");
            })
            .map_err(|e| AudioError::Stream(format!("Failed to spawn audio thread: {}", e)))?;

        let mut thread = Self {
            stop: stop_tx,
            handle: Some(handle),
        };
        match run_blocking(|| ready_rx.recv_blocking()) {
            Ok(Ok(info)) => Ok((thread, info)),
            Ok(Err(e)) => {
                thread.join();
                Err(e)
            }
            Err(_) => {
                thread.join();
                Err(AudioError::Stream("audio thread exited before starting".to_string()))
            }
        }
    }

    fn join(&mut self) {
        self.stop.close();
        if let Some(handle) = self.handle.take() {
            run_blocking(|| {
                let _ = handle.join();
            });
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.join();
    }
}
