//! Background chunk loader thread

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::double_buffer::{DoubleBuffer, LoadOutcome};
use super::{StreamError, StreamResult};

/// Anything that can be asked to load a chunk ahead of playback
pub trait LoadRequester {
    /// Queue a load; returns false if it was redundant or couldn't be queued
    fn request_load(&self, chunk_start: u64) -> bool;
}

enum LoaderMessage {
    Load(u64),
    Shutdown,
}

/// Owns the loader thread and its request queue
///
/// Requests coalesce: when several are queued, only the latest is served.
/// Dropping the loader stops the thread and joins it.
pub struct BackgroundLoader {
    buffer: Arc<DoubleBuffer>,
    request_tx: Sender<LoaderMessage>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundLoader {
    pub fn spawn(buffer: Arc<DoubleBuffer>) -> StreamResult<Self> {
        let (request_tx, request_rx) = channel::unbounded();

        let thread_buffer = buffer.clone();
        let handle = thread::Builder::new()
            .name("chunk-loader".to_string())
            .spawn(move || loader_thread(request_rx, thread_buffer))
            .map_err(StreamError::LoaderSpawn)?;

        log::info!(
            "Chunk loader spawned: {} ch, {} frames per chunk",
            buffer.channels(),
            buffer.chunk_frames()
        );

        Ok(Self {
            buffer,
            request_tx,
            handle: Some(handle),
        })
    }

    pub fn buffer(&self) -> &Arc<DoubleBuffer> {
        &self.buffer
    }
}

impl LoadRequester for BackgroundLoader {
    fn request_load(&self, chunk_start: u64) -> bool {
        if !self.buffer.needs_load(chunk_start) {
            return false;
        }
        if let Err(e) = self.request_tx.send(LoaderMessage::Load(chunk_start)) {
            log::error!("Failed to queue chunk load: {}", e);
            return false;
        }
        true
    }
}

impl Drop for BackgroundLoader {
    fn drop(&mut self) {
        let _ = self.request_tx.send(LoaderMessage::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Chunk loader thread panicked");
            }
        }
    }
}

fn loader_thread(rx: Receiver<LoaderMessage>, buffer: Arc<DoubleBuffer>) {
    log::debug!("Chunk loader thread started");

    while let Ok(message) = rx.recv() {
        let mut latest = match message {
            LoaderMessage::Load(chunk_start) => chunk_start,
            LoaderMessage::Shutdown => break,
        };
        let mut shutdown = false;
        for queued in rx.try_iter() {
            match queued {
                LoaderMessage::Load(chunk_start) => latest = chunk_start,
                LoaderMessage::Shutdown => shutdown = true,
            }
        }
        if shutdown {
            break;
        }

        match buffer.load_chunk(latest) {
            LoadOutcome::Loaded | LoadOutcome::AlreadyPresent | LoadOutcome::PastEnd => {}
            outcome => log::debug!("Chunk load at frame {}: {:?}", latest, outcome),
        }
    }

    log::debug!("Chunk loader thread exiting");
}
