//! Deferred deallocation for data the audio thread drops
//!
//! A global `basedrop` collector lives on its own thread. When the audio
//! callback drops the last `Shared<T>` of a replaced parameter snapshot, the
//! pointer is queued and freed here, so the callback never calls into the
//! allocator.
//!
//! ```ignore
//! let snapshot = Shared::new(&gc_handle(), ParameterSnapshot::default());
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread frees queued drops
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it's created on the thread that runs it
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn audio GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for creating `Shared<T>` allocations; starts the collector on first use
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Shared;

    #[test]
    fn test_shared_values_are_usable_across_threads() {
        let value = Shared::new(&gc_handle(), vec![1.0f32; 4]);
        let clone = value.clone();
        let sum = thread::spawn(move || clone.iter().sum::<f32>()).join().unwrap();
        assert_eq!(sum, 4.0);
        drop(value);
    }
}
