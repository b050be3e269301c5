//! RT-safe garbage collection for stem buffers
//!
//! A global `basedrop` collector enables deferred deallocation of the large
//! per-stem sample buffers. When a `Shared<T>` drops on the audio thread it
//! only enqueues a pointer (~50ns); the actual free happens on a background
//! GC thread where latency doesn't matter.
//!
//! A full recording of four stereo stems at 48kHz is hundreds of megabytes;
//! freeing that inline in the audio callback would cause an audible dropout
//! on every recording switch.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Global handle for creating Shared<T> allocations
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// Initialize the global collector and return a handle
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    // The Collector is !Sync, so it lives on its own thread
    thread::Builder::new()
        .name("stem-gc".to_string())
        .spawn(move || {
            let mut collector = Collector::new();

            let handle = collector.handle();
            tx.send(handle).expect("Failed to send GC handle");

            log::info!("Stem GC thread started");

            loop {
                collector.collect();

                // 100ms is fast enough for memory reclamation
                thread::sleep(Duration::from_millis(100));
            }
        })
        .expect("Failed to spawn stem GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Get a handle for creating Shared<T> allocations
///
/// The handle is lightweight and can be cloned.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
