//! Per-step output capture.
//!
//! While a step runs, its worker thread owns a text buffer in a global
//! registry keyed by thread id. [`emit`] routes text to the owning buffer;
//! threads without a buffer (helper threads spawned inside a step) write
//! through to real stdout. Registration guards restore the registry even
//! when a step panics.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, LazyLock};
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};

static BUFFERS: LazyLock<RwLock<HashMap<ThreadId, Arc<Mutex<String>>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Registration of the current thread's capture buffer; deregisters on drop.
pub(crate) struct CaptureGuard {
    id: ThreadId,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        BUFFERS.write().remove(&self.id);
    }
}

/// Route the current thread's [`emit`] calls into `buffer` until the
/// returned guard is dropped.
pub(crate) fn register(buffer: Arc<Mutex<String>>) -> CaptureGuard {
    let id = thread::current().id();
    BUFFERS.write().insert(id, buffer);
    CaptureGuard { id }
}

/// Write text from step code. Captured into the step's `output_text` when
/// called on a worker thread, passed through to stdout otherwise.
pub fn emit(text: &str) {
    let buffer = BUFFERS.read().get(&thread::current().id()).cloned();
    match buffer {
        Some(buffer) => buffer.lock().push_str(text),
        None => {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
    }
}

/// [`emit`] with a trailing newline.
pub fn emitln(text: &str) {
    let buffer = BUFFERS.read().get(&thread::current().id()).cloned();
    match buffer {
        Some(buffer) => {
            let mut guard = buffer.lock();
            guard.push_str(text);
            guard.push('\n');
        }
        None => {
            let mut stdout = std::io::stdout();
            let _ = writeln!(stdout, "{text}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_targets_the_registered_buffer_only() {
        let buffer = Arc::new(Mutex::new(String::new()));
        let captured = {
            let _guard = register(buffer.clone());
            emitln("inside");

            // A helper thread without a buffer must not write into ours.
            thread::spawn(|| emitln("outside")).join().unwrap();

            buffer.lock().clone()
        };
        assert_eq!(captured, "inside\n");

        // After the guard dropped, this thread writes through again.
        emit("");
        assert_eq!(buffer.lock().as_str(), "inside\n");
    }

    #[test]
    fn guard_restores_on_panic() {
        let buffer = Arc::new(Mutex::new(String::new()));
        let result = thread::spawn({
            let buffer = buffer.clone();
            move || {
                let _guard = register(buffer);
                panic!("step blew up");
            }
        })
        .join();
        assert!(result.is_err());
        // The panicked thread's registration is gone; nothing to observe
        // beyond the registry not growing without bound.
        assert!(BUFFERS.read().len() < 16);
    }
}
