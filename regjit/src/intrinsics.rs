//! Host functions reachable from generated code.
//!
//! Generated code calls intrinsics through absolute addresses baked into
//! the instruction stream, so an [`Intrinsics`] table must outlive every
//! program compiled against it. The default table writes to stdout;
//! [`capture_output`] diverts that output into a buffer.

use std::io::{self, Write};

use parking_lot::Mutex;

/// `print_integer(value)`
pub type PrintInteger = extern "C" fn(i64);
/// `print_text(ptr, len)`
pub type PrintText = extern "C" fn(*const u8, usize);

#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub print_integer: PrintInteger,
    pub print_text: PrintText,
}

/// A named intrinsic as shown in code dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntrinsicBinding {
    pub name: &'static str,
    pub arity: usize,
    pub address: usize,
}

impl Intrinsics {
    pub fn host() -> Self {
        Self {
            print_integer: host_print_integer,
            print_text: host_print_text,
        }
    }

    pub fn print_integer_address(&self) -> usize {
        self.print_integer as usize
    }

    pub fn print_text_address(&self) -> usize {
        self.print_text as usize
    }

    pub fn bindings(&self) -> [IntrinsicBinding; 2] {
        [
            IntrinsicBinding {
                name: "print_integer",
                arity: 1,
                address: self.print_integer_address(),
            },
            IntrinsicBinding {
                name: "print_text",
                arity: 2,
                address: self.print_text_address(),
            },
        ]
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::host()
    }
}

static CAPTURE: Mutex<Option<Vec<u8>>> = Mutex::new(None);
/// Held for the whole of one [`capture_output`] call.
static CAPTURE_OWNER: Mutex<()> = Mutex::new(());

fn emit(bytes: &[u8]) {
    if let Some(buffer) = CAPTURE.lock().as_mut() {
        buffer.extend_from_slice(bytes);
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(bytes);
    let _ = stdout.flush();
}

extern "C" fn host_print_integer(value: i64) {
    emit(value.to_string().as_bytes());
}

extern "C" fn host_print_text(ptr: *const u8, len: usize) {
    if ptr.is_null() || len == 0 {
        return;
    }
    // SAFETY: generated code passes a pointer into its own embedded text
    // together with that text's length
    let bytes = unsafe { std::slice::from_raw_parts(ptr, len) };
    emit(bytes);
}

struct CaptureReset;

impl Drop for CaptureReset {
    fn drop(&mut self) {
        *CAPTURE.lock() = None;
    }
}

/// Runs `f` with the host intrinsics writing into a buffer instead of
/// stdout, returning `f`'s result and everything printed.
///
/// Captures are process-wide and serialized: a second caller blocks until
/// the first returns.
pub fn capture_output<R>(f: impl FnOnce() -> R) -> (R, Vec<u8>) {
    let _owner = CAPTURE_OWNER.lock();
    *CAPTURE.lock() = Some(Vec::new());
    let reset = CaptureReset;
    let result = f();
    let output = CAPTURE.lock().take().unwrap_or_default();
    drop(reset);
    (result, output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_expose_addresses() {
        let intrinsics = Intrinsics::host();
        let [integer, text] = intrinsics.bindings();
        assert_eq!(integer.name, "print_integer");
        assert_eq!(integer.arity, 1);
        assert_eq!(integer.address, intrinsics.print_integer as usize);
        assert_eq!(text.name, "print_text");
        assert_eq!(text.arity, 2);
        assert_ne!(text.address, 0);
    }

    #[test]
    fn capture_collects_host_output() {
        let intrinsics = Intrinsics::host();
        let ((), out) = capture_output(|| {
            (intrinsics.print_integer)(-42);
            (intrinsics.print_text)(b" ok\n".as_ptr(), 4);
            (intrinsics.print_text)(std::ptr::null(), 3);
        });
        assert_eq!(out, b"-42 ok\n");
    }

    #[test]
    fn capture_is_reset_after_panic() {
        let result = std::panic::catch_unwind(|| {
            capture_output::<()>(|| panic!("boom"));
        });
        assert!(result.is_err());
        let ((), out) = capture_output(|| (Intrinsics::host().print_integer)(7));
        assert_eq!(out, b"7");
    }
}
