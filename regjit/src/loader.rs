//! Maps compiled code into executable memory and runs it.
//!
//! The mapping is writable while the code is copied in and read+execute
//! afterwards; it is never both.

use std::fmt;
use std::ptr::NonNull;

use memory::{map_memory, page_align, protect_memory_read_exec, unmap_memory};

use crate::program::CompiledProgram;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    MapFailed { size: usize },
    ProtectFailed { size: usize },
    EntryOutOfBounds { entry: usize, len: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MapFailed { size } => {
                write!(f, "could not map {size} bytes for code")
            }
            Self::ProtectFailed { size } => {
                write!(f, "could not make {size} bytes of code executable")
            }
            Self::EntryOutOfBounds { entry, len } => {
                write!(
                    f,
                    "entry 0x{entry:04x} lies outside {len} bytes of code"
                )
            }
        }
    }
}

impl std::error::Error for LoadError {}

/// Read+execute copy of a code buffer, unmapped on drop.
#[derive(Debug)]
pub struct ExecutableImage {
    ptr: NonNull<u8>,
    len: usize,
    code_len: usize,
}

impl ExecutableImage {
    pub fn load(code: &[u8]) -> Result<Self, LoadError> {
        let len = page_align(code.len());
        let ptr = map_memory(len).ok_or(LoadError::MapFailed { size: len })?;
        // SAFETY: the fresh mapping is writable and at least `code.len()`
        // bytes long
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr.as_ptr(), code.len());
        }
        if !protect_memory_read_exec(ptr, len) {
            unmap_memory(ptr, len);
            return Err(LoadError::ProtectFailed { size: len });
        }
        log::debug!(
            "loaded {} byte(s) at {:p} ({len} mapped)",
            code.len(),
            ptr.as_ptr()
        );
        Ok(Self {
            ptr,
            len,
            code_len: code.len(),
        })
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// Calls `entry` as `extern "C" fn()`.
    ///
    /// # Safety
    /// `entry` must be the start of a function in this image that returns
    /// normally, and every host address baked into the code must still be
    /// valid.
    pub unsafe fn run(&self, entry: usize) -> Result<(), LoadError> {
        if entry >= self.code_len {
            return Err(LoadError::EntryOutOfBounds {
                entry,
                len: self.code_len,
            });
        }
        // SAFETY: entry is inside the executable mapping; the caller
        // vouches for the code behind it
        let function: extern "C" fn() = unsafe {
            std::mem::transmute::<*mut u8, extern "C" fn()>(
                self.ptr.as_ptr().add(entry),
            )
        };
        function();
        Ok(())
    }
}

impl Drop for ExecutableImage {
    fn drop(&mut self) {
        unmap_memory(self.ptr, self.len);
    }
}

/// Loads `program` and runs its entry trampoline to completion.
pub fn execute(program: &CompiledProgram) -> Result<(), LoadError> {
    let image = ExecutableImage::load(program.machine_code())?;
    log::info!("running entry at 0x{:04x}", program.entry());
    // SAFETY: the entry trampoline saves and restores every register and
    // returns; the program keeps its intrinsics alive
    unsafe { image.run(program.entry()) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_a_bare_return() {
        let image = ExecutableImage::load(&[0xC3]).expect("load");
        assert_eq!(image.code_len(), 1);
        // SAFETY: offset 0 is a `ret`
        unsafe { image.run(0) }.expect("run");
    }

    #[test]
    fn entry_must_lie_inside_the_code() {
        let image = ExecutableImage::load(&[0x90, 0xC3]).expect("load");
        // SAFETY: rejected before anything runs
        let err = unsafe { image.run(2) }.expect_err("out of bounds");
        assert_eq!(err, LoadError::EntryOutOfBounds { entry: 2, len: 2 });
    }

    #[test]
    fn runs_from_a_nonzero_entry() {
        // ud2 at 0 would fault if it were executed
        let image = ExecutableImage::load(&[0x0F, 0x0B, 0x90, 0xC3]).expect("load");
        // SAFETY: offset 2 is `nop; ret`
        unsafe { image.run(2) }.expect("run");
    }

    #[test]
    fn load_error_messages() {
        assert_eq!(
            LoadError::MapFailed { size: 4096 }.to_string(),
            "could not map 4096 bytes for code"
        );
        assert_eq!(
            LoadError::EntryOutOfBounds { entry: 16, len: 8 }.to_string(),
            "entry 0x0010 lies outside 8 bytes of code"
        );
    }
}
