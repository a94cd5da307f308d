use std::ptr::NonNull;

#[cfg(unix)]
#[allow(unused)]
mod unix {
    use core::ffi::c_void;

    pub const PROT_READ: i32 = 0x1;
    pub const PROT_WRITE: i32 = 0x2;
    pub const PROT_EXEC: i32 = 0x4;

    pub const MAP_PRIVATE: i32 = 0x02;

    #[cfg(target_os = "linux")]
    pub const MAP_ANON: i32 = 0x20;
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    pub const MAP_ANON: i32 = 0x1000;

    pub const MAP_FAILED: isize = -1;

    /// posix mmap, mprotect and munmap
    /// # Safety
    /// see valid mmap, mprotect and munmap usage online
    unsafe extern "C" {
        pub fn mmap(
            addr: *mut c_void,
            length: usize,
            prot: i32,
            flags: i32,
            fd: i32,
            offset: isize,
        ) -> *mut c_void;

        pub fn mprotect(addr: *mut c_void, length: usize, prot: i32) -> i32;

        pub fn munmap(addr: *mut c_void, length: usize) -> i32;
    }

    /// private anonymous mapping, readable and writable but never executable
    /// # Safety
    /// null must be checked
    #[inline]
    pub unsafe fn anonymous_mmap(len: usize) -> *mut u8 {
        // SAFETY: safe if contract holds
        let p = unsafe {
            mmap(
                core::ptr::null_mut(),
                len,
                PROT_READ | PROT_WRITE,
                MAP_PRIVATE | MAP_ANON,
                -1,
                0,
            )
        };
        if (p as isize) == MAP_FAILED {
            core::ptr::null_mut()
        } else {
            p as *mut u8
        }
    }

    /// drops write access and grants execute access in one call
    /// # Safety
    /// must be allocated by mmap with at least `len` bytes
    #[inline]
    pub unsafe fn protect_read_exec(ptr: *mut u8, len: usize) -> bool {
        // SAFETY: safe if contract holds
        unsafe { mprotect(ptr.cast(), len, PROT_READ | PROT_EXEC) == 0 }
    }

    /// posix memory deallocation using munmap
    /// # Safety
    /// must be allocated by mmmap
    #[inline]
    pub unsafe fn anonymous_munmap(ptr: *mut u8, len: usize) {
        // SAFETY: safe if contract holds
        let _ = unsafe { munmap(ptr.cast(), len) };
    }
}

pub const OS_PAGE_SIZE: usize = 4096;

/// Rounds `size` up to a whole number of pages (at least one page).
pub fn page_align(size: usize) -> usize {
    let size = size.max(1);
    let rem = size % OS_PAGE_SIZE;
    if rem == 0 {
        size
    } else {
        size + (OS_PAGE_SIZE - rem)
    }
}

/// Maps `size` bytes of fresh, zeroed, read+write memory.
#[must_use]
pub fn map_memory(size: usize) -> Option<NonNull<u8>> {
    // SAFETY: this is safe
    let ptr = unsafe { unix::anonymous_mmap(size) };
    NonNull::new(ptr)
}

/// Turns a mapping returned by [`map_memory`] into read+execute memory.
/// Returns `false` if the kernel refused the transition.
#[must_use]
pub fn protect_memory_read_exec(ptr: NonNull<u8>, size: usize) -> bool {
    // SAFETY: ptr must be from mmap allocation of at least `size` bytes
    unsafe { unix::protect_read_exec(ptr.as_ptr(), size) }
}

pub fn unmap_memory(ptr: NonNull<u8>, size: usize) {
    // SAFETY: ptr must be from mmap allocation
    unsafe { unix::anonymous_munmap(ptr.as_ptr(), size) };
}
