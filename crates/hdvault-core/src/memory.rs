//! Memory protection for secret buffers
//!
//! Two hardening measures for seed material:
//!
//! 1. **Core dump prevention** via `setrlimit(RLIMIT_CORE, 0)`, so a crash never
//!    writes entropy to disk.
//!
//! 2. **Memory locking** via `mlock()` for [`SecretBytes`], so the OS does not
//!    swap entropy or derived keys out.
//!
//! Both are best-effort. Failures are logged and never abort the caller, since
//! containers and unprivileged users frequently cannot lock pages.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};

use zeroize::Zeroize;

static CORE_DUMPS_DISABLED: AtomicBool = AtomicBool::new(false);

/// Disable core dumps for the current process.
///
/// Returns `true` if core dumps are (now) disabled. Safe to call repeatedly.
///
/// # Example
/// ```
/// hdvault_core::memory::disable_core_dumps();
/// ```
pub fn disable_core_dumps() -> bool {
    if CORE_DUMPS_DISABLED.swap(true, Ordering::SeqCst) {
        return true;
    }

    #[cfg(unix)]
    {
        unix::disable_core_dumps_impl()
    }

    #[cfg(not(unix))]
    {
        log::warn!("core dump prevention not supported on this platform");
        false
    }
}

/// Lock a memory region so it cannot be swapped to disk.
///
/// # Safety
///
/// `ptr` must point to a live allocation of at least `len` bytes, and the region
/// must be unlocked before it is freed (or the process must exit).
unsafe fn mlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::mlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        false
    }
}

/// # Safety
///
/// `ptr` and `len` must match a previous successful [`mlock`].
unsafe fn munlock(ptr: *const u8, len: usize) -> bool {
    if len == 0 {
        return true;
    }

    #[cfg(unix)]
    {
        unix::munlock_impl(ptr, len)
    }

    #[cfg(not(unix))]
    {
        let _ = (ptr, len);
        true
    }
}

/// A fixed-length secret buffer: mlocked on creation, zeroized and unlocked on drop.
///
/// Holds entropy and other plaintext for exactly the lifetime of one request.
/// Because wiping happens in `Drop`, every exit path (early return, `?`,
/// unwinding) leaves zeros behind.
///
/// # Example
/// ```
/// use hdvault_core::memory::SecretBytes;
/// let buf = SecretBytes::from_slice(&[0xAB; 16]);
/// assert_eq!(buf.len(), 16);
/// // zeroized and unlocked when `buf` goes out of scope
/// ```
pub struct SecretBytes {
    data: Vec<u8>,
    locked: bool,
}

impl SecretBytes {
    /// Allocate a zero-filled buffer of `len` bytes and lock it in memory.
    pub fn zeroed(len: usize) -> Self {
        let data = vec![0u8; len];
        let locked = unsafe { mlock(data.as_ptr(), data.len()) };
        if !locked {
            log::debug!("mlock unavailable for {} byte secret buffer", len);
        }
        Self { data, locked }
    }

    /// Copy `bytes` into a fresh locked buffer.
    ///
    /// The caller remains responsible for wiping its own copy.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.data.copy_from_slice(bytes);
        buf
    }

    /// Move `bytes` into a locked buffer, wiping the source vector.
    pub fn from_vec(mut bytes: Vec<u8>) -> Self {
        let buf = Self::from_slice(&bytes);
        bytes.zeroize();
        buf
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Whether the pages are actually locked.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.data.len())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        // Zeroize before unlocking
        self.data.as_mut_slice().zeroize();

        if self.locked && !self.data.is_empty() {
            unsafe {
                munlock(self.data.as_ptr(), self.data.len());
            }
        }
    }
}

// ---- Platform implementations ----

#[cfg(unix)]
mod unix {
    pub fn disable_core_dumps_impl() -> bool {
        // SAFETY: setrlimit with RLIMIT_CORE=0 is a plain POSIX call
        unsafe {
            let rlim = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            if libc::setrlimit(libc::RLIMIT_CORE, &rlim) != 0 {
                let errno = std::io::Error::last_os_error();
                log::warn!("failed to disable core dumps: {}", errno);
                return false;
            }
        }
        true
    }

    pub unsafe fn mlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::mlock(ptr as *const libc::c_void, len) == 0
    }

    pub unsafe fn munlock_impl(ptr: *const u8, len: usize) -> bool {
        libc::munlock(ptr as *const libc::c_void, len) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_core_dumps_is_idempotent() {
        let first = disable_core_dumps();
        eprintln!("Core dump disable result: {}", first);

        assert!(disable_core_dumps(), "second call reports already disabled");
    }

    #[test]
    fn test_from_slice_copies_contents() {
        let buf = SecretBytes::from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&buf[..], &[0xDE, 0xAD, 0xBE, 0xEF]);
        // mlock may be refused in sandboxes; only check it doesn't crash
        eprintln!("Buffer locked: {}", buf.is_locked());
    }

    #[test]
    fn test_from_vec_keeps_contents() {
        let buf = SecretBytes::from_vec(vec![0x11u8; 32]);
        assert_eq!(buf.len(), 32);
        assert!(buf.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_zero_length_buffer() {
        let buf = SecretBytes::zeroed(0);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_wipe_path_zeroes_contents() {
        let mut buf = SecretBytes::zeroed(32);
        buf.as_mut_slice().fill(0xFF);
        assert!(buf.iter().all(|&b| b == 0xFF));

        // Same call Drop performs
        buf.data.as_mut_slice().zeroize();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_debug_is_redacted() {
        let buf = SecretBytes::from_slice(b"secret");
        let shown = format!("{:?}", buf);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("REDACTED"));
    }
}
