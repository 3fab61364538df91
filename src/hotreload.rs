//! The narrow interface a RAD (runtime-asset-development) plugin loader
//! consumes (SPEC_FULL.md §6). This crate does not watch shared libraries
//! or `dlopen` anything — that lives entirely outside its scope (§1) — it
//! only specifies the call signature and a swappable handle for the
//! resulting pointer.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Signature every hot-reloadable plugin exports: given the previous
/// module's `api` pointer (or null on first load) and whether this call is
/// a reload, returns the new `api` pointer.
pub type RadApiFn = unsafe extern "C" fn(previous_api: *mut c_void, is_reload: bool) -> *mut c_void;

/// A lock-free swappable slot for a plugin's `api` pointer.
///
/// The loader calls [`RadHandle::swap`] after re-invoking a plugin's
/// `RadApiFn`; readers elsewhere read the latest value with [`RadHandle::get`]
/// without ever blocking a hot-reload in progress.
pub struct RadHandle {
    api: AtomicPtr<c_void>,
}

impl RadHandle {
    pub fn new() -> Self {
        RadHandle {
            api: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// The current `api` pointer, or null if no plugin has loaded yet.
    pub fn get(&self) -> *mut c_void {
        self.api.load(Ordering::Acquire)
    }

    /// Installs `new_api`, returning the previous value — the same value a
    /// `RadApiFn` receives as `previous_api` on its next reload.
    pub fn swap(&self, new_api: *mut c_void) -> *mut c_void {
        self.api.swap(new_api, Ordering::AcqRel)
    }
}

impl Default for RadHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_null() {
        let handle = RadHandle::new();
        assert!(handle.get().is_null());
    }

    #[test]
    fn swap_returns_previous_and_installs_new() {
        let handle = RadHandle::new();
        let a = 1 as *mut c_void;
        let b = 2 as *mut c_void;
        let prev = handle.swap(a);
        assert!(prev.is_null());
        let prev2 = handle.swap(b);
        assert_eq!(prev2, a);
        assert_eq!(handle.get(), b);
    }
}
