use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::interrupts::{pop_off, push_off, SavedFlag};

/// Busy-wait lock used by the allocator.
///
/// A mutex made with [`KernelMutex::new_deferred`] starts in boot mode: the
/// data is still reached through a guard, but interrupts are left untouched
/// because only one execution context exists yet. [`KernelMutex::enable`]
/// switches it to full mode, where holding a guard also masks interrupts on
/// the current CPU.
pub struct KernelMutex<T> {
    inner: spin::Mutex<T>,
    enabled: AtomicBool,
}

pub struct KernelMutexGuard<'a, T> {
    guard: ManuallyDrop<spin::MutexGuard<'a, T>>,
    saved: Option<SavedFlag>,
}

impl<T> KernelMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
            enabled: AtomicBool::new(true),
        }
    }

    pub const fn new_deferred(data: T) -> Self {
        Self {
            inner: spin::Mutex::new(data),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn lock(&self) -> KernelMutexGuard<'_, T> {
        let saved = self.is_enabled().then(push_off);

        KernelMutexGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            saved,
        }
    }
}

impl<'a, T> Deref for KernelMutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<'a, T> DerefMut for KernelMutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<'a, T> Drop for KernelMutexGuard<'a, T> {
    fn drop(&mut self) {
        // release the spin lock before interrupts can come back
        unsafe { ManuallyDrop::drop(&mut self.guard) };

        if let Some(saved) = self.saved.take() {
            pop_off(saved);
        }
    }
}
