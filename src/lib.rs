// Physical page allocator and page replacement core for the kernel.
#![cfg_attr(not(test), no_std)]

pub mod interrupts;
pub mod logger;
pub mod memory;
pub mod sync;
