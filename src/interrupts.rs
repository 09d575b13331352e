// Interrupt flag save/restore around spin-locked sections. Hosted builds
// cannot touch the flag, so both calls are no-ops there.

/// Interrupt flag as it was before [`push_off`] masked interrupts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedFlag(bool);

impl SavedFlag {
    pub fn were_enabled(self) -> bool {
        self.0
    }
}

#[cfg(target_os = "none")]
pub fn push_off() -> SavedFlag {
    use x86_64::instructions::interrupts;

    let enabled = interrupts::are_enabled();
    interrupts::disable();
    SavedFlag(enabled)
}

#[cfg(target_os = "none")]
pub fn pop_off(saved: SavedFlag) {
    if saved.were_enabled() {
        x86_64::instructions::interrupts::enable();
    }
}

#[cfg(not(target_os = "none"))]
pub fn push_off() -> SavedFlag {
    SavedFlag(false)
}

#[cfg(not(target_os = "none"))]
pub fn pop_off(_saved: SavedFlag) {}
