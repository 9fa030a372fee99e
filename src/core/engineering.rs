//! Engineering test mode: synthetic breaths at a fixed period.
//!
//! The override is gated by an unlock code. It is active only while the
//! stored token matches the code and the stored period is non-zero.

use std::sync::atomic::{AtomicU64, Ordering};

/// The one unlock code accepted by [`EngineeringOverride::set`].
pub const ENGINEERING_UNLOCK_CODE: u32 = 0x2B4E_E0F9;

/// Override state shared between request handlers and the sampling worker.
///
/// Token and period are packed into a single word so a reader always sees
/// a matching pair.
#[derive(Debug, Default)]
pub struct EngineeringOverride {
    packed: AtomicU64,
}

#[inline]
fn pack(unlock: u32, period_ms: u32) -> u64 {
    (u64::from(unlock) << 32) | u64::from(period_ms)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

impl EngineeringOverride {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new override period.
    ///
    /// A wrong token with a non-zero period changes nothing. A zero period
    /// always disables the override, whatever the token.
    pub fn set(&self, unlock: u32, period_ms: u32) {
        if period_ms == 0 {
            self.reset();
            return;
        }

        if unlock == ENGINEERING_UNLOCK_CODE {
            self.packed.store(pack(unlock, period_ms), Ordering::Release);
            tracing::warn!(period_ms, "Engineering breath override enabled");
        } else {
            tracing::debug!("Engineering override rejected: bad unlock code");
        }
    }

    /// Currently stored period in milliseconds (0 when disabled).
    pub fn period_ms(&self) -> u32 {
        unpack(self.packed.load(Ordering::Acquire)).1
    }

    /// The period to simulate, if the override is active.
    pub fn active_period(&self) -> Option<u32> {
        let (unlock, period_ms) = unpack(self.packed.load(Ordering::Acquire));
        (unlock == ENGINEERING_UNLOCK_CODE && period_ms != 0).then_some(period_ms)
    }

    /// Disable the override.
    pub fn reset(&self) {
        if self.packed.swap(0, Ordering::AcqRel) != 0 {
            tracing::info!("Engineering breath override disabled");
        }
    }
}
