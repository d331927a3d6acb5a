//! # Event Generator
//!
//! Deterministic linear congruential generator standing in for a real
//! activity source. Every value it yields is classified by parity into one
//! of the two supervisor channels.
//!
//! The state advances as `seed' = seed * 1664525 + 1013904223` modulo 2^32.
//! The wrap is the modulus, not an overflow bug. With an odd multiplier and
//! an odd increment the low bit alternates on every step, so the channel
//! sequence alternates too.

use crate::channel::ChannelId;

/// LCG multiplier (Numerical Recipes).
pub const MULTIPLIER: u32 = 1_664_525;

/// LCG increment (Numerical Recipes).
pub const INCREMENT: u32 = 1_013_904_223;

/// 32-bit linear congruential generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lcg {
    seed: u32,
}

impl Lcg {
    pub const fn new(seed: u32) -> Self {
        Self { seed }
    }

    /// Current state, i.e. the last value returned (or the seed).
    #[inline]
    pub const fn state(&self) -> u32 {
        self.seed
    }

    /// Advance the generator and return the new state.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_mul(MULTIPLIER).wrapping_add(INCREMENT);
        self.seed
    }

    /// Draw the next value and classify it.
    pub fn next_classification(&mut self) -> ChannelId {
        classify(self.next_u32())
    }
}

/// Odd values are user activity, even values are suspicious activity.
#[inline]
pub const fn classify(value: u32) -> ChannelId {
    if value % 2 == 1 {
        ChannelId::User
    } else {
        ChannelId::Suspicious
    }
}
