// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use crate::host::StreamVariant;

/// Consecutive valid raw callbacks needed to lock onto the raw stream.
pub const RAW_LOCK_THRESHOLD: u32 = 3;
/// Consecutive invalid raw callbacks that abandon the raw stream.
pub const RAW_FAILOVER_THRESHOLD: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterState {
    Unknown,
    RawLocked,
    AlternateLocked,
}

impl ArbiterState {
    pub fn locked_variant(self) -> Option<StreamVariant> {
        match self {
            Self::Unknown => None,
            Self::RawLocked => Some(StreamVariant::Raw),
            Self::AlternateLocked => Some(StreamVariant::Alternate),
        }
    }
}

/// Chooses between the raw and alternate wideband streams.
///
/// ```text
/// Unknown --3 valid raw--> RawLocked --10 invalid raw--> AlternateLocked
///    |                                                        ^
///    +--10 invalid raw, or sane alternate before raw ---------+
/// ```
///
/// There is no way back to raw once it has been abandoned.
#[derive(Debug, Clone)]
pub struct StreamArbiter {
    state: ArbiterState,
    raw_good: u32,
    raw_bad: u32,
    raw_seen_valid: bool,
}

impl Default for StreamArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamArbiter {
    pub fn new() -> Self {
        Self {
            state: ArbiterState::Unknown,
            raw_good: 0,
            raw_bad: 0,
            raw_seen_valid: false,
        }
    }

    pub fn state(&self) -> ArbiterState {
        self.state
    }

    /// Record one callback and return whether its variant is the locked
    /// one. Rate validity of accepted blocks is resolved by the caller.
    pub fn observe(&mut self, variant: StreamVariant, rate_valid: bool) -> bool {
        match variant {
            StreamVariant::Raw => self.observe_raw(rate_valid),
            StreamVariant::Alternate => self.observe_alternate(rate_valid),
        }
        self.state.locked_variant() == Some(variant)
    }

    fn observe_raw(&mut self, rate_valid: bool) {
        if rate_valid {
            self.raw_seen_valid = true;
            self.raw_good = self.raw_good.saturating_add(1);
            self.raw_bad = 0;
        } else {
            self.raw_bad = self.raw_bad.saturating_add(1);
            self.raw_good = 0;
        }

        match self.state {
            ArbiterState::Unknown if self.raw_good >= RAW_LOCK_THRESHOLD => {
                self.transition(ArbiterState::RawLocked);
            }
            ArbiterState::Unknown | ArbiterState::RawLocked
                if self.raw_bad >= RAW_FAILOVER_THRESHOLD =>
            {
                self.transition(ArbiterState::AlternateLocked);
            }
            _ => {}
        }
    }

    fn observe_alternate(&mut self, rate_valid: bool) {
        // An alternate stream that proves sane first wins, unless raw is
        // still in its first couple of failures.
        if self.state == ArbiterState::Unknown
            && rate_valid
            && !self.raw_seen_valid
            && (self.raw_bad == 0 || self.raw_bad >= RAW_LOCK_THRESHOLD)
        {
            self.transition(ArbiterState::AlternateLocked);
        }
    }

    fn transition(&mut self, next: ArbiterState) {
        tracing::info!("wideband stream arbiter: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StreamVariant::{Alternate, Raw};

    fn run(events: &[(StreamVariant, bool)]) -> StreamArbiter {
        let mut arb = StreamArbiter::new();
        for &(variant, valid) in events {
            arb.observe(variant, valid);
        }
        arb
    }

    #[test]
    fn three_valid_raw_callbacks_lock_raw() {
        let mut arb = StreamArbiter::new();
        assert!(!arb.observe(Raw, true));
        assert!(!arb.observe(Raw, true));
        assert_eq!(arb.state(), ArbiterState::Unknown);
        assert!(arb.observe(Raw, true));
        assert_eq!(arb.state(), ArbiterState::RawLocked);
        // Alternate is ignored once raw is locked.
        assert!(!arb.observe(Alternate, true));
    }

    #[test]
    fn invalid_callback_breaks_the_valid_run() {
        let arb = run(&[(Raw, true), (Raw, true), (Raw, false), (Raw, true), (Raw, true)]);
        assert_eq!(arb.state(), ArbiterState::Unknown);
    }

    #[test]
    fn ten_invalid_raw_callbacks_fail_over_while_locked() {
        let mut events = vec![(Raw, true); 3];
        events.extend(std::iter::repeat((Raw, false)).take(9));
        let mut arb = run(&events);
        assert_eq!(arb.state(), ArbiterState::RawLocked);
        assert!(!arb.observe(Raw, false));
        assert_eq!(arb.state(), ArbiterState::AlternateLocked);
        assert!(arb.observe(Alternate, true));
    }

    #[test]
    fn valid_raw_resets_the_failure_count() {
        let mut events = vec![(Raw, true); 3];
        events.extend(std::iter::repeat((Raw, false)).take(9));
        events.push((Raw, true));
        events.extend(std::iter::repeat((Raw, false)).take(9));
        assert_eq!(run(&events).state(), ArbiterState::RawLocked);
    }

    #[test]
    fn no_way_back_to_raw() {
        let mut events = vec![(Raw, false); 10];
        events.extend(std::iter::repeat((Raw, true)).take(20));
        let mut arb = run(&events);
        assert_eq!(arb.state(), ArbiterState::AlternateLocked);
        assert!(!arb.observe(Raw, true));
    }

    #[test]
    fn sane_alternate_first_wins_immediately() {
        let mut arb = StreamArbiter::new();
        assert!(arb.observe(Alternate, true));
        assert_eq!(arb.state(), ArbiterState::AlternateLocked);
    }

    #[test]
    fn alternate_wins_when_raw_has_only_failed() {
        let arb = run(&[(Raw, false), (Raw, false), (Raw, false), (Alternate, true)]);
        assert_eq!(arb.state(), ArbiterState::AlternateLocked);

        // Raw has produced a valid callback: alternate must wait.
        let arb = run(&[(Raw, true), (Alternate, true)]);
        assert_eq!(arb.state(), ArbiterState::Unknown);
    }

    #[test]
    fn invalid_alternate_never_locks() {
        let arb = run(&[(Alternate, false), (Alternate, false)]);
        assert_eq!(arb.state(), ArbiterState::Unknown);
    }
}
