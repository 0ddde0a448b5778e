use std::fmt;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::traits::Clock;

/// Handle returned by listener registration; pass it back to unregister.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ListenerId(pub u64);

/// Sequence number of a queued operation within its queue.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Alphabet ordered by ASCII value so generated keys sort like their timestamps.
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_CHARS: usize = 8;
const RANDOM_CHARS: usize = 12;

/// Generates 20-character push keys: 8 characters of timestamp followed by
/// 12 random characters. Keys generated in the same millisecond increment the
/// random suffix, so they stay unique and strictly increasing.
pub struct IdGenerator {
    clock: Rc<dyn Clock>,
    rng: StdRng,
    last_time: Option<u64>,
    last_random: [u8; RANDOM_CHARS],
}

impl IdGenerator {
    pub fn new(clock: Rc<dyn Clock>, seed: u64) -> Self {
        Self {
            clock,
            rng: StdRng::seed_from_u64(seed),
            last_time: None,
            last_random: [0; RANDOM_CHARS],
        }
    }

    pub fn next_key(&mut self) -> String {
        let now = self.clock.now_millis();
        let duplicate_time = self.last_time == Some(now);
        self.last_time = Some(now);

        let mut out = [0u8; TIME_CHARS + RANDOM_CHARS];
        let mut time = now;
        for slot in out[..TIME_CHARS].iter_mut().rev() {
            *slot = PUSH_CHARS[(time % 64) as usize];
            time /= 64;
        }

        if duplicate_time {
            self.increment_random();
        } else {
            for digit in &mut self.last_random {
                *digit = self.rng.gen_range(0..64);
            }
        }
        for (slot, digit) in out[TIME_CHARS..].iter_mut().zip(self.last_random) {
            *slot = PUSH_CHARS[digit as usize];
        }

        out.iter().map(|&b| char::from(b)).collect()
    }

    fn increment_random(&mut self) {
        for digit in self.last_random.iter_mut().rev() {
            if *digit == 63 {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
    }
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator")
            .field("last_time", &self.last_time)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ManualClock;

    #[test]
    fn same_millisecond_keys_increase() {
        let clock = ManualClock::new(1_700_000_000_000);
        let mut ids = IdGenerator::new(Rc::new(clock), 7);
        let keys = (0..50).map(|_| ids.next_key()).collect::<Vec<_>>();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert!(keys.iter().all(|k| k.len() == 20));
    }

    #[test]
    fn later_time_sorts_after() {
        let clock = ManualClock::new(1_000);
        let mut ids = IdGenerator::new(Rc::new(clock.clone()), 1);
        let first = ids.next_key();
        clock.advance(1);
        let second = ids.next_key();
        assert!(first[..8] < second[..8]);
    }

    #[test]
    fn seeds_are_reproducible() {
        let a = IdGenerator::new(Rc::new(ManualClock::new(5)), 42).next_key();
        let b = IdGenerator::new(Rc::new(ManualClock::new(5)), 42).next_key();
        assert_eq!(a, b);
    }
}
