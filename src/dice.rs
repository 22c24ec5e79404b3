//! Dice randomness source
//!
//! Production rolls come from the thread-local CSPRNG so values are
//! unpredictable to players. Tests substitute a scripted source to drive
//! the state machine deterministically.

use rand::Rng;

/// Source of dice rolls for game sessions.
pub trait DiceRoller: Send + Sync {
    /// Draw a value uniformly from 1..=6.
    fn roll(&self) -> u8;
}

/// Default roller backed by the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngDice;

impl DiceRoller for ThreadRngDice {
    fn roll(&self) -> u8 {
        rand::thread_rng().gen_range(1..=6)
    }
}

/// Deterministic roller that replays a fixed script, wrapping around when
/// exhausted. Test-only by convention, but kept public so integration tests
/// can use it.
#[derive(Debug)]
pub struct ScriptedDice {
    values: Vec<u8>,
    cursor: std::sync::atomic::AtomicUsize,
}

impl ScriptedDice {
    pub fn new(values: Vec<u8>) -> Self {
        assert!(!values.is_empty(), "dice script cannot be empty");
        assert!(values.iter().all(|v| (1..=6).contains(v)));
        Self {
            values,
            cursor: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

impl DiceRoller for ScriptedDice {
    fn roll(&self) -> u8 {
        let i = self
            .cursor
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.values[i % self.values.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_rng_in_range() {
        let dice = ThreadRngDice;
        for _ in 0..100 {
            let v = dice.roll();
            assert!((1..=6).contains(&v));
        }
    }

    #[test]
    fn test_scripted_replays_and_wraps() {
        let dice = ScriptedDice::new(vec![6, 3, 1]);
        assert_eq!(dice.roll(), 6);
        assert_eq!(dice.roll(), 3);
        assert_eq!(dice.roll(), 1);
        assert_eq!(dice.roll(), 6);
    }
}
