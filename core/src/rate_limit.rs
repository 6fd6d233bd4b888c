// Poisoned mutex should fail the program
#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use classdeck_protocol::SessionCode;

/// Minimum spacing between evaluator calls for one student.
const MIN_INTERVAL: Duration = Duration::from_secs(10);

/// Idle slots are forgotten this long after the last accepted call.
const SLOT_EXPIRY: Duration = Duration::from_secs(20);

/// Process-wide evaluator throttle keyed by `(session, student)`.
///
/// This is the per-key minimum interval of the two-level scheme; the summary
/// scheduler's batch quota is layered on top independently.
#[derive(Default)]
pub struct EvaluationThrottle {
    slots: Mutex<HashMap<(SessionCode, String), Instant>>,
}

impl EvaluationThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when a call for this student may proceed now, and
    /// records it. Callers that get `false` simply skip the evaluation.
    pub fn try_acquire(&self, code: &SessionCode, student: &str) -> bool {
        self.try_acquire_at(code, student, Instant::now())
    }

    fn try_acquire_at(&self, code: &SessionCode, student: &str, now: Instant) -> bool {
        let mut slots = self.slots.lock().unwrap();
        slots.retain(|_, last| now.duration_since(*last) < SLOT_EXPIRY);

        let key = (code.clone(), student.to_string());
        match slots.get(&key) {
            Some(last) if now.duration_since(*last) < MIN_INTERVAL => false,
            _ => {
                slots.insert(key, now);
                true
            }
        }
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> SessionCode {
        "abcdef".parse().unwrap()
    }

    #[test]
    fn second_call_within_window_is_refused() {
        let throttle = EvaluationThrottle::new();
        let start = Instant::now();
        assert!(throttle.try_acquire_at(&code(), "Alice", start));
        assert!(!throttle.try_acquire_at(&code(), "Alice", start + Duration::from_secs(2)));
        assert!(!throttle.try_acquire_at(&code(), "Alice", start + Duration::from_secs(9)));
        assert!(throttle.try_acquire_at(&code(), "Alice", start + Duration::from_secs(10)));
    }

    #[test]
    fn students_are_throttled_independently() {
        let throttle = EvaluationThrottle::new();
        let start = Instant::now();
        assert!(throttle.try_acquire_at(&code(), "Alice", start));
        assert!(throttle.try_acquire_at(&code(), "Bob", start));
        let other: SessionCode = "ghijkl".parse().unwrap();
        assert!(throttle.try_acquire_at(&other, "Alice", start));
    }

    #[test]
    fn slots_expire_after_quiet_period() {
        let throttle = EvaluationThrottle::new();
        let start = Instant::now();
        assert!(throttle.try_acquire_at(&code(), "Alice", start));
        assert_eq!(throttle.slot_count(), 1);

        // A different student's acquisition past the expiry purges Alice.
        assert!(throttle.try_acquire_at(&code(), "Bob", start + Duration::from_secs(21)));
        assert_eq!(throttle.slot_count(), 1);
    }
}
