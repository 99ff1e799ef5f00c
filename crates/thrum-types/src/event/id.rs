use std::sync::Mutex;

use ulid::{Generator, Ulid};

/// Monotonic ULID source for one actor.
///
/// `ulid::Generator` guarantees strictly increasing ids within one
/// millisecond by incrementing the random component; on the (astronomically
/// unlikely) overflow of that component we fall back to a fresh random
/// ULID, which stays unique but may sort before the previous id.
pub struct EventIdGen {
    inner: Mutex<Generator>,
}

impl EventIdGen {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Generator::new()),
        }
    }

    pub fn next(&self) -> Ulid {
        let mut generator = self.inner.lock().expect("id generator mutex poisoned");
        generator.generate().unwrap_or_else(|_| Ulid::new())
    }
}

impl Default for EventIdGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_monotonic() {
        let ids = EventIdGen::new();
        let mut prev = ids.next();
        for _ in 0..1000 {
            let next = ids.next();
            assert!(next > prev, "{} !> {}", next, prev);
            prev = next;
        }
    }
}
