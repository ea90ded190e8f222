use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Emit-or-suppress decision for one name.
///
/// Greets when the name was never greeted or strictly more than `cooldown`
/// has elapsed since the last greeting.
pub fn should_greet(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.signed_duration_since(last) > cooldown,
    }
}

/// Last greeting time per identity name. Entries are only ever overwritten.
#[derive(Debug, Default)]
pub struct GreetingCooldowns {
    last_greeted: HashMap<String, DateTime<Utc>>,
}

impl GreetingCooldowns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_greet(&self, name: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        should_greet(self.last_greeted(name), now, cooldown)
    }

    pub fn record(&mut self, name: &str, now: DateTime<Utc>) {
        self.last_greeted.insert(name.to_string(), now);
    }

    pub fn last_greeted(&self, name: &str) -> Option<DateTime<Utc>> {
        self.last_greeted.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.last_greeted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_greeted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn first_sighting_greets_and_immediate_repeat_does_not() {
        let mut cooldowns = GreetingCooldowns::new();
        let cooldown = Duration::seconds(30);
        for now in [at(0), at(1234)] {
            let name = format!("person-{}", now.timestamp());
            assert!(cooldowns.should_greet(&name, now, cooldown));
            cooldowns.record(&name, now);
            assert!(!cooldowns.should_greet(&name, now, cooldown));
        }
    }

    #[test]
    fn greets_again_only_after_cooldown_strictly_elapsed() {
        let cooldown = Duration::seconds(30);
        assert!(!should_greet(Some(at(0)), at(10), cooldown));
        assert!(!should_greet(Some(at(0)), at(30), cooldown));
        assert!(should_greet(Some(at(0)), at(31), cooldown));
    }

    #[test]
    fn names_are_tracked_independently() {
        let mut cooldowns = GreetingCooldowns::new();
        let cooldown = Duration::seconds(30);

        cooldowns.record("Alice", at(0));
        cooldowns.record("Bob", at(20));

        // Bob's greeting did not reset Alice.
        assert!(cooldowns.should_greet("Alice", at(31), cooldown));
        assert!(!cooldowns.should_greet("Bob", at(31), cooldown));
        assert!(cooldowns.should_greet("Bob", at(51), cooldown));
        assert_eq!(cooldowns.last_greeted("Alice"), Some(at(0)));
        assert_eq!(cooldowns.len(), 2);
    }

    #[test]
    fn clock_going_backwards_suppresses() {
        assert!(!should_greet(Some(at(100)), at(50), Duration::seconds(30)));
    }

    #[test]
    fn zero_cooldown_greets_on_any_later_tick() {
        assert!(should_greet(Some(at(0)), at(1), Duration::zero()));
        assert!(!should_greet(Some(at(0)), at(0), Duration::zero()));
    }
}
