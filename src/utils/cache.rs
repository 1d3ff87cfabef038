// Recently processed webhook event ids
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// The gateway retries failed deliveries for up to a day
pub const EVENT_TTL: Duration = Duration::from_secs(24 * 3600);

lazy_static::lazy_static! {
    static ref SEEN_EVENTS: RwLock<HashMap<String, Instant>> = RwLock::new(HashMap::new());
}

/// Records `event_id` and returns `true` if it was already seen within the TTL.
pub fn check_and_mark_event(event_id: &str) -> bool {
    let now = Instant::now();

    let mut seen = match SEEN_EVENTS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    seen.retain(|_, at| now.duration_since(*at) < EVENT_TTL);

    if seen.contains_key(event_id) {
        return true;
    }

    seen.insert(event_id.to_string(), now);
    false
}

/// Forgets an event so a redelivery is processed again (used when handling failed).
pub fn forget_event(event_id: &str) {
    if let Ok(mut seen) = SEEN_EVENTS.write() {
        seen.remove(event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_delivery_is_not_duplicate() {
        assert!(!check_and_mark_event("evt_cache_first"));
        assert!(check_and_mark_event("evt_cache_first"));
    }

    #[test]
    fn test_forget_allows_redelivery() {
        assert!(!check_and_mark_event("evt_cache_forget"));
        forget_event("evt_cache_forget");
        assert!(!check_and_mark_event("evt_cache_forget"));
    }
}
