use ahash::AHashMap as HashMap;
use std::time::{Duration, Instant};

/// How long an error message stays muted after it was logged.
pub const ERROR_LOG_TIMEOUT: Duration = Duration::from_secs(60);

/// Mutes repeated reconciliation errors.
///
/// Watches redeliver failing objects on every resync, which would otherwise log the same error
/// over and over.
#[derive(Debug, Default)]
pub struct ErrorLog {
    logged: HashMap<String, Instant>,
}

impl ErrorLog {
    /// Returns true if `msg` should be logged at `now`.
    ///
    /// A message is logged the first time it is seen and then again only once strictly more than
    /// [`ERROR_LOG_TIMEOUT`] has passed since it was last logged.
    pub fn should_log(&mut self, msg: &str, now: Instant) -> bool {
        match self.logged.get_mut(msg) {
            Some(last) if now.saturating_duration_since(*last) <= ERROR_LOG_TIMEOUT => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                // Expired messages would be logged anyway.
                self.logged
                    .retain(|_, last| now.saturating_duration_since(*last) <= ERROR_LOG_TIMEOUT);
                self.logged.insert(msg.to_string(), now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutes_until_timeout_passes() {
        let mut log = ErrorLog::default();
        let msg = "I am an error string";
        let start = Instant::now();

        assert!(log.should_log(msg, start));
        assert!(!log.should_log(msg, start + ERROR_LOG_TIMEOUT));
        assert!(log.should_log(msg, start + ERROR_LOG_TIMEOUT + Duration::from_nanos(1)));

        // The timeout restarts once a message is logged again.
        assert!(!log.should_log(msg, start + ERROR_LOG_TIMEOUT + Duration::from_secs(1)));
    }

    #[test]
    fn expired_messages_are_forgotten() {
        let mut log = ErrorLog::default();
        let start = Instant::now();
        assert!(log.should_log("a", start));
        assert!(log.should_log("b", start + Duration::from_secs(30)));

        let later = start + ERROR_LOG_TIMEOUT + Duration::from_secs(1);
        assert!(log.should_log("c", later));
        assert_eq!(log.logged.len(), 2);
        assert!(!log.logged.contains_key("a"));

        // "b" is still muted.
        assert!(!log.should_log("b", later));
    }

    #[test]
    fn messages_are_muted_independently() {
        let mut log = ErrorLog::default();
        let now = Instant::now();
        assert!(log.should_log("a", now));
        assert!(log.should_log("b", now));
        assert!(!log.should_log("a", now));
    }
}
