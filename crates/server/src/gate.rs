//! Upload password gate with per-client lockout.
//!
//! Failed attempts are counted per client address. Failures further apart
//! than the attempt window start a new count; reaching the limit locks the
//! client out for the lockout duration. A correct password clears the record.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use bookshelf_core::config::UploadConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout: Duration,
    pub window: Duration,
}

impl From<&UploadConfig> for LockoutPolicy {
    fn from(c: &UploadConfig) -> Self {
        Self {
            max_attempts: c.max_failed_attempts.max(1),
            lockout: Duration::from_secs(c.lockout_secs),
            window: Duration::from_secs(c.attempt_window_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid { attempts_left: u32 },
    Locked { retry_after: Duration },
}

#[derive(Debug, Clone, Copy)]
struct AttemptRecord {
    count: u32,
    last_attempt: Instant,
    locked_until: Option<Instant>,
}

impl AttemptRecord {
    /// Still locked, or recent enough to count towards a lockout.
    fn is_live(&self, now: Instant, policy: LockoutPolicy) -> bool {
        self.locked_until.is_some_and(|until| until > now)
            || now.saturating_duration_since(self.last_attempt) <= policy.window
    }
}

pub struct LockoutGate {
    password: Option<String>,
    policy: LockoutPolicy,
    attempts: Mutex<HashMap<String, AttemptRecord>>,
}

impl LockoutGate {
    pub fn new(password: Option<String>, policy: LockoutPolicy) -> Self {
        Self {
            password,
            policy,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> LockoutPolicy {
        self.policy
    }

    /// Check `password` for `client` at `now`.
    pub fn verify(&self, client: &str, password: Option<&str>, now: Instant) -> Verdict {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(record) = attempts.get(client) {
            match record.locked_until {
                Some(until) if until > now => {
                    return Verdict::Locked {
                        retry_after: until - now,
                    }
                }
                Some(_) => {
                    attempts.remove(client);
                }
                None => {}
            }
        }

        let Some(expected) = self.password.as_deref() else {
            return Verdict::Valid;
        };
        if password == Some(expected) {
            attempts.remove(client);
            return Verdict::Valid;
        }

        let policy = self.policy;
        if !attempts.contains_key(client) {
            attempts.retain(|_, r| r.is_live(now, policy));
        }
        let record = attempts
            .entry(client.to_string())
            .and_modify(|r| {
                if now.saturating_duration_since(r.last_attempt) > policy.window {
                    r.count = 0;
                }
            })
            .or_insert(AttemptRecord {
                count: 0,
                last_attempt: now,
                locked_until: None,
            });
        record.count += 1;
        record.last_attempt = now;

        if record.count >= policy.max_attempts {
            record.locked_until = Some(now + policy.lockout);
            tracing::warn!(client, "Upload password locked out after {} failures", record.count);
            return Verdict::Locked {
                retry_after: policy.lockout,
            };
        }
        Verdict::Invalid {
            attempts_left: policy.max_attempts - record.count,
        }
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Client key: first `X-Forwarded-For` entry, else `X-Real-IP`, else `unknown`.
pub fn client_key(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .unwrap_or("unknown")
        .to_string()
}

/// Whole minutes until retry, rounded up.
pub fn retry_minutes(retry_after: Duration) -> u64 {
    retry_after.as_secs().div_ceil(60).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> LockoutGate {
        LockoutGate::new(Some("secret".into()), LockoutPolicy::from(&UploadConfig::default()))
    }

    #[test]
    fn test_counts_down_then_locks() {
        let gate = gate();
        let t0 = Instant::now();
        for left in (1..=4).rev() {
            assert_eq!(
                gate.verify("1.2.3.4", Some("nope"), t0),
                Verdict::Invalid { attempts_left: left }
            );
        }
        assert_eq!(
            gate.verify("1.2.3.4", Some("nope"), t0),
            Verdict::Locked {
                retry_after: Duration::from_secs(900)
            }
        );
        // Even the right password is refused while locked.
        assert!(matches!(
            gate.verify("1.2.3.4", Some("secret"), t0 + Duration::from_secs(60)),
            Verdict::Locked { .. }
        ));
        // Other clients are unaffected.
        assert_eq!(gate.verify("5.6.7.8", Some("secret"), t0), Verdict::Valid);
        // Lock expires.
        assert_eq!(
            gate.verify("1.2.3.4", Some("secret"), t0 + Duration::from_secs(901)),
            Verdict::Valid
        );
    }

    #[test]
    fn test_failures_outside_window_reset() {
        let gate = gate();
        let t0 = Instant::now();
        gate.verify("c", Some("x"), t0);
        gate.verify("c", Some("x"), t0);
        assert_eq!(
            gate.verify("c", Some("x"), t0 + Duration::from_secs(301)),
            Verdict::Invalid { attempts_left: 4 }
        );
    }

    #[test]
    fn test_success_clears_count() {
        let gate = gate();
        let t0 = Instant::now();
        gate.verify("c", None, t0);
        gate.verify("c", Some("x"), t0);
        assert_eq!(gate.verify("c", Some("secret"), t0), Verdict::Valid);
        assert_eq!(gate.verify("c", Some("x"), t0), Verdict::Invalid { attempts_left: 4 });
    }

    #[test]
    fn test_expired_records_are_pruned() {
        let gate = gate();
        let t0 = Instant::now();
        for client in ["a", "b", "c"] {
            gate.verify(client, Some("x"), t0);
        }
        for _ in 0..5 {
            gate.verify("locked", Some("x"), t0);
        }
        assert_eq!(gate.tracked_clients(), 4);

        // Past the attempt window but inside the lockout.
        gate.verify("d", Some("x"), t0 + Duration::from_secs(301));
        assert_eq!(gate.tracked_clients(), 2);
        assert!(matches!(
            gate.verify("locked", Some("secret"), t0 + Duration::from_secs(302)),
            Verdict::Locked { .. }
        ));
    }

    #[test]
    fn test_no_password_accepts_everything() {
        let gate = LockoutGate::new(None, LockoutPolicy::from(&UploadConfig::default()));
        assert_eq!(gate.verify("c", None, Instant::now()), Verdict::Valid);
    }

    #[test]
    fn test_client_key_precedence() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "unknown");
        headers.insert("x-real-ip", "10.0.0.2".parse().unwrap());
        assert_eq!(client_key(&headers), "10.0.0.2");
        headers.insert("x-forwarded-for", " 10.0.0.1 , 10.0.0.9".parse().unwrap());
        assert_eq!(client_key(&headers), "10.0.0.1");
    }

    #[test]
    fn test_retry_minutes_rounds_up() {
        assert_eq!(retry_minutes(Duration::from_secs(900)), 15);
        assert_eq!(retry_minutes(Duration::from_secs(61)), 2);
        assert_eq!(retry_minutes(Duration::from_millis(10)), 1);
    }
}
