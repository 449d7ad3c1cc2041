use crate::error::Rejection;
use crate::model::{Token, TokenStatus};
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

/// Identifies the call that put a token in flight
pub(crate) type ClaimId = u64;

#[derive(Debug, Clone, Copy)]
struct InFlightEntry {
    claim: ClaimId,
    since: Instant,
}

/// Token state shared by every call of one guard.
///
/// Not synchronized on its own; the guard keeps it behind a mutex and each
/// method below is one critical section.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    in_flight: HashMap<Token, InFlightEntry>,
    completed: HashMap<Token, Instant>,
    // Sorted by expiry; appends are O(1) while the clock is monotonic
    expiries: VecDeque<(Instant, Token)>,
    next_claim: ClaimId,
}

impl Ledger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check completed, check in flight, then record the claim.
    pub(crate) fn try_claim(&mut self, token: &Token, now: Instant) -> Result<ClaimId, Rejection> {
        self.purge_expired(now);

        if let Some(expires_at) = self.completed.get(token) {
            if now < *expires_at {
                return Err(Rejection::AlreadyUsed);
            }
            self.completed.remove(token);
        }

        if self.in_flight.contains_key(token) {
            return Err(Rejection::InProgress);
        }

        let claim = self.next_claim;
        self.next_claim += 1;
        self.in_flight
            .insert(token.clone(), InFlightEntry { claim, since: now });
        Ok(claim)
    }

    /// Move a claimed token to completed. Returns false for a stale claim.
    pub(crate) fn complete(&mut self, token: &Token, claim: ClaimId, expires_at: Instant) -> bool {
        if !self.owns(token, claim) {
            return false;
        }
        self.in_flight.remove(token);
        self.completed.insert(token.clone(), expires_at);
        self.enqueue_expiry(expires_at, token.clone());
        true
    }

    /// Drop a claimed token back to absent. Returns false for a stale claim.
    pub(crate) fn release(&mut self, token: &Token, claim: ClaimId) -> bool {
        if !self.owns(token, claim) {
            return false;
        }
        self.in_flight.remove(token);
        true
    }

    pub(crate) fn status(&self, token: &Token, now: Instant) -> TokenStatus {
        if let Some(entry) = self.in_flight.get(token) {
            return TokenStatus::InFlight { since: entry.since };
        }
        match self.completed.get(token) {
            Some(expires_at) if now < *expires_at => TokenStatus::Completed {
                expires_at: *expires_at,
            },
            _ => TokenStatus::Absent,
        }
    }

    /// Forget every completed token whose window has elapsed.
    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((expires_at, _)) = self.expiries.front() {
            if *expires_at > now {
                break;
            }
            if let Some((expires_at, token)) = self.expiries.pop_front() {
                // The token may have been forgotten and completed again since
                if self.completed.get(&token) == Some(&expires_at) {
                    self.completed.remove(&token);
                    purged += 1;
                }
            }
        }
        purged
    }

    /// Clear all state. Claim ids keep increasing so stale claims stay stale.
    pub(crate) fn clear(&mut self) {
        self.in_flight.clear();
        self.completed.clear();
        self.expiries.clear();
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub(crate) fn completed_len(&self) -> usize {
        self.completed.len()
    }

    fn enqueue_expiry(&mut self, expires_at: Instant, token: Token) {
        match self.expiries.back() {
            Some((last, _)) if *last > expires_at => {
                let at = self.expiries.partition_point(|(other, _)| *other <= expires_at);
                self.expiries.insert(at, (expires_at, token));
            }
            _ => self.expiries.push_back((expires_at, token)),
        }
    }

    fn owns(&self, token: &Token, claim: ClaimId) -> bool {
        self.in_flight
            .get(token)
            .is_some_and(|entry| entry.claim == claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RETENTION: Duration = Duration::from_secs(300);

    #[test]
    fn test_claim_absent_token() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        assert!(ledger.try_claim(&token, now).is_ok());
        assert_eq!(ledger.status(&token, now), TokenStatus::InFlight { since: now });
        assert_eq!(ledger.in_flight_len(), 1);
    }

    #[test]
    fn test_claim_in_flight_token_is_rejected() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        ledger.try_claim(&token, now).unwrap();
        assert_eq!(ledger.try_claim(&token, now), Err(Rejection::InProgress));
        assert_eq!(ledger.in_flight_len(), 1);
    }

    #[test]
    fn test_claim_completed_token_is_rejected() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        let claim = ledger.try_claim(&token, now).unwrap();
        assert!(ledger.complete(&token, claim, now + RETENTION));

        let later = now + Duration::from_secs(10);
        assert_eq!(ledger.try_claim(&token, later), Err(Rejection::AlreadyUsed));
        assert_eq!(
            ledger.status(&token, later),
            TokenStatus::Completed {
                expires_at: now + RETENTION
            }
        );
        assert_eq!(ledger.in_flight_len(), 0);
    }

    #[test]
    fn test_completed_token_expires() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        let claim = ledger.try_claim(&token, now).unwrap();
        ledger.complete(&token, claim, now + RETENTION);

        let expired = now + RETENTION;
        assert_eq!(ledger.status(&token, expired), TokenStatus::Absent);
        assert!(ledger.try_claim(&token, expired).is_ok());
        assert_eq!(ledger.completed_len(), 0);
    }

    #[test]
    fn test_released_token_is_absent() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        let claim = ledger.try_claim(&token, now).unwrap();
        assert!(ledger.release(&token, claim));
        assert_eq!(ledger.status(&token, now), TokenStatus::Absent);
        assert!(ledger.try_claim(&token, now).is_ok());
    }

    #[test]
    fn test_stale_claim_cannot_touch_new_claim() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let now = Instant::now();

        let stale = ledger.try_claim(&token, now).unwrap();
        ledger.clear();
        let fresh = ledger.try_claim(&token, now).unwrap();
        assert_ne!(stale, fresh);

        assert!(!ledger.release(&token, stale));
        assert!(!ledger.complete(&token, stale, now + RETENTION));
        assert_eq!(ledger.status(&token, now), TokenStatus::InFlight { since: now });

        assert!(ledger.complete(&token, fresh, now + RETENTION));
        assert!(ledger.status(&token, now).is_completed());
    }

    #[test]
    fn test_purge_expired_drops_only_elapsed_entries() {
        let mut ledger = Ledger::new();
        let start = Instant::now();

        for (i, offset) in [0u64, 10, 20].into_iter().enumerate() {
            let token = Token::new(format!("code-{}", i));
            let at = start + Duration::from_secs(offset);
            let claim = ledger.try_claim(&token, at).unwrap();
            ledger.complete(&token, claim, at + RETENTION);
        }
        assert_eq!(ledger.completed_len(), 3);

        let purged = ledger.purge_expired(start + RETENTION + Duration::from_secs(15));
        assert_eq!(purged, 2);
        assert_eq!(ledger.completed_len(), 1);
        assert!(ledger
            .status(&Token::from("code-2"), start + RETENTION)
            .is_completed());
    }

    #[test]
    fn test_purge_skips_superseded_expiry() {
        let mut ledger = Ledger::new();
        let token = Token::from("code");
        let start = Instant::now();

        let claim = ledger.try_claim(&token, start).unwrap();
        ledger.complete(&token, claim, start + RETENTION);

        // Cleared and exchanged again: the old queue entry must not evict the new one
        ledger.completed.clear();
        let again = start + Duration::from_secs(60);
        let claim = ledger.try_claim(&token, again).unwrap();
        ledger.complete(&token, claim, again + RETENTION);

        assert_eq!(ledger.purge_expired(start + RETENTION), 0);
        assert!(ledger.status(&token, start + RETENTION).is_completed());
        assert_eq!(ledger.purge_expired(again + RETENTION), 1);
    }

    #[test]
    fn test_purge_with_clock_going_backwards() {
        let mut ledger = Ledger::new();
        let start = Instant::now();
        let late = Token::from("late");
        let early = Token::from("early");

        let claim = ledger.try_claim(&late, start).unwrap();
        ledger.complete(&late, claim, start + Duration::from_secs(600));

        // A clock that stepped back completes this one with an earlier expiry
        let claim = ledger.try_claim(&early, start).unwrap();
        ledger.complete(&early, claim, start + Duration::from_secs(60));

        assert_eq!(ledger.purge_expired(start + Duration::from_secs(61)), 1);
        assert!(ledger.status(&early, start).is_absent());
        assert!(ledger.status(&late, start).is_completed());
        assert_eq!(ledger.purge_expired(start + Duration::from_secs(600)), 1);
        assert_eq!(ledger.completed_len(), 0);
    }

    #[test]
    fn test_clear_removes_everything() {
        let mut ledger = Ledger::new();
        let now = Instant::now();
        let done = Token::from("done");
        let running = Token::from("running");

        let claim = ledger.try_claim(&done, now).unwrap();
        ledger.complete(&done, claim, now + RETENTION);
        ledger.try_claim(&running, now).unwrap();

        ledger.clear();
        assert_eq!(ledger.in_flight_len(), 0);
        assert_eq!(ledger.completed_len(), 0);
        assert!(ledger.status(&done, now).is_absent());
        assert!(ledger.status(&running, now).is_absent());
    }
}
