use super::adapter::{SendOutcome, WirelessAdapter};

/// Result of pushing a payload toward the radio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendStep {
    Sent,
    /// Held for a later retry.
    Deferred,
    /// Retry limit hit; the held payload was discarded.
    Dropped { attempts: u32 },
}

/// Single-slot outbound buffer.
///
/// A payload refused by a full radio queue is held and retried. A newer
/// payload arriving meanwhile replaces the held one, so at most one frame
/// waits and frames never go out of order.
#[derive(Debug)]
pub struct Outbound {
    pending: Option<Vec<u8>>,
    attempts: u32,
    limit: Option<u32>,
    superseded: u64,
}

impl Outbound {
    /// `limit` caps retries of one payload; `None` retries until it goes out.
    pub fn new(limit: Option<u32>) -> Self {
        Outbound {
            pending: None,
            attempts: 0,
            limit,
            superseded: 0,
        }
    }

    pub fn offer<A: WirelessAdapter + ?Sized>(&mut self, payload: Vec<u8>, adapter: &mut A) -> SendStep {
        if self.pending.is_some() {
            self.pending = Some(payload);
            self.attempts = 0;
            self.superseded += 1;
            return SendStep::Deferred;
        }
        match adapter.send(&payload) {
            SendOutcome::Sent => SendStep::Sent,
            SendOutcome::QueueFull => {
                log::debug!("[link] outbound queue full, holding frame");
                self.pending = Some(payload);
                self.attempts = 0;
                SendStep::Deferred
            }
        }
    }

    /// Retry the held payload. `None` when nothing is held.
    pub fn flush<A: WirelessAdapter + ?Sized>(&mut self, adapter: &mut A) -> Option<SendStep> {
        let payload = self.pending.take()?;
        match adapter.send(&payload) {
            SendOutcome::Sent => {
                self.attempts = 0;
                Some(SendStep::Sent)
            }
            SendOutcome::QueueFull => {
                self.attempts += 1;
                if self.limit.is_some_and(|limit| self.attempts >= limit) {
                    let attempts = self.attempts;
                    log::warn!("[link] dropping frame after {} send retries", attempts);
                    self.attempts = 0;
                    return Some(SendStep::Dropped { attempts });
                }
                self.pending = Some(payload);
                Some(SendStep::Deferred)
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn clear(&mut self) {
        self.pending = None;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::adapter::AdapterState;
    use crate::transport::testing::RecordingAdapter;

    fn full_adapter(fulls: usize) -> RecordingAdapter {
        let mut a = RecordingAdapter::new(AdapterState::PoweredOn);
        a.send_outcomes.extend(std::iter::repeat(SendOutcome::QueueFull).take(fulls));
        a
    }

    #[test]
    fn test_direct_send() {
        let mut a = full_adapter(0);
        let mut out = Outbound::new(Some(3));
        assert_eq!(out.offer(vec![1], &mut a), SendStep::Sent);
        assert!(!out.has_pending());
        assert_eq!(out.flush(&mut a), None);
    }

    #[test]
    fn test_newest_payload_wins() {
        let mut a = full_adapter(1);
        let mut out = Outbound::new(None);
        assert_eq!(out.offer(vec![1], &mut a), SendStep::Deferred);
        assert_eq!(out.offer(vec![2], &mut a), SendStep::Deferred);
        assert_eq!(out.superseded(), 1);
        assert_eq!(out.flush(&mut a), Some(SendStep::Sent));
        assert_eq!(a.sent, vec![vec![2]]);
    }

    #[test]
    fn test_retry_limit_drops() {
        let mut a = full_adapter(10);
        let mut out = Outbound::new(Some(3));
        assert_eq!(out.offer(vec![9], &mut a), SendStep::Deferred);
        assert_eq!(out.flush(&mut a), Some(SendStep::Deferred));
        assert_eq!(out.flush(&mut a), Some(SendStep::Deferred));
        assert_eq!(out.flush(&mut a), Some(SendStep::Dropped { attempts: 3 }));
        assert!(!out.has_pending());
    }

    #[test]
    fn test_unbounded_keeps_trying() {
        let mut a = full_adapter(50);
        let mut out = Outbound::new(None);
        out.offer(vec![1], &mut a);
        for _ in 0..49 {
            assert_eq!(out.flush(&mut a), Some(SendStep::Deferred));
        }
        assert_eq!(out.flush(&mut a), Some(SendStep::Sent));
    }
}
