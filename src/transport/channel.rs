use serde::Serialize;
use std::time::Duration;

use super::adapter::WirelessAdapter;
use super::outbound::{Outbound, SendStep};
use super::timer::{Scheduler, TimerKind};
use crate::error::{LinkError, LinkResult};
use crate::types::MotionSample;
use crate::wire::{self, FrameAssembler};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub sent: u64,
    pub received: u64,
    pub malformed: u64,
    pub send_retries: u64,
    pub superseded: u64,
    pub dropped: u64,
}

/// Framed sample traffic over an established link, shared by both roles.
pub struct FramedChannel {
    outbound: Outbound,
    assembler: FrameAssembler,
    retry_delay: Duration,
    stats: LinkStats,
}

impl FramedChannel {
    pub fn new(retry_delay: Duration, retry_limit: Option<u32>) -> Self {
        Self {
            outbound: Outbound::new(retry_limit),
            assembler: FrameAssembler::new(),
            retry_delay,
            stats: LinkStats::default(),
        }
    }

    pub fn send<A, S>(&mut self, sample: &MotionSample, adapter: &mut A, timers: &mut S) -> LinkResult<()>
    where
        A: WirelessAdapter + ?Sized,
        S: Scheduler + ?Sized,
    {
        let payload = wire::encode(sample)?;
        let step = self.outbound.offer(payload, adapter);
        self.stats.superseded = self.outbound.superseded();
        self.apply(step, timers)
    }

    /// Push a held frame out now, from the retry timer or a ready-to-send signal.
    pub fn flush<A, S>(&mut self, adapter: &mut A, timers: &mut S) -> LinkResult<()>
    where
        A: WirelessAdapter + ?Sized,
        S: Scheduler + ?Sized,
    {
        match self.outbound.flush(adapter) {
            Some(step) => {
                self.stats.send_retries += 1;
                self.apply(step, timers)
            }
            None => Ok(()),
        }
    }

    fn apply<S: Scheduler + ?Sized>(&mut self, step: SendStep, timers: &mut S) -> LinkResult<()> {
        match step {
            SendStep::Sent => {
                self.stats.sent += 1;
                timers.cancel(TimerKind::SendRetry);
                Ok(())
            }
            SendStep::Deferred => {
                if !timers.is_pending(TimerKind::SendRetry) {
                    timers.schedule(TimerKind::SendRetry, self.retry_delay);
                }
                Ok(())
            }
            SendStep::Dropped { .. } => {
                self.stats.dropped += 1;
                timers.cancel(TimerKind::SendRetry);
                Err(LinkError::SendBackpressure)
            }
        }
    }

    /// Feed received bytes; returns the whole samples they completed.
    pub fn receive(&mut self, bytes: &[u8]) -> Vec<MotionSample> {
        let samples = self.assembler.push(bytes);
        self.stats.received += samples.len() as u64;
        self.stats.malformed = self.assembler.malformed_count();
        samples
    }

    /// Forget in-flight data when the link goes down.
    pub fn reset<S: Scheduler + ?Sized>(&mut self, timers: &mut S) {
        self.outbound.clear();
        self.assembler.clear();
        timers.cancel(TimerKind::SendRetry);
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}
