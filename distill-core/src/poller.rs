use std::future::Future;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            max_attempts: 60,
        }
    }
}

/// Outcome of one status-carrying request against an asynchronous job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollResponse<T> {
    Ready(T),
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling { attempt: u32 },
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStep<T> {
    Wait(Duration),
    Done(T),
    GiveUp { attempts: u32 },
}

/// `Polling -> Ready | TimedOut`, advanced once per response. The interval
/// is fixed: there is no backoff growth between attempts.
#[derive(Debug, Clone)]
pub struct PollMachine {
    policy: PollPolicy,
    state: PollState,
}

impl PollMachine {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            state: PollState::Polling { attempt: 0 },
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Number of responses consumed so far.
    pub fn attempts(&self) -> u32 {
        match self.state {
            PollState::Polling { attempt } => attempt,
            PollState::Ready { attempts } | PollState::TimedOut { attempts } => attempts,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self.state, PollState::Polling { .. })
    }

    pub fn advance<T>(&mut self, response: PollResponse<T>) -> PollStep<T> {
        let attempt = match self.state {
            PollState::Polling { attempt } => attempt + 1,
            PollState::Ready { attempts } | PollState::TimedOut { attempts } => {
                return PollStep::GiveUp { attempts };
            }
        };

        match response {
            PollResponse::Ready(value) => {
                self.state = PollState::Ready { attempts: attempt };
                PollStep::Done(value)
            }
            PollResponse::Pending if attempt >= self.policy.max_attempts => {
                self.state = PollState::TimedOut { attempts: attempt };
                PollStep::GiveUp { attempts: attempt }
            }
            PollResponse::Pending => {
                self.state = PollState::Polling { attempt };
                PollStep::Wait(self.policy.interval)
            }
        }
    }
}

/// Drives a [`PollMachine`] with tokio's timer. `request` receives the
/// 1-based attempt number. A request error aborts polling immediately;
/// dropping the returned future cancels between attempts.
#[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn poll_until_ready<T, F, Fut>(policy: PollPolicy, mut request: F) -> Result<T, FetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<PollResponse<T>, FetchError>>,
{
    let mut machine = PollMachine::new(policy);
    loop {
        let attempt = machine.attempts() + 1;
        let response = request(attempt).await?;
        match machine.advance(response) {
            PollStep::Done(value) => {
                debug!(attempt, "job ready");
                return Ok(value);
            }
            PollStep::Wait(interval) => {
                debug!(attempt, ?interval, "job pending");
                tokio::time::sleep(interval).await;
            }
            PollStep::GiveUp { attempts } => {
                return Err(FetchError::PollTimeout { attempts });
            }
        }
    }
}
