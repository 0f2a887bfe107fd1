//! Wall-clock source for time-lock deadlines

use chrono::Utc;

/// Unix time in seconds, comparable with on-chain timestamps
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> u64 {
        Utc::now().timestamp().max(0) as u64
    }
}

/// Clock driven by tokio's (pausable) time
#[cfg(test)]
pub struct TokioClock {
    base_unix: u64,
    base: tokio::time::Instant,
}

#[cfg(test)]
impl TokioClock {
    pub fn new(base_unix: u64) -> Self {
        Self {
            base_unix,
            base: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for TokioClock {
    fn now_unix(&self) -> u64 {
        self.base_unix + self.base.elapsed().as_secs()
    }
}
