/// 重试退避策略
/// 
/// 指数退避：初始 100ms，因子 2，单次上限 30s，整体截止时间默认 30s

use common::models::constants::{
    BACKOFF_CAP_SECS, BACKOFF_FACTOR, BACKOFF_INITIAL_MS, DEFAULT_PLUGIN_TIMEOUT,
};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: u32,
    pub cap: Duration,
    /// 单次驱动调用（含全部重试）的截止时间
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(BACKOFF_INITIAL_MS),
            factor: BACKOFF_FACTOR,
            cap: Duration::from_secs(BACKOFF_CAP_SECS),
            deadline: Duration::from_secs(DEFAULT_PLUGIN_TIMEOUT),
        }
    }
}

impl RetryPolicy {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            ..Self::default()
        }
    }

    /// 开始一次调用的退避计时
    pub fn start(&self) -> Backoff {
        Backoff {
            next: self.initial,
            factor: self.factor.max(1),
            cap: self.cap,
            started: Instant::now(),
            deadline: self.deadline,
        }
    }
}

/// 单次调用的退避状态
#[derive(Debug)]
pub struct Backoff {
    next: Duration,
    factor: u32,
    cap: Duration,
    started: Instant,
    deadline: Duration,
}

impl Backoff {
    /// 距截止时间的剩余时长
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_sub(self.started.elapsed())
    }

    /// 下一次等待时长；截止时间已到则返回 `None`
    ///
    /// 最后一次等待会被截短，保证在截止时刻还能再尝试一次。
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return None;
        }
        let delay = self.next.min(remaining);
        self.next = self.next.saturating_mul(self.factor).min(self.cap);
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.start();
        let delays: Vec<_> = (0..4).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_capped() {
        let policy = RetryPolicy {
            initial: Duration::from_secs(20),
            deadline: Duration::from_secs(600),
            ..RetryPolicy::default()
        };
        let mut backoff = policy.start();
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_exhausts() {
        let policy = RetryPolicy::with_deadline(Duration::from_millis(250));
        let mut backoff = policy.start();
        let first = backoff.next_delay().unwrap();
        tokio::time::sleep(first).await;
        let second = backoff.next_delay().unwrap();
        assert_eq!(second, Duration::from_millis(150));
        tokio::time::sleep(second).await;
        assert_eq!(backoff.next_delay(), None);
    }
}
