//! 熔断器
//!
//! 每个外部依赖（PubMed、网页读取、LLM）各持有一个独立实例，互不影响。
//! 状态机：Closed（正常，连续失败计数）→ 达到阈值 Open（直接拒绝，返回 fallback）
//! → 冷却期过后 HalfOpen（仅放行一次试探调用）→ 成功 Closed / 失败重新 Open。
//! 冷却期在下一次调用时惰性检查，没有后台定时器。

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// 熔断打开时替代真实结果的固定文本
pub const SERVICE_UNAVAILABLE: &str = "service temporarily unavailable";

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 连续失败多少次后打开
    pub failure_threshold: u32,
    /// 打开后多久允许一次试探调用
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// 敏感配置：3 次失败即打开，冷却 15s
    pub fn sensitive() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(15),
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// 对外可见的状态快照
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub failure_count: u32,
    pub state: CircuitState,
    pub opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    /// HalfOpen 下试探调用是否已放行
    trial_in_flight: bool,
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

/// 受保护调用的错误
#[derive(Error, Debug)]
pub enum CircuitBreakerError<E> {
    /// 熔断中，未调用被保护的函数
    #[error("circuit '{0}' is open")]
    Open(String),
    #[error("operation failed: {0}")]
    Failed(E),
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                opened_at_wall: None,
                trial_in_flight: false,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open 且冷却期已过则转为 HalfOpen
    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|t| t.elapsed() >= self.config.cooldown)
            .unwrap_or(true);
        if elapsed {
            inner.state = CircuitState::HalfOpen;
            inner.trial_in_flight = false;
            tracing::info!(breaker = %self.name, "circuit half-open, allowing one trial call");
        }
    }

    /// 当前状态（会触发惰性的冷却检查）
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        BreakerSnapshot {
            name: self.name.clone(),
            failure_count: inner.failure_count,
            state: inner.state,
            opened_at: inner.opened_at_wall,
        }
    }

    /// 是否放行本次调用；HalfOpen 下只放行一次
    pub fn try_acquire(&self) -> bool {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                Self::close(&mut inner);
                tracing::info!(breaker = %self.name, "trial call succeeded, circuit closed");
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    Self::open(&mut inner);
                    tracing::warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        cooldown_secs = self.config.cooldown.as_secs_f64(),
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                Self::open(&mut inner);
                tracing::warn!(breaker = %self.name, "trial call failed, circuit re-opened");
            }
            CircuitState::Open => {}
        }
    }

    /// 手动复位
    pub fn reset(&self) {
        Self::close(&mut self.lock());
    }

    fn open(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.opened_at_wall = Some(Utc::now());
        inner.trial_in_flight = false;
    }

    fn close(inner: &mut BreakerInner) {
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.opened_at = None;
        inner.opened_at_wall = None;
        inner.trial_in_flight = false;
    }

    /// 受保护地执行 operation：熔断中返回 Open，不调用 operation
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire() {
            tracing::warn!(breaker = %self.name, "call rejected, circuit open");
            return Err(CircuitBreakerError::Open(self.name.clone()));
        }
        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(CircuitBreakerError::Failed(e))
            }
        }
    }

    /// 熔断中直接返回 fallback；operation 自身的错误计数后原样返回
    pub async fn call<F, Fut, T, E>(&self, fallback: T, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open(_)) => Ok(fallback),
            Err(CircuitBreakerError::Failed(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_cooldown(cooldown),
        )
    }

    async fn failing(calls: &AtomicUsize) -> Result<String, String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("boom".to_string())
    }

    #[test]
    fn test_initial_state_closed() {
        let cb = breaker(3, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.failure_count(), 2);
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_after_threshold_skips_operation() {
        let cb = breaker(3, Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let r = cb.call("fallback".to_string(), || failing(&calls)).await;
            assert_eq!(r, Err("boom".to_string()));
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let r = cb.call("fallback".to_string(), || failing(&calls)).await;
        assert_eq!(r, Ok("fallback".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "operation must not run while open");
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, Duration::from_millis(20));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let r: Result<&str, String> = cb.call("fallback", || async { Ok("live") }).await;
        assert_eq!(r, Ok("live"));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);

        // Closed 行为恢复：单次失败不会打开
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = breaker(1, Duration::from_millis(20));
        let calls = AtomicUsize::new(0);
        cb.record_failure();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let r = cb.call("fallback".to_string(), || failing(&calls)).await;
        assert!(r.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().opened_at.is_some());

        let r = cb.call("fallback".to_string(), || failing(&calls)).await;
        assert_eq!(r, Ok("fallback".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_half_open_allows_single_trial() {
        let cb = breaker(1, Duration::ZERO);
        cb.record_failure();
        assert!(cb.try_acquire());
        assert!(!cb.try_acquire());
    }

    #[tokio::test]
    async fn test_execute_reports_open() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        let r: Result<(), CircuitBreakerError<String>> = cb.execute(|| async { Ok(()) }).await;
        assert!(matches!(r, Err(CircuitBreakerError::Open(name)) if name == "test"));
    }

    #[test]
    fn test_reset() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn test_independent_breakers() {
        let pubmed = breaker(1, Duration::from_secs(60));
        let web = breaker(1, Duration::from_secs(60));
        pubmed.record_failure();
        assert_eq!(pubmed.state(), CircuitState::Open);
        assert_eq!(web.state(), CircuitState::Closed);
    }
}
