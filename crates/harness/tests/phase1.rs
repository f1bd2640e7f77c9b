use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tasksync_engine::{GiveUpReason, JITTER_BAND, RetryHooks, RetryPolicy, run_with_retry};
use tasksync_storage::RemoteError;

fn policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_millis(1_000),
        backoff_factor: 2.0,
    }
}

fn validation_error() -> RemoteError {
    RemoteError::Status {
        code: 422,
        message: "validation failed: title".into(),
    }
}

// ============================================================================
// Success and classification
// ============================================================================

#[tokio::test]
async fn first_try_success_makes_one_attempt() {
    let calls = AtomicU32::new(0);
    let result = run_with_retry(&policy(3), "op", RetryHooks::default(), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, RemoteError>(7) }
    })
    .await;

    assert_eq!(result.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn non_retryable_error_is_attempted_exactly_once() {
    let calls = AtomicU32::new(0);
    let result = run_with_retry(&policy(5), "op", RetryHooks::default(), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(validation_error()) }
    })
    .await;

    let failure = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.reason, GiveUpReason::NonRetryable);
    assert_eq!(failure.source, validation_error());
}

#[tokio::test]
async fn denylisted_status_is_never_retried_even_with_budget_left() {
    for code in [400u16, 401, 403, 404, 422] {
        let calls = AtomicU32::new(0);
        let result = run_with_retry(&policy(10), "op", RetryHooks::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            let code = code;
            async move {
                Err::<(), _>(RemoteError::Status {
                    code,
                    message: "rejected".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "status {code}");
    }
}

// ============================================================================
// Backoff behavior
// ============================================================================

#[tokio::test(start_paused = true)]
async fn transient_failures_retry_until_success_with_bounded_delays() {
    let retry_policy = policy(5);
    let calls = AtomicU32::new(0);
    let observed: Mutex<Vec<(u32, Duration)>> = Mutex::new(Vec::new());
    let on_retry = |attempt: u32, _error: &RemoteError, delay: Duration| {
        observed.lock().unwrap().push((attempt, delay));
    };
    let hooks = RetryHooks {
        on_retry: Some(&on_retry),
        should_retry: None,
    };

    let result = run_with_retry(&retry_policy, "op", hooks, || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= 3 {
                Err(RemoteError::Timeout)
            } else {
                Ok(n)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let delays = observed.lock().unwrap();
    assert_eq!(delays.len(), 3);
    for (attempt, delay) in delays.iter() {
        let base = retry_policy.base_delay(*attempt);
        let lower = base.mul_f64(1.0 - JITTER_BAND);
        let upper = base.mul_f64(1.0 + JITTER_BAND).min(retry_policy.max_delay);
        assert!(
            *delay >= lower && *delay <= upper,
            "attempt {attempt}: delay {delay:?} outside jitter band of {base:?}"
        );
        assert!(*delay <= retry_policy.max_delay);
    }
}

#[tokio::test(start_paused = true)]
async fn delays_never_exceed_max_delay() {
    // Aggressive growth so the exponential passes max_delay immediately.
    let retry_policy = RetryPolicy {
        max_retries: 4,
        initial_delay: Duration::from_millis(400),
        max_delay: Duration::from_millis(500),
        backoff_factor: 10.0,
    };
    let observed: Mutex<Vec<Duration>> = Mutex::new(Vec::new());
    let on_retry =
        |_attempt: u32, _error: &RemoteError, delay: Duration| observed.lock().unwrap().push(delay);
    let hooks = RetryHooks {
        on_retry: Some(&on_retry),
        should_retry: None,
    };

    let _ = run_with_retry(&retry_policy, "op", hooks, || async {
        Err::<(), _>(RemoteError::Network("flaky".into()))
    })
    .await;

    let delays = observed.lock().unwrap();
    assert_eq!(delays.len(), 4);
    for delay in delays.iter() {
        assert!(*delay <= retry_policy.max_delay, "{delay:?} above cap");
    }
}

// ============================================================================
// Exhaustion
// ============================================================================

#[tokio::test(start_paused = true)]
async fn exhaustion_makes_max_retries_plus_one_attempts_and_keeps_last_error() {
    let calls = AtomicU32::new(0);
    let result = run_with_retry(&policy(3), "op", RetryHooks::default(), || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err::<(), _>(RemoteError::Network(format!("blip {n}"))) }
    })
    .await;

    let failure = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(failure.attempts, 4);
    assert_eq!(failure.reason, GiveUpReason::Exhausted);
    // The propagated error is the one from the final attempt.
    assert_eq!(failure.source, RemoteError::Network("blip 4".into()));
}

#[tokio::test]
async fn zero_max_retries_means_exactly_one_attempt() {
    let calls = AtomicU32::new(0);
    let result = run_with_retry(&policy(0), "op", RetryHooks::default(), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(RemoteError::Timeout) }
    })
    .await;

    let failure = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(failure.attempts, 1);
    assert_eq!(failure.reason, GiveUpReason::Exhausted);
}

// ============================================================================
// Custom predicate
// ============================================================================

#[tokio::test]
async fn custom_predicate_can_veto_a_transient_retry() {
    let calls = AtomicU32::new(0);
    let veto = |_error: &RemoteError| false;
    let hooks = RetryHooks {
        on_retry: None,
        should_retry: Some(&veto),
    };

    let result = run_with_retry(&policy(5), "op", hooks, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(RemoteError::Timeout) }
    })
    .await;

    let failure = result.unwrap_err();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(failure.reason, GiveUpReason::NonRetryable);
}

#[tokio::test]
async fn custom_predicate_cannot_override_the_classifier() {
    // Predicate says yes, classifier says no: both must agree to retry.
    let calls = AtomicU32::new(0);
    let always = |_error: &RemoteError| true;
    let hooks = RetryHooks {
        on_retry: None,
        should_retry: Some(&always),
    };

    let result = run_with_retry(&policy(5), "op", hooks, || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<(), _>(validation_error()) }
    })
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.unwrap_err().reason, GiveUpReason::NonRetryable);
}

#[tokio::test(start_paused = true)]
async fn on_retry_fires_once_per_backoff() {
    let fired = AtomicU32::new(0);
    let on_retry = |_attempt: u32, _error: &RemoteError, _delay: Duration| {
        fired.fetch_add(1, Ordering::SeqCst);
    };
    let hooks = RetryHooks {
        on_retry: Some(&on_retry),
        should_retry: None,
    };
    let calls = AtomicU32::new(0);

    let result = run_with_retry(&policy(5), "op", hooks, || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= 2 {
                Err(RemoteError::RateLimited)
            } else {
                Ok(())
            }
        }
    })
    .await;

    assert!(result.is_ok());
    // Two failures, two backoffs; the success does not fire the hook.
    assert_eq!(fired.load(Ordering::SeqCst), 2);
}
