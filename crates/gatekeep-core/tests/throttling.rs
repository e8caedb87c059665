// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the throttling engine through its public API.
//!
//! Time is driven by `ManualClock`, so lockout and cooldown expiry are
//! exercised without sleeping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use gatekeep_core::{
    CallError, Clock, CooldownProfile, ErrorKind, FailureTracker, Gatekeeper, GuardError,
    LockoutManager, ManualClock, RetryPolicy, execute,
};

const START: u64 = 1_700_000_000_000;
const MINUTE_MS: u64 = 60 * 1_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("gatekeep_core=debug")
        .with_test_writer()
        .try_init();
}

#[test]
fn test_admin_lists_and_unlocks_locked_account() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(START));
    let manager = LockoutManager::new(clock.clone());

    for _ in 0..5 {
        clock.advance(MINUTE_MS);
        manager.record_failed_attempt("user@example.com");
    }

    let locked = manager.list_locked_accounts();
    assert_eq!(locked.len(), 1);
    let account = &locked[0];
    assert_eq!(account.identifier, "user@example.com");
    assert_eq!(account.lockout_level, 1);
    assert_eq!(account.recent_attempts, 5);
    assert!(account.remaining_ms <= 900_000);
    assert!(account.remaining_ms > 899_000);

    clock.advance(1_000);
    let remaining = manager.list_locked_accounts()[0].remaining_ms;
    assert_eq!(remaining, 899_000);

    assert!(manager.admin_unlock("user@example.com"));
    assert!(manager.list_locked_accounts().is_empty());
    assert!(!manager.is_locked("user@example.com"));
}

#[test]
fn test_full_escalation_ladder() {
    let clock = Arc::new(ManualClock::new(START));
    let manager = LockoutManager::new(clock.clone());
    let id = "attacker-target@example.com";

    for _ in 0..5 {
        manager.record_failed_attempt(id);
    }
    let mut expected_until = START + 15 * MINUTE_MS;
    assert_eq!(manager.record(id).unwrap().lockout_until, Some(expected_until));

    let ladder = [
        (2u8, 60 * MINUTE_MS),
        (3, 24 * 60 * MINUTE_MS),
        (4, 7 * 24 * 60 * MINUTE_MS),
    ];
    for (level, duration) in ladder {
        clock.set(expected_until);
        assert!(!manager.is_locked(id));

        let record = manager.record_failed_attempt(id);
        expected_until = clock.now_ms() + duration;
        assert_eq!(record.lockout_level, level);
        assert_eq!(record.lockout_until, Some(expected_until));
    }

    assert!(manager.admin_unlock(id));
    assert!(!manager.is_locked(id));
}

#[test]
fn test_concurrent_failures_are_not_lost() {
    let clock = Arc::new(ManualClock::new(START));
    let tracker = Arc::new(FailureTracker::new(
        CooldownProfile {
            threshold: 1_000,
            base_cooldown_ms: 1_000,
            max_cooldown_ms: 1_000,
        },
        clock.clone(),
    ));
    let lockouts = Arc::new(LockoutManager::new(clock));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let lockouts = Arc::clone(&lockouts);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    tracker.record_failure("shared-op");
                    lockouts.record_failed_attempt("shared@example.com");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let record = tracker.record("shared-op").unwrap();
    assert_eq!(record.count, 2_000);
    assert!(!tracker.should_attempt("shared-op"));

    let lockout = lockouts.record("shared@example.com").unwrap();
    assert_eq!(lockout.recent_attempts, 2_000);
    assert_eq!(lockout.lockout_level, 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_guarded_calls_share_one_breaker() {
    init_tracing();
    let clock = Arc::new(ManualClock::new(START));
    let gatekeeper = Arc::new(
        Gatekeeper::new(CooldownProfile::fast(), clock).with_retry_policy(
            RetryPolicy::builder()
                .max_retries(2)
                .initial_delay_ms(50)
                .build(),
        ),
    );
    let calls = Arc::new(AtomicU32::new(0));

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let gatekeeper = Arc::clone(&gatekeeper);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                gatekeeper
                    .call("payments", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        async { Err::<(), _>(CallError::from_status(502, "bad gateway")) }
                    })
                    .await
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        let err = result.unwrap().unwrap_err();
        assert_eq!(err.into_operation().unwrap().kind, ErrorKind::ServerError);
    }

    // Every task made its initial attempt plus two retries
    assert_eq!(calls.load(Ordering::SeqCst), 15);
    assert_eq!(gatekeeper.tracker().record("payments").unwrap().count, 5);

    let refused = gatekeeper
        .call("payments", || async { Ok::<_, CallError>(()) })
        .await;
    assert!(matches!(refused, Err(GuardError::CoolingDown { .. })));
    assert!(gatekeeper.tracker().should_attempt("search"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_executor_propagates_last_error() {
    let policy = RetryPolicy::builder().max_retries(3).build();
    let calls = AtomicU32::new(0);

    let err = execute(&policy, || {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Err::<(), _>(CallError::new(ErrorKind::Timeout, format!("timeout #{n}"))) }
    })
    .await
    .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(err.message, "timeout #4");
}
