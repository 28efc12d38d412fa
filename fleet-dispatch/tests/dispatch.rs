//! Batch-level behaviour of the dispatch engine, exercised on both executors.

use fleet_devkit::fixtures::{self, address, fast_policy, outcome_by_address, outcome_counts};
use fleet_devkit::{Behaviour, ScriptedOperation, TestHarness};
use fleet_dispatch::{dispatch, DispatchPolicy, FailureKind, WorkerFormula};
use std::collections::HashSet;
use std::time::{Duration, Instant};

fleet_devkit::dispatch_test!(every_target_gets_one_result, |h: TestHarness| {
    let h = h.with_targets(25);
    let batch = h.run().unwrap();

    assert_eq!(batch.len(), 25);
    assert_eq!(batch.succeeded_count, 25);
    assert_eq!(batch.failed_count, 0);
    for (i, result) in batch.results.iter().enumerate() {
        assert_eq!(result.index, i);
        assert_eq!(result.address, address(i));
        assert_eq!(result.attempts, 1);
    }
    assert_eq!(h.operation.total_attempts(), 25);
});

fleet_devkit::dispatch_test!(empty_batch_is_empty_result, |h: TestHarness| {
    let batch = h.run().unwrap();
    assert!(batch.is_empty());
    assert_eq!(batch.succeeded_count + batch.failed_count, 0);
});

fleet_devkit::dispatch_test!(connect_errors_retried_exactly, |h: TestHarness| {
    let op = ScriptedOperation::new().on(&address(1), Behaviour::Fail(FailureKind::Connect));
    let mut policy = fast_policy(1.0, 2);
    policy.use_async_client = h.policy.use_async_client;
    let h = h.with_targets(3).with_operation(op).with_policy(policy);
    let batch = h.run().unwrap();

    let failed = batch.get(&address(1)).unwrap();
    assert_eq!(failed.outcome.failure_kind(), Some(FailureKind::Connect));
    assert_eq!(failed.attempts, 3);
    assert_eq!(h.operation.attempts(&address(1)), 3);
    assert_eq!(batch.failed_count, 1);
    assert_eq!(batch.succeeded_count, 2);
});

fleet_devkit::dispatch_test!(application_errors_not_retried, |h: TestHarness| {
    let op = ScriptedOperation::new()
        .on(&address(0), Behaviour::Fail(FailureKind::Application))
        .on(&address(1), Behaviour::Fail(FailureKind::Protocol));
    let mut policy = fast_policy(1.0, 5);
    policy.use_async_client = h.policy.use_async_client;
    let h = h.with_targets(2).with_operation(op).with_policy(policy);
    let batch = h.run().unwrap();

    assert_eq!(h.operation.attempts(&address(0)), 1);
    assert_eq!(h.operation.attempts(&address(1)), 1);
    assert_eq!(batch.failed_count, 2);
    assert_eq!(batch.results[0].outcome.failure_kind(), Some(FailureKind::Application));
});

fleet_devkit::dispatch_test!(transient_failure_recovers_on_retry, |h: TestHarness| {
    let op = ScriptedOperation::new()
        .on(&address(0), Behaviour::FailFirst { times: 1, kind: FailureKind::Timeout });
    let h = h.with_targets(1).with_operation(op);
    let batch = h.run().unwrap();

    assert_eq!(batch.succeeded_count, 1);
    assert_eq!(batch.results[0].attempts, 2);
    assert_eq!(batch.results[0].payload().unwrap()["attempt"], 2);
});

fleet_devkit::dispatch_test!(zero_retries_means_one_attempt, |h: TestHarness| {
    let op = ScriptedOperation::new().by_default(Behaviour::Fail(FailureKind::Connect));
    let mut policy = fast_policy(1.0, 0);
    policy.use_async_client = h.policy.use_async_client;
    let h = h.with_targets(4).with_operation(op).with_policy(policy);
    let batch = h.run().unwrap();

    assert_eq!(batch.failed_count, 4);
    assert!(batch.results.iter().all(|r| r.attempts == 1));
    assert_eq!(h.operation.total_attempts(), 4);
});

fleet_devkit::dispatch_test!(unresponsive_target_times_out, |h: TestHarness| {
    let op = ScriptedOperation::new().on(&address(2), Behaviour::Hang);
    let mut policy = fast_policy(0.1, 1);
    policy.use_async_client = h.policy.use_async_client;
    let h = h.with_targets(3).with_operation(op).with_policy(policy);
    let batch = h.run().unwrap();

    let slow = batch.get(&address(2)).unwrap();
    assert_eq!(slow.outcome.failure_kind(), Some(FailureKind::Timeout));
    assert_eq!(slow.attempts, 2);
    assert!(slow.elapsed_ms >= 200);
    assert_eq!(batch.succeeded_count, 2);
});

fleet_devkit::dispatch_test!(panicking_target_is_isolated, |h: TestHarness| {
    let op = ScriptedOperation::new().on(&address(0), Behaviour::Panic);
    let h = h.with_targets(6).with_operation(op);
    let batch = h.run().unwrap();

    assert_eq!(batch.len(), 6);
    assert_eq!(batch.results[0].outcome.failure_kind(), Some(FailureKind::Protocol));
    assert_eq!(batch.results[0].attempts, 1);
    assert_eq!(batch.succeeded_count, 5);
});

fleet_devkit::dispatch_test!(in_flight_never_exceeds_limit, |h: TestHarness| {
    let op = ScriptedOperation::new().by_default(Behaviour::succeed_after(Duration::from_millis(15)));
    let policy = DispatchPolicy {
        max_workers: 4,
        max_workers_formula: WorkerFormula::Linear,
        use_async_client: h.policy.use_async_client,
        ..fast_policy(1.0, 0)
    };
    let h = h.with_targets(40).with_operation(op).with_policy(policy);
    assert_eq!(h.dispatcher().unwrap().worker_limit(40), 4);

    let batch = h.run().unwrap();
    assert_eq!(batch.succeeded_count, 40);
    let peak = h.operation.peak_concurrency();
    assert!(peak <= 4, "peak concurrency {peak} above limit");
    assert!(peak >= 2, "batch never overlapped targets");
});

fleet_devkit::dispatch_test!(large_batch_with_unresponsive_devices, |h: TestHarness| {
    let mut op = ScriptedOperation::new();
    for n in [7, 60, 119] {
        op = op.on(&address(n), Behaviour::Hang);
    }
    let policy = DispatchPolicy {
        max_workers: 16,
        max_workers_formula: WorkerFormula::Sqrt,
        use_async_client: h.policy.use_async_client,
        ..fast_policy(0.2, 1)
    };
    let h = h.with_targets(120).with_operation(op).with_policy(policy);
    assert_eq!(h.dispatcher().unwrap().worker_limit(120), 11);

    let started = Instant::now();
    let batch = h.run().unwrap();
    let elapsed = started.elapsed();
    assert_eq!(batch.len(), 120);
    assert_eq!(batch.succeeded_count, 117);
    assert_eq!(batch.failed_count, 3);
    for failure in batch.failures() {
        assert_eq!(failure.outcome.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(failure.attempts, 2);
    }
    assert!(h.operation.peak_concurrency() <= 11);
    // ceil(120 / 11) rounds x 2 attempts x 0.2s
    assert!(elapsed >= Duration::from_millis(400));
    assert!(elapsed <= Duration::from_millis(4400), "batch took {elapsed:?}");
});

fleet_devkit::dispatch_test!(cancellation_keeps_finished_results, |h: TestHarness| {
    let op = ScriptedOperation::new().by_default(Behaviour::succeed_after(Duration::from_millis(40)));
    let policy = DispatchPolicy {
        max_workers: 2,
        max_workers_formula: WorkerFormula::Linear,
        use_async_client: h.policy.use_async_client,
        ..fast_policy(5.0, 0)
    };
    let h = h.with_targets(50).with_operation(op).with_policy(policy);
    let canceller = h.cancel_after(Duration::from_millis(150));
    let batch = h.run().unwrap();
    canceller.join().unwrap();

    assert_eq!(batch.len(), 50);
    assert!(batch.succeeded_count >= 2, "nothing finished before cancel");
    assert!(batch.succeeded_count < 50, "cancel had no effect");

    let cancelled: Vec<_> = batch
        .failures()
        .filter(|r| r.outcome.failure_kind() == Some(FailureKind::Cancelled))
        .collect();
    assert_eq!(cancelled.len(), batch.failed_count);
    // never-started targets report zero attempts and were never touched
    let untouched = cancelled.iter().filter(|r| r.attempts == 0).count();
    assert!(untouched > 0);
    assert_eq!(h.operation.started().len(), 50 - untouched);
    let unique: HashSet<_> = h.operation.started().into_iter().collect();
    assert_eq!(unique.len(), h.operation.started().len());
});

fleet_devkit::dispatch_test!(cancellation_stops_retries, |h: TestHarness| {
    let op = ScriptedOperation::new().on(&address(0), Behaviour::Hang);
    let mut policy = fast_policy(0.2, 10);
    policy.use_async_client = h.policy.use_async_client;
    let h = h.with_targets(1).with_operation(op).with_policy(policy);
    let canceller = h.cancel_after(Duration::from_millis(500));
    let started = Instant::now();
    let batch = h.run().unwrap();
    canceller.join().unwrap();

    let result = &batch.results[0];
    assert_eq!(result.outcome.failure_kind(), Some(FailureKind::Cancelled));
    assert!(result.attempts >= 2, "cancelled before any retry");
    assert!(result.attempts < 11);
    assert_eq!(h.operation.attempts(&address(0)), result.attempts);
    // a full run would take 11 x 0.2s
    assert!(started.elapsed() < Duration::from_millis(1500));
});

#[test]
fn executors_agree_on_outcomes() {
    let script = || {
        let mut op = ScriptedOperation::new();
        for n in 0..30 {
            let behaviour = match n % 5 {
                0 => Behaviour::Fail(FailureKind::Connect),
                1 => Behaviour::Fail(FailureKind::Application),
                2 => Behaviour::FailFirst { times: 1, kind: FailureKind::Connect },
                3 => Behaviour::succeed_after(Duration::from_millis((n % 3) as u64 * 5)),
                _ => Behaviour::succeed(),
            };
            op = op.on(&address(n), behaviour);
        }
        op
    };

    let threaded = TestHarness::new().with_targets(30).with_operation(script()).use_async_client(false).run().unwrap();
    let event_loop = TestHarness::new().with_targets(30).with_operation(script()).use_async_client(true).run().unwrap();

    assert_eq!(outcome_counts(&threaded), outcome_counts(&event_loop));
    assert_eq!(outcome_by_address(&threaded), outcome_by_address(&event_loop));
    assert_eq!(threaded.succeeded_count, 18);
}

#[test]
fn one_shot_dispatch_rejects_bad_policy() {
    let policy = DispatchPolicy { connection_retries: 11, ..DispatchPolicy::default() };
    let op = ScriptedOperation::new();
    let err = dispatch(&fixtures::targets(2), &op, &policy).unwrap_err();
    assert!(err.to_string().contains("connection_retries"));
    assert_eq!(op.total_attempts(), 0);
}
