use cleaner_rs::{
    create_cleaner, shutdown_global, Cleaner, CleanerConfig, CleanerError, CleanerRuntime,
    Confined, Frozen, TeardownPolicy, TrackedHeap, UnreachableEvent, WorkerState,
};
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

fn runtime(name: &str) -> CleanerRuntime {
    CleanerRuntime::new(CleanerConfig::new().with_worker_name(name))
}

/// Queues a task that holds the cleanup thread until teardown begins, so
/// anything triggered afterwards is still queued when the flag flips.
fn hold_until_teardown(runtime: &CleanerRuntime) {
    let watcher = runtime.clone();
    let _held = runtime
        .execute(move || {
            while watcher.worker().state() == WorkerState::Running {
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();
}

#[test]
fn test_collected_payload_runs_exactly_once() {
    let runtime = runtime("it-exactly-once");
    let mut heap = TrackedHeap::new(runtime.hook());
    let recorded = Arc::new(Mutex::new(Vec::new()));

    let cleaner = Cleaner::with_state(&runtime, 42, recorded.clone(), |x: i32, sink| {
        sink.lock().push(x)
    })
    .unwrap();
    let id = heap.allocate(cleaner);

    heap.release(id);
    assert_eq!(heap.collect(), 1);
    runtime.run_synchronous_probe().unwrap();

    assert_eq!(*recorded.lock(), vec![42]);
    assert!(!heap.is_reachable(id));

    assert_eq!(heap.collect(), 0);
    runtime.run_synchronous_probe().unwrap();
    assert_eq!(*recorded.lock(), vec![42]);

    let stats = runtime.stats();
    assert_eq!(stats.created, 1);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.executed, 1);
    assert_eq!(stats.live(), 0);
}

#[test]
fn test_payload_released_after_callback() {
    let runtime = runtime("it-release");
    let payload = Frozen::new(vec![1u64, 2, 3]);
    let observer = Frozen::downgrade(&payload);
    let sum = Arc::new(AtomicUsize::new(0));

    let cleaner = Cleaner::with_state(&runtime, payload, sum.clone(), |p, sum| {
        sum.store(p.iter().sum::<u64>() as usize, Ordering::SeqCst);
    })
    .unwrap();
    assert!(observer.upgrade().is_some());

    drop(cleaner);
    runtime.run_synchronous_probe().unwrap();

    assert_eq!(sum.load(Ordering::SeqCst), 6);
    assert!(observer.upgrade().is_none());
}

#[test]
fn test_fifo_across_handles() {
    let runtime = runtime("it-fifo");
    let order = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<Cleaner> = (0..100u32)
        .map(|i| {
            Cleaner::with_state(&runtime, i, order.clone(), |i, order| order.lock().push(i))
                .unwrap()
        })
        .collect();
    for handle in handles {
        handle.trigger();
    }
    runtime.run_synchronous_probe().unwrap();

    assert_eq!(*order.lock(), (0..100).collect::<Vec<_>>());
}

#[test]
fn test_rejection_does_not_start_worker() {
    let runtime = runtime("it-reject");

    let err = Cleaner::new(&runtime, Confined::new(1), |_| {}).unwrap_err();
    match err {
        CleanerError::InvalidArgument(message) => assert!(message.contains("must be shareable")),
        other => panic!("unexpected error: {}", other),
    }
    assert!(Cleaner::new(&runtime, Some(Confined::new(2)), |_| {}).is_err());
    assert!(Cleaner::new(&runtime, (1u8, vec![Confined::new(3)]), |_| {}).is_err());

    assert_eq!(runtime.worker().state(), WorkerState::NotStarted);
    assert_eq!(runtime.stats().rejected, 3);

    assert!(Cleaner::new(&runtime, None::<Confined<i32>>, |_| {}).is_ok());
    assert_eq!(runtime.worker().state(), WorkerState::Running);
}

#[test]
fn test_callback_state_is_gated_like_the_payload() {
    let runtime = runtime("it-reject-state");
    let confined = Confined::new(String::from("owner thread only"));

    let err = runtime
        .create_with_state(1u8, confined, |_, confined| {
            let _ = confined.get().map(String::len);
        })
        .unwrap_err();
    match err {
        CleanerError::InvalidArgument(message) => {
            assert!(message.starts_with("callback state"), "{}", message)
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(runtime.worker().state(), WorkerState::NotStarted);
    assert_eq!(runtime.stats().created, 0);
}

#[test]
fn test_disable_before_collection_drops_callback() {
    let runtime = runtime("it-teardown");
    let mut heap = TrackedHeap::new(runtime.hook());
    let called = Arc::new(AtomicUsize::new(0));

    let id = heap.allocate(
        Cleaner::with_state(&runtime, 42, called.clone(), |_: i32, called| {
            called.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap(),
    );

    let report = runtime.disable();
    assert!(report.first_call);
    assert_eq!(runtime.worker().state(), WorkerState::Stopped);

    heap.release(id);
    assert_eq!(heap.collect(), 1);
    runtime.run_synchronous_probe().unwrap();

    assert_eq!(called.load(Ordering::SeqCst), 0);
    let stats = runtime.stats();
    assert_eq!(stats.dropped_after_teardown, 1);
    assert_eq!(stats.executed, 0);
}

fn counting(runtime: &CleanerRuntime, count: &Arc<AtomicUsize>) -> Cleaner {
    runtime
        .create_with_state((), count.clone(), |_, count| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
}

#[test]
fn test_drain_runs_cleanups_queued_before_teardown() {
    let runtime = CleanerRuntime::new(
        CleanerConfig::new()
            .with_worker_name("it-drain")
            .with_teardown_policy(TeardownPolicy::Drain),
    );
    let count = Arc::new(AtomicUsize::new(0));

    hold_until_teardown(&runtime);
    for _ in 0..5 {
        counting(&runtime, &count).trigger();
    }

    let report = runtime.shutdown(|| ());
    assert_eq!(report.policy, TeardownPolicy::Drain);
    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert_eq!(runtime.stats().executed, 5);
}

#[test]
fn test_hard_stop_still_runs_queued_cleanups() {
    let runtime = CleanerRuntime::new(
        CleanerConfig::new()
            .with_worker_name("it-hard-stop")
            .with_teardown_policy(TeardownPolicy::HardStop),
    );
    let count = Arc::new(AtomicUsize::new(0));
    let payload = Frozen::new(String::from("handle"));
    let observer = Frozen::downgrade(&payload);

    hold_until_teardown(&runtime);
    runtime
        .create_with_state(payload, count.clone(), |_, count| {
            count.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
        .trigger();
    for _ in 0..4 {
        counting(&runtime, &count).trigger();
    }

    let report = runtime.shutdown(|| ());
    assert_eq!(report.policy, TeardownPolicy::HardStop);
    assert_eq!(count.load(Ordering::SeqCst), 5);
    let stats = runtime.stats();
    assert_eq!(stats.executed, 5);
    assert_eq!(stats.dropped_after_teardown, 0);
    assert!(observer.upgrade().is_none());
}

#[test]
fn test_final_collection_runs_before_drain_disables() {
    let runtime = CleanerRuntime::new(
        CleanerConfig::new()
            .with_worker_name("it-final-drain")
            .with_teardown_policy(TeardownPolicy::Drain),
    );
    let mut heap = TrackedHeap::new(runtime.hook());
    let count = Arc::new(AtomicUsize::new(0));
    let id = heap.allocate(counting(&runtime, &count));
    heap.release(id);

    let report = runtime.shutdown(|| {
        assert_eq!(heap.collect(), 1);
    });
    assert_eq!(report.live_handles, 0);
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.stats().dropped_after_teardown, 0);
}

#[test]
fn test_final_collection_after_hard_stop_drops_callbacks() {
    let runtime = CleanerRuntime::new(
        CleanerConfig::new()
            .with_worker_name("it-final-hard-stop")
            .with_teardown_policy(TeardownPolicy::HardStop),
    );
    let mut heap = TrackedHeap::new(runtime.hook());
    let count = Arc::new(AtomicUsize::new(0));
    let id = heap.allocate(counting(&runtime, &count));
    heap.release(id);

    let report = runtime.shutdown(|| {
        assert_eq!(heap.collect(), 1);
    });
    assert_eq!(report.live_handles, 1);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    let stats = runtime.stats();
    assert_eq!(stats.dropped_after_teardown, 1);
    assert_eq!(stats.executed, 0);
}

#[test]
fn test_cross_thread_transfer() {
    let runtime = runtime("it-cross-thread");
    let observed = Arc::new(Mutex::new(None));

    let (tx, rx) = crossbeam_channel::bounded::<Cleaner>(1);

    let creator = {
        let runtime = runtime.clone();
        let observed = observed.clone();
        thread::spawn(move || {
            let cleaner = Cleaner::with_state(&runtime, 7u32, observed, |_, observed| {
                let current = thread::current();
                *observed.lock() = Some((current.id(), current.name().map(str::to_owned)));
            })
            .unwrap();
            tx.send(cleaner).unwrap();
            thread::current().id()
        })
    };

    let collector = {
        let runtime = runtime.clone();
        thread::spawn(move || {
            let mut heap = TrackedHeap::new(runtime.hook());
            let id = heap.allocate(rx.recv().unwrap());
            heap.release(id);
            assert_eq!(heap.collect(), 1);
            runtime.run_synchronous_probe().unwrap();
            thread::current().id()
        })
    };

    let creator_id = creator.join().unwrap();
    let collector_id = collector.join().unwrap();

    let (ran_on, name) = observed.lock().take().expect("callback ran");
    assert_ne!(ran_on, creator_id);
    assert_ne!(ran_on, collector_id);
    assert_ne!(ran_on, thread::current().id());
    assert_eq!(name.as_deref(), Some("it-cross-thread"));
}

#[test]
fn test_fake_collector_delivers_in_order() {
    let runtime = runtime("it-fake-collector");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (tx, rx) = crossbeam_channel::unbounded::<UnreachableEvent>();

    let hook = runtime.hook();
    let collector = thread::spawn(move || hook.deliver(rx));

    for i in 0..20u32 {
        let cleaner = runtime
            .create_with_state(i, seen.clone(), |i, seen| seen.lock().push(i))
            .unwrap();
        tx.send(cleaner.into()).unwrap();
    }
    drop(tx);

    assert_eq!(collector.join().unwrap(), 20);
    runtime.run_synchronous_probe().unwrap();
    assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
}

#[test]
fn test_leak_checker_counts_live_handles() {
    let runtime = CleanerRuntime::new(
        CleanerConfig::new()
            .with_worker_name("it-leaks")
            .with_leak_checker(true),
    );
    let kept = runtime.create(1u8, |_| {}).unwrap();
    runtime.create(2u8, |_| {}).unwrap().trigger();
    runtime.run_synchronous_probe().unwrap();

    let report = runtime.shutdown(|| ());
    assert!(report.first_call);
    assert_eq!(report.live_handles, 1);

    drop(kept);
    let again = runtime.shutdown(|| ());
    assert!(!again.first_call);
    assert_eq!(again.live_handles, 0);
}

#[test]
fn test_global_runtime() {
    let runtime = CleanerRuntime::global();
    assert_eq!(runtime.worker().name(), runtime.config().worker_name);

    let count = Arc::new(AtomicUsize::new(0));
    runtime
        .create_with_state(5usize, count.clone(), |x, count| {
            count.fetch_add(x, Ordering::SeqCst);
        })
        .unwrap()
        .trigger();
    create_cleaner(1u8, |_| {}).unwrap().trigger();
    runtime.run_synchronous_probe().unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 5);
    assert_eq!(runtime.stats().executed, 2);

    assert!(shutdown_global(|| ()).first_call);
    assert!(CleanerRuntime::global().is_disabled());
}
