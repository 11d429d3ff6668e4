//! Integration Tests for Cached Functions
//!
//! Tests the full get-or-compute cycle against a real namespace directory,
//! for each invocation shape and each maintenance operation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::Duration;

use futures::StreamExt;
use persist_cache::{
    clear, delete, flush, Arguments, CacheBuilder, CacheError, CachedFunction, CallableDescriptor,
    Config, Expiry, InvocationShape, Parameter, Value, VerbatimResolver,
};
use tempfile::TempDir;

// == Helper Functions ==

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> (TempDir, Config) {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let config = Config::default().with_root(root.path());
    (root, config)
}

/// `f(a, b=2)`
fn f_descriptor() -> CallableDescriptor {
    CallableDescriptor::new("tests::f")
        .param(Parameter::required("a"))
        .param(Parameter::with_default("b", 2))
}

fn build(descriptor: CallableDescriptor, config: &Config) -> CachedFunction {
    CacheBuilder::new(descriptor)
        .config(config.clone())
        .build()
        .unwrap()
}

fn sum_of(args: &Arguments, calls: &AtomicUsize) -> anyhow::Result<Value> {
    calls.fetch_add(1, Ordering::SeqCst);
    let total: i64 = args.positional().iter().filter_map(Value::as_i64).sum::<i64>()
        + args.keyword().iter().filter_map(|(_, v)| v.as_i64()).sum::<i64>();
    Ok(Value::from(total))
}

// == Direct Shape Tests ==

#[test]
fn test_calling_conventions_hit_one_entry() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    let calls = AtomicUsize::new(0);

    let calls_list = [
        Arguments::new().arg(1),
        Arguments::new().arg(1).arg(2),
        Arguments::new().kwarg("a", 1).kwarg("b", 2),
        Arguments::new().kwarg("b", 2).kwarg("a", 1),
    ];
    for args in &calls_list {
        let result = cached
            .get_or_compute(args, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(3))
            })
            .unwrap();
        assert_eq!(result, Value::from(3));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cached.store().len().unwrap(), 1);
}

#[test]
fn test_distinct_arguments_compute_separately() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    let calls = AtomicUsize::new(0);

    let one = Arguments::new().arg(1);
    let two = Arguments::new().arg(2);
    assert_eq!(cached.get_or_compute(&one, || sum_of(&one, &calls)).unwrap(), Value::from(1));
    assert_eq!(cached.get_or_compute(&two, || sum_of(&two, &calls)).unwrap(), Value::from(2));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cached.store().len().unwrap(), 2);
}

#[test]
fn test_results_survive_a_new_handle() {
    let (_root, config) = test_config();
    let args = Arguments::new().arg(4);

    build(f_descriptor(), &config)
        .get_or_compute(&args, || Ok(Value::tuple(["persisted", "tuple"])))
        .unwrap();

    let reopened = build(f_descriptor(), &config);
    let value = reopened
        .get_or_compute(&args, || panic!("should be served from disk"))
        .unwrap();
    assert_eq!(value, Value::tuple(["persisted", "tuple"]));
}

#[test]
fn test_clear_cache_forces_recompute() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    let calls = AtomicUsize::new(0);
    let args = Arguments::new().arg(1);

    let compute = || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        Ok(Value::from(n))
    };
    let first = cached.get_or_compute(&args, compute).unwrap();
    assert_eq!(cached.get_or_compute(&args, compute).unwrap(), first);

    cached.clear_cache().unwrap();
    assert!(cached.dir().is_dir());

    let second = cached.get_or_compute(&args, compute).unwrap();
    assert_ne!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_delete_cache_removes_directory() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::Null))
        .unwrap();

    cached.delete_cache().unwrap();
    assert!(!cached.dir().exists());

    // The handle recreates its namespace on the next store
    cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::Null))
        .unwrap();
    assert!(cached.dir().is_dir());
}

#[test]
fn test_compute_failure_stores_nothing() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);

    let err = cached
        .get_or_compute(&Arguments::new().arg(1), || anyhow::bail!("upstream down"))
        .unwrap_err();

    assert!(matches!(err, CacheError::Compute(_)));
    assert_eq!(err.to_string(), "upstream down");
    assert!(cached.store().is_empty().unwrap());
}

#[test]
fn test_invalid_arguments_are_rejected() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);

    let err = cached
        .get_or_compute(&Arguments::new().arg(1).kwarg("c", 3), || Ok(Value::Null))
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidArguments(_)));
}

#[test]
fn test_method_receiver_is_ignored() {
    let (_root, config) = test_config();
    let descriptor = CallableDescriptor::new("tests::Report::total")
        .method()
        .param(Parameter::required("year"));
    let cached = build(descriptor, &config);
    let calls = AtomicUsize::new(0);

    for receiver in ["first instance", "second instance"] {
        let args = Arguments::new().arg(receiver).arg(2024);
        cached
            .get_or_compute(&args, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(100))
            })
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// == Expiry Tests ==

#[test]
fn test_expired_entry_is_recomputed() {
    let (_root, config) = test_config();
    let cached = CacheBuilder::new(f_descriptor())
        .expiry(Expiry::from(Duration::from_millis(200)))
        .config(config)
        .build()
        .unwrap();
    let calls = AtomicUsize::new(0);
    let args = Arguments::new().arg(1);

    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    sleep(Duration::from_millis(400));
    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_set_expiry_applies_to_later_lookups() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    let calls = AtomicUsize::new(0);
    let args = Arguments::new().arg(1);

    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    sleep(Duration::from_millis(300));

    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cached.set_expiry(Some(Expiry::from(Duration::from_millis(100))));
    cached.get_or_compute(&args, || sum_of(&args, &calls)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_flush_cache_removes_only_expired() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);

    cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::from("old")))
        .unwrap();
    sleep(Duration::from_millis(400));
    cached
        .get_or_compute(&Arguments::new().arg(2), || Ok(Value::from("new")))
        .unwrap();

    assert_eq!(cached.flush_cache().unwrap(), 0);

    cached.set_expiry(Some(Expiry::from(Duration::from_millis(200))));
    assert_eq!(cached.flush_cache().unwrap(), 1);
    assert_eq!(cached.store().len().unwrap(), 1);
}

// == Standalone Maintenance Tests ==

#[test]
fn test_standalone_operations_by_name() {
    let (_root, config) = test_config();
    let cached = CacheBuilder::new(f_descriptor())
        .name("totals")
        .config(config.clone())
        .build()
        .unwrap();

    cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::from(1)))
        .unwrap();
    sleep(Duration::from_millis(300));
    cached
        .get_or_compute(&Arguments::new().arg(2), || Ok(Value::from(2)))
        .unwrap();

    let removed = flush("totals", Expiry::from(Duration::from_millis(150)), &config).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(cached.store().len().unwrap(), 1);

    clear("totals", &config).unwrap();
    assert!(cached.store().is_empty().unwrap());
    assert!(cached.dir().is_dir());

    delete("totals", &config).unwrap();
    assert!(!cached.dir().exists());
    delete("totals", &config).unwrap();
}

#[test]
fn test_verbatim_resolver_uses_name_as_directory() {
    let (root, config) = test_config();
    let cached = CacheBuilder::new(f_descriptor())
        .name("reports")
        .resolver(VerbatimResolver)
        .config(config)
        .build()
        .unwrap();

    assert_eq!(cached.dir(), root.path().join("reports"));
}

// == Suspending Shape Tests ==

#[tokio::test]
async fn test_async_results_are_cached() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor().shape(InvocationShape::Suspending), &config);
    let calls = &AtomicUsize::new(0);
    let args = Arguments::new().arg(5);

    for _ in 0..3 {
        let value = cached
            .get_or_compute_async(&args, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, anyhow::Error>(Value::from(7))
            })
            .await
            .unwrap();
        assert_eq!(value, Value::from(7));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = cached.stats();
    assert_eq!((stats.hits, stats.misses, stats.stores), (2, 1, 1));
}

#[test]
fn test_shape_mismatch() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor().shape(InvocationShape::Suspending), &config);

    let err = cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::Null))
        .unwrap_err();
    assert!(matches!(err, CacheError::ShapeMismatch { .. }));
}

// == Lazy Sequence Tests ==

#[test]
fn test_sequence_is_replayed_without_producer() {
    let (_root, config) = test_config();
    let cached = build(
        CallableDescriptor::new("tests::numbers")
            .param(Parameter::required("n"))
            .shape(InvocationShape::LazySequence),
        &config,
    );
    let runs = AtomicUsize::new(0);
    let args = Arguments::new().arg(10);
    let produce = || {
        runs.fetch_add(1, Ordering::SeqCst);
        (0..10).map(|i| Ok::<_, anyhow::Error>(Value::from(i)))
    };

    let first = cached.get_or_compute_iter(&args, produce).unwrap();
    assert!(!first.is_replay());
    let first: Vec<Value> = first.map(|item| item.unwrap()).collect();

    let second = cached.get_or_compute_iter(&args, produce).unwrap();
    assert!(second.is_replay());
    let second: Vec<Value> = second.map(|item| item.unwrap()).collect();

    let expected: Vec<Value> = (0..10).map(Value::from).collect();
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abandoned_sequence_is_not_stored() {
    let (_root, config) = test_config();
    let cached = build(
        CallableDescriptor::new("tests::numbers").shape(InvocationShape::LazySequence),
        &config,
    );

    let mut sequence = cached
        .get_or_compute_iter(&Arguments::new(), || {
            (0..10).map(|i| Ok::<_, anyhow::Error>(Value::from(i)))
        })
        .unwrap();
    assert_eq!(sequence.next().unwrap().unwrap(), Value::from(0));
    drop(sequence);

    assert!(cached.store().is_empty().unwrap());
}

#[tokio::test]
async fn test_stream_is_replayed_without_producer() {
    let (_root, config) = test_config();
    let cached = build(
        CallableDescriptor::new("tests::ticks").shape(InvocationShape::LazySequence),
        &config,
    );
    let runs = AtomicUsize::new(0);
    let produce = || {
        runs.fetch_add(1, Ordering::SeqCst);
        futures::stream::iter((0..5).map(|i| Ok::<_, anyhow::Error>(Value::from(i))))
    };

    let first: Vec<Value> = cached
        .get_or_compute_stream(&Arguments::new(), produce)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;
    let second: Vec<Value> = cached
        .get_or_compute_stream(&Arguments::new(), produce)
        .await
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    let expected: Vec<Value> = (0..5).map(Value::from).collect();
    assert_eq!(first, expected);
    assert_eq!(second, expected);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

// == Background Flush Tests ==

#[tokio::test]
async fn test_flush_task_runs_at_configured_interval() {
    let (_root, mut config) = test_config();
    config.flush_interval = 1;
    let cached = CacheBuilder::new(f_descriptor())
        .expiry(Expiry::from(Duration::from_millis(200)))
        .config(config)
        .build()
        .unwrap();
    cached
        .get_or_compute(&Arguments::new().arg(1), || Ok(Value::from(1)))
        .unwrap();

    let handle = cached.spawn_flush_task().unwrap();
    tokio::time::sleep(Duration::from_millis(1600)).await;

    assert!(cached.store().is_empty().unwrap());
    handle.abort();
}

#[tokio::test]
async fn test_flush_task_needs_an_expiry() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    assert!(cached.spawn_flush_task().is_none());
}

// == Concurrency Tests ==

const PAYLOAD_LEN: usize = 2000;

// A value large enough that a torn write would show as a short or mixed list
fn payload(writer: usize) -> Value {
    Value::list(std::iter::repeat(Value::from(writer)).take(PAYLOAD_LEN))
}

fn assert_whole(value: &Value) {
    let items = value.as_slice().expect("entry should be a list");
    assert_eq!(items.len(), PAYLOAD_LEN);
    assert!(items.iter().all(|item| item == &items[0]));
}

#[test]
fn test_concurrent_misses_leave_one_whole_entry() {
    let (_root, config) = test_config();
    let cached = build(f_descriptor(), &config);
    let args = Arguments::new().arg(1);
    let key = cached.key_for(&args).unwrap();
    let computes = AtomicUsize::new(0);
    let writers_done = AtomicUsize::new(0);
    let barrier = std::sync::Barrier::new(8);

    std::thread::scope(|scope| {
        for writer in 0..8 {
            let (cached, args, computes, writers_done, barrier) =
                (&cached, &args, &computes, &writers_done, &barrier);
            scope.spawn(move || {
                barrier.wait();
                let value = cached
                    .get_or_compute(args, || {
                        computes.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(20));
                        Ok(payload(writer))
                    })
                    .unwrap();
                assert_whole(&value);
                writers_done.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..2 {
            let (cached, key, writers_done) = (&cached, &key, &writers_done);
            scope.spawn(move || {
                while writers_done.load(Ordering::SeqCst) < 8 {
                    if let Some(value) = cached.store().get(key, None).unwrap() {
                        assert_whole(&value);
                    }
                }
            });
        }
    });

    assert!(computes.load(Ordering::SeqCst) >= 1);
    assert_eq!(cached.store().len().unwrap(), 1);
    let survivor = cached.store().get(&key, None).unwrap().unwrap();
    assert_whole(&survivor);
}
