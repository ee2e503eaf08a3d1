//! End-to-end engine tests over the public API

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use taskgate_engine::{
    all, any, Condition, ConditionResult, Engine, EngineConfig, SpawnOptions, Task, TaskError,
    TaskObserver, TaskState,
};

fn engine() -> Engine {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Engine::new(EngineConfig::default())
}

#[tokio::test(flavor = "multi_thread")]
async fn a_manual_task_unblocks_a_concurrent_waiter() {
    let engine = engine();
    let task: Task<i32, String> = engine.manual(vec![]);

    let waiter = {
        let task = task.clone();
        std::thread::spawn(move || task.wait())
    };

    std::thread::sleep(Duration::from_millis(100));
    assert!(!task.is_finished());

    let finisher = {
        let task = task.clone();
        std::thread::spawn(move || task.finish(42))
    };

    assert_eq!(waiter.join().unwrap().unwrap(), 42);
    finisher.join().unwrap();
    assert_eq!(task.state(), TaskState::Finished);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancelling_before_admission_suppresses_the_closure() {
    let engine = engine();
    let ran = Arc::new(AtomicBool::new(false));

    let task: Task<i32, String> = {
        let ran = Arc::clone(&ran);
        engine.spawn(
            // hold the task in its gate long enough to cancel it first
            SpawnOptions::new().with_condition(Condition::delay(Duration::from_millis(200))),
            move || {
                ran.store(true, Ordering::SeqCst);
                Ok(1)
            },
        )
    };

    std::thread::sleep(Duration::from_millis(20));
    task.cancel();

    match task.wait() {
        Err(err) => assert!(err.is_cancelled()),
        Ok(_) => panic!("expected cancellation"),
    }

    // give a buggy driver time to run the closure anyway
    std::thread::sleep(Duration::from_millis(300));
    assert!(!ran.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn mutually_exclusive_tasks_never_overlap() {
    let engine = engine();
    let intervals = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let intervals = Arc::clone(&intervals);
        let task: Task<(), String> = engine.spawn(
            SpawnOptions::new().with_condition(Condition::mutually_exclusive("alert")),
            move || {
                let start = Instant::now();
                std::thread::sleep(Duration::from_millis(60));
                intervals.lock().push((start, Instant::now()));
                Ok(())
            },
        );
        tasks.push(task);
    }

    for task in &tasks {
        task.wait().unwrap();
    }

    let mut intervals = intervals.lock().clone();
    intervals.sort_by_key(|(start, _)| *start);
    for window in intervals.windows(2) {
        assert!(
            window[0].1 <= window[1].0,
            "category admitted two tasks at once"
        );
    }
    assert!(!engine.exclusivity().is_active("alert"));
}

#[tokio::test(flavor = "multi_thread")]
async fn all_of_short_circuits_on_the_first_decline() {
    let engine = engine();
    let evaluated = Arc::new(AtomicUsize::new(0));

    let counting = |result: ConditionResult| {
        let evaluated = Arc::clone(&evaluated);
        Condition::new(move || {
            evaluated.fetch_add(1, Ordering::SeqCst);
            result
        })
    };

    let task: Task<i32, String> = engine.spawn(
        SpawnOptions::new().with_condition(Condition::all_of(vec![
            counting(ConditionResult::Satisfied),
            counting(ConditionResult::NotSatisfied),
            counting(ConditionResult::Satisfied),
        ])),
        || Ok(1),
    );

    assert!(task.wait().unwrap_err().is_cancelled());
    assert_eq!(evaluated.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn any_of_short_circuits_on_the_first_satisfied() {
    let engine = engine();
    let evaluated = Arc::new(AtomicUsize::new(0));

    let counting = |result: ConditionResult| {
        let evaluated = Arc::clone(&evaluated);
        Condition::new(move || {
            evaluated.fetch_add(1, Ordering::SeqCst);
            result
        })
    };

    let task: Task<i32, String> = engine.spawn(
        SpawnOptions::new().with_condition(Condition::any_of(vec![
            counting(ConditionResult::NotSatisfied),
            counting(ConditionResult::Satisfied),
            counting(ConditionResult::NotSatisfied),
        ])),
        || Ok(7),
    );

    assert_eq!(task.wait().unwrap(), 7);
    assert_eq!(evaluated.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn a_dependency_task_runs_before_the_gated_work() {
    let engine = Arc::new(engine());
    let dependency_done = Arc::new(AtomicBool::new(false));

    let condition = {
        let engine = Arc::clone(&engine);
        let dependency_done = Arc::clone(&dependency_done);
        Condition::boolean(true).with_dependency(move || {
            engine.spawn(SpawnOptions::new(), move || {
                std::thread::sleep(Duration::from_millis(50));
                dependency_done.store(true, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    let task: Task<bool, String> = {
        let dependency_done = Arc::clone(&dependency_done);
        engine.spawn(SpawnOptions::new().with_condition(condition), move || {
            Ok(dependency_done.load(Ordering::SeqCst))
        })
    };

    assert!(task.wait().unwrap(), "work ran before its dependency finished");
}

#[tokio::test(flavor = "multi_thread")]
async fn observers_fire_in_lifecycle_order() {
    let engine = engine();
    let events = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let observer = {
        let e1 = Arc::clone(&events);
        let e2 = Arc::clone(&events);
        let e3 = Arc::clone(&events);
        let e4 = Arc::clone(&events);
        TaskObserver::new()
            .on_will_start(move |_| e1.lock().push("will_start"))
            .on_did_start(move |_| e2.lock().push("did_start"))
            .on_will_finish(move |_| e3.lock().push("will_finish"))
            .on_did_finish(move |_| e4.lock().push("did_finish"))
    };

    let task: Task<i32, String> =
        engine.spawn(SpawnOptions::new().with_observer(observer), || Ok(1));
    task.wait().unwrap();

    assert_eq!(
        *events.lock(),
        vec!["will_start", "did_start", "will_finish", "did_finish"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn parent_cancellation_propagates_to_a_registered_child() {
    let engine = engine();

    let parent: Task<i32, String> = engine.spawn_with(SpawnOptions::new(), |task| {
        while !task.is_cancelled() {
            std::thread::sleep(Duration::from_millis(10));
        }
        Err("stopped".into())
    });
    let child: Task<i32, String> = engine.manual(vec![]);

    {
        let weak_child = child.downgrade();
        parent.cancellation().add_handler(move || {
            if let Some(child) = weak_child.upgrade() {
                child.cancel();
            }
        });
    }

    parent.cancel();

    assert!(parent.wait().unwrap_err().is_cancelled());
    assert!(child.wait().unwrap_err().is_cancelled());
}

#[tokio::test(flavor = "multi_thread")]
async fn combinators_compose_with_spawned_work() {
    let engine = engine();

    let squares: Vec<Task<u64, String>> = (1..=4)
        .map(|n: u64| engine.spawn(SpawnOptions::new(), move || Ok(n * n)))
        .collect();
    assert_eq!(all(&engine, squares).wait().unwrap(), vec![1, 4, 9, 16]);

    let racers: Vec<Task<&'static str, String>> = vec![
        engine.spawn(SpawnOptions::new(), || {
            std::thread::sleep(Duration::from_millis(150));
            Ok("slow")
        }),
        engine.spawn(SpawnOptions::new(), || Ok("fast")),
    ];
    let winner = any(&engine, racers).wait().unwrap();
    assert_eq!(winner.wait().unwrap(), "fast");
}

#[tokio::test(flavor = "multi_thread")]
async fn execution_is_bounded_by_max_concurrent() {
    let engine = Engine::new(EngineConfig {
        max_concurrent: 2,
        ..EngineConfig::default()
    });

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<Task<(), String>> = (0..6)
        .map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            engine.spawn(SpawnOptions::new(), move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(40));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    for task in tasks {
        task.wait().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn awaiter_delivers_exactly_one_outcome_callback() {
    let engine = engine();
    let task: Task<i32, String> = engine.spawn(SpawnOptions::new(), || Ok(11));

    let (tx, rx) = mpsc::channel();
    let error_fired = Arc::new(AtomicBool::new(false));
    {
        let error_fired = Arc::clone(&error_fired);
        engine
            .awaiter(task)
            .on_value(move |v| {
                tx.send(v).ok();
            })
            .on_error(move |_| {
                error_fired.store(true, Ordering::SeqCst);
            })
            .start();
    }

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 11);
    assert!(!error_fired.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread")]
async fn gate_failure_surfaces_as_a_condition_error() {
    #[derive(Debug, thiserror::Error)]
    #[error("disk offline")]
    struct DiskOffline;

    let engine = engine();
    let task: Task<i32, String> = engine.spawn(
        SpawnOptions::new()
            .with_condition(Condition::new(|| ConditionResult::failed(DiskOffline))),
        || Ok(1),
    );

    match task.wait() {
        Err(TaskError::Condition(failure)) => {
            assert!(failure.to_string().contains("disk offline"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
