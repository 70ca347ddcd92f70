//! End-to-end task scenarios: chained sub-tasks, delayed completion,
//! callback ordering, and failure propagation.

use corun::test_utils::init_test_logging;
use corun::time::sleep;
use corun::{
    assert_with_log, spawn, spawn_on, test_complete, test_phase, Executor, LoopExecutor,
    SharedLoopExecutor,
    Task, TaskError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn chained_tasks_sum_their_results() {
    init_test_logging();
    test_phase!("chained_tasks_sum_their_results");

    let task = spawn_on(Arc::new(LoopExecutor::new()), async {
        let mut sum = 0;
        for value in 1..=3 {
            let sub = spawn(async move { value });
            sum += sub.await.unwrap();
        }
        sum
    });

    let result = task.get_result();
    assert_with_log!(result == Ok(6), "chained sum", Ok::<i32, TaskError>(6), result);
    test_complete!("chained_tasks_sum_their_results");
}

#[test]
fn delayed_sum_takes_the_expected_wall_time() {
    init_test_logging();
    test_phase!("delayed_sum_takes_the_expected_wall_time");

    let start = Instant::now();
    let task = spawn_on(Arc::new(LoopExecutor::new()), async {
        sleep(Duration::from_millis(100)).await;
        sleep(Duration::from_millis(500)).await;
        42
    });

    let result = task.get_result();
    let elapsed = start.elapsed();

    assert_with_log!(result == Ok(42), "result", Ok::<i32, TaskError>(42), result);
    assert_with_log!(
        elapsed >= Duration::from_millis(595),
        "elapsed lower bound",
        "at least ~600ms",
        elapsed
    );
    assert_with_log!(
        elapsed < Duration::from_millis(900),
        "elapsed upper bound",
        "under ~900ms",
        elapsed
    );
    test_complete!("delayed_sum_takes_the_expected_wall_time");
}

#[test]
fn callbacks_registered_before_completion_fire_in_order() {
    init_test_logging();
    test_phase!("callbacks_registered_before_completion_fire_in_order");

    let order = Arc::new(Mutex::new(Vec::new()));
    let looper = Arc::new(LoopExecutor::new());

    let task = spawn_on(looper, async {
        sleep(Duration::from_millis(100)).await;
        "done"
    });

    for index in 0..5 {
        let order = Arc::clone(&order);
        task.on_completed(move |_| {
            order.lock().unwrap().push(index);
        });
    }

    let result = task.get_result();
    assert_with_log!(
        result == Ok("done"),
        "result",
        Ok::<&str, TaskError>("done"),
        result
    );
    // The drain may still be running right after get_result returns.
    thread::sleep(Duration::from_millis(100));
    let order = order.lock().unwrap().clone();
    assert_with_log!(
        order == vec![0, 1, 2, 3, 4],
        "registration order preserved",
        vec![0, 1, 2, 3, 4],
        order
    );
    test_complete!("callbacks_registered_before_completion_fire_in_order");
}

#[test]
fn callbacks_registered_after_completion_run_inline() {
    init_test_logging();
    test_phase!("callbacks_registered_after_completion_run_inline");

    let task = spawn(async { 11 });
    let result = task.get_result();
    assert_with_log!(result == Ok(11), "result", Ok::<i32, TaskError>(11), result);

    let fired = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&fired);
    task.on_completed(move |result| {
        assert_eq!(result, Ok(11));
        count.fetch_add(1, Ordering::SeqCst);
    });

    // Ran synchronously during registration: no waiting needed.
    let fired = fired.load(Ordering::SeqCst);
    assert_with_log!(fired == 1, "inline callback fired", 1, fired);
    test_complete!("callbacks_registered_after_completion_run_inline");
}

#[test]
fn a_failing_sub_task_propagates_to_its_awaiter() {
    init_test_logging();
    test_phase!("a_failing_sub_task_propagates_to_its_awaiter");

    let outer = spawn_on(Arc::new(SharedLoopExecutor), async {
        let inner: Task<u32> = spawn(async { panic!("inner exploded") });
        inner.await
    });

    let result = outer.get_result().unwrap();
    assert_with_log!(
        result == Err(TaskError::Panicked(Arc::from("inner exploded"))),
        "inner failure token observed by the awaiter",
        "Err(Panicked(inner exploded))",
        result
    );
    test_complete!("a_failing_sub_task_propagates_to_its_awaiter");
}

#[test]
fn then_catching_finally_observe_the_right_outcomes() {
    init_test_logging();
    test_phase!("then_catching_finally_observe_the_right_outcomes");

    let then_hits = Arc::new(AtomicUsize::new(0));
    let catch_hits = Arc::new(AtomicUsize::new(0));
    let finally_hits = Arc::new(AtomicUsize::new(0));

    let ok_task = spawn_on(Arc::new(LoopExecutor::new()), async {
        sleep(Duration::from_millis(30)).await;
        5
    });
    let t = Arc::clone(&then_hits);
    let c = Arc::clone(&catch_hits);
    let f = Arc::clone(&finally_hits);
    ok_task
        .then(move |v| {
            assert_eq!(v, 5);
            t.fetch_add(1, Ordering::SeqCst);
        })
        .catching(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .finally(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
    let _ = ok_task.get_result();

    let err_task: Task<u32> = spawn_on(Arc::new(LoopExecutor::new()), async {
        sleep(Duration::from_millis(30)).await;
        panic!("deliberate")
    });
    let t = Arc::clone(&then_hits);
    let c = Arc::clone(&catch_hits);
    let f = Arc::clone(&finally_hits);
    err_task
        .then(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .catching(move |error| {
            assert_eq!(error, TaskError::Panicked(Arc::from("deliberate")));
            c.fetch_add(1, Ordering::SeqCst);
        })
        .finally(move || {
            f.fetch_add(1, Ordering::SeqCst);
        });
    let _ = err_task.get_result();

    thread::sleep(Duration::from_millis(100));
    let (then_hits, catch_hits, finally_hits) = (
        then_hits.load(Ordering::SeqCst),
        catch_hits.load(Ordering::SeqCst),
        finally_hits.load(Ordering::SeqCst),
    );
    assert_with_log!(then_hits == 1, "then fired on success only", 1, then_hits);
    assert_with_log!(catch_hits == 1, "catching fired on failure only", 1, catch_hits);
    assert_with_log!(finally_hits == 2, "finally fired on both", 2, finally_hits);
    test_complete!("then_catching_finally_observe_the_right_outcomes");
}

#[test]
fn tasks_on_one_loop_interleave_without_blocking_it() {
    init_test_logging();
    test_phase!("tasks_on_one_loop_interleave_without_blocking_it");

    // Two tasks share one loop; their sleeps overlap, so the pair
    // finishes in roughly one sleep's worth of time.
    let looper = Arc::new(LoopExecutor::new());
    let start = Instant::now();

    let first = spawn_on(Arc::clone(&looper) as Arc<dyn Executor>, async {
        sleep(Duration::from_millis(150)).await;
        1
    });
    let second = spawn_on(looper, async {
        sleep(Duration::from_millis(150)).await;
        2
    });

    assert_eq!(first.get_result(), Ok(1));
    assert_eq!(second.get_result(), Ok(2));

    let elapsed = start.elapsed();
    assert_with_log!(
        elapsed < Duration::from_millis(290),
        "sleeps overlapped on one loop",
        "under 290ms",
        elapsed
    );
    test_complete!("tasks_on_one_loop_interleave_without_blocking_it");
}
