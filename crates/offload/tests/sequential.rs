// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The sequential variant: same contract as the pooled runner, with all scheduling variance
//! removed - callables run inline in the caller's thread and deliver in submission order.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;

use offload::Runner;

#[test]
fn fan_out_delivers_in_submission_order() {
    let runner = Runner::sequential();
    let order = Rc::new(RefCell::new(Vec::new()));

    // The same shape as the pooled completion-order test, but there are no gates to race:
    // submission order is the delivery order, deterministically.
    let handle = runner.clone();
    let order_clone = Rc::clone(&order);
    runner.spawn(async move {
        let mut results = handle.run_parallel([|| "a", || "b", || "c"]);
        while let Some(label) = results.next().await {
            order_clone.borrow_mut().push(label);
        }
    });

    assert_eq!(order.borrow().as_slice(), &["a", "b", "c"]);
    assert!(runner.is_idle());
}

#[test]
fn callables_run_in_the_caller_thread() {
    let runner = Runner::sequential();
    let caller = thread::current().id();
    let observed = Rc::new(RefCell::new(None));

    let handle = runner.clone();
    let observed_clone = Rc::clone(&observed);
    runner.spawn(async move {
        let worker = handle.run(|| thread::current().id()).await;
        *observed_clone.borrow_mut() = Some(worker);
    });

    assert_eq!(*observed.borrow(), Some(caller));
}

#[test]
fn tasks_complete_within_spawn() {
    let runner = Runner::sequential();
    let trace = Rc::new(RefCell::new(Vec::new()));

    let handle = runner.clone();
    let trace_clone = Rc::clone(&trace);
    trace.borrow_mut().push("before spawn");
    runner.spawn(async move {
        trace_clone.borrow_mut().push("task start");
        let value = handle.run(|| "offloaded").await;
        trace_clone.borrow_mut().push(value);
        trace_clone.borrow_mut().push("task end");
    });
    trace.borrow_mut().push("after spawn");

    assert_eq!(
        trace.borrow().as_slice(),
        &["before spawn", "task start", "offloaded", "task end", "after spawn"]
    );
}

#[test]
fn empty_fan_out_finishes_immediately() {
    let runner = Runner::sequential();
    let finished = Rc::new(RefCell::new(false));

    let handle = runner.clone();
    let finished_clone = Rc::clone(&finished);
    runner.spawn(async move {
        let mut results = handle.run_parallel(Vec::<fn() -> u8>::new());
        assert!(results.next().await.is_none());
        *finished_clone.borrow_mut() = true;
    });

    assert!(*finished.borrow());
    assert!(runner.is_idle());
}

#[test]
fn failure_aborts_iteration_at_its_position() {
    let failures = Rc::new(RefCell::new(Vec::new()));

    let failures_clone = Rc::clone(&failures);
    let runner = Runner::builder()
        .on_unhandled_error(move |panic| {
            failures_clone
                .borrow_mut()
                .push(panic.message().unwrap_or("<opaque>").to_owned());
        })
        .build_sequential();

    let order = Rc::new(RefCell::new(Vec::new()));

    let handle = runner.clone();
    let order_clone = Rc::clone(&order);
    runner.spawn(async move {
        let mut results = handle.run_parallel([
            || "a",
            || -> &'static str { panic!("middle callable failed") },
            || "c",
        ]);
        while let Some(label) = results.next().await {
            order_clone.borrow_mut().push(label);
        }
    });

    // In submission order, "a" is delivered, then the failure aborts the iteration; the third
    // callable already ran (submission is eager) but its outcome is never delivered.
    assert_eq!(order.borrow().as_slice(), &["a"]);
    assert_eq!(failures.borrow().as_slice(), &["middle callable failed".to_owned()]);
    assert!(runner.is_idle());
}

#[test]
fn close_leaves_the_runner_inert() {
    let runner = Runner::sequential();
    runner.close();

    let ran = Rc::new(RefCell::new(false));
    let ran_clone = Rc::clone(&ran);
    runner.spawn(async move {
        *ran_clone.borrow_mut() = true;
    });

    assert!(!*ran.borrow());
    assert!(runner.is_idle());
}
