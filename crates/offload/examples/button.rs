// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A GUI button whose click handler does blocking work without freezing the event loop.
//!
//! The `TestLoop` stands in for a real GUI framework's event loop; with a real framework the
//! `EventLoopProxy` implementation would wrap its cross-thread invocation primitive instead.

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use offload::Runner;
use offload::testing::{TEST_TIMEOUT, TestLoop};

/// A stand-in widget. Only the GUI thread ever touches it.
struct StatusLabel {
    text: RefCell<String>,
}

fn main() {
    let event_loop = TestLoop::new();
    let runner = Runner::new(event_loop.proxy());

    let label = Rc::new(StatusLabel {
        text: RefCell::new(String::from("idle")),
    });

    // An async click handler, connected to the "signal" as a plain callable. The blocking
    // lookup runs on a worker; the label is only touched on the GUI thread.
    let on_clicked = runner.to_sync({
        let runner = runner.clone();
        let label = Rc::clone(&label);
        move |()| {
            let runner = runner.clone();
            let label = Rc::clone(&label);
            async move {
                *label.text.borrow_mut() = String::from("working...");

                let answer = runner
                    .run(|| {
                        // Stands in for a database query or an HTTP request.
                        thread::sleep(Duration::from_millis(100));
                        42
                    })
                    .await;

                *label.text.borrow_mut() = format!("the answer is {answer}");
            }
        }
    });

    on_clicked(());
    println!("label while working: {}", label.text.borrow());

    assert!(event_loop.run_until(TEST_TIMEOUT, || runner.is_idle()));
    println!("label after the click handler: {}", label.text.borrow());

    runner.close();
}
