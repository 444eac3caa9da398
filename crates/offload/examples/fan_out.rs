// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Fans several blocking downloads out to the pool and processes whichever finishes first.

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use offload::Runner;
use offload::testing::{TEST_TIMEOUT, TestLoop};

fn download(name: &'static str, millis: u64) -> impl FnOnce() -> (&'static str, usize) + Send {
    move || {
        // Stands in for a blocking HTTP fetch.
        thread::sleep(Duration::from_millis(millis));
        (name, name.len() * 1024)
    }
}

fn main() {
    let event_loop = TestLoop::new();
    let runner = Runner::builder()
        .with_max_threads(NonZeroUsize::new(3).expect("nonzero"))
        .build(event_loop.proxy());

    runner.spawn({
        let runner = runner.clone();
        async move {
            let mut downloads = runner.run_parallel([
                download("large.bin", 150),
                download("small.txt", 30),
                download("medium.dat", 80),
            ]);

            // Results arrive in completion order: the fastest download is handled first,
            // regardless of the order of submission.
            while let Some((name, bytes)) = downloads.next().await {
                println!("finished {name} ({bytes} bytes)");
            }
        }
    });

    assert!(event_loop.run_until(TEST_TIMEOUT, || runner.is_idle()));
    runner.close();
}
