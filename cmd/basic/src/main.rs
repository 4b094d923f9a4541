//! Basic gcfiber example
//!
//! Spawns tasks that build short linked lists on the heap, suspends and
//! resumes them across workers, then collects and prints heap statistics.
//!
//! # Environment Variables
//!
//! - `GCF_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)
//! - `GCF_NUM_THREADS=4` - Workers in the default pool
//! - `GCF_THREAD_SLEEP_THRESHOLD=infinite` - Never park idle workers

use gcfiber::{RefSlots, Runtime, Step, TaskState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// GCF_LOG_LEVEL=debug cargo run -p gcfiber-basic
fn main() {
    println!("=== gcfiber Basic Example ===\n");

    gcfiber::logging::init();

    let runtime = match Runtime::new(gcfiber::resolve_or_exit()) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to start runtime: {}", err);
            std::process::exit(1);
        }
    };
    let heap = Arc::clone(runtime.heap());
    let node = heap.register_layout(Arc::new(RefSlots(1)));

    // List heads survive collections through this root source
    let heads = Arc::new(Mutex::new(Vec::new()));
    {
        let heads = Arc::clone(&heads);
        heap.add_root_source(move |visitor| {
            if let Ok(heads) = heads.lock() {
                visitor.visit_all(heads.iter().copied());
            }
        });
    }

    let completed = Arc::new(AtomicUsize::new(0));
    let mut tasks = Vec::new();
    for i in 0..4 {
        let heap = Arc::clone(&heap);
        let heads = Arc::clone(&heads);
        let completed = Arc::clone(&completed);
        let spawned = runtime.spawn(move |cx| {
            let round = cx.resume_point();
            debug!(task = i, round, worker = cx.worker(), depth = cx.depth(), "step");

            // Garbage from every round, one kept list per task
            let mut head = None;
            for _ in 0..16 {
                let Ok(obj) = heap.allocate_with_layout(16, node) else {
                    return Step::Done;
                };
                // No collection can run while this step is executing
                unsafe { obj.set_ref(0, head) };
                head = Some(obj);
            }
            if round == 0 {
                if let (Some(head), Ok(mut heads)) = (head, heads.lock()) {
                    heads.push(head);
                }
            }

            if cx.push_u64(round).is_err() || round == 3 {
                completed.fetch_add(1, Ordering::SeqCst);
                return Step::Done;
            }
            cx.set_resume_point(round + 1);
            if round % 2 == 0 {
                cx.suspend()
            } else {
                cx.yield_now()
            }
        });
        match spawned {
            Ok(task) => tasks.push(task),
            Err(err) => eprintln!("spawn failed: {}", err),
        }
    }

    // Resume suspended tasks, rotating the worker when migration allows it
    let workers = runtime.scheduler().num_workers();
    let start = Instant::now();
    let mut next_worker = 0;
    while completed.load(Ordering::SeqCst) < tasks.len() && start.elapsed() < Duration::from_secs(10) {
        for task in &tasks {
            if task.state() != TaskState::Suspended {
                continue;
            }
            let target = if runtime.config().migrate_tasks {
                next_worker = (next_worker + 1) % workers;
                next_worker
            } else {
                task.last_worker().unwrap_or(0)
            };
            if let Err(err) = runtime.resume(task, target) {
                debug!(task = %task.id(), %err, "resume skipped");
            }
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    runtime.wait_idle(Duration::from_secs(10));
    println!("{} task(s) completed", completed.load(Ordering::SeqCst));

    match runtime.collect() {
        Ok(Some(stats)) => println!(
            "collection: marked {} objects, freed {} objects ({} bytes) in {:?}",
            stats.marked_objects,
            stats.freed_objects,
            stats.freed_bytes,
            stats.mark_time + stats.sweep_time
        ),
        Ok(None) => {}
        Err(err) => eprintln!("collection failed: {}", err),
    }

    let stats = heap.stats();
    info!(?stats, "heap statistics");
    println!(
        "heap: {} collections, {} live objects, {} pages",
        stats.collections, stats.live_objects, stats.pages
    );
    for w in 0..workers {
        if let Some(ws) = runtime.scheduler().worker_stats(w) {
            println!(
                "worker {}: {} steps, {} steals, {} parks, {} bytes copied out",
                w, ws.steps, ws.steals, ws.parks, ws.bytes_copied_out
            );
        }
    }

    if let Err(err) = runtime.shutdown() {
        eprintln!("shutdown failed: {}", err);
    }
    println!("\n=== Example Complete ===");
}
