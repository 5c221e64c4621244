//! # Flag Barrier Integration Test
//!
//! Alternates tick and frame plans over shared state the way a renderer
//! does, and checks that the flags keep the two passes apart.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skein_core::{Flag, ForEachPlan, PlanExt, RaisePlan, SharedPlan, TaskExecutor};

#[derive(Default)]
struct Shared {
    in_tick: AtomicBool,
    in_frame: AtomicBool,
    overlaps: AtomicUsize,
    tick_items: AtomicUsize,
    frame_items: AtomicUsize,
}

fn pass(shared: &Arc<Shared>, tick: bool, flag: &Arc<Flag>) -> SharedPlan<u64> {
    let state = Arc::clone(shared);
    ForEachPlan::of(
        |_: &u64| (0..16).collect::<Vec<u32>>(),
        move |_: &u32, _: &u64| {
            let (mine, other, count) = if tick {
                (&state.in_tick, &state.in_frame, &state.tick_items)
            } else {
                (&state.in_frame, &state.in_tick, &state.frame_items)
            };
            mine.store(true, Ordering::SeqCst);
            if other.load(Ordering::SeqCst) {
                state.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_micros(200));
            count.fetch_add(1, Ordering::SeqCst);
            mine.store(false, Ordering::SeqCst);
        },
    )
    .then(RaisePlan::raise(Arc::clone(flag)))
    .shared()
}

/// Test: a frame never runs while a tick runs, and the reverse.
#[test]
fn test_tick_and_frame_alternate() {
    let executor = TaskExecutor::new("barrier", 4).unwrap();
    let shared = Arc::new(Shared::default());
    let tick_flag = Arc::new(Flag::new("tickComplete"));
    let frame_flag = Arc::new(Flag::new("frameComplete"));
    tick_flag.raise();
    frame_flag.raise();

    let tick_plan = pass(&shared, true, &tick_flag);
    let frame_plan = pass(&shared, false, &frame_flag);

    for tick in 0..20_u64 {
        assert!(executor.sync_until(|| frame_flag.is_raised()).unwrap());
        assert!(executor.sync_until(|| tick_flag.is_raised()).unwrap());
        tick_flag.lower();
        tick_plan.execute_detached(&executor, tick);

        for frame in 0..2_u64 {
            assert!(executor.sync_until(|| tick_flag.is_raised()).unwrap());
            assert!(executor.sync_until(|| frame_flag.is_raised()).unwrap());
            frame_flag.lower();
            frame_plan.execute_detached(&executor, tick * 2 + frame);
        }
    }
    executor.sync_point().unwrap();

    assert_eq!(shared.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(shared.tick_items.load(Ordering::SeqCst), 20 * 16);
    assert_eq!(shared.frame_items.load(Ordering::SeqCst), 40 * 16);
    assert!(tick_flag.is_raised());
    assert!(frame_flag.is_raised());
}

/// Test: with nothing raising it, waiting on a flag reports idle instead of
/// hanging.
#[test]
fn test_unraised_flag_reports_idle() {
    let executor = TaskExecutor::new("idle", 2).unwrap();
    let flag = Flag::new("never");
    assert!(!executor.sync_until(|| flag.is_raised()).unwrap());
}
