//! Seeding main's generator.
//!
//! Kept in its own test binary: every task created from main draws its seed
//! from main's generator, so no other test may create tasks concurrently.

use synth_clock::core::{random, seed_main_rng};
use synth_clock::{Task, Yield};

fn draw() -> f64 {
    let task = Task::from_fn(|cx| Ok(Yield::Wait(cx.random_range(10.0, 20.0))));
    task.next().unwrap().unwrap_or_default()
}

#[test]
fn tasks_created_after_seeding_main_are_reproducible() {
    seed_main_rng(99);
    let a = draw();
    let main_a = random();
    seed_main_rng(99);
    let b = draw();
    let main_b = random();

    assert!((a - b).abs() < f64::EPSILON);
    assert!((main_a - main_b).abs() < f64::EPSILON);
    assert!((10.0..20.0).contains(&a));
}
