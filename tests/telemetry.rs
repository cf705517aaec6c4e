use gpu_sim::{GpuProfile, TelemetrySimulator, TelemetrySnapshot};
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(100);

fn profile() -> Arc<GpuProfile> {
    Arc::new(GpuProfile {
        vram_mb: 8192,
        tdp_watts: 250,
        base_clock_mhz: 1500,
        memory_clock_mhz: 1750,
        ..GpuProfile::new("sim", "NVIDIA GeForce RTX 3070", "NVIDIA Corporation")
    })
}

fn seeded(seed: u64) -> TelemetrySimulator {
    let sim = TelemetrySimulator::seeded(TICK, seed);
    sim.set_profile(profile());
    sim
}

fn run(sim: &TelemetrySimulator, ticks: usize) -> Vec<TelemetrySnapshot> {
    (0..ticks).filter_map(|_| sim.tick()).collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn thermals_lag_utilization() {
    let sim = seeded(7);
    sim.set_load(1.0);
    let series = run(&sim, 200);

    let util_at = series
        .iter()
        .position(|s| s.gpu_utilization >= 95.0)
        .unwrap();
    let temp_at = series
        .iter()
        .position(|s| s.temperature_core >= 85.0 - 4.25)
        .unwrap();
    assert!(util_at < temp_at, "utilization {util_at}, temperature {temp_at}");
}

#[test]
fn readings_stay_in_range_under_random_load() {
    let sim = seeded(11);
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    for _ in 0..500 {
        sim.set_load(rng.gen_range(0.0..=1.0));
        let s = sim.tick().unwrap();
        assert!((0.0..=100.0).contains(&s.gpu_utilization));
        assert!((0.0..=100.0).contains(&s.fan_speed_percent));
        assert!(s.memory_used_mb > 0.0 && s.memory_used_mb <= s.memory_total_mb);
        assert!((30.0..=90.0).contains(&s.temperature_core));
        assert_eq!(s.temperature_hotspot, s.temperature_core + 8.0);
        assert!(s.power_draw_watts > 0.0 && s.power_draw_watts <= 250.0 * 1.01);
        assert!((1500..=1875).contains(&s.gpu_clock_mhz));
    }
}

#[test]
fn idle_load_settles_near_baseline() {
    let sim = seeded(3);
    sim.set_load(0.0);
    let last = run(&sim, 150).pop().unwrap();

    assert!(
        (815.0..=945.0).contains(&last.memory_used_mb),
        "{}",
        last.memory_used_mb
    );
    assert!((last.power_draw_watts - 25.0).abs() <= 2.5, "{}", last.power_draw_watts);
    assert_eq!(last.gpu_clock_mhz, 1500);
    assert_eq!(last.fan_speed_percent, 30.0);
}

#[test]
fn full_load_boosts_clock_and_power() {
    let sim = seeded(5);
    sim.set_load_percent(100.0);

    let first = sim.tick().unwrap();
    assert_eq!(first.gpu_clock_mhz, 1875);
    assert_eq!(first.sequence, 1);

    let last = run(&sim, 100).pop().unwrap();
    assert!((last.power_draw_watts - 250.0).abs() <= 5.0, "{}", last.power_draw_watts);
    assert_eq!(last.power_limit_watts, 250.0);
    assert!(last.encoder_utilization < 30.0);
}

#[test]
fn panicking_subscriber_does_not_starve_others() {
    let sim = seeded(1);
    let hits = Arc::new(AtomicUsize::new(0));
    sim.subscribe(|_| panic!("subscriber failure"));
    let counter = Arc::clone(&hits);
    sim.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    run(&sim, 3);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[test]
fn worker_publishes_until_stopped() {
    let sim = TelemetrySimulator::new(Duration::from_millis(10));
    sim.set_profile(profile());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    sim.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let rx = sim.subscribe_channel(16);

    sim.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || hits.load(Ordering::SeqCst) >= 3));
    sim.stop();
    assert!(!sim.is_running());

    let after_stop = hits.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.load(Ordering::SeqCst), after_stop);

    let sequences: Vec<u64> = rx.try_iter().map(|s| s.sequence).collect();
    assert!(!sequences.is_empty());
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn subscriber_can_stop_the_worker() {
    let sim = Arc::new(TelemetrySimulator::new(Duration::from_millis(10)));
    sim.set_profile(profile());
    let hits = Arc::new(AtomicUsize::new(0));

    let weak: Weak<TelemetrySimulator> = Arc::downgrade(&sim);
    let counter = Arc::clone(&hits);
    sim.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(sim) = weak.upgrade() {
            sim.stop();
        }
    });

    sim.start().unwrap();
    assert!(wait_until(Duration::from_secs(2), || hits.load(Ordering::SeqCst) >= 1));
    assert!(wait_until(Duration::from_secs(2), || !sim.is_running()));

    thread::sleep(Duration::from_millis(30));
    let settled = hits.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.load(Ordering::SeqCst), settled);
}

#[test]
fn profile_switch_restarts_from_idle() {
    let sim = seeded(2);
    sim.set_load(1.0);
    run(&sim, 50);

    let other = Arc::new(GpuProfile {
        vram_mb: 24576,
        tdp_watts: 355,
        base_clock_mhz: 1855,
        ..GpuProfile::new("rx", "AMD Radeon RX 7900 XTX", "Advanced Micro Devices, Inc.")
    });
    sim.set_profile(Arc::clone(&other));

    let current = sim.current().unwrap();
    assert_eq!(current.sequence, 0);
    assert_eq!(current.temperature_core, 40.0);
    assert_eq!(current.memory_total_mb, 24576.0);
    assert_eq!(sim.profile().unwrap().id, "rx");
    assert_eq!(sim.static_info().unwrap().architecture, "RDNA 3");
}

#[test]
fn profile_switch_is_seen_at_once_by_worker_and_subscribers() {
    let sized = |vram_mb: u32| {
        Arc::new(GpuProfile {
            vram_mb,
            ..GpuProfile::new("sized", "NVIDIA GeForce RTX 3060", "NVIDIA Corporation")
        })
    };
    let sim = TelemetrySimulator::new(Duration::from_millis(1));
    sim.set_profile(sized(1000));
    sim.set_load(0.5);

    let seen: Arc<Mutex<Vec<(u64, f64)>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    sim.subscribe(move |s| {
        thread::sleep(Duration::from_micros(200));
        log.lock().unwrap().push((s.generation, s.memory_total_mb));
    });
    sim.start().unwrap();

    for i in 0..2_000u32 {
        let vram = if i % 2 == 0 { 2000 } else { 1000 };
        sim.set_profile(sized(vram));
        let mark = seen.lock().unwrap().len();
        let generation = sim.generation();

        let current = sim.current().unwrap();
        assert_eq!(current.memory_total_mb, f64::from(vram), "switch {i}");
        assert_eq!(current.generation, generation);

        let late = seen.lock().unwrap()[mark..].to_vec();
        for (g, total) in late {
            if g == generation {
                assert_eq!(total, f64::from(vram), "switch {i}");
            } else {
                assert!(g > generation, "switch {i}: generation {g} delivered after {generation}");
            }
        }
    }
    sim.stop();

    let seen = seen.lock().unwrap();
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
}
