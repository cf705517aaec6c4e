use crate::data::{GpuInfo, TelemetrySnapshot};
use crate::profile::GpuProfile;
use crate::projection;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("failed to start telemetry worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("telemetry worker panicked")]
    WorkerPanicked,
}

// Exponential smoothing per tick, lower is slower
pub const BASE_SMOOTHING: f64 = 0.3;
pub const MEMORY_SMOOTHING: f64 = BASE_SMOOTHING * 0.5;
pub const THERMAL_SMOOTHING: f64 = BASE_SMOOTHING * 0.3;
pub const FAN_SMOOTHING: f64 = BASE_SMOOTHING * 0.4;

const IDLE_TEMP_C: f64 = 35.0;
const MAX_TEMP_C: f64 = 85.0;
const MAX_VARIATION: f64 = 0.15;
const NOISE_STD_DEV: f64 = 0.02;
const MAX_CLOCK_BOOST: f64 = 0.25;

// Time is simulated: each sample advances one tick period, so a seeded
// model replays the same series.
pub struct SimulatedGpu {
    profile: Arc<GpuProfile>,
    rng: StdRng,
    period: Duration,
    ticks: u64,
    current: TelemetrySnapshot,
}

impl SimulatedGpu {
    pub fn new(profile: Arc<GpuProfile>, period: Duration) -> Self {
        Self::with_rng(profile, period, StdRng::from_entropy())
    }

    pub fn with_seed(profile: Arc<GpuProfile>, period: Duration, seed: u64) -> Self {
        Self::with_rng(profile, period, StdRng::seed_from_u64(seed))
    }

    fn with_rng(profile: Arc<GpuProfile>, period: Duration, rng: StdRng) -> Self {
        let current = idle_baseline(&profile);
        Self {
            profile,
            rng,
            period,
            ticks: 0,
            current,
        }
    }

    pub fn profile(&self) -> &Arc<GpuProfile> {
        &self.profile
    }

    pub fn static_info(&self) -> GpuInfo {
        projection::static_info(&self.profile)
    }

    pub fn current(&self) -> &TelemetrySnapshot {
        &self.current
    }

    fn variation(&mut self, t: f64) -> f64 {
        let wave = 0.05 * (0.5 * t).sin() + 0.03 * (1.3 * t).sin();
        (wave + gaussian(&mut self.rng, NOISE_STD_DEV)).clamp(-MAX_VARIATION, MAX_VARIATION)
    }

    // load is a 0..=1 fraction
    pub fn sample(&mut self, load: f64) -> TelemetrySnapshot {
        let load = if load.is_finite() { load.clamp(0.0, 1.0) } else { 0.0 };
        self.ticks += 1;
        let t = self.ticks as f64 * self.period.as_secs_f64();
        let variation = self.variation(t);

        let p = &self.profile;
        let vram = f64::from(p.vram_mb);
        let tdp = f64::from(p.tdp_watts);
        let prev = &self.current;

        let util_target = (load * 100.0 + variation * 20.0).clamp(0.0, 100.0);
        let gpu_utilization = smooth(prev.gpu_utilization, util_target, BASE_SMOOTHING);

        let mem_target = (load * 80.0 + 10.0 + variation * 10.0).max(10.0);
        let memory_utilization = smooth(prev.memory_utilization, mem_target, MEMORY_SMOOTHING);
        let memory_used_mb = vram * memory_utilization / 100.0;

        let temp_target = IDLE_TEMP_C + load * (MAX_TEMP_C - IDLE_TEMP_C) + variation * 3.0;
        let temperature_core = smooth(prev.temperature_core, temp_target, THERMAL_SMOOTHING);

        let power_target = tdp * (0.1 + load * 0.9) + variation * 10.0;
        let power_draw_watts = smooth(prev.power_draw_watts, power_target, BASE_SMOOTHING);

        let fan_speed_percent = smooth(
            prev.fan_speed_percent,
            fan_target(temperature_core),
            FAN_SMOOTHING,
        );

        let (encoder_utilization, decoder_utilization) = if load > 0.3 {
            (
                self.rng.gen_range(0.0..30.0) * load,
                self.rng.gen_range(0.0..20.0) * load,
            )
        } else {
            (0.0, 0.0)
        };

        let gpu_clock_mhz =
            (f64::from(p.base_clock_mhz) * (1.0 + load * MAX_CLOCK_BOOST)).round() as u32;

        self.current = TelemetrySnapshot {
            timestamp: Utc::now(),
            elapsed_secs: t,
            sequence: self.ticks,
            generation: 0,
            gpu_utilization,
            memory_utilization,
            encoder_utilization,
            decoder_utilization,
            memory_used_mb,
            memory_free_mb: vram - memory_used_mb,
            memory_total_mb: vram,
            gpu_clock_mhz,
            memory_clock_mhz: p.memory_clock_mhz,
            temperature_core,
            temperature_memory: temperature_core - 3.0,
            temperature_hotspot: temperature_core + 8.0,
            power_draw_watts,
            power_limit_watts: tdp,
            fan_speed_percent,
        };
        self.current.clone()
    }
}

// An idle card, right after a profile is selected
pub fn idle_baseline(profile: &GpuProfile) -> TelemetrySnapshot {
    let vram = f64::from(profile.vram_mb);
    let tdp = f64::from(profile.tdp_watts);
    TelemetrySnapshot {
        timestamp: Utc::now(),
        elapsed_secs: 0.0,
        sequence: 0,
        generation: 0,
        gpu_utilization: 0.0,
        memory_utilization: 10.0,
        encoder_utilization: 0.0,
        decoder_utilization: 0.0,
        memory_used_mb: vram * 0.1,
        memory_free_mb: vram * 0.9,
        memory_total_mb: vram,
        gpu_clock_mhz: profile.base_clock_mhz,
        memory_clock_mhz: profile.memory_clock_mhz,
        temperature_core: 40.0,
        temperature_memory: 38.0,
        temperature_hotspot: 42.0,
        power_draw_watts: tdp * 0.1,
        power_limit_watts: tdp,
        fan_speed_percent: 30.0,
    }
}

fn smooth(current: f64, target: f64, factor: f64) -> f64 {
    current + (target - current) * factor
}

// Piecewise fan curve on core temperature
fn fan_target(temp: f64) -> f64 {
    let target = if temp < 50.0 {
        30.0
    } else if temp < 70.0 {
        30.0 + (temp - 50.0) * 2.0
    } else {
        70.0 + (temp - 70.0) * 2.0
    };
    target.min(100.0)
}

// Box-Muller
fn gaussian(rng: &mut StdRng, std_dev: f64) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos() * std_dev
}
