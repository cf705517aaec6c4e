use crossbeam_channel::Receiver;
use eframe::egui::{self, Color32};
use egui_plot::{Legend, Line, Plot, PlotPoints};
use gpu_sim::projection::{self, BypassState};
use gpu_sim::registry::encode_entry;
use gpu_sim::{GpuInfo, GpuProfile, ProfileStore, Settings, TelemetrySimulator, TelemetrySnapshot};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Surface {
    Registry,
    Wmi,
    Nvapi,
    Adl,
    Speccy,
    Hwinfo,
    Gpuz,
    Dxdiag,
}

impl Surface {
    const ALL: [Surface; 8] = [
        Surface::Registry,
        Surface::Wmi,
        Surface::Nvapi,
        Surface::Adl,
        Surface::Speccy,
        Surface::Hwinfo,
        Surface::Gpuz,
        Surface::Dxdiag,
    ];

    fn label(self) -> &'static str {
        match self {
            Surface::Registry => "Registry",
            Surface::Wmi => "WMI",
            Surface::Nvapi => "NVAPI",
            Surface::Adl => "ADL",
            Surface::Speccy => "Speccy",
            Surface::Hwinfo => "HWiNFO",
            Surface::Gpuz => "GPU-Z",
            Surface::Dxdiag => "DxDiag",
        }
    }

    fn rows(self, profile: &GpuProfile) -> Vec<(String, String)> {
        let fields = match self {
            Surface::Registry => {
                return projection::registry_entries(profile)
                    .into_iter()
                    .map(|(name, entry)| {
                        let shown = match encode_entry(&name, &entry) {
                            Ok(v) => v.to_string(),
                            Err(e) => e.to_string(),
                        };
                        (name, shown)
                    })
                    .collect();
            }
            Surface::Wmi => projection::wmi_video_controller(profile),
            Surface::Nvapi => projection::nvapi(profile),
            Surface::Adl => projection::adl(profile),
            Surface::Speccy => projection::speccy(profile),
            Surface::Hwinfo => projection::hwinfo(profile),
            Surface::Gpuz => projection::gpuz(profile),
            Surface::Dxdiag => projection::dxdiag(profile),
        };
        fields
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect()
    }
}

pub struct GpuSimApp {
    #[cfg_attr(not(windows), allow(dead_code))]
    settings: Settings,
    store: ProfileStore,
    simulator: TelemetrySimulator,
    receiver: Receiver<TelemetrySnapshot>,
    data: VecDeque<TelemetrySnapshot>,
    display_duration: f64,
    selected: Option<String>,
    load_percent: f64,
    gpu_info: Option<GpuInfo>,
    surface: Surface,
    status: Option<String>,
}

impl GpuSimApp {
    pub fn new(cc: &eframe::CreationContext<'_>, settings: Settings) -> Self {
        let mut store = ProfileStore::from_settings(&settings);
        store.reload();

        let simulator = TelemetrySimulator::from_settings(&settings);
        let receiver = simulator.subscribe_channel(100);
        if let Err(e) = simulator.start() {
            tracing::error!("telemetry unavailable: {e}");
        }

        let mut style = (*cc.egui_ctx.style()).clone();
        style.visuals.dark_mode = true;
        cc.egui_ctx.set_style(style);

        let initial = store
            .active()
            .map(|p| p.id)
            .or_else(|| store.list().first().map(|p| p.id.clone()));

        let mut app = Self {
            settings,
            store,
            simulator,
            receiver,
            data: VecDeque::with_capacity(120),
            display_duration: 10.0,
            selected: None,
            load_percent: 0.0,
            gpu_info: None,
            surface: Surface::Registry,
            status: None,
        };
        if let Some(id) = initial {
            app.select_profile(&id);
        }
        app
    }

    fn select_profile(&mut self, id: &str) {
        let Some(profile) = self.store.get(id).cloned() else {
            return;
        };
        self.simulator.set_profile(Arc::new(profile));
        self.gpu_info = self.simulator.static_info();
        // Snapshots still buffered belong to the previous profile.
        while self.receiver.try_recv().is_ok() {}
        self.data.clear();
        self.selected = Some(id.to_string());
        self.status = None;
        self.store.set_active(id);
    }

    fn current_profile(&self) -> Option<&GpuProfile> {
        self.selected.as_deref().and_then(|id| self.store.get(id))
    }

    #[cfg(windows)]
    fn apply_to_registry(&mut self) {
        use gpu_sim::{ApplyOutcome, GpuRegistry};

        let Some(profile) = self.current_profile().cloned() else {
            return;
        };
        let message = match gpu_sim::registry::system_hive() {
            Ok(hive) => {
                let mut engine = GpuRegistry::from_settings(hive, &self.settings);
                match engine.apply_profile(&profile) {
                    Ok(report) => match report.outcome() {
                        ApplyOutcome::Committed => {
                            format!("Applied {} registry values", report.written.len())
                        }
                        ApplyOutcome::CompletedWithFailures(n) => format!(
                            "Applied {} registry values, {n} failed (see log)",
                            report.written.len()
                        ),
                    },
                    Err(e) if e.is_access_denied() => {
                        "Access denied: restart GPU-SIM as administrator".to_string()
                    }
                    Err(e) => format!("Apply failed: {e}"),
                }
            }
            Err(e) => e.to_string(),
        };
        self.status = Some(message);
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let shown = self
                .current_profile()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "No profile".to_string());
            let mut picked = None;
            egui::ComboBox::from_label("Profile")
                .selected_text(shown)
                .show_ui(ui, |ui| {
                    for p in self.store.list() {
                        let is_selected = self.selected.as_deref() == Some(p.id.as_str());
                        if ui.selectable_label(is_selected, p.to_string()).clicked() {
                            picked = Some(p.id.clone());
                        }
                    }
                });
            if let Some(id) = picked {
                self.select_profile(&id);
            }

            ui.separator();
            if ui
                .add(egui::Slider::new(&mut self.load_percent, 0.0..=100.0).text("Load %"))
                .changed()
            {
                self.simulator.set_load_percent(self.load_percent);
            }

            #[cfg(windows)]
            {
                ui.separator();
                if ui.button("Apply to registry").clicked() {
                    self.apply_to_registry();
                }
            }
        });
        if let Some(status) = &self.status {
            ui.label(status);
        }
    }
}

// Moves received snapshots of the current profile into the plot window.
fn drain_window(
    data: &mut VecDeque<TelemetrySnapshot>,
    receiver: &Receiver<TelemetrySnapshot>,
    generation: u64,
    window_secs: f64,
) {
    while let Ok(snapshot) = receiver.try_recv() {
        if snapshot.generation != generation {
            continue;
        }
        let window_start_time = (snapshot.elapsed_secs - window_secs).max(0.0);
        data.push_back(snapshot);
        while data
            .front()
            .is_some_and(|d| d.elapsed_secs < window_start_time)
        {
            data.pop_front();
        }
    }
}

impl eframe::App for GpuSimApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        drain_window(
            &mut self.data,
            &self.receiver,
            self.simulator.generation(),
            self.display_duration,
        );

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("🚀 GPU-SIM");
            if let Some(info) = &self.gpu_info {
                ui.label(format!(
                    "{} ({}) - Driver: {} - VBIOS: {} - PCIe Gen {} x{}",
                    info.name,
                    info.architecture,
                    info.driver_version,
                    info.vbios_version,
                    info.pcie_gen,
                    info.pcie_width
                ));
            }
            ui.add_space(8.0);
            self.controls(ui);
            ui.add_space(8.0);

            if let Some(latest) = self.data.back() {
                egui::Frame::group(ui.style()).show(ui, |ui| {
                    ui.horizontal(|ui| {
                        ui.vertical(|ui| {
                            ui.label(
                                egui::RichText::new(format!(
                                    "GPU Utilization: {:.0}%",
                                    latest.gpu_utilization
                                ))
                                .color(Color32::GREEN)
                                .size(22.0)
                                .strong(),
                            );
                            ui.label(format!(
                                "Temperature: {:.0}°C (hotspot {:.0}°C)",
                                latest.temperature_core, latest.temperature_hotspot
                            ));
                            ui.label(format!("Fan Speed: {:.0}%", latest.fan_speed_percent));
                        });
                        ui.separator();
                        ui.vertical(|ui| {
                            ui.label(format!(
                                "Memory: {:.0}/{:.0} MB",
                                latest.memory_used_mb, latest.memory_total_mb
                            ));
                            ui.label(format!(
                                "Power: {:.1}/{:.0} W",
                                latest.power_draw_watts, latest.power_limit_watts
                            ));
                            ui.label(format!("GPU Clock: {} MHz", latest.gpu_clock_mhz));
                            ui.label(format!("Memory Clock: {} MHz", latest.memory_clock_mhz));
                        });
                        ui.separator();
                        ui.vertical(|ui| {
                            ui.label(format!("Encoder: {:.0}%", latest.encoder_utilization));
                            ui.label(format!("Decoder: {:.0}%", latest.decoder_utilization));
                        });
                    });
                });
            }

            ui.add_space(12.0);
            ui.separator();
            ui.heading("📈 Simulated Metrics (Last 10 Seconds)");

            let latest_timestamp = self.data.back().map_or(0.0, |d| d.elapsed_secs);
            let series = |mapper: fn(&TelemetrySnapshot) -> f64| -> PlotPoints {
                self.data
                    .iter()
                    .map(|d| [(latest_timestamp - d.elapsed_secs).max(0.0), mapper(d)])
                    .collect()
            };

            Plot::new("gpu_metrics_plot")
                .view_aspect(2.5)
                .legend(Legend::default())
                .include_y(0.0)
                .include_y(100.0)
                .include_x(0.0)
                .include_x(self.display_duration)
                .x_axis_label("Seconds Ago (0 = now)")
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new("GPU Utilization", series(|d| d.gpu_utilization))
                            .color(Color32::GREEN),
                    );
                    plot_ui.line(
                        Line::new("Memory Usage (%)", series(TelemetrySnapshot::memory_used_percent))
                            .color(Color32::from_rgb(0, 128, 255)),
                    );
                    plot_ui.line(
                        Line::new("Temperature (°C)", series(|d| d.temperature_core))
                            .color(Color32::from_rgb(255, 128, 0)),
                    );
                    plot_ui.line(
                        Line::new("Power Usage (%)", series(TelemetrySnapshot::power_percent))
                            .color(Color32::from_rgb(255, 0, 128)),
                    );
                });

            ui.add_space(12.0);
            ui.separator();
            ui.heading("🧩 Detection Surfaces");
            ui.horizontal(|ui| {
                for surface in Surface::ALL {
                    ui.selectable_value(&mut self.surface, surface, surface.label());
                }
            });
            let rows = self
                .current_profile()
                .map(|p| self.surface.rows(p))
                .unwrap_or_default();
            egui::ScrollArea::vertical()
                .max_height(220.0)
                .show(ui, |ui| {
                    egui::Grid::new("surface_grid")
                        .striped(true)
                        .spacing([12.0, 6.0])
                        .show(ui, |ui| {
                            for (key, value) in &rows {
                                ui.label(egui::RichText::new(key).strong());
                                ui.label(value);
                                ui.end_row();
                            }
                        });
                });

            ui.add_space(12.0);
            ui.separator();
            ui.heading("🛡 Bypass Status");
            egui::Grid::new("bypass_grid")
                .striped(true)
                .spacing([12.0, 6.0])
                .show(ui, |ui| {
                    for status in projection::bypass_status(self.current_profile()) {
                        let color = match status.state {
                            BypassState::Active => Color32::GREEN,
                            BypassState::Partial => Color32::YELLOW,
                            BypassState::Unavailable => Color32::GRAY,
                        };
                        ui.label(egui::RichText::new(status.method).strong());
                        ui.label(egui::RichText::new(status.state.as_str()).color(color));
                        ui.label(status.description);
                        ui.end_row();
                    }
                });
        });

        ctx.request_repaint();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sized(id: &str, vram_mb: u32) -> Arc<GpuProfile> {
        Arc::new(GpuProfile {
            vram_mb,
            ..GpuProfile::new(id, "NVIDIA GeForce RTX 4070", "NVIDIA Corporation")
        })
    }

    #[test]
    fn window_skips_snapshots_of_a_replaced_profile() {
        let sim = TelemetrySimulator::seeded(Duration::from_millis(100), 4);
        let rx = sim.subscribe_channel(100);
        sim.set_profile(sized("old", 4096));
        for _ in 0..5 {
            sim.tick();
        }
        sim.set_profile(sized("new", 12288));
        sim.tick();

        let mut data = VecDeque::new();
        drain_window(&mut data, &rx, sim.generation(), 10.0);
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].memory_total_mb, 12288.0);
        assert_eq!(data[0].sequence, 1);
    }

    #[test]
    fn window_drops_samples_older_than_its_span() {
        let sim = TelemetrySimulator::seeded(Duration::from_millis(100), 4);
        let rx = sim.subscribe_channel(200);
        sim.set_profile(sized("gpu", 8192));
        for _ in 0..150 {
            sim.tick();
        }

        let mut data = VecDeque::new();
        drain_window(&mut data, &rx, sim.generation(), 10.0);
        let first = data.front().unwrap().elapsed_secs;
        let last = data.back().unwrap().elapsed_secs;
        assert!(last - first <= 10.0 + 1e-9, "{first}..{last}");
        assert_eq!(data.back().unwrap().sequence, 150);
    }
}
