mod app;

use app::GpuSimApp;
use eframe::egui::ViewportBuilder;
use gpu_sim::Settings;
use tracing_subscriber::EnvFilter;

fn main() -> eframe::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gpu_sim=info,gpusim=info")),
        )
        .init();

    let settings = Settings::load();
    tracing::info!("profiles directory {}", settings.profiles_dir.display());

    let native_options = eframe::NativeOptions {
        viewport: ViewportBuilder::default().with_inner_size([1000.0, 800.0]),
        ..Default::default()
    };

    eframe::run_native(
        "GPU-SIM",
        native_options,
        Box::new(|cc| Ok(Box::new(GpuSimApp::new(cc, settings)))),
    )
}
