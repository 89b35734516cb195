//! Entry point for the renderer viewer: initializes logging and opens an
//! eframe window hosting `viewer::app::RendererApp`, which in turn drives a
//! `render::WorldRenderer` against a small synthetic demo scene.

extern crate logger;
extern crate viewer;
use logger::log;

#[cfg(feature = "logger")]
use logger::{LogKind, init_logger};

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<String>>();

    #[cfg(feature = "logger")]
    if args.last().map(String::as_str) == Some("--log-on-file") {
        init_logger(LogKind::FILE);
    } else {
        init_logger(LogKind::STDOUT);
    }

    log("starting renderer viewer");

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "Chasm Renderer",
        options,
        Box::new(|_cc| Ok(Box::new(viewer::app::RendererApp::new()))),
    )
    .ok();
}
