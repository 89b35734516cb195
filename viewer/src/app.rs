use logger::log;

use crate::{about, render_view::RenderView, ui_traits::UiTool};

use std::collections::BTreeSet;

pub struct RendererApp {
    tools: Vec<Box<dyn UiTool>>,
    open: BTreeSet<String>,
}

impl RendererApp {
    #[must_use]
    pub fn new() -> Self {
        log("renderer viewer starting".to_owned());

        let tools: Vec<Box<dyn UiTool>> =
            vec![Box::<about::About>::default(), Box::<RenderView>::default()];

        Self::from_tools(tools)
    }

    fn from_tools(tools: Vec<Box<dyn UiTool>>) -> Self {
        let mut open = BTreeSet::new();
        open.insert(tools[1].name().to_owned());

        Self { tools, open }
    }
}

impl Default for RendererApp {
    fn default() -> Self {
        Self::new()
    }
}

impl eframe::App for RendererApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint();

        egui::SidePanel::right("Chasm Renderer Tools")
            .resizable(false)
            .default_width(200.0)
            .show(ctx, |ui| {
                egui::trace!(ui);
                ui.vertical_centered(|ui| {
                    ui.heading("Chasm Renderer");
                });

                ui.separator();
                ui.label("Links");
                use egui::special_emojis::GITHUB;
                ui.hyperlink_to(
                    format!("{GITHUB} Repository"),
                    "https://github.com/RIP-Comm/clementine",
                );

                ui.separator();

                self.checkboxes(ui);
            });

        self.windows(ctx);
    }
}

impl RendererApp {
    pub fn checkboxes(&mut self, ui: &mut egui::Ui) {
        let Self { tools, open } = self;
        for tool in tools {
            let mut is_open = open.contains(tool.name());
            ui.toggle_value(&mut is_open, tool.name());
            set_open(open, tool.name(), is_open);
        }
    }

    fn windows(&mut self, ctx: &egui::Context) {
        let Self { tools, open } = self;
        for tool in tools {
            let mut is_open = open.contains(tool.name());
            tool.show(ctx, &mut is_open);
            set_open(open, tool.name(), is_open);
        }
    }
}

fn set_open(open: &mut BTreeSet<String>, key: &'static str, is_open: bool) {
    if is_open {
        if !open.contains(key) {
            open.insert(key.to_owned());
        }
    } else {
        open.remove(key);
    }
}
