// src/gui.rs
use std::collections::VecDeque;

use eframe::egui;
use egui::Color32;
use egui_plot::{Line, Plot, PlotPoints};
use neurosim::config::SimulatorSettings;
use neurosim::drivers::SourceManager;

// 每条曲线保留的点数
const TRACE_POINTS: usize = 2_000;

#[derive(Default)]
struct Trace {
    signal: VecDeque<[f64; 2]>,
    sync: VecDeque<[f64; 2]>,
    // 每隔多少个采样取一个点
    stride: u64,
}

impl Trace {
    fn push(&mut self, x: f64, value: f64, level: f64) {
        self.signal.push_back([x, value]);
        self.sync.push_back([x, level]);
        while self.signal.len() > TRACE_POINTS {
            self.signal.pop_front();
            self.sync.pop_front();
        }
    }

    fn clear(&mut self) {
        self.signal.clear();
        self.sync.clear();
    }
}

/// Live view of every stream's first channel and sync line.
pub struct MonitorApp {
    manager: SourceManager,
    traces: Vec<Trace>,
    selected: usize,
    pending: SimulatorSettings,
    clock_hz: f64,
    log_messages: Vec<String>,
}

impl MonitorApp {
    pub fn new(manager: SourceManager) -> Self {
        let pending = manager.settings().clone();
        let clock_hz = pending.clock.frequency_hz;
        let mut app = Self {
            manager,
            traces: Vec::new(),
            selected: 0,
            pending,
            clock_hz,
            log_messages: vec!["neurosim monitor ready.".to_owned()],
        };
        app.reset_traces();
        app
    }

    fn log(&mut self, msg: impl Into<String>) {
        self.log_messages.push(format!("> {}", msg.into()));
        if self.log_messages.len() > 8 {
            self.log_messages.remove(0);
        }
    }

    fn reset_traces(&mut self) {
        self.traces = self
            .manager
            .sources()
            .iter()
            .map(|source| Trace {
                // 10 秒窗口
                stride: ((source.sample_rate_hz() * 10.0) as u64 / TRACE_POINTS as u64).max(1),
                ..Trace::default()
            })
            .collect();
        self.selected = self.selected.min(self.traces.len().saturating_sub(1));
    }

    // 消费端：把所有缓冲区里的数据取出来
    fn drain_all(&mut self) {
        for (source, trace) in self.manager.sources().iter().zip(self.traces.iter_mut()) {
            let packet = source.buffer().drain(usize::MAX);
            let fs = source.sample_rate_hz();
            for s in 0..packet.len() {
                let index = packet.sample_indices[s];
                if index % trace.stride != 0 {
                    continue;
                }
                let value = packet.frame(s).map_or(0.0, |frame| frame[0] as f64);
                trace.push(index as f64 / fs, value, packet.event_codes[s] as f64);
            }
        }
    }

    fn toggle_streaming(&mut self) {
        if self.manager.is_any_running() {
            match self.manager.stop_all() {
                Ok(()) => self.log("stopped all sources"),
                Err(err) => self.log(err.to_string()),
            }
        } else {
            for trace in &mut self.traces {
                trace.clear();
            }
            match self.manager.start_all() {
                Ok(()) => self.log(format!("started {} sources", self.manager.len())),
                Err(err) => self.log(err.to_string()),
            }
        }
    }

    fn apply_config(&mut self) {
        match self.manager.configure(self.pending.clone()) {
            Ok(()) => self.log(format!("rebuilt {} sources", self.manager.len())),
            Err(err) => self.log(err.to_string()),
        }
        self.reset_traces();
    }

    fn side_panel(&mut self, ui: &mut egui::Ui) {
        ui.add_space(10.0);
        ui.heading("neurosim");
        ui.label("Synthetic acquisition");
        ui.separator();

        let running = self.manager.is_any_running();
        let stream_btn = if running { "STOP STREAM" } else { "START STREAM" };
        if ui.button(stream_btn).clicked() {
            self.toggle_streaming();
        }

        ui.add_space(10.0);
        ui.label("CLOCK");
        ui.horizontal(|ui| {
            ui.add(
                egui::DragValue::new(&mut self.clock_hz)
                    .clamp_range(0.0..=1_000.0)
                    .speed(0.1)
                    .suffix(" Hz"),
            );
            if ui.button("SET").clicked() {
                match self.manager.set_clock_frequency(self.clock_hz) {
                    Ok(()) => {
                        self.pending.clock.frequency_hz = self.clock_hz;
                        self.log(format!("clock at {} Hz", self.clock_hz));
                    }
                    Err(err) => self.log(err.to_string()),
                }
            }
        });
        if let Ok(mut enabled) = self.manager.clock_settings(self.selected).map(|c| c.enabled) {
            if ui.checkbox(&mut enabled, "sync line on selected stream").changed() {
                if let Err(err) = self.manager.set_clock_enabled(self.selected, enabled) {
                    self.log(err.to_string());
                }
            }
        }

        ui.add_space(10.0);
        ui.separator();
        ui.label("CONFIGURATION");
        egui::Grid::new("config_grid").show(ui, |ui| {
            ui.label("Probes");
            ui.add(egui::DragValue::new(&mut self.pending.num_probes).clamp_range(0..=20));
            ui.end_row();
            ui.label("Channels / probe");
            ui.add(egui::DragValue::new(&mut self.pending.channels_per_probe).clamp_range(1..=10_000));
            ui.end_row();
            ui.label("Aux devices");
            ui.add(egui::DragValue::new(&mut self.pending.num_aux_devices).clamp_range(0..=20));
            ui.end_row();
            ui.label("Channels / device");
            ui.add(egui::DragValue::new(&mut self.pending.channels_per_aux_device).clamp_range(1..=32));
            ui.end_row();
        });
        ui.checkbox(&mut self.pending.spike_trains, "spike trains");
        if ui.button("APPLY").clicked() {
            self.apply_config();
        }

        ui.add_space(10.0);
        egui::ScrollArea::vertical().max_height(120.0).show(ui, |ui| {
            for m in &self.log_messages {
                ui.monospace(m);
            }
        });
    }
}

impl eframe::App for MonitorApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_all();
        if self.manager.is_any_running() {
            ctx.request_repaint();
        }

        let mut visuals = egui::Visuals::dark();
        visuals.widgets.noninteractive.bg_fill = Color32::from_rgb(10, 10, 15);
        ctx.set_visuals(visuals);

        egui::SidePanel::left("L").min_width(260.0).show(ctx, |ui| {
            self.side_panel(ui);
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                for (i, source) in self.manager.sources().iter().enumerate() {
                    ui.selectable_value(&mut self.selected, i, source.name());
                }
            });
            let Ok(source) = self.manager.source(self.selected) else {
                ui.label("No sources configured.");
                return;
            };
            let buffer = source.buffer();
            ui.label(format!(
                "{} | {} ch @ {} Hz | {} samples | {} overwritten",
                source.descriptor().description,
                source.num_channels(),
                source.sample_rate_hz(),
                source.samples_generated(),
                buffer.overwritten_samples()
            ));

            let Some(trace) = self.traces.get(self.selected) else {
                return;
            };
            let signal: Vec<[f64; 2]> = trace.signal.iter().copied().collect();
            let sync: Vec<[f64; 2]> = trace.sync.iter().copied().collect();
            Plot::new("signal_plot")
                .height(ui.available_height() * 0.7)
                .auto_bounds_x()
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::new(signal))
                            .name("CH1")
                            .color(Color32::from_rgb(0, 255, 255)),
                    );
                });
            Plot::new("sync_plot")
                .include_y(-0.1)
                .include_y(1.1)
                .auto_bounds_x()
                .show(ui, |plot_ui| {
                    plot_ui.line(
                        Line::new(PlotPoints::new(sync))
                            .name(source.descriptor().sync_line.clone())
                            .color(Color32::YELLOW),
                    );
                });
        });
    }
}

pub fn run(manager: SourceManager) -> eframe::Result<()> {
    let viewport = egui::ViewportBuilder::default()
        .with_inner_size([1280.0, 800.0])
        .with_min_inner_size([900.0, 600.0])
        .with_title("neurosim monitor");
    let options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };
    eframe::run_native(
        "neurosim",
        options,
        Box::new(move |_cc| Box::new(MonitorApp::new(manager))),
    )
}
