use anyhow::{Context, Result};
use behx_core::StageKind;
use behx_experiment::{BlockQueueManager, SessionState, StartOutcome, TaskConfig};
use behx_log::EventLog;
use behx_timing::SystemClock;
use behx_trigger::{DryRunOutput, WaveformOutput};
use pixels::{Pixels, SurfaceTexture};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowId},
};

use crate::presenters::{self, HostStage, Screen};

/// Host window settings, read from the `[display]` table of the task file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct DisplaySettings {
    fullscreen: bool,
    width: u32,
    height: u32,
    /// How long the stand-in video stage stays on screen.
    playback_secs: f64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            fullscreen: false,
            width: 1280,
            height: 720,
            playback_secs: 5.0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct HostFile {
    #[serde(default)]
    display: DisplaySettings,
}

const IDLE: Screen = Screen {
    caption: String::new(),
    background: [0, 0, 0],
};

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    manager: BlockQueueManager<SystemClock>,
    views: HashMap<StageKind, Box<dyn HostStage>>,
    display: DisplaySettings,
    should_exit: bool,
}

fn trigger_output(dry_run: bool) -> Box<dyn WaveformOutput> {
    if dry_run {
        return Box::new(DryRunOutput::new());
    }
    #[cfg(feature = "cpal-output")]
    {
        Box::new(behx_trigger::CpalOutput::new())
    }
    #[cfg(not(feature = "cpal-output"))]
    {
        Box::new(behx_trigger::NullOutput)
    }
}

impl App {
    pub fn new(config_path: &Path) -> Result<Self> {
        let config = TaskConfig::load(config_path)
            .with_context(|| format!("loading task {}", config_path.display()))?;
        let text = std::fs::read_to_string(config_path)?;
        let host: HostFile = toml::from_str(&text).context("reading [display] settings")?;
        let display = host.display;

        let blocks = config.build_blocks()?;
        let plan = config.plan();

        let trigger = config
            .trigger
            .settings
            .build(trigger_output(config.trigger.dry_run));
        let log = EventLog::with_trigger(SystemClock::new(), trigger);

        let mut manager = BlockQueueManager::new(plan, log);
        let mut views = HashMap::new();
        let playback = Duration::from_secs_f64(display.playback_secs.max(0.0));
        for (kind, presenter, view) in presenters::stand_ins(playback) {
            manager.stages_mut().register(kind, presenter);
            views.insert(kind, view);
        }
        manager.load(blocks);

        Ok(Self {
            window: None,
            pixels: None,
            manager,
            views,
            display,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        tracing::info!(
            blocks = self.manager.queue().total(),
            "press ENTER to start, S to skip a block, ESC to stop or exit"
        );
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let mut attributes = Window::default_attributes()
            .with_title("behx")
            .with_inner_size(LogicalSize::new(self.display.width, self.display.height));
        if self.display.fullscreen {
            let monitor = event_loop
                .primary_monitor()
                .or_else(|| event_loop.available_monitors().next());
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(monitor)));
        }

        let window = Arc::new(event_loop.create_window(attributes)?);
        let size = window.inner_size();
        tracing::info!(width = size.width, height = size.height, "window created");

        let surface = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width.max(1), size.height.max(1), surface)?);

        window.request_redraw();
        self.window = Some(window);
        Ok(())
    }

    fn screen(&self) -> Screen {
        self.manager
            .active_stage()
            .and_then(|kind| self.views.get(&kind))
            .map(|view| view.screen())
            .unwrap_or(IDLE)
    }

    fn render(&mut self) -> Result<()> {
        let screen = self.screen();
        if let Some(window) = &self.window {
            let title = if screen.caption.is_empty() {
                format!("behx ({:?})", self.manager.state())
            } else {
                screen.caption.clone()
            };
            window.set_title(&title);
        }
        let Some(pixels) = self.pixels.as_mut() else {
            return Ok(());
        };
        let [r, g, b] = screen.background;
        for px in pixels.frame_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&[r, g, b, 0xff]);
        }
        pixels.render()?;
        Ok(())
    }

    fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    /// Hands queued presenter signals to the manager.
    fn pump(&mut self) {
        match self.manager.drain() {
            Ok(0) => {}
            Ok(handled) => {
                tracing::trace!(handled, "signals handled");
                self.request_redraw();
            }
            Err(e) => {
                tracing::error!(error = %e, "session error");
                self.request_redraw();
            }
        }
    }

    fn start_session(&mut self) {
        if self.manager.state() != SessionState::Idle {
            if let Err(e) = self.manager.reset() {
                tracing::error!(error = %e, "reset failed");
                return;
            }
        }
        match self.manager.start() {
            Ok(StartOutcome::Started) => {}
            Ok(StartOutcome::AlreadyRunning) => tracing::debug!("session already running"),
            Err(e) => tracing::error!(error = %e, "session failed to start"),
        }
    }

    fn handle_key(&mut self, key: KeyCode, event_loop: &ActiveEventLoop) {
        match key {
            KeyCode::Escape if self.manager.is_running() => {
                if let Err(e) = self.manager.stop() {
                    tracing::error!(error = %e, "stop failed");
                }
            }
            KeyCode::Escape => self.cleanup_and_exit(event_loop),
            KeyCode::Enter if !self.manager.is_running() => self.start_session(),
            KeyCode::KeyS if self.manager.is_running() => match self.manager.skip_action() {
                Ok(true) => tracing::info!("block skipped"),
                Ok(false) => tracing::debug!("nothing to skip"),
                Err(e) => tracing::error!(error = %e, "skip failed"),
            },
            _ => {
                let consumed = self
                    .manager
                    .active_stage()
                    .and_then(|kind| self.views.get_mut(&kind))
                    .is_some_and(|view| view.key(key));
                if !consumed {
                    return;
                }
            }
        }
        self.pump();
        self.request_redraw();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.views.values().filter_map(|view| view.deadline()).min()
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            return;
        }
        self.should_exit = true;
        if self.manager.is_running() {
            if let Err(e) = self.manager.stop() {
                tracing::error!(error = %e, "stop on exit failed");
            }
        }
        tracing::info!(state = ?self.manager.state(), records = self.manager.log().len(), "exiting");
        self.pixels = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.create_window_and_surface(event_loop) {
                tracing::error!(error = %e, "failed to create window");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Some(pixels) = self.pixels.as_mut() {
                        let resized = pixels
                            .resize_surface(size.width, size.height)
                            .and_then(|_| pixels.resize_buffer(size.width, size.height));
                        if let Err(e) = resized {
                            tracing::warn!(error = %e, "surface resize failed");
                        }
                    }
                    self.request_redraw();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => self.handle_key(key, event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render() {
                    tracing::error!(error = %e, "render failed");
                    self.cleanup_and_exit(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            return;
        }
        let now = Instant::now();
        for view in self.views.values_mut() {
            view.tick(now);
        }
        self.pump();

        match self.next_deadline() {
            Some(deadline) => event_loop.set_control_flow(ControlFlow::WaitUntil(deadline)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }
}
