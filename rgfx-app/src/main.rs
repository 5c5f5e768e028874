#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod scene;

use std::{
    fs::{self, File},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use clap::Parser;
use rgfx::{
    ash::vk,
    config::RendererConfig,
    device::{Device, DeviceConfig},
    instance::{Instance, InstanceDesc, VulkanLogLevel},
    queue::QueueMode,
    renderer::{FrameStatus, Renderer},
    surface::Surface,
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow},
    window::{Window as WinitWindow, WindowAttributes, WindowId},
};

use crate::scene::Scene;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Info,
    Debug,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            // Off never reaches the subscriber.
            TracingLogLevel::Off => tracing::Level::TRACE,
            TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => VulkanLogLevel::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliQueueMode {
    #[default]
    Auto,
    Unified,
}

impl From<CliQueueMode> for QueueMode {
    fn from(value: CliQueueMode) -> Self {
        match value {
            CliQueueMode::Auto => QueueMode::Auto,
            CliQueueMode::Unified => QueueMode::Unified,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    /// Overrides the config's validation level.
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    /// Renderer config (TOML). Defaults to `rgfx-app.toml` in the user
    /// config dir when present.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Overrides the config's vsync setting.
    #[arg(long)]
    vsync: Option<bool>,
    #[arg(long, default_value = "auto")]
    queue_mode: CliQueueMode,
}

fn load_config(
    cli_args: &CliArgs,
    app_dirs: Option<&directories::ProjectDirs>,
) -> eyre::Result<RendererConfig> {
    let config_path = cli_args.config.clone().or_else(|| {
        app_dirs
            .map(|dirs| dirs.config_dir().join("rgfx-app.toml"))
            .filter(|path| path.is_file())
    });

    let mut config = match &config_path {
        Some(path) => {
            let mut config = RendererConfig::load(path)?;
            if let Some(base) = path.parent() {
                config.resolve_paths(base);
            }
            config
        }
        None => {
            let mut config = RendererConfig {
                app_name: "rgfx-app".to_owned(),
                ..RendererConfig::default()
            };
            config.resolve_paths(std::path::Path::new(env!("CARGO_MANIFEST_DIR")));
            config
        }
    };

    if let Some(level) = cli_args.graphics_debug_level {
        config.validation = Some(level.into());
    }
    if let Some(vsync) = cli_args.vsync {
        config.vsync = vsync;
    }
    Ok(config)
}

fn main() -> eyre::Result<()> {
    let app_dirs = directories::ProjectDirs::from("", "rgfx", "rgfx-app");

    let log_dir = match app_dirs
        .as_ref()
        .and_then(|x| x.runtime_dir().or_else(|| Some(x.data_dir())))
        .map(|p| p.to_owned())
    {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        fs::create_dir_all(&log_dir)?;

        let mut log_file_path = log_dir.clone();
        log_file_path.push("log-file");
        log_file_path.set_extension("txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);

        println!("log_file_path: {}", log_file_path.display());
        println!("cli_args: {:#?}", cli_args);

        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    let config = load_config(&cli_args, app_dirs.as_ref())?;
    tracing::debug!("Renderer config: {:#?}", config);

    let event_loop = winit::event_loop::EventLoop::builder().build()?;

    // SAFETY: loads Vulkan through libloading; nothing else is loaded yet.
    let instance = Arc::new(unsafe {
        Instance::new(
            &InstanceDesc {
                app_name: config.app_name.clone(),
                validation: config.validation,
                surface: true,
            },
            Some(&event_loop),
        )
    }?);

    let device_config = DeviceConfig {
        swapchain: true,
        queue_mode: cli_args.queue_mode.into(),
        preference: config.device_preference,
    };

    let mut app = AppRunner(Some(App::Initializing(InitializingState {
        instance,
        device_config,
        config,
    })));

    tracing::trace!("Entering main event loop");
    Ok(event_loop.run_app(&mut app)?)
}

#[derive(Debug)]
struct AppRunner(Option<App>);

#[derive(Debug)]
enum App {
    Running(RunningState),
    Initializing(InitializingState),
    Suspended(SuspendedState),
    Exiting(ExitingState),
}

#[derive(Debug)]
struct InitializingState {
    instance: Arc<Instance>,
    device_config: DeviceConfig,
    config: RendererConfig,
}

/// Field order is drop order: the scene and renderer go before the surface.
#[derive(Debug)]
struct RunningState {
    scene: Scene,
    // `None` while the window is zero-sized.
    renderer: Option<Renderer<WinitWindow>>,
    surface: Arc<Surface<WinitWindow>>,
    device: Arc<Device>,
    win: Arc<WinitWindow>,
    instance: Arc<Instance>,
    config: RendererConfig,
    started: Instant,
}

#[derive(Debug)]
struct SuspendedState {
    instance: Arc<Instance>,
    win: Arc<WinitWindow>,
    device: Arc<Device>,
    config: RendererConfig,
}

#[derive(Debug)]
struct ExitingState {}

fn window_extent(win: &WinitWindow) -> vk::Extent2D {
    let size = win.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

fn create_surface(
    instance: &Arc<Instance>,
    win: &Arc<WinitWindow>,
) -> eyre::Result<Arc<Surface<WinitWindow>>> {
    // SAFETY: the surface is dropped in `suspended`, before winit
    // invalidates the window's native handle.
    Ok(Arc::new(unsafe { Surface::new(instance, Arc::clone(win)) }?))
}

/// Create the renderer and scene for a freshly created surface.
fn start_running(
    instance: Arc<Instance>,
    win: Arc<WinitWindow>,
    device: Arc<Device>,
    surface: Arc<Surface<WinitWindow>>,
    config: RendererConfig,
) -> eyre::Result<RunningState> {
    let renderer = create_renderer(&device, &surface, &config, window_extent(&win))?;
    let mut scene = Scene::new(&device)?;
    if let Some(renderer) = &renderer {
        scene.attach(&device, renderer)?;
    }
    Ok(RunningState {
        scene,
        renderer,
        surface,
        device,
        win,
        instance,
        config,
        started: Instant::now(),
    })
}

fn create_renderer(
    device: &Arc<Device>,
    surface: &Arc<Surface<WinitWindow>>,
    config: &RendererConfig,
    extent: vk::Extent2D,
) -> eyre::Result<Option<Renderer<WinitWindow>>> {
    if extent.width == 0 || extent.height == 0 {
        tracing::trace!(
            "Skipping renderer create because window extent is zero: {}x{}",
            extent.width,
            extent.height
        );
        return Ok(None);
    }
    let _span = tracing::trace_span!(
        "renderer_create",
        width = extent.width,
        height = extent.height
    )
    .entered();
    let mut renderer = Renderer::new(device, surface, config, extent)?;
    renderer.warm_pipelines()?;
    Ok(Some(renderer))
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        assert!(self.0.is_some());
        if let Some(initializing_state) = self.take_initializing() {
            event_loop.set_control_flow(ControlFlow::Poll);
            let win = Arc::new(
                match event_loop.create_window(
                    WindowAttributes::default()
                        .with_title(initializing_state.config.app_name.clone())
                        .with_inner_size(LogicalSize {
                            width: 1600,
                            height: 900,
                        }),
                ) {
                    Ok(w) => w,
                    Err(e) => {
                        tracing::error!("Error while creating window: {}", e);
                        self.transition_to_exiting("Initializing", event_loop);
                        return;
                    }
                },
            );

            let surface = match create_surface(&initializing_state.instance, &win) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Error while creating surface: {}", e);
                    self.transition_to_exiting("Initializing", event_loop);
                    return;
                }
            };
            let device = match Device::new(
                &initializing_state.instance,
                Some(surface.as_ref()),
                initializing_state.device_config,
            ) {
                Ok(d) => Arc::new(d),
                Err(e) => {
                    tracing::error!("Error while creating device: {}", e);
                    self.transition_to_exiting("Initializing", event_loop);
                    return;
                }
            };

            match start_running(
                initializing_state.instance,
                win,
                device,
                surface,
                initializing_state.config,
            ) {
                Ok(running) => {
                    tracing::debug!("State transition: Initializing -> Running");
                    self.set_running(running);
                }
                Err(e) => {
                    tracing::error!("Error while starting renderer: {:#}", e);
                    self.transition_to_exiting("Initializing", event_loop);
                }
            }
        } else if let Some(suspended_state) = self.take_suspended() {
            event_loop.set_control_flow(ControlFlow::Poll);
            let surface = match create_surface(&suspended_state.instance, &suspended_state.win) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Error while creating surface: {}", e);
                    self.transition_to_exiting("Suspended", event_loop);
                    return;
                }
            };
            match start_running(
                suspended_state.instance,
                suspended_state.win,
                suspended_state.device,
                surface,
                suspended_state.config,
            ) {
                Ok(running) => {
                    tracing::debug!("State transition: Suspended -> Running");
                    self.set_running(running);
                }
                Err(e) => {
                    tracing::error!("Error while resuming renderer: {:#}", e);
                    self.transition_to_exiting("Suspended", event_loop);
                }
            }
        } else if self.is_exiting() {
            tracing::warn!("resumed() called while in Exiting state");
        }
    }

    fn suspended(&mut self, event_loop: &ActiveEventLoop) {
        assert!(self.0.is_some());
        if let Some(running_state) = self.take_running() {
            event_loop.set_control_flow(ControlFlow::Wait);
            let RunningState {
                scene,
                renderer,
                surface,
                device,
                win,
                instance,
                config,
                started: _,
            } = running_state;
            drop(scene);
            drop(renderer);
            drop(surface);

            if let Err(e) = device.wait_idle() {
                tracing::error!("Error while waiting for device idle during suspend: {}", e);
                self.transition_to_exiting("Running", event_loop);
                return;
            }

            tracing::debug!("State transition: Running -> Suspended");
            self.set_suspended(SuspendedState {
                instance,
                win,
                device,
                config,
            });
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(App::Running(running_state)) = &self.0 {
            running_state.win.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        window_event: WindowEvent,
    ) {
        assert!(self.0.is_some());
        if !self.is_running_window(window_id) {
            return;
        }

        match &window_event {
            WindowEvent::CloseRequested => {
                tracing::trace!("Close window request received for window");
                self.exit_from_running(event_loop);
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                let keep_running = match self.as_running_mut() {
                    Some(running_state) => {
                        let extent = window_extent(&running_state.win);
                        Self::resize(running_state, extent)
                    }
                    None => return,
                };
                if !keep_running {
                    self.exit_from_running(event_loop);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Some(running_state) = self.as_running_mut() {
                    Self::draw(running_state);
                }
            }
            _ => {}
        }
    }
}

impl AppRunner {
    fn transition_to_exiting(&mut self, from_state: &'static str, event_loop: &ActiveEventLoop) {
        tracing::debug!("State transition: {} -> Exiting", from_state);
        self.set_exiting(ExitingState {});
        event_loop.exit();
    }

    fn exit_from_running(&mut self, event_loop: &ActiveEventLoop) {
        if self.take_running().is_some() {
            self.transition_to_exiting("Running", event_loop);
        } else {
            tracing::warn!("Requested Running -> Exiting transition while not in Running state");
            event_loop.exit();
        }
    }

    fn is_running_window(&self, window_id: WindowId) -> bool {
        matches!(&self.0, Some(App::Running(s)) if s.win.id() == window_id)
    }

    /// Returns false when the app can no longer render.
    fn resize(running_state: &mut RunningState, extent: vk::Extent2D) -> bool {
        if extent.width == 0 || extent.height == 0 {
            tracing::trace!(
                "Received zero extent ({}x{}); dropping renderer",
                extent.width,
                extent.height
            );
            running_state.renderer = None;
            running_state.scene.detach();
            return true;
        }

        match running_state.renderer.as_mut() {
            Some(renderer) if renderer.extent() == extent => {
                tracing::trace!(
                    "Skipping resize because extent is unchanged: {}x{}",
                    extent.width,
                    extent.height
                );
                true
            }
            Some(renderer) => match renderer.resize(extent) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Error while resizing renderer: {}", e);
                    false
                }
            },
            None => match create_renderer(
                &running_state.device,
                &running_state.surface,
                &running_state.config,
                extent,
            ) {
                Ok(renderer) => {
                    if let Some(renderer) = &renderer
                        && let Err(e) = running_state.scene.attach(&running_state.device, renderer)
                    {
                        tracing::error!("Error while recreating scene textures: {}", e);
                        return false;
                    }
                    running_state.renderer = renderer;
                    true
                }
                Err(e) => {
                    tracing::error!("Error while recreating renderer: {:#}", e);
                    false
                }
            },
        }
    }

    fn draw(running_state: &mut RunningState) {
        let Some(renderer) = running_state.renderer.as_mut() else {
            return;
        };
        let seconds = running_state.started.elapsed().as_secs_f32();
        let extent = renderer.extent();
        let draws = running_state.scene.draws(seconds);
        let camera = scene::camera(extent);

        match renderer.render_frame(&camera, &scene::LIGHT, &draws) {
            Ok(FrameStatus::Presented) => {}
            Ok(FrameStatus::Suboptimal | FrameStatus::OutOfDate) => {
                let extent = window_extent(&running_state.win);
                if extent.width > 0
                    && extent.height > 0
                    && let Err(e) = renderer.resize(extent)
                {
                    tracing::error!("Error while recreating backbuffer: {}", e);
                }
            }
            Err(e) => tracing::error!("Skipping frame {}: {}", renderer.frame_index(), e),
        }
    }

    fn take_initializing(&mut self) -> Option<InitializingState> {
        match self.0.take() {
            Some(App::Initializing(s)) => Some(s),
            other => {
                self.0 = other;
                None
            }
        }
    }

    fn take_running(&mut self) -> Option<RunningState> {
        match self.0.take() {
            Some(App::Running(s)) => Some(s),
            other => {
                self.0 = other;
                None
            }
        }
    }

    fn as_running_mut(&mut self) -> Option<&mut RunningState> {
        match &mut self.0 {
            Some(App::Running(s)) => Some(s),
            _ => None,
        }
    }

    fn set_running(&mut self, state: RunningState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Running(state));
    }

    fn take_suspended(&mut self) -> Option<SuspendedState> {
        match self.0.take() {
            Some(App::Suspended(s)) => Some(s),
            other => {
                self.0 = other;
                None
            }
        }
    }

    fn set_suspended(&mut self, state: SuspendedState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Suspended(state));
    }

    fn is_exiting(&self) -> bool {
        matches!(self.0, Some(App::Exiting(_)))
    }

    fn set_exiting(&mut self, state: ExitingState) {
        assert!(self.0.is_none());
        self.0 = Some(App::Exiting(state));
    }
}
