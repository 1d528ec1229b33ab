pub mod app;
pub mod device;
pub mod error;
mod io;
pub mod renderers;
pub mod settings;

pub use device::backend::{Backend, Capabilities, Viewport};
pub use device::headless::HeadlessBackend;
pub use device::wgpu_backend::WgpuBackend;
pub use device::Device;
pub use error::{DeviceError, Result};
pub use settings::DeviceConfig;

use app::App;
use winit::event_loop::EventLoop;

pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

pub fn run() -> std::result::Result<(), winit::error::EventLoopError> {
    init_logging();

    log::info!("Starting device demo");

    let event_loop = EventLoop::new()?;
    let mut app = App::new(DeviceConfig::load());

    let result = event_loop.run_app(&mut app);

    if let Err(ref err) = result {
        log::error!("Application error: {}", err);
    }

    log::info!("Application shutdown complete");

    result
}
