use std::sync::Arc;

use log::info;
use winit::window::Window;

use super::pipeline::depth_format;
use super::COLOR_FORMAT;
use crate::device::backend::Capabilities;
use crate::error::{DeviceError, Result};
use crate::settings::DeviceConfig;

const MSAA_SAMPLES: u32 = 4;

/// Device, queue and window surface, plus the depth buffer that goes with it.
pub(super) struct GpuContext {
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub depth_format: wgpu::TextureFormat,
    pub depth_view: wgpu::TextureView,
    pub capabilities: Capabilities,
}

impl GpuContext {
    pub async fn new(window: Arc<Window>, settings: &DeviceConfig) -> Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(window)
            .map_err(|err| DeviceError::Init(format!("could not create surface: {err}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| DeviceError::Init(format!("no suitable adapter: {err}")))?;
        let adapter_info = adapter.get_info();
        info!(
            "Using adapter {} ({:?})",
            adapter_info.name, adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| DeviceError::Init(format!("could not create device: {err}")))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| DeviceError::Init("surface is not supported by the adapter".into()))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        // screenshots and framebuffer copies read the surface when allowed
        let readable = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::TEXTURE_BINDING;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | (surface_caps.usages & readable),
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: settings.present_mode(&surface_caps.present_modes),
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let depth_format = depth_format(settings.depth_size);
        let depth_view = create_depth(&device, depth_format, config.width, config.height);

        let limits = device.limits();
        let anisotropy_supported = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::ANISOTROPIC_FILTERING);
        let multisampled = [COLOR_FORMAT, depth_format].iter().all(|&format| {
            adapter
                .get_texture_format_features(format)
                .flags
                .sample_count_supported(MSAA_SAMPLES)
        });
        let capabilities = Capabilities {
            anisotropy_supported,
            max_anisotropy: if anisotropy_supported { 16 } else { 1 },
            max_samples: if multisampled { MSAA_SAMPLES } else { 1 },
            max_texture_size: limits.max_texture_dimension_2d,
            max_renderbuffer_size: limits.max_texture_dimension_2d,
            shadow_mapping_supported: true,
            framebuffer_supported: true,
        };

        Ok(Self {
            surface,
            device,
            queue,
            config,
            depth_format,
            depth_view,
            capabilities,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.depth_view = create_depth(&self.device, self.depth_format, width, height);
    }

    pub fn reconfigure(&self) {
        self.surface.configure(&self.device, &self.config);
    }

    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

fn create_depth(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}
