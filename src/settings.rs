use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Window and device parameters, usually read from `device.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub size: Resolution,
    #[serde(default = "DeviceConfig::default_depth_size")]
    pub depth_size: u32,
    #[serde(default = "DeviceConfig::default_vsync")]
    pub vsync: bool,
    #[serde(default = "DeviceConfig::default_msaa_samples")]
    pub msaa_samples: u32,
    #[serde(default = "DeviceConfig::default_anisotropy")]
    pub anisotropy: u32,
    #[serde(default = "DeviceConfig::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default = "DeviceConfig::default_ui_stream_capacity")]
    pub ui_stream_capacity: u32,
    #[serde(default = "DeviceConfig::default_particle_stream_capacity")]
    pub particle_stream_capacity: u32,
    #[serde(default = "DeviceConfig::default_object_stream_capacity")]
    pub object_stream_capacity: u32,
    #[serde(default = "DeviceConfig::default_shader_root")]
    pub shader_root: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            size: Resolution::default(),
            depth_size: Self::default_depth_size(),
            vsync: Self::default_vsync(),
            msaa_samples: Self::default_msaa_samples(),
            anisotropy: Self::default_anisotropy(),
            shadow_map_size: Self::default_shadow_map_size(),
            ui_stream_capacity: Self::default_ui_stream_capacity(),
            particle_stream_capacity: Self::default_particle_stream_capacity(),
            object_stream_capacity: Self::default_object_stream_capacity(),
            shader_root: Self::default_shader_root(),
        }
    }
}

impl DeviceConfig {
    pub fn load() -> Self {
        Self::load_from_path("device.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default device config.",
                    path, err
                );
                DeviceConfig::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!("Device config {:?} not found. Using default config.", path);
                DeviceConfig::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default device config.",
                    path, err
                );
                DeviceConfig::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let config = serde_json::from_str::<DeviceConfig>(contents)?;
        Ok(config.validate())
    }

    pub fn validate(mut self) -> Self {
        if self.size.width == 0 || self.size.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.size = Resolution::default();
        }

        if !matches!(self.depth_size, 16 | 24 | 32) {
            warn!(
                "Depth size {} is not one of 16, 24 or 32. Using {}.",
                self.depth_size,
                Self::default_depth_size()
            );
            self.depth_size = Self::default_depth_size();
        }

        if self.msaa_samples == 0 || !self.msaa_samples.is_power_of_two() {
            warn!(
                "MSAA sample count {} is invalid. Using 1 instead.",
                self.msaa_samples
            );
            self.msaa_samples = Self::default_msaa_samples();
        }

        if self.anisotropy == 0 {
            warn!("Anisotropy level must be at least 1. Using 1 instead.");
            self.anisotropy = 1;
        }

        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        for (name, value, default) in [
            (
                "UI",
                &mut self.ui_stream_capacity,
                Self::default_ui_stream_capacity(),
            ),
            (
                "particle",
                &mut self.particle_stream_capacity,
                Self::default_particle_stream_capacity(),
            ),
            (
                "object",
                &mut self.object_stream_capacity,
                Self::default_object_stream_capacity(),
            ),
        ] {
            if *value == 0 {
                warn!("{} stream capacity must be greater than zero. Using {}.", name, default);
                *value = default;
            }
        }

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = if self.vsync {
            wgpu::PresentMode::Fifo
        } else {
            wgpu::PresentMode::Immediate
        };
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    const fn default_depth_size() -> u32 {
        24
    }

    const fn default_vsync() -> bool {
        true
    }

    const fn default_msaa_samples() -> u32 {
        1
    }

    const fn default_anisotropy() -> u32 {
        4
    }

    const fn default_shadow_map_size() -> u32 {
        2048
    }

    const fn default_ui_stream_capacity() -> u32 {
        128 * 1024
    }

    const fn default_particle_stream_capacity() -> u32 {
        64 * 1024
    }

    const fn default_object_stream_capacity() -> u32 {
        64 * 1024
    }

    fn default_shader_root() -> PathBuf {
        PathBuf::from("shaders")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
