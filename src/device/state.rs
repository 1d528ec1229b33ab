use bitflags::bitflags;

use super::backend::{Backend, StateChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullFace {
    #[default]
    None,
    Front,
    Back,
    Both,
}

/// Blend mode for translucent geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransparencyMode {
    #[default]
    None,
    /// `src * a + dst * (1 - a)`
    Alpha,
    /// `src + dst * (1 - src)`; black is fully transparent.
    AdditiveBlack,
    /// `src * dst`; white is fully transparent.
    MultiplicativeWhite,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl ColorMask {
    pub fn from_channels(red: bool, green: bool, blue: bool, alpha: bool) -> Self {
        let mut mask = ColorMask::empty();
        mask.set(ColorMask::RED, red);
        mask.set(ColorMask::GREEN, green);
        mask.set(ColorMask::BLUE, blue);
        mask.set(ColorMask::ALPHA, alpha);
        mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<glam::Vec4> for Color {
    fn from(v: glam::Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

/// Last state issued to the GPU. Every setter is a no-op when the requested
/// value is already current, so passes can assert their state freely.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceState {
    depth_test: bool,
    depth_mask: bool,
    cull_face: CullFace,
    transparency: TransparencyMode,
    color_mask: ColorMask,
    clear_color: Color,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_mask: true,
            cull_face: CullFace::None,
            transparency: TransparencyMode::None,
            color_mask: ColorMask::ALL,
            clear_color: Color::BLACK,
        }
    }
}

impl DeviceState {
    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    pub fn depth_mask(&self) -> bool {
        self.depth_mask
    }

    pub fn cull_face(&self) -> CullFace {
        self.cull_face
    }

    pub fn transparency(&self) -> TransparencyMode {
        self.transparency
    }

    pub fn color_mask(&self) -> ColorMask {
        self.color_mask
    }

    pub fn clear_color(&self) -> Color {
        self.clear_color
    }

    pub fn set_depth_test(&mut self, backend: &mut dyn Backend, enabled: bool) {
        if self.depth_test == enabled {
            return;
        }
        backend.apply_state(StateChange::DepthTest(enabled));
        self.depth_test = enabled;
    }

    pub fn set_depth_mask(&mut self, backend: &mut dyn Backend, enabled: bool) {
        if self.depth_mask == enabled {
            return;
        }
        backend.apply_state(StateChange::DepthMask(enabled));
        self.depth_mask = enabled;
    }

    pub fn set_cull_face(&mut self, backend: &mut dyn Backend, mode: CullFace) {
        if self.cull_face == mode {
            return;
        }
        backend.apply_state(StateChange::CullFace(mode));
        self.cull_face = mode;
    }

    pub fn set_transparency(&mut self, backend: &mut dyn Backend, mode: TransparencyMode) {
        if self.transparency == mode {
            return;
        }
        backend.apply_state(StateChange::Transparency(mode));
        self.transparency = mode;
    }

    pub fn set_color_mask(&mut self, backend: &mut dyn Backend, mask: ColorMask) {
        if self.color_mask == mask {
            return;
        }
        backend.apply_state(StateChange::ColorMask(mask));
        self.color_mask = mask;
    }

    pub fn set_clear_color(&mut self, backend: &mut dyn Backend, color: Color) {
        if self.clear_color == color {
            return;
        }
        backend.apply_state(StateChange::ClearColor(color));
        self.clear_color = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::StateKind;
    use crate::device::headless::HeadlessBackend;

    #[test]
    fn repeated_setter_issues_one_transition() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut state = DeviceState::default();

        for _ in 0..10 {
            state.set_depth_test(&mut backend, true);
        }

        assert_eq!(trace.borrow().transitions_of(StateKind::DepthTest), 1);
        assert!(state.depth_test());
    }

    #[test]
    fn setting_the_initial_value_issues_nothing() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut state = DeviceState::default();

        state.set_depth_mask(&mut backend, true);
        state.set_cull_face(&mut backend, CullFace::None);
        state.set_transparency(&mut backend, TransparencyMode::None);
        state.set_color_mask(&mut backend, ColorMask::ALL);
        state.set_clear_color(&mut backend, Color::BLACK);

        assert_eq!(trace.borrow().transition_count(), 0);
    }

    #[test]
    fn cache_tracks_last_issued_value() {
        let mut backend = HeadlessBackend::new();
        let trace = backend.trace();
        let mut state = DeviceState::default();

        state.set_transparency(&mut backend, TransparencyMode::Alpha);
        state.set_transparency(&mut backend, TransparencyMode::AdditiveBlack);
        state.set_transparency(&mut backend, TransparencyMode::AdditiveBlack);

        let trace = trace.borrow();
        assert_eq!(trace.transitions_of(StateKind::Transparency), 2);
        assert_eq!(
            trace.last_transition(StateKind::Transparency),
            Some(StateChange::Transparency(TransparencyMode::AdditiveBlack))
        );
        assert_eq!(state.transparency(), TransparencyMode::AdditiveBlack);
    }

    #[test]
    fn color_mask_from_channels() {
        assert_eq!(ColorMask::from_channels(true, true, true, true), ColorMask::ALL);
        assert!(ColorMask::from_channels(false, false, false, false).is_empty());
        assert_eq!(
            ColorMask::from_channels(true, false, true, false),
            ColorMask::RED | ColorMask::BLUE
        );
    }
}
