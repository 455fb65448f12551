use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::backend::{DepthFunc, GraphicsBackend, PolygonMode, StateToggle};
use crate::renderer::shadows::{ShadowFocus, DEFAULT_SHADOW_MAP_SIZE};
use crate::scene::LightType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_shadow_map_size")]
    pub shadow_map_size: u32,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default = "RenderSettings::default_clear_color")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub shadow_focus: ShadowFocus,
    /// Upper bound on binding points per buffer kind. `None` is unbounded.
    #[serde(default)]
    pub max_binding_points: Option<u32>,
    #[serde(default)]
    pub flags: FeatureFlags,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            shadow_map_size: Self::default_shadow_map_size(),
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            clear_color: Self::default_clear_color(),
            shadow_focus: ShadowFocus::default(),
            max_binding_points: None,
            flags: FeatureFlags::default(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<RenderSettings>(contents).map(Self::validate)
    }

    fn validate(mut self) -> Self {
        if self.shadow_map_size == 0 {
            warn!("Shadow map size must be greater than zero. Using default value.");
            self.shadow_map_size = Self::default_shadow_map_size();
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if self.max_binding_points == Some(0) {
            warn!("Binding point limit must be greater than zero. Removing the limit.");
            self.max_binding_points = None;
        }

        self
    }

    /// Present mode to configure the surface with. A disabled `vsync` flag
    /// overrides the configured mode.
    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = if self.flags.vsync {
            self.present_mode.to_wgpu()
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        pick_present_mode(desired, available)
    }

    const fn default_shadow_map_size() -> u32 {
        DEFAULT_SHADOW_MAP_SIZE
    }

    const fn default_clear_color() -> [f32; 4] {
        [0.05, 0.05, 0.08, 1.0]
    }
}

pub(crate) fn pick_present_mode(
    desired: wgpu::PresentMode,
    available: &[wgpu::PresentMode],
) -> wgpu::PresentMode {
    // Auto modes are always accepted by the surface.
    if available.contains(&desired)
        || matches!(
            desired,
            wgpu::PresentMode::AutoVsync | wgpu::PresentMode::AutoNoVsync
        )
    {
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    pub(crate) fn to_wgpu(self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

/// Switchable renderer behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    Shadows,
    DirectionalShadows,
    PointShadows,
    SpotShadows,
    TransparencyBlending,
    DepthTest,
    FaceCulling,
    VSync,
    DebugOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub shadows: bool,
    pub directional_shadows: bool,
    pub point_shadows: bool,
    pub spot_shadows: bool,
    pub transparency: bool,
    pub depth_test: bool,
    pub face_culling: bool,
    pub vsync: bool,
    pub debug_output: bool,
    pub polygon_mode: PolygonMode,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            shadows: true,
            directional_shadows: true,
            point_shadows: true,
            spot_shadows: true,
            transparency: true,
            depth_test: true,
            face_culling: true,
            vsync: true,
            debug_output: false,
            polygon_mode: PolygonMode::Fill,
        }
    }
}

impl FeatureFlags {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Shadows => self.shadows,
            Feature::DirectionalShadows => self.directional_shadows,
            Feature::PointShadows => self.point_shadows,
            Feature::SpotShadows => self.spot_shadows,
            Feature::TransparencyBlending => self.transparency,
            Feature::DepthTest => self.depth_test,
            Feature::FaceCulling => self.face_culling,
            Feature::VSync => self.vsync,
            Feature::DebugOutput => self.debug_output,
        }
    }

    /// Whether lights of this type get shadow maps this frame.
    pub fn shadows_for(&self, light_type: LightType) -> bool {
        self.shadows
            && match light_type {
                LightType::Directional => self.directional_shadows,
                LightType::Point => self.point_shadows,
                LightType::Spot => self.spot_shadows,
            }
    }

    /// Updates a flag and pushes the matching state to the backend.
    pub fn set(&mut self, feature: Feature, enabled: bool, backend: &mut dyn GraphicsBackend) {
        let slot = match feature {
            Feature::Shadows => &mut self.shadows,
            Feature::DirectionalShadows => &mut self.directional_shadows,
            Feature::PointShadows => &mut self.point_shadows,
            Feature::SpotShadows => &mut self.spot_shadows,
            Feature::TransparencyBlending => &mut self.transparency,
            Feature::DepthTest => &mut self.depth_test,
            Feature::FaceCulling => &mut self.face_culling,
            Feature::VSync => &mut self.vsync,
            Feature::DebugOutput => &mut self.debug_output,
        };
        *slot = enabled;
        info!("{:?} {}", feature, if enabled { "enabled" } else { "disabled" });
        if let Some(toggle) = Self::toggle_for(feature, enabled) {
            backend.apply_state(toggle);
        }
    }

    pub fn set_polygon_mode(&mut self, mode: PolygonMode, backend: &mut dyn GraphicsBackend) {
        self.polygon_mode = mode;
        backend.apply_state(StateToggle::PolygonMode(mode));
    }

    /// Shadow and blending flags are read by the stages each frame and have
    /// no fixed-function state of their own.
    fn toggle_for(feature: Feature, enabled: bool) -> Option<StateToggle> {
        match feature {
            Feature::DepthTest => Some(StateToggle::DepthTest(enabled)),
            Feature::FaceCulling => Some(StateToggle::FaceCulling(enabled)),
            Feature::VSync => Some(StateToggle::VSync(enabled)),
            Feature::DebugOutput => Some(StateToggle::DebugOutput(enabled)),
            Feature::Shadows
            | Feature::DirectionalShadows
            | Feature::PointShadows
            | Feature::SpotShadows
            | Feature::TransparencyBlending => None,
        }
    }

    /// Pushes every fixed-function flag to the backend.
    pub fn apply_all(&self, backend: &mut dyn GraphicsBackend) {
        for feature in [
            Feature::DepthTest,
            Feature::FaceCulling,
            Feature::VSync,
            Feature::DebugOutput,
        ] {
            if let Some(toggle) = Self::toggle_for(feature, self.is_enabled(feature)) {
                backend.apply_state(toggle);
            }
        }
        backend.apply_state(StateToggle::DepthWrite(true));
        backend.apply_state(StateToggle::DepthFunc(DepthFunc::Less));
        backend.apply_state(StateToggle::Blending(false));
        backend.apply_state(StateToggle::PolygonMode(self.polygon_mode));
    }
}
