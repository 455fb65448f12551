use glam::Vec3;

/// Stable identity of a light inside its scene. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightType {
    Directional,
    Point,
    Spot,
}

/// Distance falloff `1 / (constant + linear * d + quadratic * d^2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        // roughly a 50 unit range
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Directional {
        direction: Vec3,
    },
    Point {
        position: Vec3,
        attenuation: Attenuation,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        /// Inner and outer cone half-angles in radians.
        cutoff: f32,
        outer_cutoff: f32,
        attenuation: Attenuation,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    id: LightId,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
    pub cast_shadows: bool,
}

impl Light {
    pub(crate) fn new(id: LightId, kind: LightKind, color: Vec3, intensity: f32) -> Self {
        Self {
            id,
            kind,
            color,
            intensity,
            enabled: true,
            cast_shadows: true,
        }
    }

    pub fn id(&self) -> LightId {
        self.id
    }

    pub fn light_type(&self) -> LightType {
        match self.kind {
            LightKind::Directional { .. } => LightType::Directional,
            LightKind::Point { .. } => LightType::Point,
            LightKind::Spot { .. } => LightType::Spot,
        }
    }

    pub fn position(&self) -> Option<Vec3> {
        match self.kind {
            LightKind::Directional { .. } => None,
            LightKind::Point { position, .. } | LightKind::Spot { position, .. } => Some(position),
        }
    }

    pub fn direction(&self) -> Option<Vec3> {
        match self.kind {
            LightKind::Directional { direction } | LightKind::Spot { direction, .. } => {
                Some(direction)
            }
            LightKind::Point { .. } => None,
        }
    }

    pub fn attenuation(&self) -> Option<Attenuation> {
        match self.kind {
            LightKind::Directional { .. } => None,
            LightKind::Point { attenuation, .. } | LightKind::Spot { attenuation, .. } => {
                Some(attenuation)
            }
        }
    }

    /// Moves a point or spot light. Returns `false` for directional lights.
    pub fn set_position(&mut self, new_position: Vec3) -> bool {
        match &mut self.kind {
            LightKind::Point { position, .. } | LightKind::Spot { position, .. } => {
                *position = new_position;
                true
            }
            LightKind::Directional { .. } => false,
        }
    }

    /// Re-aims a directional or spot light. Returns `false` for point lights.
    pub fn set_direction(&mut self, new_direction: Vec3) -> bool {
        let new_direction = new_direction.normalize_or_zero();
        match &mut self.kind {
            LightKind::Directional { direction } | LightKind::Spot { direction, .. } => {
                *direction = new_direction;
                true
            }
            LightKind::Point { .. } => false,
        }
    }

    pub fn set_color(&mut self, color: Vec3) {
        self.color = color;
    }

    pub fn set_intensity(&mut self, intensity: f32) {
        self.intensity = intensity.max(0.0);
    }
}
