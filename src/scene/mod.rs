// scene/mod.rs

pub mod camera;
pub mod light;
pub mod object;
pub mod scene;
pub mod transform;

pub use camera::Camera;
pub use light::{Attenuation, Light, LightId, LightKind, LightType};
pub use object::{DrawObject, ObjectId};
pub use scene::{Scene, SceneId, Skybox};
pub use transform::Transform;
