use glam::{Mat4, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub eye: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn looking_at(eye: Vec3, target: Vec3) -> Self {
        Self {
            eye,
            target,
            ..Self::default()
        }
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    pub fn proj(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y_radians, aspect, self.near, self.far)
    }

    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        self.proj(aspect) * self.view()
    }

    /// View matrix with the translation removed, for drawing the skybox.
    pub fn rotation_only_view(&self) -> Mat4 {
        let mut view = self.view();
        view.w_axis = glam::Vec4::W;
        view
    }

    pub fn position(&self) -> Vec3 {
        self.eye
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 3.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y_radians: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_proj_is_reasonable() {
        let cam = Camera::default();
        let vp = cam.view_proj(16.0 / 9.0);
        let id = vp * vp.inverse();
        assert!(id.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn skybox_view_ignores_eye_position() {
        let a = Camera::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::new(0.0, 0.0, 4.0));
        let b = Camera::looking_at(Vec3::new(10.0, 3.0, 5.0), Vec3::new(10.0, 3.0, 4.0));
        assert!(a
            .rotation_only_view()
            .abs_diff_eq(b.rotation_only_view(), 1e-5));
    }
}
