use glam::{Mat4, Vec3};
use kiln_common::CameraConfig;

const MIN_DISTANCE: f32 = 0.1;
const MAX_PITCH_DEGREES: f32 = 89.0;
/// Fraction of the current distance moved per pixel of wheel delta.
const ZOOM_SENSITIVITY: f32 = 0.002;
const LINE_PIXELS: f32 = 16.0;
const PAGE_PIXELS: f32 = 800.0;

/// Orbit camera around a target point, driven by pointer drags.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitRig {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    /// Radians per pixel of pointer movement.
    pub sensitivity: f32,
}

impl OrbitRig {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            target: Vec3::ZERO,
            distance: config.distance.max(MIN_DISTANCE),
            yaw: 0.0,
            pitch: 0.0,
            sensitivity: config.sensitivity,
        }
    }

    /// Rotate by a pointer delta in pixels. Pitch stops short of the poles.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        let max_pitch = MAX_PITCH_DEGREES.to_radians();
        self.yaw -= dx * self.sensitivity;
        self.pitch = (self.pitch + dy * self.sensitivity).clamp(-max_pitch, max_pitch);
    }

    /// Dolly toward or away from the target by a wheel delta. `delta_mode`
    /// is the DOM `deltaMode`; line and page deltas are scaled to pixels.
    /// Negative deltas zoom in.
    pub fn zoom(&mut self, delta_y: f32, delta_mode: u32) {
        let pixels = match delta_mode {
            1 => delta_y * LINE_PIXELS,
            2 => delta_y * PAGE_PIXELS,
            _ => delta_y,
        };
        if !pixels.is_finite() || pixels.abs() <= f32::EPSILON {
            return;
        }
        self.distance = (self.distance * (pixels * ZOOM_SENSITIVITY).exp()).max(MIN_DISTANCE);
    }

    pub fn eye(&self) -> Vec3 {
        let dir = Vec3::new(
            self.pitch.cos() * self.yaw.sin(),
            self.pitch.sin(),
            self.pitch.cos() * self.yaw.cos(),
        );
        self.target + dir * self.distance
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.target, Vec3::Y)
    }

    /// World transform of the camera; the inverse of the view matrix.
    pub fn camera_matrix(&self) -> Mat4 {
        self.view_matrix().inverse()
    }

    /// Aim at a bounding sphere so it fills the vertical field of view.
    pub fn frame(&mut self, center: Vec3, radius: f32, fov_y: f32) {
        self.target = center;
        let half = (fov_y * 0.5).sin().max(f32::EPSILON);
        self.distance = (radius / half).max(MIN_DISTANCE);
    }
}

/// Perspective projection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn from_config(config: &CameraConfig, width: u32, height: u32) -> Self {
        let mut projection = Self {
            fov_y: config.fov_degrees.to_radians(),
            aspect: 1.0,
            near: config.near,
            far: config.far.max(config.near + f32::EPSILON),
        };
        projection.set_viewport(width, height);
        projection
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.aspect = width.max(1) as f32 / height.max(1) as f32;
    }

    /// Fit the depth range around a sphere seen from `distance`.
    pub fn fit_depth(&mut self, distance: f32, radius: f32) {
        self.near = ((distance - radius) * 0.5).max(distance * 0.001).max(0.001);
        self.far = (distance + radius) * 2.0;
    }

    /// Push the far plane out so a target `distance` away stays in range.
    pub fn reach(&mut self, distance: f32) {
        self.far = self.far.max(distance * 2.0);
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}
