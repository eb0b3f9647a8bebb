use crate::cache::spatial::Frustum;
use glam::{Mat4, Vec3};

/// Everything the scheduler needs to know about the camera, in region local coordinates.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CameraState {
    pub origin: Vec3,
    pub frustum: Frustum,
    /// Pixels one meter covers at one meter distance
    pub pixel_meter_ratio: f32,
}

impl CameraState {
    pub fn new(origin: Vec3, frustum: Frustum, pixel_meter_ratio: f32) -> Self {
        CameraState {
            origin,
            frustum,
            pixel_meter_ratio,
        }
    }

    /// A perspective camera with Z up, looking from `origin` at `target`.
    pub fn look_at(origin: Vec3, target: Vec3, fov_y: f32, aspect: f32, far: f32, viewport_height: u32) -> Self {
        let view = Mat4::look_at_rh(origin, target, Vec3::Z);
        let projection = Mat4::perspective_rh(fov_y, aspect, 0.1, far);
        CameraState {
            origin,
            frustum: Frustum::from_view_projection(&(projection * view)),
            pixel_meter_ratio: viewport_height as f32 / (2.0 * (fov_y * 0.5).tan()),
        }
    }

    /// Sees in every direction, only distance limits what gets loaded.
    pub fn omnidirectional(origin: Vec3, pixel_meter_ratio: f32) -> Self {
        CameraState::new(origin, Frustum::INFINITE, pixel_meter_ratio)
    }
}
