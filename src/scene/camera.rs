//! Thin-lens perspective camera with fly and orbit navigation.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::util::{Bounds3, Error, Mat4, Quat, Result, Vec2, Vec3};

/// Full-frame 35mm sensor width in meters.
pub const SENSOR_WIDTH: f32 = 0.036;
/// Default focal length in meters.
pub const FOCAL_LENGTH: f32 = 0.035;

/// Physical perspective camera.
///
/// Orientation is kept as an orthonormal `forward`/`up`/`right` frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    forward: Vec3,
    up: Vec3,
    right: Vec3,
    /// Sensor size in meters.
    pub sensor_size: Vec2,
    /// Focal length in meters.
    pub focal_length: f32,
    /// Near/far clip distances.
    pub zcap: Vec2,
    /// Lens aperture diameter, 0 for a pinhole.
    pub aperture: f32,
    /// Distance to the plane in focus, 0 disables depth of field.
    pub focus_distance: f32,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
            right: Vec3::X,
            sensor_size: Vec2::new(SENSOR_WIDTH, 0.024),
            focal_length: FOCAL_LENGTH,
            zcap: Vec2::new(0.0, 100_000.0),
            aperture: 0.0,
            focus_distance: 0.0,
        }
    }
}

impl PerspectiveCamera {
    pub fn new() -> Self {
        Self::default()
    }

    /// Camera at `eye` looking at `at`.
    pub fn looking_at(eye: Vec3, at: Vec3, up: Vec3) -> Self {
        let mut camera = Self::default();
        camera.look_at(eye, at, up);
        camera
    }

    pub fn look_at(&mut self, eye: Vec3, at: Vec3, up: Vec3) {
        self.position = eye;
        let forward = (at - eye).try_normalize().unwrap_or(Vec3::NEG_Z);
        self.set_frame(forward, up);
    }

    fn set_frame(&mut self, forward: Vec3, up: Vec3) {
        let right = forward
            .cross(up)
            .try_normalize()
            .unwrap_or_else(|| forward.any_orthonormal_vector());
        self.forward = forward;
        self.right = right;
        self.up = right.cross(forward).normalize();
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.up
    }

    #[inline]
    pub fn right(&self) -> Vec3 {
        self.right
    }

    /// Keep the sensor width and derive its height from `aspect` (w / h).
    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect > 0.0 && aspect.is_finite() {
            self.sensor_size.y = self.sensor_size.x / aspect;
        }
    }

    /// Place the camera in front of `bounds` (+Z side), looking at its center.
    ///
    /// The camera sits one box diagonal beyond the front face.
    pub fn frame(&mut self, bounds: &Bounds3, aspect: f32) {
        self.set_aspect(aspect);
        if bounds.is_empty() {
            return;
        }
        let center = bounds.center();
        let eye = Vec3::new(center.x, center.y, bounds.max.z + bounds.diagonal());
        self.look_at(eye, center, Vec3::Y);
        self.zcap = Vec2::new(0.0, 100_000.0);
    }

    pub fn move_forward(&mut self, distance: f32) {
        self.position += self.forward * distance;
    }

    pub fn move_right(&mut self, distance: f32) {
        self.position += self.right * distance;
    }

    pub fn move_up(&mut self, distance: f32) {
        self.position += self.up * distance;
    }

    /// Yaw around world Y, then pitch around the camera's right axis (radians).
    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        let q = Quat::from_axis_angle(self.right, pitch);
        let q = Quat::from_rotation_y(yaw) * q;
        self.apply_rotation(q);
    }

    /// Roll around the view axis (radians).
    pub fn roll(&mut self, angle: f32) {
        self.apply_rotation(Quat::from_axis_angle(self.forward, angle));
    }

    /// Orbit around `pivot`: yaw around world Y, pitch around the right axis.
    pub fn orbit(&mut self, pivot: Vec3, yaw: f32, pitch: f32) {
        let q = Quat::from_rotation_y(yaw) * Quat::from_axis_angle(self.right, pitch);
        self.position = pivot + q * (self.position - pivot);
        self.apply_rotation(q);
    }

    /// Rigidly transform the camera by `m` (no scaling).
    pub fn transform(&mut self, m: &Mat4) {
        self.position = m.transform_point3(self.position);
        let forward = m.transform_vector3(self.forward).normalize();
        let up = m.transform_vector3(self.up).normalize();
        self.set_frame(forward, up);
    }

    fn apply_rotation(&mut self, q: Quat) {
        let forward = (q * self.forward).normalize();
        let up = (q * self.up).normalize();
        self.set_frame(forward, up);
    }

    /// Apply one navigation step. Moves travel `speed` units per second
    /// of motion; orbits turn around `pivot`.
    pub fn apply_move(&mut self, step: CameraMove, speed: f32, pivot: Vec3) {
        match step {
            CameraMove::Forward(t) => self.move_forward(t * speed),
            CameraMove::Right(t) => self.move_right(t * speed),
            CameraMove::Up(t) => self.move_up(t * speed),
            CameraMove::Rotate { yaw, pitch } => self.rotate(yaw.to_radians(), pitch.to_radians()),
            CameraMove::Orbit { yaw, pitch } => self.orbit(pivot, yaw.to_radians(), pitch.to_radians()),
            CameraMove::Roll(angle) => self.roll(angle.to_radians()),
        }
    }

    /// Ray through film position `film` (`[0,1]^2`, origin bottom-left).
    ///
    /// `lens` is a uniform sample in `[0,1]^2` used for depth of field.
    pub fn generate_ray(&self, film: Vec2, lens: Vec2) -> (Vec3, Vec3) {
        let sensor = (film - Vec2::splat(0.5)) * self.sensor_size;
        let dir = (self.forward * self.focal_length + self.right * sensor.x + self.up * sensor.y).normalize();

        if self.aperture <= 0.0 || self.focus_distance <= 0.0 {
            return (self.position, dir);
        }

        let focus = self.position + dir * (self.focus_distance / dir.dot(self.forward));
        let disk = concentric_disk(lens) * (self.aperture * 0.5);
        let origin = self.position + self.right * disk.x + self.up * disk.y;
        (origin, (focus - origin).normalize())
    }
}

/// One step of a scripted camera path.
///
/// Parsed from `kind:value[:value]`, e.g. `forward:0.5`, `orbit:30:-10`.
/// Translations are in seconds of motion, angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CameraMove {
    Forward(f32),
    Right(f32),
    Up(f32),
    Rotate { yaw: f32, pitch: f32 },
    /// Arcball turn around the pivot.
    Orbit { yaw: f32, pitch: f32 },
    Roll(f32),
}

impl CameraMove {
    /// Parse a comma-separated list of steps.
    pub fn parse_path(path: &str) -> Result<Vec<Self>> {
        path.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for CameraMove {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split(':');
        let kind = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        let values = parts
            .map(|v| v.trim().parse::<f32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Config(format!("camera move '{s}': {e}")))?;

        let step = match (kind.as_str(), values.as_slice()) {
            ("forward", [t]) => Self::Forward(*t),
            ("right", [t]) => Self::Right(*t),
            ("up", [t]) => Self::Up(*t),
            ("rotate", [yaw]) => Self::Rotate { yaw: *yaw, pitch: 0.0 },
            ("rotate", [yaw, pitch]) => Self::Rotate { yaw: *yaw, pitch: *pitch },
            ("orbit", [yaw]) => Self::Orbit { yaw: *yaw, pitch: 0.0 },
            ("orbit", [yaw, pitch]) => Self::Orbit { yaw: *yaw, pitch: *pitch },
            ("roll", [angle]) => Self::Roll(*angle),
            _ => {
                return Err(Error::Config(format!(
                    "camera move '{s}' (expected forward|right|up:<t>, rotate|orbit:<yaw>[:<pitch>] or roll:<deg>)"
                )))
            }
        };
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Config(format!("camera move '{s}' is not finite")));
        }
        Ok(step)
    }
}

/// Map a square sample onto the unit disk.
fn concentric_disk(u: Vec2) -> Vec2 {
    let o = u * 2.0 - Vec2::ONE;
    if o == Vec2::ZERO {
        return Vec2::ZERO;
    }
    let (r, theta) = if o.x.abs() > o.y.abs() {
        (o.x, std::f32::consts::FRAC_PI_4 * (o.y / o.x))
    } else {
        (o.y, std::f32::consts::FRAC_PI_2 - std::f32::consts::FRAC_PI_4 * (o.x / o.y))
    };
    Vec2::new(theta.cos(), theta.sin()) * r
}
