//! Volume tests used to find the leaves a light reaches.

use glam::{Mat4, Vec3};

/// Result of testing a bound against a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeCull {
    /// Entirely outside.
    Culled,
    /// Straddles the boundary.
    Split,
    /// Entirely inside.
    Clear,
}

/// Axis-aligned world-space bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds3 {
    pub min: Vec3,
    pub max: Vec3,
}

impl Bounds3 {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center(center: Vec3, half_extent: Vec3) -> Self {
        Self::new(center - half_extent, center + half_extent)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// Radius of the bounding sphere around the box.
    pub fn radius(&self) -> f32 {
        self.half_extent().length()
    }

    pub fn union(&self, other: &Bounds3) -> Bounds3 {
        Bounds3 {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    pub fn closest_point(&self, p: Vec3) -> Vec3 {
        p.clamp(self.min, self.max)
    }
}

/// A volume positioned by the light that owns it.
pub trait VolumeIsect {
    fn set_transform(&mut self, light_to_world: Mat4, world_to_light: Mat4);
    fn test(&self, bounds: &Bounds3) -> VolumeCull;
}

/// Sphere around the light's origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereIsect {
    center: Vec3,
    radius: f32,
}

impl SphereIsect {
    pub fn new(radius: f32) -> Self {
        Self {
            center: Vec3::ZERO,
            radius,
        }
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }
}

impl VolumeIsect for SphereIsect {
    fn set_transform(&mut self, light_to_world: Mat4, _world_to_light: Mat4) {
        self.center = light_to_world.transform_point3(Vec3::ZERO);
    }

    fn test(&self, bounds: &Bounds3) -> VolumeCull {
        let r2 = self.radius * self.radius;
        if bounds.closest_point(self.center).distance_squared(self.center) > r2 {
            return VolumeCull::Culled;
        }
        if bounds
            .corners()
            .iter()
            .all(|c| c.distance_squared(self.center) <= r2)
        {
            VolumeCull::Clear
        } else {
            VolumeCull::Split
        }
    }
}

/// Cone with its apex at the light, opening down the light's -Z axis.
/// `angle` is the half angle. Without a length the cone is infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeIsect {
    apex: Vec3,
    dir: Vec3,
    angle: f32,
    length: Option<f32>,
}

impl Default for ConeIsect {
    fn default() -> Self {
        Self {
            apex: Vec3::ZERO,
            dir: Vec3::NEG_Z,
            angle: std::f32::consts::FRAC_PI_4,
            length: None,
        }
    }
}

impl ConeIsect {
    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    pub fn set_length(&mut self, length: Option<f32>) {
        self.length = length;
    }

    pub fn angle(&self) -> f32 {
        self.angle
    }

    pub fn length(&self) -> Option<f32> {
        self.length
    }

    fn contains(&self, p: Vec3, sin: f32, cos: f32) -> bool {
        let v = p - self.apex;
        let along = v.dot(self.dir);
        if along < 0.0 {
            return false;
        }
        if self.length.is_some_and(|len| along > len) {
            return false;
        }
        let perp = (v - self.dir * along).length();
        perp * cos - along * sin <= 0.0
    }
}

impl VolumeIsect for ConeIsect {
    fn set_transform(&mut self, light_to_world: Mat4, _world_to_light: Mat4) {
        self.apex = light_to_world.transform_point3(Vec3::ZERO);
        self.dir = light_to_world
            .transform_vector3(Vec3::NEG_Z)
            .normalize_or_zero();
    }

    fn test(&self, bounds: &Bounds3) -> VolumeCull {
        let (sin, cos) = self.angle.sin_cos();
        let center = bounds.center();
        let radius = bounds.radius();

        let v = center - self.apex;
        let along = v.dot(self.dir);
        if self.length.is_some_and(|len| along - radius > len) {
            return VolumeCull::Culled;
        }

        // Distance from the center to the cone surface, or to the apex when
        // the center sits behind it.
        let perp = (v - self.dir * along).length();
        let dist = if along * cos + perp * sin < 0.0 {
            v.length()
        } else {
            perp * cos - along * sin
        };
        if dist > radius {
            return VolumeCull::Culled;
        }

        if bounds
            .corners()
            .iter()
            .all(|c| self.contains(*c, sin, cos))
        {
            VolumeCull::Clear
        } else {
            VolumeCull::Split
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ParallelPlane {
    p0: Vec3,
    p1: Vec3,
    norm: Vec3,
    min: f32,
    max: f32,
}

/// Slab intersection: a point is inside when it lies between every pair of
/// parallel planes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParallelIsect {
    planes: Vec<ParallelPlane>,
}

impl ParallelIsect {
    pub fn set_num_planes(&mut self, n: usize) {
        let zero = ParallelPlane {
            p0: Vec3::ZERO,
            p1: Vec3::ZERO,
            norm: Vec3::ZERO,
            min: 0.0,
            max: 0.0,
        };
        self.planes.resize(n, zero);
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    /// Plane pair `i` passes through `p0` and `p1`, both in light space,
    /// with normals along `p1 - p0`.
    pub fn set_plane(&mut self, i: usize, p0: Vec3, p1: Vec3) {
        let plane = &mut self.planes[i];
        plane.p0 = p0;
        plane.p1 = p1;
        plane.norm = (p1 - p0).normalize_or_zero();
        plane.min = plane.norm.dot(p0);
        plane.max = plane.norm.dot(p1);
    }
}

impl VolumeIsect for ParallelIsect {
    fn set_transform(&mut self, light_to_world: Mat4, _world_to_light: Mat4) {
        for plane in &mut self.planes {
            let p0 = light_to_world.transform_point3(plane.p0);
            let p1 = light_to_world.transform_point3(plane.p1);
            plane.norm = (p1 - p0).normalize_or_zero();
            plane.min = plane.norm.dot(p0);
            plane.max = plane.norm.dot(p1);
        }
    }

    fn test(&self, bounds: &Bounds3) -> VolumeCull {
        let center = bounds.center();
        let half = bounds.half_extent();
        let mut result = VolumeCull::Clear;
        for plane in &self.planes {
            let mid = plane.norm.dot(center);
            let reach = plane.norm.abs().dot(half);
            let (lo, hi) = (mid - reach, mid + reach);
            if hi < plane.min || lo > plane.max {
                return VolumeCull::Culled;
            }
            if lo < plane.min || hi > plane.max {
                result = VolumeCull::Split;
            }
        }
        result
    }
}

/// Region that fades a light in or out by position.
pub trait SoftVolume {
    /// Strength in `[0, 1]` at `pos`.
    fn strength(&self, pos: Vec3) -> f32;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_at(x: f32, y: f32, z: f32) -> Bounds3 {
        Bounds3::from_center(Vec3::new(x, y, z), Vec3::splat(0.5))
    }

    #[test]
    fn sphere_classifies_bounds() {
        let mut sphere = SphereIsect::new(5.0);
        sphere.set_transform(Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)), Mat4::IDENTITY);

        assert_eq!(sphere.test(&unit_at(10.0, 0.0, 0.0)), VolumeCull::Clear);
        assert_eq!(sphere.test(&unit_at(15.0, 0.0, 0.0)), VolumeCull::Split);
        assert_eq!(sphere.test(&unit_at(0.0, 0.0, 0.0)), VolumeCull::Culled);
    }

    #[test]
    fn cone_points_down_negative_z() {
        let mut cone = ConeIsect::default();
        cone.set_angle(30f32.to_radians());
        cone.set_length(Some(20.0));
        cone.set_transform(Mat4::IDENTITY, Mat4::IDENTITY);

        assert_eq!(cone.test(&unit_at(0.0, 0.0, -10.0)), VolumeCull::Clear);
        assert_eq!(cone.test(&unit_at(0.0, 0.0, 10.0)), VolumeCull::Culled);
        assert_eq!(cone.test(&unit_at(0.0, 0.0, -40.0)), VolumeCull::Culled);
        assert_eq!(cone.test(&unit_at(20.0, 0.0, -5.0)), VolumeCull::Culled);
    }

    #[test]
    fn parallel_planes_bound_a_box() {
        let mut slab = ParallelIsect::default();
        slab.set_num_planes(1);
        slab.set_plane(0, Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        slab.set_transform(Mat4::IDENTITY, Mat4::IDENTITY);

        assert_eq!(slab.test(&unit_at(0.0, 100.0, 0.0)), VolumeCull::Clear);
        assert_eq!(slab.test(&unit_at(2.0, 0.0, 0.0)), VolumeCull::Split);
        assert_eq!(slab.test(&unit_at(5.0, 0.0, 0.0)), VolumeCull::Culled);
    }
}
