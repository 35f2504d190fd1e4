//! Scene lights and the volume culling that decides which drawables they
//! reach.
//!
//! A light rebuilds its volume lazily: setters only mark it dirty, and the
//! next query refreshes it. Every refresh also sets the light's shared
//! [`DirtyFlag`] so the device rebuilds the light's uniform buffer before
//! its next use.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

use crate::gpu::DirtyFlag;

pub mod isect;
pub mod space_tree;

pub use isect::{
    Bounds3, ConeIsect, ParallelIsect, SoftVolume, SphereIsect, VolumeCull, VolumeIsect,
};
pub use space_tree::{LeafTree, SpaceTree};

/// Diffuse alpha is scaled by this to find where an attenuated light fades
/// out.
pub const FAR_POWER_KONST: f32 = 15.0;
/// Lights dimmer than this on every channel count as off.
pub const MIN_MAX_STRENGTH: f32 = 1.0e-2;
pub const MIN_HITHER: f32 = 1.0;
pub const MAX_YON: f32 = 1000.0;

/// Identifies one light owned by the scene graph.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LightKey(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LightProps: u32 {
        /// Too dim to matter. Maintained by the light itself.
        const ZERO = 0x1;
        /// Only lights drawables that explicitly include it.
        const HAS_INCLUDES = 0x2;
        /// Avatars count as included.
        const INCLUDES_CHARS = 0x4;
        /// Non-black specular. Maintained by [`LightInfo::set_specular`].
        const HAS_SPECULAR = 0x8;
        const SHADOW_ONLY = 0x10;
        const FORCE_PROJ = 0x20;
        const DISABLE = 0x40;
    }
}

/// Distance falloff of omni and spot lights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
    /// Hard range used when every coefficient is zero.
    pub cutoff: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 0.0,
            linear: 1.0,
            quadratic: 0.0,
            cutoff: 0.0,
        }
    }
}

impl Attenuation {
    pub fn is_attenuated(&self) -> bool {
        self.linear != 0.0 || self.quadratic != 0.0 || self.cutoff != 0.0
    }

    fn apply(&self, strength: f32, dist: f32) -> f32 {
        if self.quadratic > 0.0 {
            strength / (self.constant + self.linear * dist + self.quadratic * dist * dist)
        } else if self.linear > 0.0 {
            strength / (self.constant + self.linear * dist)
        } else if self.constant > 0.0 {
            strength / self.constant
        } else if self.cutoff > 0.0 && dist > self.cutoff {
            0.0
        } else {
            strength
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Parallel rays that reach everything.
    Directional,
    /// Parallel rays confined to a box `width` by `height` reaching `depth`
    /// down the light's -Z axis.
    LimitedDirectional { width: f32, height: f32, depth: f32 },
    Omni(Attenuation),
    /// Cone down the light's -Z axis. Angles are half angles in radians.
    Spot {
        attenuation: Attenuation,
        inner: f32,
        outer: f32,
    },
}

impl LightKind {
    pub fn attenuation(&self) -> Option<&Attenuation> {
        match self {
            LightKind::Omni(a) | LightKind::Spot { attenuation: a, .. } => Some(a),
            _ => None,
        }
    }

    fn type_index(&self) -> u32 {
        match self {
            LightKind::Directional => 0,
            LightKind::LimitedDirectional { .. } => 1,
            LightKind::Omni(_) => 2,
            LightKind::Spot { .. } => 3,
        }
    }
}

/// The volume a refreshed light tests bounds against.
#[derive(Debug, Clone, PartialEq)]
pub enum LightVolume {
    Parallel(ParallelIsect),
    Sphere(SphereIsect),
    Cone(ConeIsect),
}

impl VolumeIsect for LightVolume {
    fn set_transform(&mut self, light_to_world: Mat4, world_to_light: Mat4) {
        match self {
            LightVolume::Parallel(v) => v.set_transform(light_to_world, world_to_light),
            LightVolume::Sphere(v) => v.set_transform(light_to_world, world_to_light),
            LightVolume::Cone(v) => v.set_transform(light_to_world, world_to_light),
        }
    }

    fn test(&self, bounds: &Bounds3) -> VolumeCull {
        match self {
            LightVolume::Parallel(v) => v.test(bounds),
            LightVolume::Sphere(v) => v.test(bounds),
            LightVolume::Cone(v) => v.test(bounds),
        }
    }
}

/// Per-light data uploaded to the light's uniform buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub ambient: [f32; 4],
    pub diffuse: [f32; 4],
    pub specular: [f32; 4],
    /// World position (xyz), radius (w).
    pub position: [f32; 4],
    /// World direction (xyz), kind (w).
    pub direction: [f32; 4],
    /// Constant, linear, quadratic and cutoff terms.
    pub attenuation: [f32; 4],
    /// Cosine of the inner and outer spot angles, then strength and padding.
    pub spot: [f32; 4],
}

pub struct LightInfo {
    key: LightKey,
    kind: LightKind,
    props: LightProps,

    ambient: Vec4,
    diffuse: Vec4,
    specular: Vec4,
    max_strength: f32,

    local_to_light: Mat4,
    light_to_local: Mat4,
    local_to_world: Mat4,
    world_to_local: Mat4,
    light_to_world: Mat4,
    world_to_light: Mat4,

    projected: bool,
    world_to_proj: Option<Mat4>,
    soft_volume: Option<Box<dyn SoftVolume + Send + Sync>>,
    volume: Option<LightVolume>,

    dirty: bool,
    device_dirty: DirtyFlag,
}

impl std::fmt::Debug for LightInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightInfo")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("props", &self.props)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl LightInfo {
    pub fn new(key: LightKey, kind: LightKind) -> Self {
        Self {
            key,
            kind,
            props: LightProps::empty(),
            ambient: Vec4::ZERO,
            diffuse: Vec4::ZERO,
            specular: Vec4::ZERO,
            max_strength: 0.0,
            local_to_light: Mat4::IDENTITY,
            light_to_local: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            world_to_local: Mat4::IDENTITY,
            light_to_world: Mat4::IDENTITY,
            world_to_light: Mat4::IDENTITY,
            projected: false,
            world_to_proj: None,
            soft_volume: None,
            volume: None,
            dirty: true,
            device_dirty: DirtyFlag::new(true),
        }
    }

    pub fn key(&self) -> LightKey {
        self.key
    }

    pub fn kind(&self) -> &LightKind {
        &self.kind
    }

    /// Flag shared with the light's device ref.
    pub fn device_flag(&self) -> DirtyFlag {
        self.device_dirty.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Marks the light for refresh and its device data stale.
    pub fn set_dirty(&mut self) {
        self.dirty = true;
        self.device_dirty.set();
    }

    pub fn property(&self, prop: LightProps) -> bool {
        self.props.contains(prop)
    }

    pub fn set_property(&mut self, prop: LightProps, on: bool) {
        self.props.set(prop, on);
    }

    pub fn props(&self) -> LightProps {
        self.props
    }

    /* Colour ************************************************************/

    pub fn ambient(&self) -> Vec4 {
        self.ambient
    }

    pub fn diffuse(&self) -> Vec4 {
        self.diffuse
    }

    pub fn specular(&self) -> Vec4 {
        self.specular
    }

    pub fn set_ambient(&mut self, c: Vec4) {
        self.ambient = c;
        self.set_dirty();
    }

    pub fn set_diffuse(&mut self, c: Vec4) {
        self.diffuse = c;
        self.set_dirty();
    }

    pub fn set_specular(&mut self, c: Vec4) {
        self.specular = c;
        let black = c.x == 0.0 && c.y == 0.0 && c.z == 0.0;
        self.set_property(LightProps::HAS_SPECULAR, !black);
        self.set_dirty();
    }

    pub fn max_strength(&self) -> f32 {
        self.max_strength
    }

    pub fn is_zero(&self) -> bool {
        self.property(LightProps::ZERO)
    }

    /// An idle light affects nothing.
    pub fn is_idle(&self) -> bool {
        self.is_zero() || self.property(LightProps::DISABLE)
    }

    fn check_max_strength(&mut self) {
        self.max_strength = self.diffuse.truncate().abs().max_element();
        self.set_property(LightProps::ZERO, self.max_strength < MIN_MAX_STRENGTH);
    }

    /* Shape *************************************************************/

    /// # Panics
    /// When the light is neither omni nor spot.
    pub fn set_attenuation(&mut self, atten: Attenuation) {
        match &mut self.kind {
            LightKind::Omni(a) | LightKind::Spot { attenuation: a, .. } => *a = atten,
            kind => panic!("{:?} light has no attenuation", kind),
        }
        self.set_dirty();
    }

    pub fn is_attenuated(&self) -> bool {
        self.kind
            .attenuation()
            .is_some_and(Attenuation::is_attenuated)
    }

    /// # Panics
    /// When the light is not a spot.
    pub fn set_spot_angles(&mut self, inner: f32, outer: f32) {
        match &mut self.kind {
            LightKind::Spot {
                inner: i, outer: o, ..
            } => {
                *i = inner;
                *o = outer;
            }
            kind => panic!("{:?} light has no cone", kind),
        }
        self.set_dirty();
    }

    /// # Panics
    /// When the light is not limited directional.
    pub fn set_extent(&mut self, width: f32, height: f32, depth: f32) {
        match &mut self.kind {
            LightKind::LimitedDirectional {
                width: w,
                height: h,
                depth: d,
            } => {
                *w = width;
                *h = height;
                *d = depth;
            }
            kind => panic!("{:?} light has no extent", kind),
        }
        self.set_dirty();
    }

    /// Distance at which an attenuated light has faded out, zero when it
    /// never does.
    pub fn radius(&self) -> f32 {
        let Some(a) = self.kind.attenuation() else {
            return 0.0;
        };
        let mult = self.diffuse.w.abs();
        if a.quadratic > 0.0 {
            let det = a.linear * a.linear
                - 4.0 * a.quadratic * a.constant * (1.0 - mult * FAR_POWER_KONST);
            if det > 0.0 {
                ((-a.linear + det.sqrt()) / (a.quadratic * 2.0)).max(0.0)
            } else {
                0.0
            }
        } else if a.linear > 0.0 {
            (mult * FAR_POWER_KONST - 1.0) * a.constant / a.linear
        } else if a.cutoff > 0.0 {
            a.cutoff
        } else {
            0.0
        }
    }

    pub fn set_soft_volume(&mut self, volume: Option<Box<dyn SoftVolume + Send + Sync>>) {
        self.soft_volume = volume;
        self.set_dirty();
    }

    /// Turns the projection matrix on or off. Projected lights keep
    /// [`LightInfo::world_to_proj`] current.
    pub fn set_projection(&mut self, on: bool) {
        self.projected = on;
        if !on {
            self.world_to_proj = None;
        }
        self.set_dirty();
    }

    pub fn world_to_proj(&self) -> Option<Mat4> {
        self.world_to_proj
    }

    /* Transforms ********************************************************/

    /// Offset of the light within its object.
    pub fn set_local_to_light(&mut self, local_to_light: Mat4, light_to_local: Mat4) {
        self.local_to_light = local_to_light;
        self.light_to_local = light_to_local;
    }

    pub fn set_transform(&mut self, local_to_world: Mat4, world_to_local: Mat4) {
        self.local_to_world = local_to_world;
        self.world_to_local = world_to_local;
        self.light_to_world = local_to_world * self.light_to_local;
        self.world_to_light = self.local_to_light * world_to_local;

        if let Some(volume) = &mut self.volume {
            volume.set_transform(self.light_to_world, self.world_to_light);
        }
        self.set_dirty();
        if self.projected {
            self.refresh();
        }
    }

    pub fn local_to_world(&self) -> Mat4 {
        self.local_to_world
    }

    pub fn world_to_local(&self) -> Mat4 {
        self.world_to_local
    }

    pub fn light_to_world(&self) -> Mat4 {
        self.light_to_world
    }

    pub fn world_to_light(&self) -> Mat4 {
        self.world_to_light
    }

    pub fn world_position(&self) -> Vec3 {
        self.light_to_world.w_axis.truncate()
    }

    /// Direction the light shines in, the light's -Z axis in world space.
    pub fn world_direction(&self) -> Vec3 {
        -self.light_to_world.z_axis.truncate()
    }

    /* Refresh ***********************************************************/

    /// Brings the volume, strength and projection up to date if anything
    /// changed since the last refresh.
    pub fn refresh(&mut self) {
        if self.dirty {
            self.refresh_now();
            self.dirty = false;
        }
    }

    fn refresh_now(&mut self) {
        self.check_max_strength();
        self.device_dirty.set();

        let (l2w, w2l) = (self.light_to_world, self.world_to_light);
        match self.kind {
            LightKind::Directional => self.volume = None,
            LightKind::LimitedDirectional {
                width,
                height,
                depth,
            } => {
                let mut planes = ParallelIsect::default();
                planes.set_num_planes(3);
                planes.set_plane(
                    0,
                    Vec3::new(-width * 0.5, 0.0, 0.0),
                    Vec3::new(width * 0.5, 0.0, 0.0),
                );
                planes.set_plane(
                    1,
                    Vec3::new(0.0, -height * 0.5, 0.0),
                    Vec3::new(0.0, height * 0.5, 0.0),
                );
                planes.set_plane(2, Vec3::ZERO, Vec3::new(0.0, 0.0, -depth));
                planes.set_transform(l2w, w2l);
                self.volume = Some(LightVolume::Parallel(planes));

                if self.projected {
                    let l2ndc = Mat4::from_cols_array_2d(&[
                        [1.0 / width, 0.0, 0.0, 0.5],
                        [0.0, -1.0 / height, 0.0, 0.5],
                        [0.0, 0.0, 1.0 / depth, 0.0],
                        [0.0, 0.0, 0.0, 1.0],
                    ])
                    .transpose();
                    self.world_to_proj = Some(l2ndc * w2l);
                }
            }
            LightKind::Omni(atten) => {
                if atten.is_attenuated() {
                    let mut sphere = SphereIsect::new(self.radius());
                    sphere.set_transform(l2w, w2l);
                    self.volume = Some(LightVolume::Sphere(sphere));
                } else {
                    self.volume = None;
                }
            }
            LightKind::Spot {
                attenuation, outer, ..
            } => {
                let mut cone = ConeIsect::default();
                cone.set_angle(outer);
                if attenuation.is_attenuated() {
                    cone.set_length(Some(self.radius()));
                }
                cone.set_transform(l2w, w2l);
                self.volume = Some(LightVolume::Cone(cone));

                if self.projected {
                    let mut yon = self.radius();
                    if yon < MIN_HITHER {
                        yon = MAX_YON;
                    }
                    let hither = MIN_HITHER.min(yon * 0.5);
                    let (sin, cos) = outer.sin_cos();
                    let cot = cos / sin;
                    let l2ndc = Mat4::from_cols_array_2d(&[
                        [cot * 0.5, 0.0, -0.5, 0.0],
                        [0.0, -cot * 0.5, -0.5, 0.0],
                        [0.0, 0.0, -yon / (yon - hither), 0.0],
                        [0.0, 0.0, -1.0, 0.0],
                    ])
                    .transpose();
                    self.world_to_proj = Some(l2ndc * w2l);
                }
            }
        }
    }

    /// Current volume, `None` for lights that reach everything.
    pub fn volume(&self) -> Option<&LightVolume> {
        self.volume.as_ref()
    }

    /* Queries ***********************************************************/

    /// Strength of the light on `bounds` and the soft-volume scale that
    /// went into it. Both are zero for idle lights.
    pub fn strength_and_scale(&self, bounds: &Bounds3) -> (f32, f32) {
        if self.is_idle() {
            return (0.0, 0.0);
        }

        let center = bounds.center();
        let scale = self
            .soft_volume
            .as_ref()
            .map_or(1.0, |v| v.strength(center));
        let mut strength = self.max_strength * scale;

        if let Some(atten) = self.kind.attenuation() {
            let dist = center.distance(self.world_position());
            strength = atten.apply(strength, dist);
        }

        if let LightKind::Spot { inner, outer, .. } = self.kind {
            let del = center - self.world_position();
            let len = del.length();
            let dot = if len > 0.0 {
                del.dot(self.world_direction()) / len
            } else {
                1.0
            };
            let (cos_inner, cos_outer) = (inner.cos(), outer.cos());
            if dot < cos_outer {
                strength = 0.0;
            } else if dot < cos_inner {
                strength *= (dot - cos_outer) / (cos_inner - cos_outer);
            }
        }

        (strength, scale)
    }

    pub fn affects_bound(&mut self, bounds: &Bounds3) -> bool {
        self.refresh();
        self.volume
            .as_ref()
            .map_or(true, |v| v.test(bounds) != VolumeCull::Culled)
    }

    fn lights_drawables(&self, charac: bool) -> bool {
        !self.property(LightProps::HAS_INCLUDES)
            || (self.property(LightProps::INCLUDES_CHARS) && charac)
    }

    /// Appends the leaves of `space` this light reaches. Idle lights and
    /// include-only lights reach nothing, unless `charac` is set and the
    /// light includes avatars.
    pub fn affected(&mut self, space: &dyn SpaceTree, out: &mut Vec<i16>, charac: bool) {
        self.refresh();
        if self.is_idle() || !self.lights_drawables(charac) {
            return;
        }
        match &self.volume {
            Some(v) => space.harvest_leaves(v, out),
            None => space.all_leaves(out),
        }
    }

    /// Narrows `vis_list` to the leaves this light reaches. Returns
    /// `vis_list` itself when the light reaches everything, otherwise `lit`
    /// filled with the result.
    pub fn affected_visible<'a>(
        &mut self,
        space: &dyn SpaceTree,
        vis_list: &'a [i16],
        lit: &'a mut Vec<i16>,
        charac: bool,
    ) -> &'a [i16] {
        self.refresh();
        lit.clear();
        if self.is_idle() || !self.lights_drawables(charac) {
            return lit;
        }
        match &self.volume {
            Some(v) => {
                space.harvest_enabled_leaves(v, vis_list, lit);
                lit
            }
            None => vis_list,
        }
    }

    /// [`LightInfo::affected`] ignoring idleness and includes.
    pub fn affected_forced(&mut self, space: &dyn SpaceTree, out: &mut Vec<i16>) {
        self.refresh();
        match &self.volume {
            Some(v) => space.harvest_leaves(v, out),
            None => space.all_leaves(out),
        }
    }

    /// Snapshot for the light's uniform buffer.
    pub fn uniform(&self) -> LightUniform {
        let (cos_inner, cos_outer) = match self.kind {
            LightKind::Spot { inner, outer, .. } => (inner.cos(), outer.cos()),
            _ => (1.0, 1.0),
        };
        let atten = self.kind.attenuation().copied().unwrap_or(Attenuation {
            constant: 1.0,
            linear: 0.0,
            quadratic: 0.0,
            cutoff: 0.0,
        });
        LightUniform {
            ambient: self.ambient.to_array(),
            diffuse: self.diffuse.to_array(),
            specular: self.specular.to_array(),
            position: self.world_position().extend(self.radius()).to_array(),
            direction: self
                .world_direction()
                .extend(self.kind.type_index() as f32)
                .to_array(),
            attenuation: [atten.constant, atten.linear, atten.quadratic, atten.cutoff],
            spot: [cos_inner, cos_outer, self.max_strength, 0.0],
        }
    }
}

/// Membership list of lights registered with a device.
#[derive(Debug, Clone, Default)]
pub struct LightList {
    keys: Vec<LightKey>,
}

impl LightList {
    /// # Panics
    /// When `key` is already linked.
    pub fn link(&mut self, key: LightKey) {
        assert!(
            !self.keys.contains(&key),
            "Trying to link a light that's already linked"
        );
        self.keys.push(key);
    }

    /// # Panics
    /// When `key` is not linked.
    pub fn unlink(&mut self, key: LightKey) {
        let pos = self
            .keys
            .iter()
            .position(|k| *k == key)
            .unwrap_or_else(|| panic!("Light {:?} not in list", key));
        self.keys.remove(pos);
    }

    pub fn contains(&self, key: LightKey) -> bool {
        self.keys.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LightKey> + '_ {
        self.keys.iter().copied()
    }
}
