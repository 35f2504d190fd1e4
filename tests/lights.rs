mod common;

use common::*;
use gfxdev::gpu::null::NullBackend;
use gfxdev::light::*;
use gfxdev::*;
use glam::{Mat4, Vec3, Vec4};

fn pipeline() -> Pipeline<NullBackend> {
    init_logging();
    let mut pipe = Pipeline::new(NullBackend::new());
    assert!(pipe.init(ContextInfo::default()), "{}", pipe.error_string());
    pipe
}

/// Nine unit boxes every ten units along +X.
fn row() -> LeafTree {
    LeafTree::new(
        (0..9)
            .map(|i| Bounds3::from_center(Vec3::new(i as f32 * 10.0, 0.0, 0.0), Vec3::ONE))
            .collect(),
    )
}

/// White omni light at x = 40 fading out at radius 14.
fn omni_at_40(key: u32) -> LightInfo {
    let mut light = LightInfo::new(
        LightKey(key),
        LightKind::Omni(Attenuation {
            constant: 1.0,
            linear: 1.0,
            quadratic: 0.0,
            cutoff: 0.0,
        }),
    );
    light.set_diffuse(Vec4::ONE);
    let l2w = Mat4::from_translation(Vec3::new(40.0, 0.0, 0.0));
    light.set_transform(l2w, l2w.inverse());
    light
}

#[test]
fn light_uniform_rebuilds_only_when_the_light_changes() {
    let mut pipe = pipeline();
    let mut light = omni_at_40(1);
    pipe.register_light(&light);
    assert!(pipe.lights().contains(light.key()));

    assert!(pipe.check_light_ref(&mut light).is_some());
    assert!(pipe.check_light_ref(&mut light).is_some());
    assert_eq!(pipe.device().backend().stats.buffers_created, 1);

    light.set_diffuse(Vec4::new(0.5, 0.5, 0.5, 1.0));
    assert!(pipe.check_light_ref(&mut light).is_some());
    assert_eq!(pipe.device().backend().stats.buffers_created, 2);
    assert_eq!(pipe.device().backend().live.buffers, 1);

    pipe.unregister_light(light.key());
    assert!(pipe.lights().is_empty());
    assert_eq!(pipe.device().backend().live.buffers, 0);
    assert!(pipe.check_light_ref(&mut light).is_none());
}

#[test]
#[should_panic(expected = "already linked")]
fn registering_a_light_twice_panics() {
    let mut pipe = pipeline();
    let light = omni_at_40(2);
    pipe.register_light(&light);
    pipe.register_light(&light);
}

#[test]
fn omni_reaches_leaves_inside_its_radius() {
    let mut light = omni_at_40(3);
    assert_eq!(light.radius(), 14.0);

    let tree = row();
    let mut out = Vec::new();
    light.affected(&tree, &mut out, false);
    out.sort();
    assert_eq!(out, vec![3, 4, 5]);

    let visible = [0, 3, 5, 8];
    let mut lit = Vec::new();
    let reached = light.affected_visible(&tree, &visible, &mut lit, false);
    assert_eq!(reached, &[3, 5]);
}

#[test]
fn directional_light_reaches_everything_visible() {
    let mut light = LightInfo::new(LightKey(4), LightKind::Directional);
    light.set_diffuse(Vec4::ONE);

    let tree = row();
    let mut out = Vec::new();
    light.affected(&tree, &mut out, false);
    assert_eq!(out.len(), 9);

    let visible = [1, 2];
    let mut lit = Vec::new();
    assert_eq!(light.affected_visible(&tree, &visible, &mut lit, false), &[1, 2]);
}

#[test]
fn idle_lights_reach_nothing_unless_forced() {
    let tree = row();
    let mut light = omni_at_40(5);
    light.set_property(LightProps::DISABLE, true);

    let mut out = Vec::new();
    light.affected(&tree, &mut out, false);
    assert!(out.is_empty());

    light.affected_forced(&tree, &mut out);
    out.sort();
    assert_eq!(out, vec![3, 4, 5]);

    let mut dark = omni_at_40(6);
    dark.set_diffuse(Vec4::ZERO);
    let mut lit = Vec::new();
    assert!(dark.affected_visible(&tree, &[4], &mut lit, false).is_empty());
    assert!(dark.is_zero());
}

#[test]
fn include_only_lights_respect_avatars() {
    let tree = row();
    let mut light = omni_at_40(7);
    light.set_property(LightProps::HAS_INCLUDES, true);

    let mut out = Vec::new();
    light.affected(&tree, &mut out, true);
    assert!(out.is_empty());

    light.set_property(LightProps::INCLUDES_CHARS, true);
    light.affected(&tree, &mut out, false);
    assert!(out.is_empty());
    light.affected(&tree, &mut out, true);
    assert_eq!(out.len(), 3);
}

#[test]
fn moving_a_light_moves_its_volume() {
    let tree = row();
    let mut light = omni_at_40(8);
    let l2w = Mat4::from_translation(Vec3::new(80.0, 0.0, 0.0));
    light.set_transform(l2w, l2w.inverse());

    let mut out = Vec::new();
    light.affected(&tree, &mut out, false);
    out.sort();
    assert_eq!(out, vec![7, 8]);
    assert!(!light.affects_bound(&Bounds3::from_center(Vec3::ZERO, Vec3::ONE)));
}
