use glam::{DMat3, DQuat, DVec3};

/// Tolerance on `|q|^2 - 1` for a rotation to count as normalized.
const NORMALIZED_TOLERANCE: f64 = 0.01;

/// Scale, then rotate, then translate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: DVec3,
    pub rotation: DQuat,
    pub scale: DVec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: DVec3::ZERO,
        rotation: DQuat::IDENTITY,
        scale: DVec3::ONE,
    };

    pub fn new(translation: DVec3, rotation: DQuat, scale: DVec3) -> Self {
        Self {
            translation,
            rotation,
            scale,
        }
    }

    pub fn from_translation(translation: DVec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.translation + self.rotation * (self.scale * point)
    }

    #[inline]
    pub fn transform_vector(&self, vector: DVec3) -> DVec3 {
        self.rotation * (self.scale * vector)
    }

    /// `self` applied after `child`: maps child-local space into `self`'s parent.
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform {
            translation: self.transform_point(child.translation),
            rotation: self.rotation * child.rotation,
            scale: self.scale * child.scale,
        }
    }

    /// Expresses `self` (world space) in the local space of `parent`, so that
    /// `parent.compose(&self.relative_to(parent)) == self`.
    pub fn relative_to(&self, parent: &Transform) -> Transform {
        let inv_rotation = parent.rotation.inverse();
        let inv_scale = safe_recip(parent.scale);
        Transform {
            translation: inv_scale * (inv_rotation * (self.translation - parent.translation)),
            rotation: inv_rotation * self.rotation,
            scale: self.scale * inv_scale,
        }
    }

    /// The rotation's local +Z axis in parent space.
    #[inline]
    pub fn up(&self) -> DVec3 {
        self.rotation * DVec3::Z
    }

    #[inline]
    pub fn is_rotation_normalized(&self) -> bool {
        let len2 = self.rotation.length_squared();
        len2.is_finite() && (len2 - 1.0).abs() <= NORMALIZED_TOLERANCE
    }
}

/// Rotation whose local +Z points along `normal`.
pub fn rotation_from_z(normal: DVec3) -> DQuat {
    DQuat::from_rotation_arc(DVec3::Z, normal.normalize())
}

/// Rotation whose local axes are the columns of an east-north-up frame.
pub fn rotation_from_frame(frame: DMat3) -> DQuat {
    DQuat::from_mat3(&frame).normalize()
}

fn safe_recip(v: DVec3) -> DVec3 {
    let recip = |c: f64| if c.abs() > f64::EPSILON { c.recip() } else { 0.0 };
    DVec3::new(recip(v.x), recip(v.y), recip(v.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn approx(a: DVec3, b: DVec3) -> bool {
        (a - b).length() < 1e-9
    }

    #[test]
    fn relative_then_compose_is_identity() {
        let parent = Transform::new(
            DVec3::new(100.0, -50.0, 20.0),
            DQuat::from_rotation_z(0.7) * DQuat::from_rotation_x(0.2),
            DVec3::splat(2.0),
        );
        let world = Transform::new(
            DVec3::new(130.0, -10.0, 25.0),
            DQuat::from_rotation_y(1.1),
            DVec3::new(2.0, 4.0, 6.0),
        );

        let rel = world.relative_to(&parent);
        let back = parent.compose(&rel);
        assert!(approx(back.translation, world.translation));
        assert!(back.rotation.abs_diff_eq(world.rotation, 1e-9));
        assert!(approx(back.scale, world.scale));
    }

    #[test]
    fn up_follows_rotation() {
        let t = Transform::new(DVec3::ZERO, DQuat::from_rotation_x(FRAC_PI_2), DVec3::ONE);
        assert!(approx(t.up(), DVec3::new(0.0, -1.0, 0.0)));
        assert!(approx(rotation_from_z(DVec3::new(0.0, 0.0, 5.0)) * DVec3::Z, DVec3::Z));
    }

    #[test]
    fn normalization_check() {
        let mut t = Transform::IDENTITY;
        assert!(t.is_rotation_normalized());
        t.rotation = DQuat::from_xyzw(0.0, 0.0, 0.0, 1.2);
        assert!(!t.is_rotation_normalized());
        t.rotation = DQuat::from_xyzw(f64::NAN, 0.0, 0.0, 1.0);
        assert!(!t.is_rotation_normalized());
    }

    #[test]
    fn frame_rotation_maps_axes() {
        let frame = DMat3::from_cols(DVec3::Y, -DVec3::X, DVec3::Z);
        let q = rotation_from_frame(frame);
        assert!(approx(q * DVec3::X, DVec3::Y));
        assert!(approx(q * DVec3::Z, DVec3::Z));
    }
}
