// SPDX-License-Identifier: CEPL-1.0
use glam::{Mat4, Vec3};
use prism_render::{MeshData, PixelData, Vertex};

/// Unit cube centred on the origin, four vertices per face so normals stay flat.
pub fn cube() -> MeshData {
    // (normal, tangent u, tangent v)
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];
    let mut mesh = MeshData::default();
    for (n, u, v) in faces {
        let base = mesh.vertices.len() as u32;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let p = (n + u * su + v * sv) * 0.5;
            mesh.vertices.push(Vertex {
                position: p.to_array(),
                normal: n.to_array(),
                uv: [(su + 1.0) * 0.5, (1.0 - sv) * 0.5],
            });
        }
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    mesh
}

/// 8x8 two-tone checkerboard.
pub fn checker(a: [u8; 4], b: [u8; 4]) -> PixelData {
    let size = 8u32;
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            rgba.extend_from_slice(if (x + y) % 2 == 0 { &a } else { &b });
        }
    }
    PixelData {
        width: size,
        height: size,
        rgba,
    }
}

/// Right-handed perspective with Y flipped for Vulkan clip space.
pub fn projection(aspect: f32) -> Mat4 {
    let mut proj = Mat4::perspective_rh(60f32.to_radians(), aspect.max(1e-3), 0.1, 100.0);
    proj.y_axis.y *= -1.0;
    proj
}

pub struct OrbitCamera {
    pub distance: f32,
    pub height: f32,
    pub angle: f32,
}

impl OrbitCamera {
    pub fn eye(&self) -> Vec3 {
        Vec3::new(
            self.angle.cos() * self.distance,
            self.height,
            self.angle.sin() * self.distance,
        )
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), Vec3::ZERO, Vec3::Y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_faces_wind_counter_clockwise_outward() {
        let mesh = cube();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);
        for tri in mesh.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| {
                Vec3::from_array(mesh.vertices[i as usize].position)
            });
            let normal = Vec3::from_array(mesh.vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
        }
    }

    #[test]
    fn checker_is_well_formed() {
        assert!(checker([0; 4], [255; 4]).is_well_formed());
    }

    #[test]
    fn projection_flips_y() {
        let p = projection(1.0);
        assert!(p.y_axis.y < 0.0);
    }
}
