use super::vertex::{v, Vertex};
use glam::Vec3;

/// Unit cube centred on the origin, four vertices per face, counter-clockwise
/// when seen from outside.
pub fn cube_mesh() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, tangent); bitangent = normal x tangent
    let faces = [
        (Vec3::X, Vec3::Z),
        (Vec3::NEG_X, Vec3::NEG_Z),
        (Vec3::Y, Vec3::X),
        (Vec3::NEG_Y, Vec3::X),
        (Vec3::Z, Vec3::NEG_X),
        (Vec3::NEG_Z, Vec3::X),
    ];

    let mut verts = Vec::with_capacity(24);
    for (normal, tangent) in faces {
        let bitangent = normal.cross(tangent);
        let centre = normal * 0.5;
        let corners = [
            (centre - tangent * 0.5 - bitangent * 0.5, [0.0, 1.0]),
            (centre + tangent * 0.5 - bitangent * 0.5, [1.0, 1.0]),
            (centre + tangent * 0.5 + bitangent * 0.5, [1.0, 0.0]),
            (centre - tangent * 0.5 + bitangent * 0.5, [0.0, 0.0]),
        ];
        for (pos, uv) in corners {
            verts.push(v(pos.to_array(), normal.to_array(), uv));
        }
    }

    (verts, quad_indices(6))
}

/// Flat square on the XZ plane facing +Y.
pub fn plane_mesh(size: f32) -> (Vec<Vertex>, Vec<u32>) {
    let h = size * 0.5;
    let n = [0.0, 1.0, 0.0];
    let verts = vec![
        v([-h, 0.0, h], n, [0.0, 1.0]),
        v([h, 0.0, h], n, [1.0, 1.0]),
        v([h, 0.0, -h], n, [1.0, 0.0]),
        v([-h, 0.0, -h], n, [0.0, 0.0]),
    ];
    (verts, quad_indices(1))
}

fn quad_indices(quads: u32) -> Vec<u32> {
    (0..quads)
        .flat_map(|q| {
            let o = q * 4;
            [o, o + 1, o + 2, o, o + 2, o + 3]
        })
        .collect()
}
