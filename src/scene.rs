// Scene objects - flat vertex/index data with a world transform
//
// Transforms are applied on the CPU before upload; the renderer only ever
// sees finished vertex data.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};

/// Interleaved vertex as it lands in the vertex buffer.
///
/// `texcoord` is (u, v, texture array layer).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 4],
    pub color: [f32; 4],
    pub texcoord: [f32; 3],
}

/// Accumulated translation/rotation/scaling state.
///
/// Rotations are yaw/pitch/roll in degrees about the current local axes.
#[derive(Debug, Clone)]
pub struct Transform {
    translation: Mat4,
    rotation: Mat4,
    scaling: Mat4,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Mat4::IDENTITY,
            rotation: Mat4::IDENTITY,
            scaling: Mat4::IDENTITY,
        }
    }
}

impl Transform {
    pub fn set_position(&mut self, xyz: Vec3) {
        self.translation = Mat4::from_translation(xyz);
    }

    pub fn set_scale(&mut self, xyz: Vec3) {
        self.scaling = Mat4::from_scale(xyz);
    }

    pub fn translate(&mut self, xyz: Vec3) {
        self.translation *= Mat4::from_translation(xyz);
    }

    pub fn rotate(&mut self, ypr: Vec3) {
        self.rotation = self.local_rotation(ypr) * self.rotation;
    }

    pub fn scale(&mut self, xyz: Vec3) {
        self.scaling *= Mat4::from_scale(xyz);
    }

    /// World matrix, composed translate * rotate * scale.
    pub fn matrix(&self) -> Mat4 {
        self.translation * self.rotation * self.scaling
    }

    // Yaw about the local Y axis, pitch about local X, roll about local Z.
    fn local_rotation(&self, ypr: Vec3) -> Mat4 {
        let axes = glam::Mat3::from_mat4(self.rotation);
        let yaw = Mat4::from_axis_angle(axes.y_axis, ypr.x.to_radians());
        let pitch = Mat4::from_axis_angle(axes.x_axis, ypr.y.to_radians());
        let roll = Mat4::from_axis_angle(axes.z_axis, ypr.z.to_radians());
        yaw * pitch * roll
    }
}

/// A drawable: vertex/index data plus its transform.
///
/// `apply_transform` caches the transformed vertices; `add` consumes the
/// cache, so call it after every transform change.
#[derive(Debug, Default, Clone)]
pub struct Object {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub transform: Transform,
    transformed: Vec<Vertex>,
}

impl Object {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            transform: Transform::default(),
            transformed: Vec::new(),
        }
    }

    /// Unit quad centered at the origin, textured with the given array layer.
    pub fn textured_quad(layer: u32) -> Self {
        let white = [1.0, 1.0, 1.0, 1.0];
        let layer = layer as f32;
        let vertices = vec![
            Vertex {
                position: [0.5, 0.5, 0.0, 1.0],
                color: white,
                texcoord: [1.0, 1.0, layer],
            },
            Vertex {
                position: [-0.5, 0.5, 0.0, 1.0],
                color: white,
                texcoord: [0.0, 1.0, layer],
            },
            Vertex {
                position: [-0.5, -0.5, 0.0, 1.0],
                color: white,
                texcoord: [0.0, 0.0, layer],
            },
            Vertex {
                position: [0.5, -0.5, 0.0, 1.0],
                color: white,
                texcoord: [1.0, 0.0, layer],
            },
        ];
        let indices = vec![0, 1, 2, 2, 3, 0];
        Self::new(vertices, indices)
    }

    /// Bake the current transform into the vertex cache.
    pub fn apply_transform(&mut self) {
        let matrix = self.transform.matrix();
        if self.transformed.len() != self.vertices.len() {
            self.transformed = self.vertices.clone();
        }
        for (out, src) in self.transformed.iter_mut().zip(&self.vertices) {
            let pos = matrix * Vec4::from_array(src.position);
            out.position = pos.to_array();
            out.color = src.color;
            out.texcoord = src.texcoord;
        }
    }

    /// Vertices as staged for upload; untransformed data if the transform
    /// was never applied.
    pub fn transformed_data(&self) -> &[Vertex] {
        if self.transformed.is_empty() {
            &self.vertices
        } else {
            &self.transformed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_transform_is_bit_exact() {
        let mut quad = Object::textured_quad(0);
        let before: Vec<[f32; 4]> = quad.vertices.iter().map(|v| v.position).collect();
        quad.apply_transform();
        let after: Vec<[f32; 4]> = quad.transformed_data().iter().map(|v| v.position).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn compose_translate_after_scale() {
        // translate * rotate * scale: scaling happens first, translation last
        let mut quad = Object::textured_quad(0);
        quad.transform.translate(Vec3::new(1.0, 0.0, 0.0));
        quad.transform.scale(Vec3::new(2.0, 2.0, 1.0));
        quad.apply_transform();
        let corner = quad.transformed_data()[0].position;
        assert_eq!(corner, [2.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn untransformed_object_exposes_source_vertices() {
        let quad = Object::textured_quad(1);
        assert_eq!(quad.transformed_data(), quad.vertices.as_slice());
    }

    #[test]
    fn quad_has_four_vertices_six_indices() {
        let quad = Object::textured_quad(0);
        assert_eq!(quad.vertices.len(), 4);
        assert_eq!(quad.indices.len(), 6);
        assert!(quad.indices.iter().all(|&i| i < 4));
    }

    #[test]
    fn rotation_preserves_vertex_count_and_w() {
        let mut quad = Object::textured_quad(0);
        quad.transform.rotate(Vec3::new(90.0, 0.0, 0.0));
        quad.apply_transform();
        assert_eq!(quad.transformed_data().len(), 4);
        for v in quad.transformed_data() {
            assert!((v.position[3] - 1.0).abs() < f32::EPSILON);
        }
    }
}
