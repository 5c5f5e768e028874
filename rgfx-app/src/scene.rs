//! The demo scene: two spinning quads, one textured, one lit.

use std::sync::Arc;

use rgfx::{
    ash::vk,
    buffer::CreateBufferError,
    device::Device,
    pipeline::StandardVertex,
    renderer::{
        CameraUniforms, DrawItem, LightUniforms, MaterialUniforms, Mesh, ObjectUniforms, Renderer,
    },
    texture::{CreateTextureError, Texture, TextureData, TextureDesc},
};
use winit::window::Window;

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;

pub const LIGHT: LightUniforms = LightUniforms {
    direction: [0.0, 0.0, 1.0, 0.0],
    color: [1.0, 0.95, 0.9, 1.0],
};

/// Orthographic camera: y up, depth 0 at z = -1 and 1 at z = 1, wide
/// windows see more along x.
pub fn camera(extent: vk::Extent2D) -> CameraUniforms {
    let aspect = extent.width as f32 / extent.height.max(1) as f32;
    CameraUniforms {
        view_proj: [
            [1.0 / aspect, 0.0, 0.0, 0.0],
            [0.0, -1.0, 0.0, 0.0],
            [0.0, 0.0, 0.5, 0.0],
            [0.0, 0.0, 0.5, 1.0],
        ],
        position: [0.0, 0.0, -1.0, 1.0],
    }
}

/// Column-major rotation about z followed by a translation in xy.
fn spin(angle: f32, x: f32, y: f32) -> [[f32; 4]; 4] {
    let (sin, cos) = angle.sin_cos();
    [
        [cos, sin, 0.0, 0.0],
        [-sin, cos, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [x, y, 0.0, 1.0],
    ]
}

/// RGBA texels alternating white and grey every `cell` pixels.
fn checkerboard(size: u32, cell: u32) -> Vec<[u8; 4]> {
    (0..size * size)
        .map(|i| {
            let (x, y) = (i % size, i / size);
            if (x / cell + y / cell).is_multiple_of(2) {
                [255, 255, 255, 255]
            } else {
                [64, 64, 64, 255]
            }
        })
        .collect()
}

fn quad_vertices() -> [StandardVertex; 4] {
    let corner = |x: f32, y: f32, u: f32, v: f32| StandardVertex {
        position: [x, y, 0.0],
        normal: [0.0, 0.0, -1.0],
        uv: [u, v],
        tangent: [1.0, 0.0, 0.0],
    };
    [
        corner(-0.3, -0.3, 0.0, 1.0),
        corner(0.3, -0.3, 1.0, 1.0),
        corner(0.3, 0.3, 1.0, 0.0),
        corner(-0.3, 0.3, 0.0, 0.0),
    ]
}

#[derive(Debug)]
pub struct Scene {
    quad: Mesh,
    /// Needs the renderer's descriptor layout, so it lives and dies with it.
    checker: Option<Texture>,
}

impl Scene {
    pub fn new(device: &Arc<Device>) -> Result<Self, CreateBufferError> {
        let quad = Mesh::new(device, &quad_vertices(), &[0, 1, 2, 2, 3, 0], Some("quad"))?;
        Ok(Self {
            quad,
            checker: None,
        })
    }

    /// Create the textures sampled through `renderer`.
    pub fn attach(
        &mut self,
        device: &Arc<Device>,
        renderer: &Renderer<Window>,
    ) -> Result<(), CreateTextureError> {
        let texels = checkerboard(CHECKER_SIZE, CHECKER_CELL);
        let data = [TextureData {
            data: bytemuck::cast_slice(&texels),
            width: CHECKER_SIZE,
            height: CHECKER_SIZE,
        }];
        let desc = TextureDesc {
            data: &data,
            descriptor: Some(renderer.texture_descriptor()),
            ..TextureDesc::new(
                CHECKER_SIZE,
                CHECKER_SIZE,
                vk::Format::R8G8B8A8_UNORM,
                vk::ImageUsageFlags::SAMPLED,
            )
        };
        self.checker = Some(Texture::new(device, &desc, Some("checkerboard"))?);
        Ok(())
    }

    pub fn detach(&mut self) {
        self.checker = None;
    }

    pub fn draws(&self, seconds: f32) -> Vec<DrawItem<'_>> {
        vec![
            DrawItem {
                mesh: &self.quad,
                object: ObjectUniforms {
                    model: spin(seconds, -0.5, 0.0),
                },
                material: MaterialUniforms {
                    base_color: [1.0, 1.0, 1.0, 1.0],
                },
                diffuse: self.checker.as_ref(),
                lit: false,
            },
            DrawItem {
                mesh: &self.quad,
                object: ObjectUniforms {
                    model: spin(-seconds, 0.5, 0.0),
                },
                material: MaterialUniforms {
                    base_color: [0.2, 0.6, 1.0, 1.0],
                },
                diffuse: None,
                lit: true,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkerboard_alternates_by_cell() {
        let texels = checkerboard(16, 4);
        assert_eq!(texels.len(), 256);
        assert_eq!(texels[0], [255, 255, 255, 255]);
        assert_eq!(texels[4], [64, 64, 64, 255]);
        assert_eq!(texels[4 * 16], [64, 64, 64, 255]);
        assert_eq!(texels[4 * 16 + 4], [255, 255, 255, 255]);
    }

    #[test]
    fn camera_scales_x_by_aspect() {
        let wide = camera(vk::Extent2D {
            width: 1600,
            height: 800,
        });
        assert_eq!(wide.view_proj[0][0], 0.5);
        assert_eq!(wide.view_proj[1][1], -1.0);
    }

    #[test]
    fn spin_keeps_translation_in_last_column() {
        let m = spin(std::f32::consts::FRAC_PI_2, 0.5, -0.25);
        assert_eq!(m[3], [0.5, -0.25, 0.0, 1.0]);
        assert!((m[0][1] - 1.0).abs() < 1e-6);
    }
}
