/// Vertex of the per-tile grid mesh. Position doubles as texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    pub uv: [f32; 2],
}

/// Regular `n×n` vertex grid over the unit square, two triangles per cell.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMesh {
    resolution: u32,
    vertices: Vec<MeshVertex>,
    indices: Vec<u32>,
}

impl TileMesh {
    pub const MIN_RESOLUTION: u32 = 2;
    pub const MAX_RESOLUTION: u32 = 256;

    pub fn grid(resolution: u32) -> Self {
        let n = resolution.clamp(Self::MIN_RESOLUTION, Self::MAX_RESOLUTION);
        let step = 1.0 / (n - 1) as f32;

        let mut vertices = Vec::with_capacity((n * n) as usize);
        for row in 0..n {
            for col in 0..n {
                vertices.push(MeshVertex {
                    uv: [col as f32 * step, row as f32 * step],
                });
            }
        }

        let cells = n - 1;
        let mut indices = Vec::with_capacity((cells * cells * 6) as usize);
        for row in 0..cells {
            for col in 0..cells {
                let tl = row * n + col;
                let tr = tl + 1;
                let bl = tl + n;
                let br = bl + 1;
                indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            }
        }

        Self {
            resolution: n,
            vertices,
            indices,
        }
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn vertices(&self) -> &[MeshVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_counts() {
        let mesh = TileMesh::grid(4);
        assert_eq!(mesh.vertices().len(), 16);
        assert_eq!(mesh.triangle_count(), 2 * 3 * 3);
        assert_eq!(mesh.vertices()[15].uv, [1.0, 1.0]);
        assert!(mesh.indices().iter().all(|&i| i < 16));
    }

    #[test]
    fn resolution_is_clamped() {
        assert_eq!(TileMesh::grid(0).resolution(), 2);
        assert_eq!(TileMesh::grid(1_000).resolution(), 256);
        assert_eq!(TileMesh::grid(0).triangle_count(), 2);
    }
}
