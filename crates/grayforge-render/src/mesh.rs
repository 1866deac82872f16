//! Wavefront OBJ meshes and their GPU buffers.

use crate::error::{RenderError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use grayforge_gpu::{GpuBuffer, RenderScope};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::BufRead;
use std::path::Path;

/// Mesh vertex as laid out in the vertex buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
    /// Index of the OBJ object the vertex came from.
    pub mesh_index: u32,
}

impl Vertex {
    fn bits(&self) -> [u32; 9] {
        let [px, py, pz] = self.position.map(f32::to_bits);
        let [nx, ny, nz] = self.normal.map(f32::to_bits);
        let [u, v] = self.uv.map(f32::to_bits);
        [px, py, pz, nx, ny, nz, u, v, self.mesh_index]
    }

    pub fn binding_description() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(std::mem::size_of::<Self>() as u32)
            .input_rate(vk::VertexInputRate::VERTEX)
    }

    pub fn attribute_descriptions() -> [vk::VertexInputAttributeDescription; 4] {
        let attribute = |location: u32, format: vk::Format, offset: usize| {
            vk::VertexInputAttributeDescription::default()
                .binding(0)
                .location(location)
                .format(format)
                .offset(offset as u32)
        };
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, position)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, std::mem::offset_of!(Self, normal)),
            attribute(2, vk::Format::R32G32_SFLOAT, std::mem::offset_of!(Self, uv)),
            attribute(3, vk::Format::R32_UINT, std::mem::offset_of!(Self, mesh_index)),
        ]
    }
}

// Bitwise equality so vertices can key a hash map.
impl PartialEq for Vertex {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Vertex {}

impl Hash for Vertex {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// De-duplicated vertices and triangle-list indices on the CPU.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Load an OBJ file. Material libraries are ignored.
    pub fn from_obj_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| RenderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let data = Self::from_obj_reader(std::io::BufReader::new(file))?;
        tracing::info!(
            "Loaded {}: {} vertices, {} indices",
            path.display(),
            data.vertices.len(),
            data.indices.len()
        );
        Ok(data)
    }

    /// Parse OBJ text.
    pub fn from_obj_reader(mut reader: impl BufRead) -> Result<Self> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        };
        let (models, _materials) =
            tobj::load_obj_buf(&mut reader, &options, |_| Err(tobj::LoadError::OpenFileFailed))?;
        Self::from_models(&models)
    }

    /// Merge every model into one indexed mesh.
    ///
    /// Y of positions and normals is negated to match Vulkan's Y-down clip
    /// space, V is flipped so that image row 0 is the top of the texture.
    pub fn from_models(models: &[tobj::Model]) -> Result<Self> {
        let mut data = Self::default();
        let mut unique: HashMap<Vertex, u32> = HashMap::new();

        for (mesh_index, model) in models.iter().enumerate() {
            let mesh = &model.mesh;
            for &index in &mesh.indices {
                let i = index as usize;
                let vertex = Vertex {
                    position: [
                        mesh.positions[3 * i],
                        -mesh.positions[3 * i + 1],
                        mesh.positions[3 * i + 2],
                    ],
                    normal: if mesh.normals.len() >= 3 * (i + 1) {
                        [
                            mesh.normals[3 * i],
                            -mesh.normals[3 * i + 1],
                            mesh.normals[3 * i + 2],
                        ]
                    } else {
                        [0.0; 3]
                    },
                    uv: if mesh.texcoords.len() >= 2 * (i + 1) {
                        [mesh.texcoords[2 * i], 1.0 - mesh.texcoords[2 * i + 1]]
                    } else {
                        [0.0; 2]
                    },
                    mesh_index: mesh_index as u32,
                };

                let next = data.vertices.len() as u32;
                let id = *unique.entry(vertex).or_insert_with(|| {
                    data.vertices.push(vertex);
                    next
                });
                data.indices.push(id);
            }
        }

        if data.indices.is_empty() {
            return Err(RenderError::EmptyMesh);
        }
        Ok(data)
    }
}

/// Mesh uploaded to host-visible vertex and index buffers.
pub struct Mesh {
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn upload(scope: &RenderScope, data: &MeshData) -> Result<Self> {
        if data.indices.is_empty() {
            return Err(RenderError::EmptyMesh);
        }
        let mut allocator = scope.allocator()?.lock();

        let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
        let mut vertex_buffer = allocator.create_buffer(
            vertex_bytes.len() as u64,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            "mesh_vertices",
        )?;

        let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
        let uploaded = vertex_buffer.write_bytes(0, vertex_bytes).and_then(|()| {
            allocator.create_buffer(
                index_bytes.len() as u64,
                vk::BufferUsageFlags::INDEX_BUFFER,
                MemoryLocation::CpuToGpu,
                "mesh_indices",
            )
        });

        let mut index_buffer = match uploaded {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.free_buffer(&mut vertex_buffer)?;
                return Err(e.into());
            }
        };

        if let Err(e) = index_buffer.write_bytes(0, index_bytes) {
            allocator.free_buffer(&mut index_buffer)?;
            allocator.free_buffer(&mut vertex_buffer)?;
            return Err(e.into());
        }

        tracing::debug!(
            "Mesh uploaded: {} vertices, {} indices",
            data.vertices.len(),
            data.indices.len()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Bind the buffers and draw every index.
    ///
    /// # Safety
    /// The device and command buffer must be valid and recording inside a
    /// render pass with a compatible pipeline bound.
    pub unsafe fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);
        device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
        device.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
    }

    /// Free both buffers.
    ///
    /// # Safety
    /// The buffers must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, scope: &RenderScope) -> Result<()> {
        let mut allocator = scope.allocator()?.lock();
        allocator.free_buffer(&mut self.index_buffer)?;
        allocator.free_buffer(&mut self.vertex_buffer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUAD: &str = "\
o quad
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
vn 0.0 0.0 1.0
f 1/1/1 2/2/1 3/3/1 4/4/1
";

    #[test]
    fn quad_is_triangulated_and_deduplicated() {
        let data = MeshData::from_obj_reader(QUAD.as_bytes()).unwrap();
        assert_eq!(data.indices.len(), 6);
        assert_eq!(data.vertices.len(), 4);
        assert!(data.indices.iter().all(|&i| (i as usize) < data.vertices.len()));
    }

    #[test]
    fn y_and_v_are_flipped() {
        let data = MeshData::from_obj_reader(QUAD.as_bytes()).unwrap();
        let top = data
            .vertices
            .iter()
            .find(|v| v.position[0] == 0.0 && v.position[1] != 0.0)
            .unwrap();
        assert_eq!(top.position[1], -1.0);
        assert_eq!(top.uv, [0.0, 0.0]);
        assert_eq!(top.normal, [0.0, -0.0, 1.0]);
    }

    #[test]
    fn objects_keep_their_index() {
        let two = format!("{QUAD}o other\nf 1/1/1 2/2/1 3/3/1\n");
        let data = MeshData::from_obj_reader(two.as_bytes()).unwrap();
        assert_eq!(data.indices.len(), 9);
        // Same positions in another object are distinct vertices.
        assert_eq!(data.vertices.len(), 7);
        assert_eq!(data.vertices[data.indices[8] as usize].mesh_index, 1);
    }

    #[test]
    fn empty_obj_rejected() {
        let result = MeshData::from_obj_reader("# nothing here\n".as_bytes());
        assert!(matches!(result, Err(RenderError::EmptyMesh)));
    }

    #[test]
    fn vertex_hash_is_bitwise() {
        let a = Vertex {
            position: [0.0, 1.0, 2.0],
            ..Default::default()
        };
        let mut b = a;
        assert_eq!(a, b);
        b.position[0] = -0.0;
        assert_ne!(a, b);
    }

    #[test]
    fn attributes_cover_vertex() {
        let attributes = Vertex::attribute_descriptions();
        assert_eq!(Vertex::binding_description().stride, 36);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(attributes[3].offset, 32);
    }
}
