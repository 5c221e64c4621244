//! # Meshes and Models
//!
//! A [`Mesh`] is immutable vertex data plus an index sequence description.
//! Meshes compare and hash by content, which lets the mesh pool upload two
//! identical meshes once. A [`Model`] groups meshes with their materials and is
//! the unit instancers are created for.

mod index;
mod pool;

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

pub use index::{IndexBufferCache, IndexSequence};
pub use pool::{MeshHandle, MeshPool, PooledMesh};

use crate::material::Material;

/// Standard block vertex.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct BlockVertex {
    /// Position in model space.
    pub position: [f32; 3],
    /// RGBA color.
    pub color: [u8; 4],
    /// Texture coordinates.
    pub uv: [f32; 2],
    /// Block and sky light.
    pub light: [u16; 2],
    /// Packed normal, w unused.
    pub normal: [i8; 4],
}

impl BlockVertex {
    /// Vertex attributes for the shader.
    pub const ATTRIBS: [wgpu::VertexAttribute; 5] = wgpu::vertex_attr_array![
        0 => Float32x3, // position
        1 => Unorm8x4,  // color
        2 => Float32x2, // uv
        3 => Uint16x2,  // light
        4 => Snorm8x4,  // normal
    ];

    /// Layout of the shared mesh vertex buffer.
    pub const LAYOUT: VertexLayout = VertexLayout {
        stride: std::mem::size_of::<Self>() as u64,
        attributes: &Self::ATTRIBS,
    };

    /// Vertex buffer layout descriptor
    #[must_use]
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        Self::LAYOUT.desc()
    }
}

/// Stride and attributes of a mesh vertex format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexLayout {
    /// Bytes per vertex.
    pub stride: u64,
    /// Attributes, by shader location.
    pub attributes: &'static [wgpu::VertexAttribute],
}

impl VertexLayout {
    /// Vertex buffer layout descriptor
    #[must_use]
    pub fn desc(&self) -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: self.attributes,
        }
    }

    /// Returns the number of attribute slots the layout occupies.
    #[must_use]
    pub fn attribute_count(&self) -> u32 {
        u32::try_from(self.attributes.len()).unwrap_or(u32::MAX)
    }
}

/// Immutable mesh data.
#[derive(Debug, Clone)]
pub struct Mesh {
    vertex_data: Vec<u8>,
    vertex_count: u32,
    index_sequence: IndexSequence,
    index_count: u32,
}

impl Mesh {
    /// Creates a quad mesh from block vertices, four per quad.
    #[must_use]
    pub fn quads(vertices: &[BlockVertex]) -> Self {
        let vertex_count = u32::try_from(vertices.len()).unwrap_or(u32::MAX);
        Self {
            vertex_data: bytemuck::cast_slice(vertices).to_vec(),
            vertex_count,
            index_sequence: IndexSequence::Quads,
            index_count: vertex_count / 4 * 6,
        }
    }

    /// Creates a mesh from raw vertex bytes in the pool's vertex layout.
    #[must_use]
    pub fn from_raw(
        vertex_data: Vec<u8>,
        vertex_count: u32,
        index_sequence: IndexSequence,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_data,
            vertex_count,
            index_sequence,
            index_count,
        }
    }

    /// Returns the vertex bytes.
    #[inline]
    #[must_use]
    pub fn vertex_data(&self) -> &[u8] {
        &self.vertex_data
    }

    /// Returns the vertex count.
    #[inline]
    #[must_use]
    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Returns how indices are generated.
    #[inline]
    #[must_use]
    pub const fn index_sequence(&self) -> IndexSequence {
        self.index_sequence
    }

    /// Returns the number of indices drawn.
    #[inline]
    #[must_use]
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Returns true if the mesh draws nothing.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.vertex_count == 0 || self.index_count == 0
    }
}

impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        self.vertex_count == other.vertex_count
            && self.index_count == other.index_count
            && self.index_sequence == other.index_sequence
            && self.vertex_data == other.vertex_data
    }
}

impl Eq for Mesh {}

impl Hash for Mesh {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vertex_count.hash(state);
        self.index_count.hash(state);
        self.index_sequence.hash(state);
        self.vertex_data.hash(state);
    }
}

/// Identity of a model, unique for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

/// A mesh paired with the material it is drawn with.
#[derive(Debug, Clone)]
pub struct ModelMesh {
    /// Geometry.
    pub mesh: Arc<Mesh>,
    /// Render state.
    pub material: Material,
}

/// A renderable model: one or more meshes with materials.
#[derive(Debug)]
pub struct Model {
    id: ModelId,
    meshes: Vec<ModelMesh>,
}

impl Model {
    /// Creates a model with a fresh id.
    #[must_use]
    pub fn new(meshes: Vec<ModelMesh>) -> Arc<Self> {
        Arc::new(Self {
            id: ModelId(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed)),
            meshes,
        })
    }

    /// Creates a single-mesh model.
    #[must_use]
    pub fn single(mesh: Mesh, material: Material) -> Arc<Self> {
        Self::new(vec![ModelMesh {
            mesh: Arc::new(mesh),
            material,
        }])
    }

    /// Returns the model's id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ModelId {
        self.id
    }

    /// Returns the model's meshes.
    #[inline]
    #[must_use]
    pub fn meshes(&self) -> &[ModelMesh] {
        &self.meshes
    }
}
