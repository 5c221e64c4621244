//! # Instances
//!
//! An instance type describes one kind of per-object record: its fields, how
//! they are laid out in the instance buffer and which vertex shader consumes
//! them. Instances of one type drawn with one model are collected by an
//! [`Instancer`].
//!
//! ```text
//! InstanceType ──► LAYOUT ──► wgpu attributes (draw side)
//!              └─► LAYOUT ──► generated GLSL unpack component (compile side)
//!              └─► write / read ──► staging bytes
//! ```

mod instancer;
mod registry;
mod types;

use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;

pub use instancer::{
    ErasedInstancer, InstanceHandle, InstanceRef, Instancer, InstancerId, InstancerKey,
};
pub use registry::{InstancerProvider, InstancerRegistry, PendingInstancer};
pub use types::{
    pack_light, Oriented, OrientedInstance, Shadow, ShadowInstance, Transformed,
    TransformedInstance, FULL_BRIGHT, NO_OVERLAY,
};

/// Storage format of one instance field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayoutFormat {
    /// Four normalized unsigned bytes.
    Unorm8x4,
    /// Two signed shorts read as integers.
    Sint16x2,
    /// Two unsigned shorts.
    Uint16x2,
    /// One float.
    Float32,
    /// Two floats.
    Float32x2,
    /// Three floats.
    Float32x3,
    /// Four floats.
    Float32x4,
    /// Column-major 3x3 float matrix.
    Mat3,
    /// Column-major 4x4 float matrix.
    Mat4,
}

impl LayoutFormat {
    /// Returns the field size in bytes.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Unorm8x4 | Self::Sint16x2 | Self::Uint16x2 | Self::Float32 => 4,
            Self::Float32x2 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
            Self::Mat3 => 36,
            Self::Mat4 => 64,
        }
    }

    /// Returns how many attribute locations the field occupies.
    #[must_use]
    pub const fn locations(self) -> u32 {
        match self {
            Self::Mat3 => 3,
            Self::Mat4 => 4,
            _ => 1,
        }
    }

    /// Returns the vertex format of each location.
    #[must_use]
    pub const fn vertex_format(self) -> wgpu::VertexFormat {
        match self {
            Self::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
            Self::Sint16x2 => wgpu::VertexFormat::Sint16x2,
            Self::Uint16x2 => wgpu::VertexFormat::Uint16x2,
            Self::Float32 => wgpu::VertexFormat::Float32,
            Self::Float32x2 => wgpu::VertexFormat::Float32x2,
            Self::Float32x3 | Self::Mat3 => wgpu::VertexFormat::Float32x3,
            Self::Float32x4 | Self::Mat4 => wgpu::VertexFormat::Float32x4,
        }
    }

    /// Returns the GLSL type the field unpacks to.
    #[must_use]
    pub const fn glsl_type(self) -> &'static str {
        match self {
            Self::Unorm8x4 | Self::Float32x4 => "vec4",
            Self::Sint16x2 => "ivec2",
            Self::Uint16x2 => "uvec2",
            Self::Float32 => "float",
            Self::Float32x2 => "vec2",
            Self::Float32x3 => "vec3",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
        }
    }

    /// Returns the GLSL type of one attribute location.
    #[must_use]
    pub const fn glsl_attribute_type(self) -> &'static str {
        match self {
            Self::Mat3 => "vec3",
            Self::Mat4 => "vec4",
            other => other.glsl_type(),
        }
    }
}

/// One named field of an instance layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutField {
    /// Field name, also used in generated shader code.
    pub name: &'static str,
    /// Storage format.
    pub format: LayoutFormat,
}

impl LayoutField {
    /// Creates a field.
    #[must_use]
    pub const fn new(name: &'static str, format: LayoutFormat) -> Self {
        Self { name, format }
    }
}

/// Returns the packed byte size of a layout.
#[must_use]
pub fn layout_stride(layout: &[LayoutField]) -> u64 {
    layout.iter().map(|field| field.format.size()).sum()
}

/// Builds per-instance vertex attributes for a layout.
///
/// Locations start at `first_location`, after the mesh vertex attributes.
/// Matrices take one location per column.
#[must_use]
pub fn instance_attributes(layout: &[LayoutField], first_location: u32) -> Vec<wgpu::VertexAttribute> {
    let mut attributes = Vec::new();
    let mut offset = 0;
    let mut location = first_location;

    for field in layout {
        let format = field.format.vertex_format();
        for _ in 0..field.format.locations() {
            attributes.push(wgpu::VertexAttribute {
                format,
                offset,
                shader_location: location,
            });
            offset += format.size();
            location += 1;
        }
    }
    attributes
}

/// A kind of instance record.
pub trait InstanceType: Send + Sync + 'static {
    /// CPU-side instance record.
    type Instance: Clone + Default + fmt::Debug + Send + Sync + 'static;

    /// Unique name, used in logs and program keys.
    const NAME: &'static str;

    /// Name of the vertex shader source that transforms mesh vertices by an
    /// instance.
    const VERTEX_SHADER: &'static str;

    /// Instance buffer layout, in byte order.
    const LAYOUT: &'static [LayoutField];

    /// Serializes an instance into `out`, which is exactly one stride long.
    fn write(instance: &Self::Instance, out: &mut [u8]);

    /// Deserializes an instance written by [`InstanceType::write`].
    fn read(bytes: &[u8]) -> Self::Instance;

    /// Returns the byte size of one serialized instance.
    #[must_use]
    fn stride() -> usize {
        usize::try_from(layout_stride(Self::LAYOUT)).unwrap_or(usize::MAX)
    }

    /// Returns the type's identity.
    #[must_use]
    fn id() -> InstanceTypeId {
        InstanceTypeId {
            name: Self::NAME,
            type_id: TypeId::of::<Self>(),
        }
    }

    /// Returns the type-erased description used by the compile pipeline.
    #[must_use]
    fn info() -> InstanceTypeInfo {
        InstanceTypeInfo {
            id: Self::id(),
            vertex_shader: Self::VERTEX_SHADER,
            layout: Self::LAYOUT,
        }
    }
}

/// Identity of an instance type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceTypeId {
    name: &'static str,
    type_id: TypeId,
}

impl InstanceTypeId {
    /// Returns the type's name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialOrd for InstanceTypeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceTypeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(other.name)
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Display for InstanceTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Type-erased instance type description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceTypeInfo {
    /// Identity.
    pub id: InstanceTypeId,
    /// Vertex shader source name.
    pub vertex_shader: &'static str,
    /// Buffer layout.
    pub layout: &'static [LayoutField],
}

impl InstanceTypeInfo {
    /// Returns the byte size of one serialized instance.
    #[must_use]
    pub fn stride(&self) -> u64 {
        layout_stride(self.layout)
    }

    /// Returns the per-instance vertex buffer layout.
    ///
    /// `attributes` comes from [`instance_attributes`] for this layout.
    #[must_use]
    pub fn buffer_layout<'a>(
        &self,
        attributes: &'a [wgpu::VertexAttribute],
    ) -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride(),
            step_mode: wgpu::VertexStepMode::Instance,
            attributes,
        }
    }
}
