//! Built-in instance types.

use bytemuck::{Pod, Zeroable};

use super::{InstanceType, LayoutField, LayoutFormat};

/// Overlay value that samples no hurt or flash tint.
pub const NO_OVERLAY: u32 = 10 << 16;

/// Light value for maximum block and sky light.
pub const FULL_BRIGHT: u32 = pack_light(15, 15);

/// Packs block and sky light levels the way lightmap coordinates expect.
#[inline]
#[must_use]
pub const fn pack_light(block: u32, sky: u32) -> u32 {
    (block << 4) | (sky << 20)
}

#[inline]
const fn split_u32(value: u32) -> [u16; 2] {
    [(value & 0xFFFF) as u16, (value >> 16) as u16]
}

#[inline]
const fn join_u16(halves: [u16; 2]) -> u32 {
    halves[0] as u32 | ((halves[1] as u32) << 16)
}

const IDENTITY_4: [[f32; 4]; 4] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

const IDENTITY_3: [[f32; 3]; 3] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

// =============================================================================
// Transformed
// =============================================================================

/// Instance placed by a full pose matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformedInstance {
    /// RGBA tint.
    pub color: [u8; 4],
    /// Packed overlay coordinates.
    pub overlay: u32,
    /// Packed light, see [`pack_light`].
    pub light: u32,
    /// Column-major model matrix.
    pub pose: [[f32; 4]; 4],
    /// Column-major normal matrix.
    pub normal: [[f32; 3]; 3],
}

impl Default for TransformedInstance {
    fn default() -> Self {
        Self {
            color: [0xFF; 4],
            overlay: NO_OVERLAY,
            light: 0,
            pose: IDENTITY_4,
            normal: IDENTITY_3,
        }
    }
}

impl TransformedInstance {
    /// Resets pose and normal to identity.
    pub fn set_identity(&mut self) -> &mut Self {
        self.pose = IDENTITY_4;
        self.normal = IDENTITY_3;
        self
    }

    /// Appends a translation to the pose.
    pub fn translate(&mut self, x: f32, y: f32, z: f32) -> &mut Self {
        for row in 0..4 {
            self.pose[3][row] +=
                self.pose[0][row] * x + self.pose[1][row] * y + self.pose[2][row] * z;
        }
        self
    }

    /// Sets the tint.
    pub fn set_color(&mut self, color: [u8; 4]) -> &mut Self {
        self.color = color;
        self
    }

    /// Sets packed light.
    pub fn set_light(&mut self, light: u32) -> &mut Self {
        self.light = light;
        self
    }

    /// Sets packed overlay.
    pub fn set_overlay(&mut self, overlay: u32) -> &mut Self {
        self.overlay = overlay;
        self
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct TransformedGpu {
    color: [u8; 4],
    overlay: [u16; 2],
    light: [u16; 2],
    pose: [[f32; 4]; 4],
    normal: [[f32; 3]; 3],
}

/// Instance type for [`TransformedInstance`].
#[derive(Debug)]
pub struct Transformed;

impl InstanceType for Transformed {
    type Instance = TransformedInstance;

    const NAME: &'static str = "transformed";
    const VERTEX_SHADER: &'static str = "instance/transformed.vert";
    const LAYOUT: &'static [LayoutField] = &[
        LayoutField::new("color", LayoutFormat::Unorm8x4),
        LayoutField::new("overlay", LayoutFormat::Sint16x2),
        LayoutField::new("light", LayoutFormat::Uint16x2),
        LayoutField::new("pose", LayoutFormat::Mat4),
        LayoutField::new("normal", LayoutFormat::Mat3),
    ];

    fn write(instance: &Self::Instance, out: &mut [u8]) {
        let gpu = TransformedGpu {
            color: instance.color,
            overlay: split_u32(instance.overlay),
            light: split_u32(instance.light),
            pose: instance.pose,
            normal: instance.normal,
        };
        out.copy_from_slice(bytemuck::bytes_of(&gpu));
    }

    fn read(bytes: &[u8]) -> Self::Instance {
        let gpu: TransformedGpu = bytemuck::pod_read_unaligned(bytes);
        TransformedInstance {
            color: gpu.color,
            overlay: join_u16(gpu.overlay),
            light: join_u16(gpu.light),
            pose: gpu.pose,
            normal: gpu.normal,
        }
    }
}

// =============================================================================
// Oriented
// =============================================================================

/// Instance placed by position, pivot and rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedInstance {
    /// RGBA tint.
    pub color: [u8; 4],
    /// Packed overlay coordinates.
    pub overlay: u32,
    /// Packed light, see [`pack_light`].
    pub light: u32,
    /// Translation relative to the render origin.
    pub position: [f32; 3],
    /// Point the rotation is applied around, in model space.
    pub pivot: [f32; 3],
    /// Rotation quaternion, xyzw.
    pub rotation: [f32; 4],
}

impl Default for OrientedInstance {
    fn default() -> Self {
        Self {
            color: [0xFF; 4],
            overlay: NO_OVERLAY,
            light: 0,
            position: [0.0; 3],
            pivot: [0.5; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OrientedGpu {
    color: [u8; 4],
    overlay: [u16; 2],
    light: [u16; 2],
    position: [f32; 3],
    pivot: [f32; 3],
    rotation: [f32; 4],
}

/// Instance type for [`OrientedInstance`].
#[derive(Debug)]
pub struct Oriented;

impl InstanceType for Oriented {
    type Instance = OrientedInstance;

    const NAME: &'static str = "oriented";
    const VERTEX_SHADER: &'static str = "instance/oriented.vert";
    const LAYOUT: &'static [LayoutField] = &[
        LayoutField::new("color", LayoutFormat::Unorm8x4),
        LayoutField::new("overlay", LayoutFormat::Sint16x2),
        LayoutField::new("light", LayoutFormat::Uint16x2),
        LayoutField::new("position", LayoutFormat::Float32x3),
        LayoutField::new("pivot", LayoutFormat::Float32x3),
        LayoutField::new("rotation", LayoutFormat::Float32x4),
    ];

    fn write(instance: &Self::Instance, out: &mut [u8]) {
        let gpu = OrientedGpu {
            color: instance.color,
            overlay: split_u32(instance.overlay),
            light: split_u32(instance.light),
            position: instance.position,
            pivot: instance.pivot,
            rotation: instance.rotation,
        };
        out.copy_from_slice(bytemuck::bytes_of(&gpu));
    }

    fn read(bytes: &[u8]) -> Self::Instance {
        let gpu: OrientedGpu = bytemuck::pod_read_unaligned(bytes);
        OrientedInstance {
            color: gpu.color,
            overlay: join_u16(gpu.overlay),
            light: join_u16(gpu.light),
            position: gpu.position,
            pivot: gpu.pivot,
            rotation: gpu.rotation,
        }
    }
}

// =============================================================================
// Shadow
// =============================================================================

/// Blob shadow projected under an entity.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShadowInstance {
    /// Corner of the shadow quad.
    pub position: [f32; 3],
    /// Entity x and z the shadow fades around.
    pub entity_xz: [f32; 2],
    /// Quad extent along x and z.
    pub size: [f32; 2],
    /// Opacity.
    pub alpha: f32,
    /// Shadow radius.
    pub radius: f32,
}

/// Instance type for [`ShadowInstance`].
#[derive(Debug)]
pub struct Shadow;

impl InstanceType for Shadow {
    type Instance = ShadowInstance;

    const NAME: &'static str = "shadow";
    const VERTEX_SHADER: &'static str = "instance/shadow.vert";
    const LAYOUT: &'static [LayoutField] = &[
        LayoutField::new("pos", LayoutFormat::Float32x3),
        LayoutField::new("entityPosXZ", LayoutFormat::Float32x2),
        LayoutField::new("size", LayoutFormat::Float32x2),
        LayoutField::new("alpha", LayoutFormat::Float32),
        LayoutField::new("radius", LayoutFormat::Float32),
    ];

    fn write(instance: &Self::Instance, out: &mut [u8]) {
        let floats: [f32; 9] = [
            instance.position[0],
            instance.position[1],
            instance.position[2],
            instance.entity_xz[0],
            instance.entity_xz[1],
            instance.size[0],
            instance.size[1],
            instance.alpha,
            instance.radius,
        ];
        out.copy_from_slice(bytemuck::bytes_of(&floats));
    }

    fn read(bytes: &[u8]) -> Self::Instance {
        let f: [f32; 9] = bytemuck::pod_read_unaligned(bytes);
        ShadowInstance {
            position: [f[0], f[1], f[2]],
            entity_xz: [f[3], f[4]],
            size: [f[5], f[6]],
            alpha: f[7],
            radius: f[8],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip<T: InstanceType>(instance: &T::Instance) -> T::Instance {
        let mut bytes = vec![0u8; T::stride()];
        T::write(instance, &mut bytes);
        T::read(&bytes)
    }

    #[test]
    fn test_transformed_byte_offsets() {
        let mut instance = TransformedInstance::default();
        instance
            .set_color([1, 2, 3, 4])
            .set_overlay(0x0007_0003)
            .set_light(pack_light(15, 9))
            .translate(2.0, 3.0, 4.0);

        let mut bytes = vec![0u8; Transformed::stride()];
        Transformed::write(&instance, &mut bytes);

        assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
        assert_eq!(u16::from_ne_bytes([bytes[4], bytes[5]]), 3);
        assert_eq!(u16::from_ne_bytes([bytes[6], bytes[7]]), 7);
        assert_eq!(u16::from_ne_bytes([bytes[8], bytes[9]]), 15 << 4);
        assert_eq!(u16::from_ne_bytes([bytes[10], bytes[11]]), 9 << 4);
        // pose column 3 starts at 12 + 48
        let tx = f32::from_ne_bytes([bytes[60], bytes[61], bytes[62], bytes[63]]);
        assert_eq!(tx, 2.0);
        // normal starts at 76
        let n00 = f32::from_ne_bytes([bytes[76], bytes[77], bytes[78], bytes[79]]);
        assert_eq!(n00, 1.0);
    }

    /// Quiet NaN with a non-default payload.
    const PAYLOAD_NAN: u32 = 0x7FC0_1234;

    fn bits(values: impl IntoIterator<Item = f32>) -> Vec<u32> {
        values.into_iter().map(f32::to_bits).collect()
    }

    #[test]
    fn test_transformed_fields_survive_write_and_read() {
        let mut instance = TransformedInstance::default();
        instance
            .set_color([9, 8, 7, 6])
            .set_overlay(NO_OVERLAY | 5)
            .set_light(FULL_BRIGHT)
            .translate(-1.5, 0.25, 8.0);
        instance.pose[3][1] = -0.0;
        instance.pose[3][2] = f32::from_bits(PAYLOAD_NAN);
        instance.normal[1][2] = -0.5;
        instance.normal[2][0] = -0.0;

        let back = round_trip::<Transformed>(&instance);
        assert_eq!(back.color, instance.color);
        assert_eq!(back.overlay, instance.overlay);
        assert_eq!(back.light, instance.light);
        assert_eq!(
            bits(back.pose.iter().flatten().copied()),
            bits(instance.pose.iter().flatten().copied())
        );
        assert_eq!(
            bits(back.normal.iter().flatten().copied()),
            bits(instance.normal.iter().flatten().copied())
        );
        assert_eq!(back.pose[3][2].to_bits(), PAYLOAD_NAN);
    }

    #[test]
    fn test_oriented_fields_survive_write_and_read() {
        let instance = OrientedInstance {
            color: [10, 20, 30, 40],
            overlay: 0xFFFF_0001,
            light: pack_light(3, 12),
            position: [-0.0, f32::from_bits(PAYLOAD_NAN), 3.0],
            pivot: [0.5, 0.0, 0.5],
            rotation: [0.0, 0.707, -0.0, 0.707],
        };
        let back = round_trip::<Oriented>(&instance);
        assert_eq!(back.color, instance.color);
        assert_eq!(back.overlay, instance.overlay);
        assert_eq!(back.light, instance.light);
        assert_eq!(bits(back.position), bits(instance.position));
        assert_eq!(bits(back.pivot), bits(instance.pivot));
        assert_eq!(bits(back.rotation), bits(instance.rotation));
    }

    #[test]
    fn test_shadow_fields_survive_write_and_read() {
        let instance = ShadowInstance {
            position: [4.0, f32::from_bits(PAYLOAD_NAN), -0.0],
            entity_xz: [4.5, -1.5],
            size: [1.0, 1.0],
            alpha: 0.5,
            radius: -0.0,
        };
        let back = round_trip::<Shadow>(&instance);
        assert_eq!(bits(back.position), bits(instance.position));
        assert_eq!(bits(back.entity_xz), bits(instance.entity_xz));
        assert_eq!(bits(back.size), bits(instance.size));
        assert_eq!(back.alpha.to_bits(), instance.alpha.to_bits());
        assert_eq!(back.radius.to_bits(), instance.radius.to_bits());
    }

    #[test]
    fn test_light_packing() {
        assert_eq!(FULL_BRIGHT, 0x00F0_00F0);
        assert_eq!(NO_OVERLAY, 0x000A_0000);
    }
}
