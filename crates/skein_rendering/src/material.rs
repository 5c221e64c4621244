//! Materials: per-draw render state and its packed shader encoding.
//!
//! A material picks vertex/fragment material shaders by index and carries the
//! fixed-function state applied around a draw. Shaders read it from a single
//! `uvec4` uniform:
//!
//! ```text
//! x: vertex material shader index
//! y: fragment material shader index
//! z: fog (bits 0-15) | cutout (bits 16-31)
//! w: property bits, see `Material::pack_properties`
//! ```

/// Alpha cutout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Cutout {
    /// Never discard.
    #[default]
    Off,
    /// Discard alpha close to zero.
    Epsilon,
    /// Discard alpha below 0.1.
    OneTenth,
    /// Discard alpha below 0.5.
    Half,
}

/// Fog mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Fog {
    /// Linear fog.
    #[default]
    Linear,
    /// Linear fog that also fades alpha.
    LinearFade,
    /// No fog.
    None,
}

/// Blending mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Transparency {
    /// No blending.
    #[default]
    Opaque,
    /// Additive blending.
    Additive,
    /// Lightning blending.
    Lightning,
    /// Enchantment glint blending.
    Glint,
    /// Block-breaking overlay blending.
    Crumbling,
    /// Standard alpha blending.
    Translucent,
}

/// Which buffers a draw writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum WriteMask {
    /// Color and depth.
    #[default]
    ColorDepth,
    /// Color only.
    Color,
    /// Depth only.
    Depth,
}

/// Render state for one mesh of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Material {
    /// Vertex material shader index.
    pub vertex_shader: u16,
    /// Fragment material shader index.
    pub fragment_shader: u16,
    /// Texture the mesh samples.
    pub texture: u32,
    /// Alpha cutout.
    pub cutout: Cutout,
    /// Fog.
    pub fog: Fog,
    /// Blending.
    pub transparency: Transparency,
    /// Buffer write mask.
    pub write_mask: WriteMask,
    /// Linear texture filtering.
    pub blur: bool,
    /// Mipmapped sampling.
    pub mipmap: bool,
    /// Cull back faces.
    pub backface_culling: bool,
    /// Apply depth polygon offset.
    pub polygon_offset: bool,
    /// Sample the overlay texture.
    pub use_overlay: bool,
    /// Sample the light texture.
    pub use_light: bool,
    /// Apply diffuse shading.
    pub diffuse: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            vertex_shader: 0,
            fragment_shader: 0,
            texture: 0,
            cutout: Cutout::Off,
            fog: Fog::Linear,
            transparency: Transparency::Opaque,
            write_mask: WriteMask::ColorDepth,
            blur: false,
            mipmap: true,
            backface_culling: true,
            polygon_offset: false,
            use_overlay: true,
            use_light: true,
            diffuse: true,
        }
    }
}

impl Material {
    /// Packs fog into the low half and cutout into the high half.
    #[inline]
    #[must_use]
    pub const fn pack_fog_and_cutout(&self) -> u32 {
        (self.fog as u32) | ((self.cutout as u32) << 16)
    }

    /// Packs the flags and the blend/write modes.
    ///
    /// ```text
    /// bit 0 blur | 1 mipmap | 2 backface culling | 3 polygon offset
    /// bit 4 overlay | 5 light | 6 diffuse
    /// bits 8-10 transparency | bits 12-13 write mask
    /// ```
    #[must_use]
    pub const fn pack_properties(&self) -> u32 {
        (self.blur as u32)
            | ((self.mipmap as u32) << 1)
            | ((self.backface_culling as u32) << 2)
            | ((self.polygon_offset as u32) << 3)
            | ((self.use_overlay as u32) << 4)
            | ((self.use_light as u32) << 5)
            | ((self.diffuse as u32) << 6)
            | ((self.transparency as u32) << 8)
            | ((self.write_mask as u32) << 12)
    }

    /// Returns the `uvec4` uploaded as the packed material uniform.
    #[must_use]
    pub const fn packed(&self) -> [u32; 4] {
        [
            self.vertex_shader as u32,
            self.fragment_shader as u32,
            self.pack_fog_and_cutout(),
            self.pack_properties(),
        ]
    }

    /// Derives the material used to draw the block-breaking overlay over a
    /// mesh drawn with `self`.
    ///
    /// Keeps the shaders and culling of the base material; the crumbling
    /// texture replaces the base texture at bind time.
    #[must_use]
    pub const fn crumbling(&self) -> Self {
        Self {
            vertex_shader: self.vertex_shader,
            fragment_shader: self.fragment_shader,
            texture: self.texture,
            cutout: Cutout::OneTenth,
            fog: Fog::None,
            transparency: Transparency::Crumbling,
            write_mask: WriteMask::Color,
            blur: false,
            mipmap: false,
            backface_culling: self.backface_culling,
            polygon_offset: true,
            use_overlay: false,
            use_light: false,
            diffuse: false,
        }
    }
}
