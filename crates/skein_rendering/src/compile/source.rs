//! Shader source registry and assembly.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{CompileError, CompileResult};
use crate::instance::InstanceTypeInfo;

macro_rules! builtin_sources {
    ($($name:literal),* $(,)?) => {
        &[$(($name, include_str!(concat!("../../shaders/", $name)))),*]
    };
}

/// Sources shipped with the crate, by name.
const BUILTIN: &[(&str, &str)] = builtin_sources![
    "internal/instancing/api_impl.vert",
    "internal/instancing/api_impl.frag",
    "internal/instancing/main.vert",
    "internal/instancing/main.frag",
    "internal/vertex_input.glsl",
    "context/default.vert",
    "context/default.frag",
    "context/crumbling.vert",
    "context/crumbling.frag",
    "instance/transformed.vert",
    "instance/oriented.vert",
    "instance/shadow.vert",
];

/// Named shader source texts.
#[derive(Debug, Clone, Default)]
pub struct ShaderSources {
    sources: HashMap<String, Arc<str>>,
}

impl ShaderSources {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the pipeline, context and instance
    /// sources shipped with the crate.
    #[must_use]
    pub fn builtin() -> Self {
        let mut sources = Self::new();
        for (name, text) in BUILTIN {
            sources.insert(*name, *text);
        }
        sources
    }

    /// Adds a source and returns the registry.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        self.insert(name, text);
        self
    }

    /// Adds or replaces a source.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<Arc<str>>) {
        self.sources.insert(name.into(), text.into());
    }

    /// Returns a source by name.
    ///
    /// # Errors
    ///
    /// Returns [`CompileError::MissingSource`] for an unknown name.
    pub fn get(&self, name: &str) -> CompileResult<&str> {
        self.sources
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| CompileError::MissingSource(name.to_owned()))
    }

    /// Returns the number of sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Returns true if no source is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Lines of the assembled text that came from one component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSpan {
    /// Component name.
    pub name: String,
    /// First line, 1-based, in the assembled text.
    pub first_line: usize,
    /// Number of lines.
    pub line_count: usize,
}

impl ComponentSpan {
    fn contains(&self, line: usize) -> bool {
        line >= self.first_line && line < self.first_line + self.line_count
    }
}

/// A complete shader stage source with a map back to its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledSource {
    text: String,
    spans: Vec<ComponentSpan>,
}

impl AssembledSource {
    /// Returns the full text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns the component spans in order.
    #[must_use]
    pub fn spans(&self) -> &[ComponentSpan] {
        &self.spans
    }

    /// Maps an assembled line to its component and 1-based local line.
    #[must_use]
    pub fn locate(&self, line: usize) -> Option<(&ComponentSpan, usize)> {
        self.spans
            .iter()
            .find(|span| span.contains(line))
            .map(|span| (span, line - span.first_line + 1))
    }

    /// Returns an assembled line by 1-based number.
    #[must_use]
    pub fn line(&self, line: usize) -> Option<&str> {
        self.text.lines().nth(line.checked_sub(1)?)
    }
}

/// Concatenates components, recording where each one lands.
#[derive(Debug)]
pub(crate) struct SourceBuilder {
    text: String,
    spans: Vec<ComponentSpan>,
    next_line: usize,
}

impl SourceBuilder {
    pub(crate) fn new(glsl_version: &str, extensions: &[String]) -> Self {
        let mut header = format!("#version {glsl_version}\n");
        for extension in extensions {
            let _ = writeln!(header, "#extension {extension} : enable");
        }

        let mut builder = Self {
            text: String::new(),
            spans: Vec::new(),
            next_line: 1,
        };
        builder.push("header", &header);
        builder
    }

    pub(crate) fn push(&mut self, name: &str, text: &str) {
        let line_count = text.lines().count();
        self.text.push_str(text);
        if !text.ends_with('\n') {
            self.text.push('\n');
        }
        self.spans.push(ComponentSpan {
            name: name.to_owned(),
            first_line: self.next_line,
            line_count,
        });
        self.next_line += line_count;
    }

    pub(crate) fn finish(self) -> AssembledSource {
        AssembledSource {
            text: self.text,
            spans: self.spans,
        }
    }
}

/// Generates the vertex component that declares an instance type's attributes
/// and unpacks them into a `SkeinInstance` struct.
///
/// Attribute locations start at `first_location`.
#[must_use]
pub fn generate_instance_component(info: &InstanceTypeInfo, first_location: u32) -> String {
    let mut out = String::new();
    let mut location = first_location;

    let _ = writeln!(out, "// instance layout: {}", info.id);
    for field in info.layout {
        let attribute_type = field.format.glsl_attribute_type();
        let columns = field.format.locations();
        if columns == 1 {
            let _ = writeln!(
                out,
                "layout(location = {location}) in {attribute_type} _skein_a_{};",
                field.name
            );
        } else {
            for column in 0..columns {
                let _ = writeln!(
                    out,
                    "layout(location = {}) in {attribute_type} _skein_a_{}_{column};",
                    location + column,
                    field.name
                );
            }
        }
        location += columns;
    }

    out.push_str("\nstruct SkeinInstance {\n");
    for field in info.layout {
        let _ = writeln!(out, "    {} {};", field.format.glsl_type(), field.name);
    }
    out.push_str("};\n\nSkeinInstance _skein_unpackInstance() {\n    SkeinInstance instance;\n");
    for field in info.layout {
        let columns = field.format.locations();
        if columns == 1 {
            let _ = writeln!(out, "    instance.{0} = _skein_a_{0};", field.name);
        } else {
            let args: Vec<String> = (0..columns)
                .map(|column| format!("_skein_a_{}_{column}", field.name))
                .collect();
            let _ = writeln!(
                out,
                "    instance.{} = {}({});",
                field.name,
                field.format.glsl_type(),
                args.join(", ")
            );
        }
    }
    out.push_str("    return instance;\n}\n");
    out
}
