//! WGSL compilation, program linking and reflection.

use crate::attribute::AttributeKind;
use crate::error::GpuError;
use naga::{AddressSpace, Binding, Module, ScalarKind, ShaderStage, TypeInner, VectorSize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Bytes reserved per draw for a program's uniform block.
pub const UNIFORM_SLOT_SIZE: u32 = 256;

static NEXT_PROGRAM: AtomicU64 = AtomicU64::new(1);

/// Named WGSL source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub text: String,
}

impl ShaderSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A parsed and validated shader module.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub source: ShaderSource,
    pub module: Module,
}

/// Parse and validate WGSL. Diagnostics carry the source name.
pub fn compile_shader(source: &ShaderSource) -> Result<CompiledShader, GpuError> {
    let module =
        naga::front::wgsl::parse_str(&source.text).map_err(|err| GpuError::Compile {
            shader: source.name.clone(),
            diagnostic: err.emit_to_string(&source.text),
        })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|err| GpuError::Compile {
        shader: source.name.clone(),
        diagnostic: err.emit_to_string(&source.text),
    })?;
    debug!(shader = %source.name, entry_points = module.entry_points.len(), "shader compiled");
    Ok(CompiledShader {
        source: source.clone(),
        module,
    })
}

/// Process-unique program identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

/// Resolved location and shape of a vertex input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeBinding {
    pub location: u32,
    pub kind: AttributeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    Other,
}

/// One member of the uniform block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformMember {
    pub offset: u32,
    pub size: u32,
    pub kind: UniformKind,
}

/// The `@group(0) @binding(0)` uniform block of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniformLayout {
    pub size: u32,
    pub members: BTreeMap<String, UniformMember>,
}

/// A linked vertex + fragment pair with its reflected interface.
#[derive(Debug, Clone)]
pub struct Program {
    id: ProgramId,
    name: String,
    vertex: ShaderSource,
    fragment: ShaderSource,
    vertex_entry: String,
    fragment_entry: String,
    attributes: BTreeMap<String, AttributeBinding>,
    uniforms: Option<UniformLayout>,
}

impl Program {
    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex(&self) -> &ShaderSource {
        &self.vertex
    }

    pub fn fragment(&self) -> &ShaderSource {
        &self.fragment
    }

    pub fn vertex_entry(&self) -> &str {
        &self.vertex_entry
    }

    pub fn fragment_entry(&self) -> &str {
        &self.fragment_entry
    }

    /// Resolve a vertex attribute by name.
    pub fn attribute(&self, name: &str) -> Option<AttributeBinding> {
        self.attributes.get(name).copied()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, AttributeBinding)> {
        self.attributes.iter().map(|(n, b)| (n.as_str(), *b))
    }

    /// Resolve a uniform block member by name.
    pub fn uniform(&self, name: &str) -> Option<UniformMember> {
        self.uniforms.as_ref()?.members.get(name).copied()
    }

    pub fn uniform_layout(&self) -> Option<&UniformLayout> {
        self.uniforms.as_ref()
    }

    pub fn uniform_block_size(&self) -> u32 {
        self.uniforms.as_ref().map_or(0, |u| u.size)
    }
}

/// Compile both stages and link them into a program.
///
/// Linking fails when an entry point is missing, the stages disagree on the
/// uniform block, a fragment input has no matching vertex output, or a vertex
/// input is not a float scalar or vector.
pub fn create_program(
    name: &str,
    vertex: &ShaderSource,
    fragment: &ShaderSource,
) -> Result<Program, GpuError> {
    let vs = compile_shader(vertex)?;
    let fs = if fragment == vertex {
        vs.clone()
    } else {
        compile_shader(fragment)?
    };
    let link_err = |reason: String| GpuError::Link {
        program: name.to_string(),
        reason,
    };

    let vs_entry = find_entry(&vs.module, ShaderStage::Vertex, "vs_main")
        .ok_or_else(|| link_err(format!("`{}` has no vertex entry point", vertex.name)))?;
    let fs_entry = find_entry(&fs.module, ShaderStage::Fragment, "fs_main")
        .ok_or_else(|| link_err(format!("`{}` has no fragment entry point", fragment.name)))?;

    let mut attributes = BTreeMap::new();
    for io in stage_inputs(&vs.module, &vs_entry.function) {
        let kind = float_kind(&vs.module.types[io.ty].inner).ok_or_else(|| {
            link_err(format!(
                "vertex input `{}` must be a float scalar or vector",
                io.name
            ))
        })?;
        attributes.insert(
            io.name,
            AttributeBinding {
                location: io.location,
                kind,
            },
        );
    }
    fold_matrix_rows(&mut attributes);

    let vs_outputs: BTreeSet<u32> = stage_outputs(&vs.module, &vs_entry.function)
        .into_iter()
        .collect();
    for io in stage_inputs(&fs.module, &fs_entry.function) {
        if !vs_outputs.contains(&io.location) {
            return Err(link_err(format!(
                "fragment input `{}` at location {} has no matching vertex output",
                io.name, io.location
            )));
        }
    }

    let vs_block = uniform_block(&vs.module).map_err(&link_err)?;
    let fs_block = uniform_block(&fs.module).map_err(&link_err)?;
    let uniforms = match (vs_block, fs_block) {
        (Some(a), Some(b)) if a.size != b.size => {
            return Err(link_err(format!(
                "uniform block is {} bytes in the vertex stage but {} in the fragment stage",
                a.size, b.size
            )));
        }
        (Some(mut a), Some(b)) => {
            for (member, info) in b.members {
                a.members.entry(member).or_insert(info);
            }
            Some(a)
        }
        (a, b) => a.or(b),
    };
    if let Some(block) = &uniforms {
        if block.size > UNIFORM_SLOT_SIZE {
            return Err(link_err(format!(
                "uniform block of {} bytes exceeds the {UNIFORM_SLOT_SIZE}-byte slot",
                block.size
            )));
        }
    }

    let program = Program {
        id: ProgramId(NEXT_PROGRAM.fetch_add(1, Ordering::Relaxed)),
        name: name.to_string(),
        vertex: vertex.clone(),
        fragment: fragment.clone(),
        vertex_entry: vs_entry.name.clone(),
        fragment_entry: fs_entry.name.clone(),
        attributes,
        uniforms,
    };
    debug!(
        program = name,
        attributes = program.attributes.len(),
        uniform_bytes = program.uniform_block_size(),
        "program linked"
    );
    Ok(program)
}

fn find_entry<'m>(
    module: &'m Module,
    stage: ShaderStage,
    preferred: &str,
) -> Option<&'m naga::EntryPoint> {
    let mut candidates = module.entry_points.iter().filter(|ep| ep.stage == stage);
    let first = candidates.clone().next();
    candidates.find(|ep| ep.name == preferred).or(first)
}

struct StageIo {
    name: String,
    location: u32,
    ty: naga::Handle<naga::Type>,
}

fn stage_inputs(module: &Module, function: &naga::Function) -> Vec<StageIo> {
    let mut out = Vec::new();
    for (i, arg) in function.arguments.iter().enumerate() {
        match &arg.binding {
            Some(Binding::Location { location, .. }) => out.push(StageIo {
                name: arg.name.clone().unwrap_or_else(|| format!("arg{i}")),
                location: *location,
                ty: arg.ty,
            }),
            Some(Binding::BuiltIn(_)) => {}
            None => {
                if let TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for (j, member) in members.iter().enumerate() {
                        if let Some(Binding::Location { location, .. }) = &member.binding {
                            out.push(StageIo {
                                name: member.name.clone().unwrap_or_else(|| format!("arg{i}_{j}")),
                                location: *location,
                                ty: member.ty,
                            });
                        }
                    }
                }
            }
        }
    }
    out
}

fn stage_outputs(module: &Module, function: &naga::Function) -> Vec<u32> {
    let Some(result) = &function.result else {
        return Vec::new();
    };
    match &result.binding {
        Some(Binding::Location { location, .. }) => vec![*location],
        Some(Binding::BuiltIn(_)) => Vec::new(),
        None => match &module.types[result.ty].inner {
            TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|m| match &m.binding {
                    Some(Binding::Location { location, .. }) => Some(*location),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        },
    }
}

fn float_kind(inner: &TypeInner) -> Option<AttributeKind> {
    match inner {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float => Some(AttributeKind::Scalar),
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => Some(match size {
            VectorSize::Bi => AttributeKind::Vec2,
            VectorSize::Tri => AttributeKind::Vec3,
            VectorSize::Quad => AttributeKind::Vec4,
        }),
        _ => None,
    }
}

/// Replace `name_0..name_3` vec4 inputs at consecutive locations with one
/// `name` matrix attribute at the first location.
fn fold_matrix_rows(attributes: &mut BTreeMap<String, AttributeBinding>) {
    let bases: Vec<(String, u32)> = attributes
        .iter()
        .filter(|(_, b)| b.kind == AttributeKind::Vec4)
        .filter_map(|(name, b)| Some((name.strip_suffix("_0")?.to_string(), b.location)))
        .collect();
    for (base, location) in bases {
        let complete = (1..4).all(|row| {
            attributes.get(&format!("{base}_{row}")) == Some(&AttributeBinding {
                location: location + row,
                kind: AttributeKind::Vec4,
            })
        });
        if !complete || attributes.contains_key(&base) {
            continue;
        }
        for row in 0..4 {
            attributes.remove(&format!("{base}_{row}"));
        }
        attributes.insert(
            base,
            AttributeBinding {
                location,
                kind: AttributeKind::Mat4,
            },
        );
    }
}

fn uniform_kind(inner: &TypeInner) -> UniformKind {
    match inner {
        TypeInner::Scalar(_) => UniformKind::Scalar,
        TypeInner::Vector { size: VectorSize::Bi, .. } => UniformKind::Vec2,
        TypeInner::Vector { size: VectorSize::Tri, .. } => UniformKind::Vec3,
        TypeInner::Vector { size: VectorSize::Quad, .. } => UniformKind::Vec4,
        TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar,
        } if scalar.kind == ScalarKind::Float && scalar.width == 4 => UniformKind::Mat4,
        _ => UniformKind::Other,
    }
}

fn uniform_block(module: &Module) -> Result<Option<UniformLayout>, String> {
    let mut block = None;
    for (_, var) in module.global_variables.iter() {
        let Some(binding) = &var.binding else {
            continue;
        };
        let var_name = var.name.clone().unwrap_or_default();
        if var.space != AddressSpace::Uniform {
            return Err(format!("resource `{var_name}` is not a uniform buffer"));
        }
        if binding.group != 0 || binding.binding != 0 || block.is_some() {
            return Err(format!(
                "uniform `{var_name}` must be the single block at @group(0) @binding(0)"
            ));
        }
        let ty = &module.types[var.ty].inner;
        let size = ty.size(module.to_ctx());
        let members = match ty {
            TypeInner::Struct { members, .. } => members
                .iter()
                .filter_map(|m| {
                    let inner = &module.types[m.ty].inner;
                    Some((
                        m.name.clone()?,
                        UniformMember {
                            offset: m.offset,
                            size: inner.size(module.to_ctx()),
                            kind: uniform_kind(inner),
                        },
                    ))
                })
                .collect(),
            other => BTreeMap::from([(
                var_name,
                UniformMember {
                    offset: 0,
                    size,
                    kind: uniform_kind(other),
                },
            )]),
        };
        block = Some(UniformLayout { size, members });
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIT: &str = r#"
struct Uniforms {
    model: mat4x4<f32>,
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) normal: vec3<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip = u.projection * u.view * u.model * vec4<f32>(in.position, 1.0);
    out.normal = in.normal;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(in.normal, 1.0);
}
"#;

    const INSTANCED_VS: &str = r#"
struct Uniforms {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(2) model_0: vec4<f32>,
    @location(3) model_1: vec4<f32>,
    @location(4) model_2: vec4<f32>,
    @location(5) model_3: vec4<f32>,
) -> @builtin(position) vec4<f32> {
    let model = mat4x4<f32>(model_0, model_1, model_2, model_3);
    return u.projection * u.view * model * vec4<f32>(position, 1.0);
}
"#;

    const FLAT_FS: &str = r#"
@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 1.0, 1.0, 1.0);
}
"#;

    fn src(name: &str, text: &str) -> ShaderSource {
        ShaderSource::new(name, text)
    }

    #[test]
    fn compile_error_names_the_source() {
        let err = compile_shader(&src("broken.wgsl", "fn nope( {")).unwrap_err();
        match err {
            GpuError::Compile { shader, diagnostic } => {
                assert_eq!(shader, "broken.wgsl");
                assert!(!diagnostic.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn validation_error_names_the_source() {
        let text = "@vertex fn vs_main() -> @builtin(position) vec4<f32> { return 1.0; }";
        let err = compile_shader(&src("typed.wgsl", text)).unwrap_err();
        assert!(matches!(err, GpuError::Compile { ref shader, .. } if shader == "typed.wgsl"));
    }

    #[test]
    fn reflects_attributes_and_uniforms() {
        let lit = src("lit.wgsl", LIT);
        let program = create_program("lit", &lit, &lit).unwrap();
        assert_eq!(program.vertex_entry(), "vs_main");
        assert_eq!(program.fragment_entry(), "fs_main");
        assert_eq!(
            program.attribute("position"),
            Some(AttributeBinding {
                location: 0,
                kind: AttributeKind::Vec3
            })
        );
        assert_eq!(program.attribute("normal").unwrap().location, 1);
        assert_eq!(program.attribute("texcoord_0"), None);
        assert_eq!(program.uniform_block_size(), 192);
        let view = program.uniform("view").unwrap();
        assert_eq!(view.offset, 64);
        assert_eq!(view.kind, UniformKind::Mat4);
        assert_eq!(program.uniform("projection").unwrap().offset, 128);
    }

    #[test]
    fn matrix_rows_fold_into_one_attribute() {
        let program = create_program(
            "instanced",
            &src("instanced.wgsl", INSTANCED_VS),
            &src("flat.wgsl", FLAT_FS),
        )
        .unwrap();
        assert_eq!(
            program.attribute("model"),
            Some(AttributeBinding {
                location: 2,
                kind: AttributeKind::Mat4
            })
        );
        assert_eq!(program.attribute("model_0"), None);
        assert_eq!(program.uniform("model"), None);
    }

    #[test]
    fn missing_fragment_entry_fails_link() {
        let err = create_program(
            "no-fs",
            &src("instanced.wgsl", INSTANCED_VS),
            &src("instanced.wgsl", INSTANCED_VS),
        )
        .unwrap_err();
        assert!(matches!(err, GpuError::Link { ref program, .. } if program == "no-fs"));
    }

    #[test]
    fn unmatched_fragment_input_fails_link() {
        let fs = r#"
@fragment
fn fs_main(@location(3) tint: vec4<f32>) -> @location(0) vec4<f32> {
    return tint;
}
"#;
        let err = create_program("bad", &src("instanced.wgsl", INSTANCED_VS), &src("tint.wgsl", fs))
            .unwrap_err();
        match err {
            GpuError::Link { reason, .. } => assert!(reason.contains("location 3")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn uniform_size_mismatch_fails_link() {
        let fs = r#"
@group(0) @binding(0)
var<uniform> tint: vec4<f32>;

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return tint;
}
"#;
        let err = create_program("mismatch", &src("instanced.wgsl", INSTANCED_VS), &src("tint.wgsl", fs))
            .unwrap_err();
        assert!(matches!(err, GpuError::Link { .. }));
    }

    #[test]
    fn program_ids_are_unique() {
        let lit = src("lit.wgsl", LIT);
        let a = create_program("a", &lit, &lit).unwrap();
        let b = create_program("b", &lit, &lit).unwrap();
        assert_ne!(a.id(), b.id());
    }
}
