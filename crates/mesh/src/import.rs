use glam::Vec3;
use gltf::accessor::{DataType, Dimensions};
use gltf::buffer::Source;
use gltf::mesh::Mode;
use gltf::mesh::util::ReadIndices;
use kiln_gpu::{AttributeKind, GpuError, IndexFormat};
use std::path::Path;
use tracing::{debug, info, warn};

/// Errors from importing or uploading a mesh container.
#[derive(Debug, thiserror::Error)]
pub enum MeshImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("glTF parse error: {0}")]
    Gltf(#[from] gltf::Error),
    #[error("container has no `{0}` section")]
    MissingSection(&'static str),
    #[error("container has no binary chunk")]
    MissingBinary,
    #[error("external buffer `{0}` is not supported")]
    ExternalBuffer(String),
    #[error("accessor {accessor} reads past its buffer view")]
    OutOfBounds { accessor: usize },
    #[error("accessor {accessor} declares {count} elements without a buffer view")]
    Oversized { accessor: usize, count: usize },
    #[error("accessor {0} is referenced but not defined")]
    UnknownAccessor(usize),
    #[error("unsupported index component type {0:?}")]
    UnsupportedIndexType(DataType),
    #[error("sparse accessor {0} is not supported")]
    Sparse(usize),
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
}

/// Largest element count an accessor without a buffer view may declare.
const MAX_ZERO_FILL: usize = 1 << 24;

/// Vertex attribute semantics the importer extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Semantic {
    Position,
    Normal,
    TexCoord0,
}

impl Semantic {
    /// Extraction order.
    pub const PRIORITY: [Semantic; 3] = [Self::Position, Self::Normal, Self::TexCoord0];

    /// Vertex shader input the semantic binds to.
    pub fn attribute_name(self) -> &'static str {
        match self {
            Self::Position => "position",
            Self::Normal => "normal",
            Self::TexCoord0 => "texcoord_0",
        }
    }

    pub fn kind(self) -> AttributeKind {
        match self {
            Self::Position | Self::Normal => AttributeKind::Vec3,
            Self::TexCoord0 => AttributeKind::Vec2,
        }
    }

    /// Component layouts the importer reads for this semantic.
    fn accepts(self, data_type: DataType, dimensions: Dimensions) -> bool {
        match self {
            Self::Position | Self::Normal => {
                data_type == DataType::F32 && dimensions == Dimensions::Vec3
            }
            Self::TexCoord0 => {
                matches!(data_type, DataType::F32 | DataType::U8 | DataType::U16)
                    && dimensions == Dimensions::Vec2
            }
        }
    }

    fn gltf(self) -> gltf::Semantic {
        match self {
            Self::Position => gltf::Semantic::Positions,
            Self::Normal => gltf::Semantic::Normals,
            Self::TexCoord0 => gltf::Semantic::TexCoords(0),
        }
    }
}

/// Index data at the width the container declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn len(&self) -> usize {
        match self {
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn format(&self) -> IndexFormat {
        match self {
            Self::U16(_) => IndexFormat::U16,
            Self::U32(_) => IndexFormat::U32,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::U16(v) => bytemuck::cast_slice(v),
            Self::U32(v) => bytemuck::cast_slice(v),
        }
    }
}

/// One triangle-list primitive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportedPrimitive {
    /// Extracted attributes in [`Semantic::PRIORITY`] order. Semantics that
    /// were missing or malformed are absent.
    pub attributes: Vec<(Semantic, Vec<f32>)>,
    pub indices: Option<Indices>,
}

impl ImportedPrimitive {
    pub fn attribute(&self, semantic: Semantic) -> Option<&[f32]> {
        self.attributes
            .iter()
            .find(|(s, _)| *s == semantic)
            .map(|(_, data)| data.as_slice())
    }

    pub fn vertex_count(&self) -> u32 {
        self.attribute(Semantic::Position)
            .map_or(0, |p| (p.len() / 3) as u32)
    }

    pub fn index_count(&self) -> Option<u32> {
        self.indices.as_ref().map(|i| i.len() as u32)
    }
}

/// Axis-aligned bounds of every imported position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl ModelBounds {
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Radius of the sphere around [`center`](Self::center) enclosing the box.
    pub fn radius(&self) -> f32 {
        (self.max - self.min).length() * 0.5
    }

    fn include(bounds: Option<Self>, point: Vec3) -> Self {
        match bounds {
            Some(b) => Self {
                min: b.min.min(point),
                max: b.max.max(point),
            },
            None => Self {
                min: point,
                max: point,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImportedModel {
    pub primitives: Vec<ImportedPrimitive>,
    pub bounds: Option<ModelBounds>,
}

impl ImportedModel {
    /// Index count of the last primitive, `None` when there is nothing to draw.
    pub fn index_count(&self) -> Option<u32> {
        self.primitives.last().and_then(ImportedPrimitive::index_count)
    }
}

/// Read and parse a GLB file.
pub fn load_glb(path: impl AsRef<Path>) -> Result<ImportedModel, MeshImportError> {
    let bytes = std::fs::read(path.as_ref())?;
    debug!(path = %path.as_ref().display(), bytes = bytes.len(), "read mesh container");
    parse_glb(&bytes)
}

/// Parse a GLB container into per-primitive attribute and index arrays.
pub fn parse_glb(bytes: &[u8]) -> Result<ImportedModel, MeshImportError> {
    let gltf::Gltf { document, blob } = gltf::Gltf::from_slice_without_validation(bytes)?;
    let json = document.into_json();
    check_sections(&json)?;
    let document = gltf::Document::from_json(json)?;
    let blob = blob.as_deref();

    let mut model = ImportedModel::default();
    for mesh in document.meshes() {
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                warn!(
                    mesh = mesh.index(),
                    primitive = primitive.index(),
                    mode = ?primitive.mode(),
                    "non-triangle primitive skipped"
                );
                continue;
            }
            let imported = import_primitive(&mesh, &primitive, blob)?;
            if let Some(positions) = imported.attribute(Semantic::Position) {
                for p in positions.chunks_exact(3) {
                    model.bounds = Some(ModelBounds::include(
                        model.bounds,
                        Vec3::new(p[0], p[1], p[2]),
                    ));
                }
            }
            model.primitives.push(imported);
        }
    }
    info!(
        primitives = model.primitives.len(),
        index_count = ?model.index_count(),
        "mesh container imported"
    );
    Ok(model)
}

/// Required sections, and accessor references that must resolve before the
/// document is validated.
fn check_sections(json: &gltf::json::Root) -> Result<(), MeshImportError> {
    if json.meshes.is_empty() {
        return Err(MeshImportError::MissingSection("meshes"));
    }
    if json.buffer_views.is_empty() {
        return Err(MeshImportError::MissingSection("bufferViews"));
    }
    if json.accessors.is_empty() {
        return Err(MeshImportError::MissingSection("accessors"));
    }
    let referenced = json
        .meshes
        .iter()
        .flat_map(|mesh| &mesh.primitives)
        .flat_map(|primitive| primitive.attributes.values().chain(&primitive.indices));
    for index in referenced {
        if index.value() >= json.accessors.len() {
            return Err(MeshImportError::UnknownAccessor(index.value()));
        }
    }
    Ok(())
}

fn import_primitive(
    mesh: &gltf::Mesh<'_>,
    primitive: &gltf::Primitive<'_>,
    blob: Option<&[u8]>,
) -> Result<ImportedPrimitive, MeshImportError> {
    let reader = primitive.reader(move |buffer| match buffer.source() {
        Source::Bin => blob,
        Source::Uri(_) => None,
    });

    let mut imported = ImportedPrimitive::default();
    for semantic in Semantic::PRIORITY {
        let Some(accessor) = primitive.get(&semantic.gltf()) else {
            warn!(
                mesh = mesh.index(),
                primitive = primitive.index(),
                ?semantic,
                "primitive has no accessor for semantic, attribute skipped"
            );
            continue;
        };
        if !semantic.accepts(accessor.data_type(), accessor.dimensions()) {
            warn!(
                accessor = accessor.index(),
                ?semantic,
                data_type = ?accessor.data_type(),
                dimensions = ?accessor.dimensions(),
                "accessor shape does not match semantic, attribute skipped"
            );
            continue;
        }
        let components = semantic.kind().components() as usize;
        let data = match check_bounds(&accessor, blob)? {
            Backing::Zeros => vec![0.0; accessor.count() * components],
            Backing::Empty => Vec::new(),
            Backing::Buffer => {
                let unreadable = || MeshImportError::OutOfBounds {
                    accessor: accessor.index(),
                };
                match semantic {
                    Semantic::Position => {
                        reader.read_positions().ok_or_else(unreadable)?.flatten().collect()
                    }
                    Semantic::Normal => {
                        reader.read_normals().ok_or_else(unreadable)?.flatten().collect()
                    }
                    Semantic::TexCoord0 => reader
                        .read_tex_coords(0)
                        .ok_or_else(unreadable)?
                        .into_f32()
                        .flatten()
                        .collect(),
                }
            }
        };
        imported.attributes.push((semantic, data));
    }

    let Some(accessor) = primitive.indices() else {
        warn!(
            mesh = mesh.index(),
            primitive = primitive.index(),
            "primitive has no index accessor, drawn unindexed"
        );
        return Ok(imported);
    };
    let data_type = accessor.data_type();
    if accessor.dimensions() != Dimensions::Scalar
        || !matches!(data_type, DataType::U8 | DataType::U16 | DataType::U32)
    {
        return Err(MeshImportError::UnsupportedIndexType(data_type));
    }
    let indices = match check_bounds(&accessor, blob)? {
        Backing::Zeros if data_type == DataType::U32 => Indices::U32(vec![0; accessor.count()]),
        Backing::Zeros => Indices::U16(vec![0; accessor.count()]),
        Backing::Empty if data_type == DataType::U32 => Indices::U32(Vec::new()),
        Backing::Empty => Indices::U16(Vec::new()),
        Backing::Buffer => match reader.read_indices() {
            Some(ReadIndices::U8(iter)) => Indices::U16(iter.map(u16::from).collect()),
            Some(ReadIndices::U16(iter)) => Indices::U16(iter.collect()),
            Some(ReadIndices::U32(iter)) => Indices::U32(iter.collect()),
            None => {
                return Err(MeshImportError::OutOfBounds {
                    accessor: accessor.index(),
                });
            }
        },
    };
    imported.indices = Some(indices);
    Ok(imported)
}

/// Where a validated accessor's elements come from.
enum Backing {
    /// No buffer view: every element reads as zero.
    Zeros,
    /// A buffer view but no elements.
    Empty,
    Buffer,
}

/// Check that every element of `accessor` lies inside its buffer view and
/// the view inside the binary chunk. The element reader trusts both.
fn check_bounds(accessor: &gltf::Accessor<'_>, blob: Option<&[u8]>) -> Result<Backing, MeshImportError> {
    if accessor.sparse().is_some() {
        return Err(MeshImportError::Sparse(accessor.index()));
    }
    let count = accessor.count();
    let Some(view) = accessor.view() else {
        if count > MAX_ZERO_FILL {
            return Err(MeshImportError::Oversized {
                accessor: accessor.index(),
                count,
            });
        }
        return Ok(Backing::Zeros);
    };
    let data = match view.buffer().source() {
        Source::Bin => blob.ok_or(MeshImportError::MissingBinary)?,
        Source::Uri(uri) => return Err(MeshImportError::ExternalBuffer(uri.to_string())),
    };

    let size = accessor.size();
    let stride = view.stride().unwrap_or(size);
    let view_fits = view
        .offset()
        .checked_add(view.length())
        .is_some_and(|end| end <= data.len());
    let elements_fit = match count.checked_sub(1) {
        None => true,
        Some(last) => last
            .checked_mul(stride)
            .and_then(|n| n.checked_add(accessor.offset()))
            .and_then(|n| n.checked_add(size))
            .is_some_and(|end| end <= view.length()),
    };
    if stride < size || !view_fits || !elements_fit {
        return Err(MeshImportError::OutOfBounds {
            accessor: accessor.index(),
        });
    }
    Ok(if count == 0 { Backing::Empty } else { Backing::Buffer })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    const FLOAT: u32 = 5126;
    pub(crate) const UBYTE: u32 = 5121;
    pub(crate) const USHORT: u32 = 5123;
    pub(crate) const UINT: u32 = 5125;

    /// Assemble a GLB container from a JSON document and a binary chunk.
    pub(crate) fn glb(json: &serde_json::Value, bin: &[u8]) -> Vec<u8> {
        let mut json_chunk = serde_json::to_vec(json).unwrap();
        while json_chunk.len() % 4 != 0 {
            json_chunk.push(b' ');
        }
        let mut bin_chunk = bin.to_vec();
        while bin_chunk.len() % 4 != 0 {
            bin_chunk.push(0);
        }
        let mut total = 12 + 8 + json_chunk.len();
        if !bin_chunk.is_empty() {
            total += 8 + bin_chunk.len();
        }

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(json_chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(&0x4E4F_534Au32.to_le_bytes());
        out.extend_from_slice(&json_chunk);
        if !bin_chunk.is_empty() {
            out.extend_from_slice(&(bin_chunk.len() as u32).to_le_bytes());
            out.extend_from_slice(&0x004E_4942u32.to_le_bytes());
            out.extend_from_slice(&bin_chunk);
        }
        out
    }

    const POSITIONS: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    const NORMALS: [f32; 9] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
    const UVS: [f32; 6] = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

    /// One triangle with position, normal, uv and indices of `index_type`.
    pub(crate) fn triangle_glb(index_type: u32) -> Vec<u8> {
        let mut bin: Vec<u8> = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&POSITIONS));
        bin.extend_from_slice(bytemuck::cast_slice(&NORMALS));
        bin.extend_from_slice(bytemuck::cast_slice(&UVS));
        let index_offset = bin.len();
        match index_type {
            UBYTE => bin.extend_from_slice(&[0u8, 1, 2]),
            USHORT => bin.extend_from_slice(bytemuck::cast_slice(&[0u16, 1, 2])),
            UINT => bin.extend_from_slice(bytemuck::cast_slice(&[0u32, 1, 2])),
            other => panic!("unexpected index type {other}"),
        }
        let index_len = bin.len() - index_offset;

        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 72, "byteLength": 24 },
                { "buffer": 0, "byteOffset": index_offset, "byteLength": index_len }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": FLOAT, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": FLOAT, "count": 3, "type": "VEC3" },
                { "bufferView": 2, "componentType": FLOAT, "count": 3, "type": "VEC2" },
                { "bufferView": 3, "componentType": index_type, "count": 3, "type": "SCALAR" }
            ],
            "meshes": [{
                "name": "triangle",
                "primitives": [{
                    "attributes": { "POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2 },
                    "indices": 3
                }]
            }]
        });
        glb(&doc, &bin)
    }

    #[test]
    fn imports_triangle_with_u16_indices() {
        let model = parse_glb(&triangle_glb(USHORT)).unwrap();
        assert_eq!(model.primitives.len(), 1);
        let prim = &model.primitives[0];
        assert_eq!(prim.attribute(Semantic::Position).unwrap(), &POSITIONS);
        assert_eq!(prim.attribute(Semantic::Normal).unwrap(), &NORMALS);
        assert_eq!(prim.attribute(Semantic::TexCoord0).unwrap(), &UVS);
        assert_eq!(prim.indices, Some(Indices::U16(vec![0, 1, 2])));
        assert_eq!(prim.vertex_count(), 3);
        assert_eq!(model.index_count(), Some(3));
    }

    #[test]
    fn attributes_follow_priority_order() {
        let model = parse_glb(&triangle_glb(USHORT)).unwrap();
        let order: Vec<Semantic> = model.primitives[0].attributes.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, Semantic::PRIORITY.to_vec());
    }

    #[test]
    fn u32_indices_keep_their_width() {
        let model = parse_glb(&triangle_glb(UINT)).unwrap();
        let indices = model.primitives[0].indices.as_ref().unwrap();
        assert_eq!(indices, &Indices::U32(vec![0, 1, 2]));
        assert_eq!(indices.format(), IndexFormat::U32);
        assert_eq!(indices.as_bytes().len(), 12);
    }

    #[test]
    fn u8_indices_are_widened() {
        let model = parse_glb(&triangle_glb(UBYTE)).unwrap();
        assert_eq!(model.primitives[0].indices, Some(Indices::U16(vec![0, 1, 2])));
    }

    #[test]
    fn bounds_cover_positions() {
        let model = parse_glb(&triangle_glb(USHORT)).unwrap();
        let bounds = model.bounds.unwrap();
        assert_eq!(bounds.min, Vec3::ZERO);
        assert_eq!(bounds.max, Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(bounds.center(), Vec3::new(0.5, 0.5, 0.0));
        assert!((bounds.radius() - 2f32.sqrt() / 2.0).abs() < 1e-6);
    }

    #[test]
    fn missing_meshes_section() {
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": 4 }],
            "bufferViews": [{ "buffer": 0, "byteLength": 4 }],
            "accessors": [{ "bufferView": 0, "componentType": FLOAT, "count": 1, "type": "SCALAR" }]
        });
        let err = parse_glb(&glb(&doc, &[0; 4])).unwrap_err();
        assert!(matches!(err, MeshImportError::MissingSection("meshes")));
    }

    #[test]
    fn missing_buffer_views_section() {
        let doc = json!({
            "asset": { "version": "2.0" },
            "accessors": [{ "componentType": FLOAT, "count": 3, "type": "VEC3",
                            "min": [0.0, 0.0, 0.0], "max": [0.0, 0.0, 0.0] }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }]
        });
        let err = parse_glb(&glb(&doc, &[])).unwrap_err();
        assert!(matches!(err, MeshImportError::MissingSection("bufferViews")));
    }

    #[test]
    fn missing_accessors_section() {
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": 36 }],
            "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }]
        });
        let result = parse_glb(&glb(&doc, &[0; 36]));
        assert!(matches!(result, Err(MeshImportError::MissingSection("accessors"))));
        assert_eq!(result.ok().and_then(|model| model.index_count()), None);
    }

    #[test]
    fn undefined_accessor_reference_is_an_error() {
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": 36 }],
            "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
            "accessors": [{ "bufferView": 0, "componentType": FLOAT, "count": 3, "type": "VEC3",
                            "min": [0.0, 0.0, 0.0], "max": [0.0, 0.0, 0.0] }],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 7 } }] }]
        });
        let err = parse_glb(&glb(&doc, &[0; 36])).unwrap_err();
        assert!(matches!(err, MeshImportError::UnknownAccessor(7)));
    }

    /// One VEC3 position accessor declaring `count` elements over a 36-byte view.
    fn positions_glb(count: u64, with_view: bool) -> Vec<u8> {
        let mut accessor = json!({ "componentType": FLOAT, "count": count, "type": "VEC3",
                                   "min": [0.0, 0.0, 0.0], "max": [0.0, 0.0, 0.0] });
        if with_view {
            accessor["bufferView"] = json!(0);
        }
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": 36 }],
            "bufferViews": [{ "buffer": 0, "byteLength": 36 }],
            "accessors": [accessor],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0 } }] }]
        });
        glb(&doc, &[0; 36])
    }

    #[test]
    fn huge_accessor_count_is_out_of_bounds() {
        let err = parse_glb(&positions_glb(1 << 62, true)).unwrap_err();
        assert!(matches!(err, MeshImportError::OutOfBounds { accessor: 0 }));
    }

    #[test]
    fn accessor_longer_than_its_view_is_out_of_bounds() {
        let err = parse_glb(&positions_glb(4, true)).unwrap_err();
        assert!(matches!(err, MeshImportError::OutOfBounds { accessor: 0 }));
    }

    #[test]
    fn viewless_accessor_reads_as_zeros_up_to_a_limit() {
        let model = parse_glb(&positions_glb(3, false)).unwrap();
        assert_eq!(model.primitives[0].attribute(Semantic::Position).unwrap(), &[0.0f32; 9]);

        let err = parse_glb(&positions_glb(1 << 62, false)).unwrap_err();
        assert!(matches!(err, MeshImportError::Oversized { accessor: 0, .. }));
    }

    #[test]
    fn normalized_tex_coords_become_floats() {
        let mut bin: Vec<u8> = Vec::new();
        bin.extend_from_slice(bytemuck::cast_slice(&POSITIONS));
        bin.extend_from_slice(bytemuck::cast_slice(&[0u16, 0, 65535, 0, 0, 65535]));
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [
                { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
                { "buffer": 0, "byteOffset": 36, "byteLength": 12 }
            ],
            "accessors": [
                { "bufferView": 0, "componentType": FLOAT, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 1, "componentType": USHORT, "normalized": true,
                  "count": 3, "type": "VEC2" }
            ],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0, "TEXCOORD_0": 1 } }] }]
        });
        let model = parse_glb(&glb(&doc, &bin)).unwrap();
        let uvs = model.primitives[0].attribute(Semantic::TexCoord0).unwrap();
        assert_eq!(uvs.len(), UVS.len());
        for (got, want) in uvs.iter().zip(UVS) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn interleaved_view_honours_stride() {
        let mut bin: Vec<u8> = Vec::new();
        for v in 0..3 {
            bin.extend_from_slice(bytemuck::cast_slice(&POSITIONS[v * 3..v * 3 + 3]));
            bin.extend_from_slice(bytemuck::cast_slice(&NORMALS[v * 3..v * 3 + 3]));
        }
        let doc = json!({
            "asset": { "version": "2.0" },
            "buffers": [{ "byteLength": bin.len() }],
            "bufferViews": [{ "buffer": 0, "byteLength": bin.len(), "byteStride": 24 }],
            "accessors": [
                { "bufferView": 0, "componentType": FLOAT, "count": 3, "type": "VEC3",
                  "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
                { "bufferView": 0, "byteOffset": 12, "componentType": FLOAT, "count": 3, "type": "VEC3" }
            ],
            "meshes": [{ "primitives": [{ "attributes": { "POSITION": 0, "NORMAL": 1 } }] }]
        });
        let model = parse_glb(&glb(&doc, &bin)).unwrap();
        let prim = &model.primitives[0];
        assert_eq!(prim.attribute(Semantic::Position).unwrap(), &POSITIONS);
        assert_eq!(prim.attribute(Semantic::Normal).unwrap(), &NORMALS);
        // No uv accessor and no indices: both tolerated.
        assert!(prim.attribute(Semantic::TexCoord0).is_none());
        assert!(prim.indices.is_none());
        assert_eq!(model.index_count(), None);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triangle.glb");
        std::fs::write(&path, triangle_glb(USHORT)).unwrap();
        let model = load_glb(&path).unwrap();
        assert_eq!(model.index_count(), Some(3));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_glb(dir.path().join("absent.glb")).unwrap_err();
        assert!(matches!(err, MeshImportError::Io(_)));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = parse_glb(b"not a model").unwrap_err();
        assert!(matches!(err, MeshImportError::Gltf(_)));
    }
}
