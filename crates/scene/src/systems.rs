//! The two systems every scene registers: the demo orbit and the renderer.

use crate::component::{
    APPLIED_MATERIAL, ATTR_NORMALS, ATTR_POS, Component, GPU_MESH, IS_CAMERA, IS_MESH, PROGRAM,
    U_MODEL_MATRIX, U_PROJECTION_MATRIX, VAO,
};
use glam::{Mat4, Vec4};
use kiln_common::Entity;
use kiln_ecs::{ComponentStore, Record, System, Update};
use kiln_gpu::{
    AttributeDescriptor, AttributeKind, DrawCommand, GpuBackend, Program, UniformBlock,
    VertexArray, release_vao, setup_vao_shared, update_vao,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Surface color fed to the built-in shaders.
pub const BASE_COLOR: Vec4 = Vec4::new(0.8, 0.8, 0.8, 1.0);

/// Per-pass state shared with every system of a scene.
#[derive(Debug, Default)]
pub struct SceneContext {
    /// Seconds since the scene started.
    pub time: f32,
    pub active_camera: Option<Entity>,
    pub(crate) camera_warned: bool,
}

/// Spins every mesh about +Y at a fixed angular speed.
pub struct OrbitSystem {
    /// Radians per second.
    pub speed: f32,
}

impl System<Component, SceneContext> for OrbitSystem {
    fn name(&self) -> &str {
        "orbit"
    }

    fn run(
        &mut self,
        _entity: Entity,
        row: &Record<Component>,
        _store: &ComponentStore<Component>,
        ctx: &mut SceneContext,
    ) -> Option<Update<Component>> {
        row.get(IS_MESH)?;
        let model = Mat4::from_rotation_y(ctx.time * self.speed);
        Some(Update::new().set(U_MODEL_MATRIX, Component::Matrix(model)))
    }
}

struct CachedVao {
    vao: VertexArray,
    positions: Rc<[f32]>,
    normals: Option<Rc<[f32]>>,
    material: Rc<VertexArray>,
}

/// Draws every mesh entity through the active camera.
///
/// Meshes defined by position arrays get their own vertex array, built on
/// top of the material's and cached per entity. It is re-uploaded only when
/// the entity's arrays are replaced, and released once the entity is gone.
pub struct RenderSystem {
    backend: Rc<RefCell<dyn GpuBackend>>,
    cache: BTreeMap<Entity, CachedVao>,
}

impl RenderSystem {
    pub fn new(backend: Rc<RefCell<dyn GpuBackend>>) -> Self {
        Self {
            backend,
            cache: BTreeMap::new(),
        }
    }

    /// Number of cached per-entity vertex arrays.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// View and projection of the active camera, if it still is one.
    fn resolve_camera(
        store: &ComponentStore<Component>,
        ctx: &mut SceneContext,
    ) -> Option<(Mat4, Mat4)> {
        let camera = ctx.active_camera?;
        let resolved = store.get(camera, IS_CAMERA).and_then(|_| {
            let model = store.get(camera, U_MODEL_MATRIX)?.as_matrix()?;
            let projection = store.get(camera, U_PROJECTION_MATRIX)?.as_matrix()?;
            Some((model.inverse(), projection))
        });
        match resolved {
            Some(matrices) => {
                ctx.camera_warned = false;
                Some(matrices)
            }
            None => {
                if !ctx.camera_warned {
                    warn!(%camera, "active camera is stale, rendering skipped");
                    ctx.camera_warned = true;
                }
                None
            }
        }
    }

    fn array_draw(
        &mut self,
        entity: Entity,
        row: &Record<Component>,
        program: &Program,
        material: &Rc<VertexArray>,
        uniforms: Vec<u8>,
    ) -> Option<DrawCommand> {
        let positions = row.get(ATTR_POS)?.as_floats()?.clone();
        let normals = row.get(ATTR_NORMALS).and_then(Component::as_floats).cloned();

        let mut attributes = vec![AttributeDescriptor::per_vertex(
            "position",
            AttributeKind::Vec3,
            &positions,
        )];
        if let Some(normals) = &normals {
            attributes.push(AttributeDescriptor::per_vertex("normal", AttributeKind::Vec3, normals));
        }

        let mut backend = self.backend.borrow_mut();
        match self.cache.get_mut(&entity) {
            // Normals appearing or vanishing change which buffer the slot
            // borrows from the material, so those rebuild below.
            Some(cached)
                if Rc::ptr_eq(&cached.material, material)
                    && cached.normals.is_some() == normals.is_some() =>
            {
                let positions_changed = !Rc::ptr_eq(&cached.positions, &positions);
                let normals_changed = match (&cached.normals, &normals) {
                    (Some(a), Some(b)) => !Rc::ptr_eq(a, b),
                    _ => false,
                };
                let changed: Vec<AttributeDescriptor<'_>> = attributes
                    .iter()
                    .filter(|d| match d.name {
                        "position" => positions_changed,
                        _ => normals_changed,
                    })
                    .cloned()
                    .collect();
                if !changed.is_empty() {
                    if let Err(err) = update_vao(&mut *backend, &mut cached.vao, &changed) {
                        error!(%entity, error = %err, "vertex array update failed, mesh skipped");
                        return None;
                    }
                    debug!(%entity, "mesh arrays re-uploaded");
                    cached.positions = positions.clone();
                    cached.normals = normals.clone();
                }
            }
            _ => {
                let vao = match setup_vao_shared(&mut *backend, program, material, &attributes) {
                    Ok(vao) => vao,
                    Err(err) => {
                        error!(%entity, error = %err, "vertex array setup failed, mesh skipped");
                        return None;
                    }
                };
                let fresh = CachedVao {
                    vao,
                    positions: positions.clone(),
                    normals: normals.clone(),
                    material: material.clone(),
                };
                if let Some(old) = self.cache.insert(entity, fresh) {
                    release_vao(&mut *backend, old.vao);
                }
            }
        }

        let vao = &self.cache.get(&entity)?.vao;
        Some(DrawCommand {
            pipeline: vao.pipeline(),
            vertex_buffers: vao.vertex_buffer_ids(),
            index: None,
            vertex_count: (positions.len() / 3) as u32,
            instance_count: vao.instance_count(),
            uniforms,
        })
    }
}

impl System<Component, SceneContext> for RenderSystem {
    fn name(&self) -> &str {
        "render"
    }

    fn run(
        &mut self,
        entity: Entity,
        row: &Record<Component>,
        store: &ComponentStore<Component>,
        ctx: &mut SceneContext,
    ) -> Option<Update<Component>> {
        row.get(IS_MESH)?;
        let (view, projection) = Self::resolve_camera(store, ctx)?;

        let Some(material) = row.get(APPLIED_MATERIAL).and_then(Component::as_entity) else {
            debug!(%entity, "mesh has no material, skipped");
            return None;
        };
        let program = store.get(material, PROGRAM).and_then(Component::as_program);
        let material_vao = store.get(material, VAO).and_then(Component::as_vertex_array);
        let (Some(program), Some(material_vao)) = (program, material_vao) else {
            debug!(%entity, %material, "applied material unresolved, mesh skipped");
            return None;
        };

        let model = row
            .get(U_MODEL_MATRIX)
            .and_then(Component::as_matrix)
            .unwrap_or(Mat4::IDENTITY);
        let mut uniforms = UniformBlock::for_program(program);
        uniforms.set_mat4(program, "model", &model);
        uniforms.set_mat4(program, "view", &view);
        uniforms.set_mat4(program, "projection", &projection);
        uniforms.set_vec4(program, "base_color", BASE_COLOR);

        let draw = match row.get(GPU_MESH).and_then(Component::as_mesh) {
            Some(mesh) => mesh.draw_command(uniforms.into_bytes()),
            None => self.array_draw(entity, row, program, material_vao, uniforms.into_bytes())?,
        };
        self.backend.borrow_mut().submit(draw);
        None
    }

    fn after_pass(&mut self, store: &ComponentStore<Component>, _ctx: &mut SceneContext) {
        let gone: Vec<Entity> = self
            .cache
            .iter()
            .filter(|(entity, cached)| {
                store.get(**entity, ATTR_POS).is_none()
                    || !material_resolves(store, **entity, &cached.material)
            })
            .map(|(entity, _)| *entity)
            .collect();
        if gone.is_empty() {
            return;
        }
        let mut backend = self.backend.borrow_mut();
        for entity in gone {
            if let Some(cached) = self.cache.remove(&entity) {
                debug!(%entity, "cached vertex array released");
                release_vao(&mut *backend, cached.vao);
            }
        }
    }
}

/// True while `entity`'s applied material still holds `material`.
fn material_resolves(
    store: &ComponentStore<Component>,
    entity: Entity,
    material: &Rc<VertexArray>,
) -> bool {
    store
        .get(entity, APPLIED_MATERIAL)
        .and_then(Component::as_entity)
        .and_then(|m| store.get(m, VAO))
        .and_then(Component::as_vertex_array)
        .is_some_and(|vao| Rc::ptr_eq(vao, material))
}

impl Drop for RenderSystem {
    fn drop(&mut self) {
        let Ok(mut backend) = self.backend.try_borrow_mut() else {
            warn!(cached = self.cache.len(), "backend busy, cached vertex arrays leaked");
            return;
        };
        for (_, cached) in std::mem::take(&mut self.cache) {
            release_vao(&mut *backend, cached.vao);
        }
    }
}
