use crate::camera::{OrbitRig, Projection};
use crate::clock::FrameClock;
use crate::component::{
    self, APPLIED_MATERIAL, ATTR_NORMALS, ATTR_POS, Component, GPU_MESH, IS_CAMERA, IS_MATERIAL,
    IS_MESH, NAME, PROGRAM, U_MODEL_MATRIX, U_PROJECTION_MATRIX, VAO,
};
use crate::geometry::flat_normals;
use crate::shaders::MESH_SHADER;
use crate::systems::{OrbitSystem, RenderSystem, SceneContext};
use glam::{Mat4, Vec2};
use kiln_common::{EngineConfig, Entity};
use kiln_ecs::{ComponentStore, EcsError, Record, Schedule, System, SystemId};
use kiln_gpu::{
    AttributeDescriptor, FrameStats, GpuBackend, GpuError, Program, ShaderSource, VertexArray,
    create_program, release_vao, setup_vao,
};
use kiln_mesh::{ImportedModel, MeshImportError, upload_model};
use kiln_protocol::DomEvent;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Pointer-equivalent pixels per arrow-key press.
const KEY_ORBIT_STEP: f32 = 20.0;

/// Errors from scene operations.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("ECS error: {0}")]
    Ecs(#[from] EcsError),
    #[error("mesh import error: {0}")]
    Mesh(#[from] MeshImportError),
    #[error("{0} position floats do not form whole triangles")]
    InvalidPositions(usize),
    #[error("{normals} normal floats for {positions} position floats")]
    NormalMismatch { positions: usize, normals: usize },
    #[error("entity {0} is not a material")]
    NotAMaterial(Entity),
    #[error("entity {0} is not a camera")]
    NotACamera(Entity),
}

/// Owns the GPU backend for one canvas and hands out scenes drawing to it.
pub struct Engine<B: GpuBackend + 'static> {
    backend: Rc<RefCell<B>>,
    config: EngineConfig,
}

impl<B: GpuBackend + 'static> Engine<B> {
    pub fn new(mut backend: B, config: EngineConfig) -> Self {
        backend.set_clear_color(config.clear_color);
        let (width, height) = backend.surface_size();
        info!(width, height, "engine created");
        Self {
            backend: Rc::new(RefCell::new(backend)),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> Ref<'_, B> {
        self.backend.borrow()
    }

    pub fn backend_mut(&self) -> RefMut<'_, B> {
        self.backend.borrow_mut()
    }

    pub fn create_scene(&self) -> Scene {
        let backend: Rc<RefCell<dyn GpuBackend>> = self.backend.clone();
        Scene::new(backend, self.config.clone())
    }
}

/// Entities, systems and camera state for one rendered view.
pub struct Scene {
    backend: Rc<RefCell<dyn GpuBackend>>,
    config: EngineConfig,
    store: ComponentStore<Component>,
    schedule: Schedule<Component, SceneContext>,
    ctx: SceneContext,
    rig: OrbitRig,
    projection: Projection,
    clock: FrameClock,
    default_material: Option<Entity>,
    default_shaders: Option<(ShaderSource, ShaderSource)>,
    imported: Vec<Entity>,
    /// Vertex arrays of despawned materials still shared by cached meshes.
    orphans: Vec<Rc<VertexArray>>,
    /// Last pointer position while a button is held.
    drag: Option<Vec2>,
}

impl Scene {
    fn new(backend: Rc<RefCell<dyn GpuBackend>>, config: EngineConfig) -> Self {
        let (width, height) = backend.borrow().surface_size();
        let mut schedule = Schedule::new();
        schedule.add_system(OrbitSystem {
            speed: config.orbit_speed,
        });
        schedule.add_system(RenderSystem::new(backend.clone()));
        Self {
            rig: OrbitRig::from_config(&config.camera),
            projection: Projection::from_config(&config.camera, width, height),
            store: ComponentStore::with_components(component::ALL),
            schedule,
            ctx: SceneContext::default(),
            clock: FrameClock::new(),
            default_material: None,
            default_shaders: None,
            imported: Vec::new(),
            orphans: Vec::new(),
            drag: None,
            backend,
            config,
        }
    }

    pub fn store(&self) -> &ComponentStore<Component> {
        &self.store
    }

    pub fn get(&self, entity: Entity) -> Record<Component> {
        self.store.get_by_id(entity)
    }

    /// First live entity with the given name.
    pub fn find(&self, name: &str) -> Option<Entity> {
        self.store
            .entities()
            .find(|e| self.store.get(*e, NAME).and_then(Component::as_text) == Some(name))
    }

    pub fn rig(&self) -> &OrbitRig {
        &self.rig
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    /// Compile a program and build its vertex array from `attributes`.
    ///
    /// Per-instance attributes set here (a `model` matrix, for example) are
    /// shared by every mesh drawn with the material.
    pub fn add_material(
        &mut self,
        name: &str,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        attributes: &[AttributeDescriptor<'_>],
    ) -> Result<Entity, SceneError> {
        let program = create_program(name, vertex, fragment)?;
        let vao = setup_vao(&mut *self.backend.borrow_mut(), &program, attributes)?;
        let entity = self.store.add_entity([
            (IS_MATERIAL, Component::Flag),
            (NAME, Component::text(name)),
            (PROGRAM, Component::Program(Rc::new(program))),
            (VAO, Component::VertexArray(Rc::new(vao))),
        ]);
        info!(%entity, material = name, "material added");
        Ok(entity)
    }

    /// Replace the built-in shader used for the default material.
    ///
    /// Takes effect the next time the default material is created; an
    /// existing default material is kept.
    pub fn set_default_material_shaders(&mut self, vertex: ShaderSource, fragment: ShaderSource) {
        if self.default_material.is_some_and(|e| self.store.is_alive(e)) {
            warn!("default material already built, new shaders apply after it is despawned");
        }
        self.default_shaders = Some((vertex, fragment));
    }

    /// The material meshes get when none is given, built on first use.
    pub fn default_material(&mut self) -> Result<Entity, SceneError> {
        if let Some(entity) = self.default_material.filter(|e| self.store.is_alive(*e)) {
            return Ok(entity);
        }
        let (vertex, fragment) = self.default_shaders.clone().unwrap_or_else(|| {
            let builtin = ShaderSource::new("mesh.wgsl", MESH_SHADER);
            (builtin.clone(), builtin)
        });
        let entity = self.add_material("default", &vertex, &fragment, &[])?;
        self.default_material = Some(entity);
        Ok(entity)
    }

    /// Add a triangle-list mesh using the default material.
    ///
    /// `positions` holds whole triangles of xyz vertices. Without `normals`,
    /// flat per-triangle normals are computed.
    pub fn add_mesh(
        &mut self,
        name: &str,
        positions: &[f32],
        normals: Option<&[f32]>,
    ) -> Result<Entity, SceneError> {
        let material = self.default_material()?;
        self.add_mesh_with_material(name, positions, normals, material)
    }

    pub fn add_mesh_with_material(
        &mut self,
        name: &str,
        positions: &[f32],
        normals: Option<&[f32]>,
        material: Entity,
    ) -> Result<Entity, SceneError> {
        if positions.len() % 9 != 0 {
            return Err(SceneError::InvalidPositions(positions.len()));
        }
        if let Some(normals) = normals {
            if normals.len() != positions.len() {
                return Err(SceneError::NormalMismatch {
                    positions: positions.len(),
                    normals: normals.len(),
                });
            }
        }
        if self.store.get(material, IS_MATERIAL).is_none() {
            return Err(SceneError::NotAMaterial(material));
        }
        let normals = match normals {
            Some(n) => Component::floats(n),
            None => Component::Floats(flat_normals(positions).into()),
        };
        let entity = self.store.add_entity([
            (IS_MESH, Component::Flag),
            (NAME, Component::text(name)),
            (ATTR_POS, Component::floats(positions)),
            (ATTR_NORMALS, normals),
            (U_MODEL_MATRIX, Component::Matrix(Mat4::IDENTITY)),
            (APPLIED_MATERIAL, Component::Entity(material)),
        ]);
        debug!(%entity, mesh = name, vertices = positions.len() / 3, "mesh added");
        Ok(entity)
    }

    /// Add a camera at the current orbit, optionally making it active.
    pub fn add_camera(&mut self, name: &str, active: bool) -> Entity {
        let entity = self.store.add_entity([
            (IS_CAMERA, Component::Flag),
            (NAME, Component::text(name)),
            (U_MODEL_MATRIX, Component::Matrix(self.rig.camera_matrix())),
            (U_PROJECTION_MATRIX, Component::Matrix(self.projection.matrix())),
        ]);
        if active {
            self.ctx.active_camera = Some(entity);
        }
        debug!(%entity, camera = name, active, "camera added");
        entity
    }

    pub fn set_active_camera(&mut self, camera: Entity) -> Result<(), SceneError> {
        if self.store.get(camera, IS_CAMERA).is_none() {
            return Err(SceneError::NotACamera(camera));
        }
        self.ctx.active_camera = Some(camera);
        self.sync_camera();
        Ok(())
    }

    pub fn active_camera(&self) -> Option<Entity> {
        self.ctx.active_camera
    }

    /// Upload an imported model with the default material and frame the
    /// camera on it. Returns one mesh entity per primitive.
    pub fn add_imported_model(
        &mut self,
        name: &str,
        model: &ImportedModel,
    ) -> Result<Vec<Entity>, SceneError> {
        let material = self.default_material()?;
        let (program, material_vao) = self.material_parts(material)?;
        let meshes = upload_model(
            &mut *self.backend.borrow_mut(),
            &program,
            Some(&*material_vao),
            model,
        )?;

        let mut entities = Vec::with_capacity(meshes.len());
        for (i, mesh) in meshes.into_iter().enumerate() {
            let entity = self.store.add_entity([
                (IS_MESH, Component::Flag),
                (NAME, Component::text(&format!("{name}#{i}"))),
                (GPU_MESH, Component::Mesh(Rc::new(mesh))),
                (U_MODEL_MATRIX, Component::Matrix(Mat4::IDENTITY)),
                (APPLIED_MATERIAL, Component::Entity(material)),
            ]);
            entities.push(entity);
        }
        self.imported.extend(&entities);

        if let Some(bounds) = model.bounds {
            self.rig.frame(bounds.center(), bounds.radius(), self.projection.fov_y);
            self.projection.fit_depth(self.rig.distance, bounds.radius());
            self.sync_camera();
        }
        info!(model = name, entities = entities.len(), "model added to scene");
        Ok(entities)
    }

    /// Despawn every entity created by [`add_imported_model`](Self::add_imported_model).
    pub fn clear_imported_models(&mut self) -> usize {
        let imported = std::mem::take(&mut self.imported);
        imported.into_iter().filter(|e| self.despawn(*e)).count()
    }

    /// Remove an entity and release the GPU resources only it held.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let mesh = self.store.get(entity, GPU_MESH).and_then(Component::as_mesh).cloned();
        let vao = self
            .store
            .get(entity, VAO)
            .and_then(Component::as_vertex_array)
            .cloned();
        if !self.store.despawn(entity) {
            return false;
        }
        let mut backend = self.backend.borrow_mut();
        if let Some(Ok(mesh)) = mesh.map(Rc::try_unwrap) {
            mesh.release(&mut *backend);
        }
        match vao.map(Rc::try_unwrap) {
            Some(Ok(vao)) => release_vao(&mut *backend, vao),
            Some(Err(shared)) => {
                debug!(%entity, "vertex array still shared, release deferred");
                self.orphans.push(shared);
            }
            None => {}
        }
        true
    }

    /// Release deferred vertex arrays whose last user has let go.
    fn release_orphans(&mut self) {
        if self.orphans.is_empty() {
            return;
        }
        let mut backend = self.backend.borrow_mut();
        let mut shared = Vec::new();
        for vao in self.orphans.drain(..) {
            match Rc::try_unwrap(vao) {
                Ok(vao) => release_vao(&mut *backend, vao),
                Err(vao) => shared.push(vao),
            }
        }
        drop(backend);
        self.orphans = shared;
    }

    fn material_parts(&self, material: Entity) -> Result<(Rc<Program>, Rc<VertexArray>), SceneError> {
        let program = self.store.get(material, PROGRAM).and_then(Component::as_program);
        let vao = self.store.get(material, VAO).and_then(Component::as_vertex_array);
        match (program, vao) {
            (Some(program), Some(vao)) => Ok((program.clone(), vao.clone())),
            _ => Err(SceneError::NotAMaterial(material)),
        }
    }

    /// Write the rig and projection into the active camera's matrices.
    fn sync_camera(&mut self) {
        let Some(camera) = self.ctx.active_camera else {
            return;
        };
        if self.store.get(camera, IS_CAMERA).is_none() {
            return;
        }
        let camera_matrix = Component::Matrix(self.rig.camera_matrix());
        let projection = Component::Matrix(self.projection.matrix());
        let written = self
            .store
            .set(camera, U_MODEL_MATRIX, Some(camera_matrix))
            .and_then(|_| self.store.set(camera, U_PROJECTION_MATRIX, Some(projection)));
        if let Err(err) = written {
            warn!(%camera, error = %err, "camera update failed");
        }
    }

    /// Put the camera back at its configured orbit.
    pub fn reset_camera(&mut self) {
        let (width, height) = self.backend.borrow().surface_size();
        self.rig = OrbitRig::from_config(&self.config.camera);
        self.projection = Projection::from_config(&self.config.camera, width, height);
        self.sync_camera();
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.backend.borrow_mut().set_clear_color(color);
    }

    /// Resize the surface to a CSS size scaled to physical pixels.
    pub fn resize(&mut self, width: f64, height: f64, scale_factor: f64) {
        let physical = |v: f64| (v * scale_factor).round().max(1.0) as u32;
        let (width, height) = (physical(width), physical(height));
        self.backend.borrow_mut().resize(width, height);
        self.projection.set_viewport(width, height);
        self.sync_camera();
        debug!(width, height, "scene resized");
    }

    /// Apply one input event from the page.
    pub fn handle_event(&mut self, event: &DomEvent) {
        match event {
            DomEvent::PointerDown { x, y } => {
                self.drag = Some(Vec2::new(*x as f32, *y as f32));
            }
            DomEvent::PointerUp { .. } => self.drag = None,
            DomEvent::PointerMove { x, y } => {
                let Some(last) = self.drag else {
                    return;
                };
                let current = Vec2::new(*x as f32, *y as f32);
                let delta = current - last;
                self.drag = Some(current);
                self.rig.orbit(delta.x, delta.y);
                self.sync_camera();
            }
            DomEvent::KeyDown { key } => {
                let (dx, dy) = match key.as_str() {
                    "ArrowLeft" => (-KEY_ORBIT_STEP, 0.0),
                    "ArrowRight" => (KEY_ORBIT_STEP, 0.0),
                    "ArrowUp" => (0.0, KEY_ORBIT_STEP),
                    "ArrowDown" => (0.0, -KEY_ORBIT_STEP),
                    "r" | "R" => {
                        self.reset_camera();
                        return;
                    }
                    _ => {
                        debug!(key = key.as_str(), "key ignored");
                        return;
                    }
                };
                self.rig.orbit(dx, dy);
                self.sync_camera();
            }
            DomEvent::KeyUp { .. } => {}
            DomEvent::Wheel => debug!("wheel event without delta ignored"),
            DomEvent::Zoom {
                delta_y,
                delta_mode,
            } => {
                self.rig.zoom(*delta_y as f32, *delta_mode as u32);
                self.projection.reach(self.rig.distance);
                self.sync_camera();
            }
            DomEvent::Resize {
                width,
                height,
                scale_factor,
            } => self.resize(*width, *height, *scale_factor),
        }
    }

    pub fn add_system(&mut self, system: impl System<Component, SceneContext> + 'static) -> SystemId {
        self.schedule.add_system(system)
    }

    pub fn remove_system(&mut self, id: SystemId) -> bool {
        self.schedule.remove_system(id)
    }

    /// Run one frame at the scene clock's current time.
    pub fn run_systems(&mut self) -> Result<FrameStats, SceneError> {
        let time = self.clock.elapsed_secs();
        self.run_systems_at(time)
    }

    /// Run one frame at `time` seconds and present it.
    pub fn run_systems_at(&mut self, time: f32) -> Result<FrameStats, SceneError> {
        self.ctx.time = time;
        self.store.run_systems(&mut self.schedule, &mut self.ctx);
        self.release_orphans();
        let stats = self.backend.borrow_mut().finish_frame()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shaders::INSTANCED_SHADER;
    use kiln_ecs::{Update, system_fn};
    use kiln_gpu::{AttributeKind, HeadlessBackend, IndexFormat};
    use kiln_mesh::{ImportedPrimitive, Indices, ModelBounds, Semantic};

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    fn engine() -> Engine<HeadlessBackend> {
        Engine::new(HeadlessBackend::new(800, 600), EngineConfig::default())
    }

    fn model_matrix(scene: &Scene, entity: Entity) -> Mat4 {
        scene
            .store()
            .get(entity, U_MODEL_MATRIX)
            .and_then(Component::as_matrix)
            .unwrap()
    }

    #[test]
    fn camera_and_triangle_draw_once() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();

        let stats = scene.run_systems_at(0.5).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 3);
        let frame = engine.backend().last_frame().unwrap().to_vec();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame[0].vertex_count, 3);
        assert!(frame[0].index.is_none());

        let first = model_matrix(&scene, mesh);
        assert_ne!(first, Mat4::IDENTITY);
        scene.run_systems_at(1.0).unwrap();
        assert_ne!(model_matrix(&scene, mesh), first);
    }

    #[test]
    fn draw_uniforms_carry_model_view_projection() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let cam = scene.add_camera("cam", true);
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        scene.run_systems_at(0.25).unwrap();

        let frame = engine.backend().last_frame().unwrap().to_vec();
        let floats: Vec<f32> = frame[0]
            .uniforms
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let camera = scene.store().get(cam, U_MODEL_MATRIX).and_then(Component::as_matrix).unwrap();
        assert_eq!(&floats[0..16], &model_matrix(&scene, mesh).to_cols_array());
        assert_eq!(&floats[16..32], &camera.inverse().to_cols_array());
        assert_eq!(&floats[48..52], &[0.8, 0.8, 0.8, 1.0]);
    }

    #[test]
    fn no_active_camera_draws_nothing() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", false);
        scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        let stats = scene.run_systems_at(0.1).unwrap();
        assert_eq!(stats.draw_calls, 0);
    }

    #[test]
    fn stale_camera_fails_closed() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let cam = scene.add_camera("cam", true);
        scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        assert!(scene.despawn(cam));
        // A new camera reusing the slot must not be picked up through the old handle.
        let other = scene.add_camera("other", false);
        assert_eq!(other.index, cam.index);
        assert_eq!(scene.active_camera(), Some(cam));
        let stats = scene.run_systems_at(0.1).unwrap();
        assert_eq!(stats.draw_calls, 0);

        scene.set_active_camera(other).unwrap();
        assert_eq!(scene.run_systems_at(0.2).unwrap().draw_calls, 1);
    }

    #[test]
    fn set_active_camera_rejects_non_cameras() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        assert!(matches!(
            scene.set_active_camera(mesh),
            Err(SceneError::NotACamera(_))
        ));
    }

    #[test]
    fn mesh_validation() {
        let engine = engine();
        let mut scene = engine.create_scene();
        assert!(matches!(
            scene.add_mesh("bad", &TRIANGLE[..6], None),
            Err(SceneError::InvalidPositions(6))
        ));
        assert!(matches!(
            scene.add_mesh("bad", &TRIANGLE, Some(&[0.0; 3])),
            Err(SceneError::NormalMismatch { positions: 9, normals: 3 })
        ));
        let cam = scene.add_camera("cam", true);
        assert!(matches!(
            scene.add_mesh_with_material("bad", &TRIANGLE, None, cam),
            Err(SceneError::NotAMaterial(_))
        ));
    }

    #[test]
    fn omitted_normals_are_flat() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        let normals = scene.store().get(mesh, ATTR_NORMALS).and_then(Component::as_floats).unwrap().clone();
        assert_eq!(&normals[..], &[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn mesh_buffers_are_cached_between_frames() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        scene.run_systems_at(0.0).unwrap();
        let after_first = engine.backend().bytes_written();
        scene.run_systems_at(0.1).unwrap();
        assert_eq!(engine.backend().bytes_written(), after_first);

        let live = engine.backend().live_buffers();
        scene.despawn(mesh);
        scene.run_systems_at(0.2).unwrap();
        // position and normal buffers of the mesh are released
        assert_eq!(engine.backend().live_buffers(), live - 2);
    }

    #[test]
    fn replaced_positions_are_reuploaded() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        scene.run_systems_at(0.0).unwrap();
        let before = engine.backend().bytes_written();

        let mut moved = TRIANGLE;
        moved[0] = -1.0;
        scene.store.set(mesh, ATTR_POS, Some(Component::floats(&moved))).unwrap();
        scene.run_systems_at(0.1).unwrap();
        assert_eq!(engine.backend().bytes_written(), before + 36);
    }

    #[test]
    fn normals_added_later_get_their_own_buffer() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        scene.store.set(mesh, ATTR_NORMALS, None).unwrap();
        scene.run_systems_at(0.0).unwrap();

        let normals = [0.0, 0.0, 1.0].repeat(3);
        scene.store.set(mesh, ATTR_NORMALS, Some(Component::floats(&normals))).unwrap();
        scene.run_systems_at(0.1).unwrap();

        let backend = engine.backend();
        let draw = &backend.last_frame().unwrap()[0];
        let uploaded = draw
            .vertex_buffers
            .iter()
            .filter_map(|id| backend.buffer(*id))
            .find(|b| b.label == "normal")
            .unwrap();
        let expected: Vec<u8> = normals.iter().flat_map(|f| f.to_ne_bytes()).collect();
        assert_eq!(uploaded.data, expected);
    }

    #[test]
    fn despawned_material_is_released_after_its_meshes_let_go() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let baseline = engine.backend().live_buffers();
        let src = ShaderSource::new("mesh.wgsl", MESH_SHADER);
        let material = scene.add_material("plain", &src, &src, &[]).unwrap();
        scene
            .add_mesh_with_material("tri", &TRIANGLE, None, material)
            .unwrap();
        scene.run_systems_at(0.0).unwrap();
        assert!(engine.backend().live_buffers() > baseline);

        assert!(scene.despawn(material));
        let stats = scene.run_systems_at(0.1).unwrap();
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(engine.backend().live_buffers(), baseline);
    }

    #[test]
    fn instanced_material_draws_every_instance() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let src = ShaderSource::new("instanced.wgsl", INSTANCED_SHADER);
        let material = scene
            .add_material(
                "instanced",
                &src,
                &src,
                &[AttributeDescriptor::per_instance("model", AttributeKind::Mat4, &[], 3)],
            )
            .unwrap();
        scene
            .add_mesh_with_material("row", &TRIANGLE, None, material)
            .unwrap();

        let stats = scene.run_systems_at(0.0).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 9);
        assert_eq!(engine.backend().last_frame().unwrap()[0].instance_count, 3);
    }

    fn quad_model() -> ImportedModel {
        let positions = vec![-1.0, -1.0, 0.0, 1.0, -1.0, 0.0, 1.0, 1.0, 0.0, -1.0, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0].repeat(4);
        ImportedModel {
            primitives: vec![ImportedPrimitive {
                attributes: vec![(Semantic::Position, positions), (Semantic::Normal, normals)],
                indices: Some(Indices::U32(vec![0, 1, 2, 0, 2, 3])),
            }],
            bounds: Some(ModelBounds {
                min: glam::Vec3::new(-1.0, -1.0, 0.0),
                max: glam::Vec3::new(1.0, 1.0, 0.0),
            }),
        }
    }

    #[test]
    fn imported_model_draws_indexed_and_frames_camera() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.add_camera("cam", true);
        let entities = scene.add_imported_model("quad", &quad_model()).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(scene.find("quad#0"), Some(entities[0]));
        assert!(scene.rig().distance > 2.0f32.sqrt());

        let stats = scene.run_systems_at(0.0).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 6);
        let draw = engine.backend().last_frame().unwrap()[0].clone();
        let index = draw.index.unwrap();
        assert_eq!(index.format, IndexFormat::U32);
        assert_eq!(index.count, 6);
    }

    #[test]
    fn clearing_imported_models_releases_buffers() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.default_material().unwrap();
        let baseline = engine.backend().live_buffers();
        scene.add_imported_model("quad", &quad_model()).unwrap();
        assert!(engine.backend().live_buffers() > baseline);
        assert_eq!(scene.clear_imported_models(), 1);
        assert_eq!(engine.backend().live_buffers(), baseline);
    }

    #[test]
    fn pointer_drag_orbits_the_camera() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let cam = scene.add_camera("cam", true);
        let before = scene.store().get(cam, U_MODEL_MATRIX).and_then(Component::as_matrix).unwrap();

        scene.handle_event(&DomEvent::PointerMove { x: 50.0, y: 0.0 });
        assert_eq!(scene.rig().yaw, 0.0);

        scene.handle_event(&DomEvent::PointerDown { x: 0.0, y: 0.0 });
        scene.handle_event(&DomEvent::PointerMove { x: 40.0, y: 10.0 });
        scene.handle_event(&DomEvent::PointerUp { x: 40.0, y: 10.0 });
        scene.handle_event(&DomEvent::PointerMove { x: 90.0, y: 90.0 });

        let rig = scene.rig().clone();
        assert!((rig.yaw + 40.0 * 0.005).abs() < 1e-6);
        assert!((rig.pitch - 10.0 * 0.005).abs() < 1e-6);
        let after = scene.store().get(cam, U_MODEL_MATRIX).and_then(Component::as_matrix).unwrap();
        assert_ne!(before, after);

        scene.handle_event(&DomEvent::KeyDown { key: "r".into() });
        assert_eq!(scene.rig().yaw, 0.0);
    }

    #[test]
    fn wheel_zoom_dollies_the_active_camera() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let cam = scene.add_camera("cam", true);
        let start = scene.rig().distance;

        scene.handle_event(&DomEvent::Zoom {
            delta_y: -120.0,
            delta_mode: 0.0,
        });
        assert!(scene.rig().distance < start);
        let eye = scene
            .store()
            .get(cam, U_MODEL_MATRIX)
            .and_then(Component::as_matrix)
            .unwrap()
            .transform_point3(glam::Vec3::ZERO);
        assert!((eye.length() - scene.rig().distance).abs() < 1e-4);

        scene.handle_event(&DomEvent::Zoom {
            delta_y: 3.0,
            delta_mode: 2.0,
        });
        assert!(scene.rig().distance > start * 100.0);
        assert!(scene.projection().far >= scene.rig().distance * 2.0);

        scene.handle_event(&DomEvent::Wheel);
        assert!(scene.rig().distance > start * 100.0);
    }

    #[test]
    fn resize_event_updates_surface_and_aspect() {
        let engine = engine();
        let mut scene = engine.create_scene();
        scene.handle_event(&DomEvent::Resize {
            width: 640.0,
            height: 240.0,
            scale_factor: 2.0,
        });
        assert_eq!(engine.backend().surface_size(), (1280, 480));
        assert!((scene.projection().aspect - 1280.0 / 480.0).abs() < 1e-6);
    }

    #[test]
    fn user_systems_run_after_builtins_and_can_be_removed() {
        let engine = engine();
        let mut scene = engine.create_scene();
        let mesh = scene.add_mesh("tri", &TRIANGLE, None).unwrap();
        let id = scene.add_system(system_fn(
            "freeze",
            |_e, row: &Record<Component>, _ctx: &mut SceneContext| {
                row.get(IS_MESH)?;
                Some(Update::new().set(U_MODEL_MATRIX, Component::Matrix(Mat4::IDENTITY)))
            },
        ));
        scene.run_systems_at(1.0).unwrap();
        assert_eq!(model_matrix(&scene, mesh), Mat4::IDENTITY);

        assert!(scene.remove_system(id));
        assert!(!scene.remove_system(id));
        scene.run_systems_at(1.0).unwrap();
        assert_ne!(model_matrix(&scene, mesh), Mat4::IDENTITY);
    }

    #[test]
    fn engine_applies_clear_color() {
        let engine = engine();
        assert_eq!(engine.backend().clear_color(), EngineConfig::default().clear_color);
        let mut scene = engine.create_scene();
        scene.set_clear_color([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(engine.backend().clear_color(), [1.0, 0.0, 0.0, 1.0]);
    }
}
