//! Render-worker state machine, independent of the browser.

use crate::error::WebError;
use kiln_common::EngineConfig;
use kiln_gpu::{FrameStats, GpuBackend, ShaderSource};
use kiln_mesh::parse_glb;
use kiln_protocol::{CustomCommand, Field, Message};
use kiln_scene::{Engine, Scene};
use tracing::{debug, info, warn};

/// Work the runtime needs from its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Fetch a GLB container and hand it to [`RenderWorker::on_mesh_loaded`].
    FetchMesh { url: String },
}

/// Everything the rendering context owns: the engine, its one scene and
/// the GPU backend behind them. Dropping it releases all GPU state.
pub struct RenderWorker<B: GpuBackend + 'static> {
    scene: Scene,
    engine: Engine<B>,
    frames: u64,
    /// Mesh most recently requested; stale fetch results are dropped.
    pending_mesh: Option<String>,
}

impl<B: GpuBackend + 'static> RenderWorker<B> {
    /// Build the engine and scene with one active camera.
    ///
    /// `shaders` replaces the built-in mesh shader when the page supplied
    /// its own sources.
    pub fn new(
        backend: B,
        config: EngineConfig,
        shaders: Option<(ShaderSource, ShaderSource)>,
    ) -> Result<Self, WebError> {
        let engine = Engine::new(backend, config);
        let mut scene = engine.create_scene();
        if let Some((vertex, fragment)) = shaders {
            info!(vertex = %vertex.name, fragment = %fragment.name, "custom mesh shaders installed");
            scene.set_default_material_shaders(vertex, fragment);
        }
        // Compile the default material up front so a bad shader fails startup.
        scene.default_material()?;
        scene.add_camera("camera", true);
        Ok(Self {
            scene,
            engine,
            frames: 0,
            pending_mesh: None,
        })
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    /// Frames rendered so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Requests to issue once at startup.
    pub fn initial_requests(&mut self) -> Vec<WorkerRequest> {
        let Some(url) = self.engine.config().mesh_url.clone() else {
            return Vec::new();
        };
        self.pending_mesh = Some(url.clone());
        vec![WorkerRequest::FetchMesh { url }]
    }

    /// Decode one raw message and apply it.
    pub fn handle_fields<H>(&mut self, fields: Vec<Field<H>>) -> Option<WorkerRequest> {
        self.handle(Message::decode(fields)?)
    }

    /// Apply one decoded message.
    pub fn handle<H>(&mut self, message: Message<H>) -> Option<WorkerRequest> {
        match message {
            Message::Dom(event) => {
                self.scene.handle_event(&event);
                None
            }
            Message::Custom(command) => self.command(command),
            Message::AttachCanvas(_) => {
                debug!("surface already attached, message ignored");
                None
            }
        }
    }

    fn command(&mut self, command: CustomCommand) -> Option<WorkerRequest> {
        debug!(?command, "custom command");
        match command {
            CustomCommand::LoadMesh { url } => {
                self.pending_mesh = Some(url.clone());
                Some(WorkerRequest::FetchMesh { url })
            }
            CustomCommand::SetClearColor { color } => {
                self.scene.set_clear_color(color);
                None
            }
            CustomCommand::ResetCamera => {
                self.scene.reset_camera();
                None
            }
        }
    }

    /// Replace the imported model with the fetched container.
    ///
    /// Returns the number of mesh entities added. A result for a URL that
    /// is no longer the latest request is dropped.
    pub fn on_mesh_loaded(&mut self, url: &str, bytes: &[u8]) -> Result<usize, WebError> {
        if self.pending_mesh.as_deref() != Some(url) {
            debug!(url, "superseded mesh fetch dropped");
            return Ok(0);
        }
        self.pending_mesh = None;
        let model = parse_glb(bytes)?;
        let cleared = self.scene.clear_imported_models();
        let added = self.scene.add_imported_model(url, &model)?;
        info!(
            url,
            cleared,
            meshes = added.len(),
            index_count = ?model.index_count(),
            "mesh loaded"
        );
        Ok(added.len())
    }

    /// Record that a fetch failed so a later result for it is not applied.
    pub fn on_mesh_failed(&mut self, url: &str, err: &WebError) {
        warn!(url, error = %err, "mesh fetch failed");
        if self.pending_mesh.as_deref() == Some(url) {
            self.pending_mesh = None;
        }
    }

    /// Run exactly one system pass. `time_ms` is the host's frame timestamp.
    pub fn tick(&mut self, time_ms: f64) -> Result<FrameStats, WebError> {
        let stats = self.scene.run_systems_at((time_ms / 1000.0) as f32)?;
        self.frames += 1;
        Ok(stats)
    }
}
