use anyhow::Context;
use clap::{Parser, Subcommand};
use kiln_common::EngineConfig;
use kiln_gpu::{FrameStats, HeadlessBackend};
use kiln_mesh::{Semantic, load_glb};
use kiln_protocol::{CustomCommand, DomEvent, Field, Message};
use kiln_scene::Engine;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln-cli", about = "Headless tooling for the kiln engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Summarize the meshes of a GLB file
    Inspect {
        /// Path to the .glb file
        path: PathBuf,
    },
    /// Render frames against the recording backend and report draw stats
    Simulate {
        /// Number of frames to run
        #[arg(short, long, default_value = "60")]
        frames: u32,
        /// GLB file to load instead of the built-in triangle
        #[arg(short, long)]
        mesh: Option<PathBuf>,
        /// Engine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print the wire array of a protocol message
    Encode {
        #[command(subcommand)]
        message: EncodeMessage,
    },
}

#[derive(Subcommand)]
enum EncodeMessage {
    PointerMove { x: f64, y: f64 },
    PointerDown { x: f64, y: f64 },
    PointerUp { x: f64, y: f64 },
    KeyDown { key: String },
    KeyUp { key: String },
    Wheel,
    Resize {
        width: f64,
        height: f64,
        #[arg(default_value = "1")]
        scale_factor: f64,
    },
    /// Wheel zoom; negative deltas zoom in
    Zoom {
        #[arg(allow_negative_numbers = true)]
        delta_y: f64,
        /// 0 pixels, 1 lines, 2 pages
        #[arg(default_value = "0")]
        delta_mode: f64,
    },
    /// A custom command given as JSON, e.g. '{"command":"resetCamera"}'
    Command { json: String },
}

impl EncodeMessage {
    fn into_message(self) -> anyhow::Result<Message<()>> {
        let event = match self {
            Self::PointerMove { x, y } => DomEvent::PointerMove { x, y },
            Self::PointerDown { x, y } => DomEvent::PointerDown { x, y },
            Self::PointerUp { x, y } => DomEvent::PointerUp { x, y },
            Self::KeyDown { key } => DomEvent::KeyDown { key },
            Self::KeyUp { key } => DomEvent::KeyUp { key },
            Self::Wheel => DomEvent::Wheel,
            Self::Resize {
                width,
                height,
                scale_factor,
            } => DomEvent::Resize {
                width,
                height,
                scale_factor,
            },
            Self::Zoom {
                delta_y,
                delta_mode,
            } => DomEvent::Zoom {
                delta_y,
                delta_mode,
            },
            Self::Command { json } => {
                let command = CustomCommand::from_json(&json).context("invalid command JSON")?;
                return Ok(Message::Custom(command));
            }
        };
        Ok(Message::Dom(event))
    }
}

const TRIANGLE: [f32; 9] = [-0.5, -0.5, 0.0, 0.5, -0.5, 0.0, 0.0, 0.5, 0.0];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("kiln-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", kiln_common::crate_info());
            println!("ecs: {}", kiln_ecs::crate_info());
            println!("gpu: {}", kiln_gpu::crate_info());
            println!("mesh: {}", kiln_mesh::crate_info());
            println!("protocol: {}", kiln_protocol::crate_info());
            println!("scene: {}", kiln_scene::crate_info());
            println!("web: {}", kiln_web::crate_info());
        }
        Commands::Inspect { path } => {
            let model = load_glb(&path).with_context(|| format!("importing {}", path.display()))?;
            println!("{}: {} primitive(s)", path.display(), model.primitives.len());
            for (i, prim) in model.primitives.iter().enumerate() {
                let semantics: Vec<&str> = Semantic::PRIORITY
                    .iter()
                    .filter(|s| prim.attribute(**s).is_some())
                    .map(|s| s.attribute_name())
                    .collect();
                let indices = match &prim.indices {
                    Some(indices) => format!("{} x {:?}", indices.len(), indices.format()),
                    None => "none".to_string(),
                };
                println!(
                    "  #{i}: vertices={}, indices={indices}, attributes=[{}]",
                    prim.vertex_count(),
                    semantics.join(", ")
                );
            }
            if let Some(bounds) = model.bounds {
                println!(
                    "bounds: min={:?} max={:?} radius={:.3}",
                    bounds.min.to_array(),
                    bounds.max.to_array(),
                    bounds.radius()
                );
            }
            match model.index_count() {
                Some(count) => println!("index count (last primitive): {count}"),
                None => println!("index count: none"),
            }
        }
        Commands::Simulate {
            frames,
            mesh,
            config,
        } => {
            let config = match config {
                Some(path) => EngineConfig::load(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => EngineConfig::default(),
            };
            let engine = Engine::new(HeadlessBackend::default(), config);
            let mut scene = engine.create_scene();
            scene.add_camera("camera", true);
            match &mesh {
                Some(path) => {
                    let model =
                        load_glb(path).with_context(|| format!("importing {}", path.display()))?;
                    let name = path.display().to_string();
                    scene.add_imported_model(&name, &model)?;
                }
                None => {
                    scene.add_mesh("triangle", &TRIANGLE, None)?;
                }
            }

            let mut total = FrameStats::default();
            for frame in 0..frames {
                let stats = scene.run_systems_at(frame as f32 / 60.0)?;
                total.draw_calls += stats.draw_calls;
                total.vertices += stats.vertices;
            }
            info!(frames, "simulation finished");

            let backend = engine.backend();
            println!("Simulated {frames} frame(s), {} entities", scene.store().len());
            println!(
                "Draw calls: {}, vertices: {}",
                total.draw_calls, total.vertices
            );
            println!(
                "Buffers live: {}, pipelines: {}, bytes uploaded: {}",
                backend.live_buffers(),
                backend.pipelines().len(),
                backend.bytes_written()
            );
        }
        Commands::Encode { message } => {
            let fields = message.into_message()?.encode();
            let parts: Vec<String> = fields.iter().map(render_field).collect();
            println!("[{}]", parts.join(","));
        }
    }

    Ok(())
}

fn render_field(field: &Field<()>) -> String {
    match field {
        Field::Number(n) => n.to_string(),
        Field::Text(s) => serde_json::Value::from(s.as_str()).to_string(),
        Field::Handle(()) => "null".to_string(),
    }
}
