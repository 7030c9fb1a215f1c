//! Rendering-context side: bootstrap, surface acquisition and the frame loop.

use crate::error::WebError;
use crate::js;
use crate::main_thread::WorkerEntry;
use crate::runtime::{RenderWorker, WorkerRequest};
use js_sys::{Array, Function, Promise, Uint8Array};
use kiln_common::EngineConfig;
use kiln_gpu::{GpuError, ShaderSource, WgpuBackend};
use kiln_protocol::{BootstrapGuard, Message};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error, info, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, spawn_local};
use web_sys::{DedicatedWorkerGlobalScope, MessageEvent, OffscreenCanvas, Response};

type SharedRuntime = Rc<RefCell<RenderWorker<WgpuBackend>>>;

thread_local! {
    static GUARD: RefCell<BootstrapGuard> = RefCell::new(BootstrapGuard::new());
    static INBOX: RefCell<Option<Rc<Inbox>>> = const { RefCell::new(None) };
}

/// Messages received by the worker, drained once per frame.
#[derive(Default)]
struct Inbox {
    queue: RefCell<VecDeque<Message<JsValue>>>,
    canvas: RefCell<Option<OffscreenCanvas>>,
    canvas_waiter: RefCell<Option<Function>>,
}

impl Inbox {
    /// Take over the worker's `onmessage`. Lives as long as the worker.
    fn install(scope: &DedicatedWorkerGlobalScope) -> Rc<Self> {
        let inbox = Rc::new(Self::default());
        let receiver = inbox.clone();
        let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            receiver.push(event.data());
        });
        scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();
        inbox
    }

    fn push(&self, data: JsValue) {
        let Some(message) = js::decode(&data) else {
            return;
        };
        let Message::AttachCanvas(handle) = message else {
            self.queue.borrow_mut().push_back(message);
            return;
        };
        let Ok(canvas) = handle.dyn_into::<OffscreenCanvas>() else {
            warn!("attach message without an offscreen canvas ignored");
            return;
        };
        if let Some(resolve) = self.canvas_waiter.borrow_mut().take() {
            if let Err(err) = resolve.call1(&JsValue::NULL, &canvas) {
                error!(error = ?err, "canvas hand-off failed");
            }
            return;
        }
        let mut slot = self.canvas.borrow_mut();
        if slot.is_some() {
            debug!("second canvas ignored");
            return;
        }
        *slot = Some(canvas);
    }

    fn drain(&self) -> Vec<Message<JsValue>> {
        self.queue.borrow_mut().drain(..).collect()
    }

    async fn canvas(&self) -> Result<OffscreenCanvas, WebError> {
        if let Some(canvas) = self.canvas.borrow_mut().take() {
            return Ok(canvas);
        }
        let promise = Promise::new(&mut |resolve, _reject| {
            *self.canvas_waiter.borrow_mut() = Some(resolve);
        });
        let value = JsFuture::from(promise).await.map_err(WebError::js)?;
        value.dyn_into::<OffscreenCanvas>().map_err(WebError::js)
    }
}

/// Called by the worker script with the first message it received and the
/// messages that arrived while the module was loading.
///
/// Only the first well-formed bootstrap per worker runs the entry closure.
#[wasm_bindgen]
pub fn worker_bootstrap(message: Array, backlog: Array) -> Result<(), JsValue> {
    let accepted = GUARD.with(|guard| guard.borrow_mut().accept(js::fields_from_array(&message)));
    let Some(bootstrap) = accepted else {
        return Ok(());
    };
    crate::init_logging();

    let scope = global_scope()?;
    let inbox = Inbox::install(&scope);
    for data in backlog.iter() {
        inbox.push(data);
    }
    INBOX.with(|slot| *slot.borrow_mut() = Some(inbox));
    info!(worker_id = bootstrap.worker_id, "render worker bootstrapped");

    // SAFETY: the address was produced by `Box::into_raw` in `MainWorker::spawn`
    // and the guard lets it through exactly once.
    let entry = unsafe { Box::from_raw(bootstrap.entry_point as *mut WorkerEntry) };
    (*entry)();
    Ok(())
}

/// Start the render loop on this worker. Runs once the canvas arrives.
pub(crate) fn spawn_render_loop(config: EngineConfig) {
    spawn_local(async move {
        if let Err(err) = run(config).await {
            error!(error = %err, "render worker failed to start");
        }
    });
}

fn global_scope() -> Result<DedicatedWorkerGlobalScope, WebError> {
    js_sys::global()
        .dyn_into::<DedicatedWorkerGlobalScope>()
        .map_err(|_| WebError::MissingGlobal("worker global scope"))
}

async fn run(config: EngineConfig) -> Result<(), WebError> {
    let inbox = INBOX
        .with(|slot| slot.borrow().clone())
        .ok_or(WebError::MissingGlobal("worker inbox"))?;
    let scope = global_scope()?;

    let canvas = inbox.canvas().await?;
    let (width, height) = (canvas.width(), canvas.height());
    info!(width, height, "surface received");

    let shaders = fetch_shaders(&scope, &config).await?;
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::BROWSER_WEBGPU,
        ..Default::default()
    });
    let surface = instance
        .create_surface(wgpu::SurfaceTarget::OffscreenCanvas(canvas))
        .map_err(|err| GpuError::ResourceAcquisition {
            what: format!("surface: {err}"),
        })?;
    let backend = WgpuBackend::new(&instance, surface, width, height).await?;

    let mut worker = RenderWorker::new(backend, config, shaders)?;
    let requests = worker.initial_requests();
    let worker: SharedRuntime = Rc::new(RefCell::new(worker));
    for request in requests {
        dispatch(&scope, &worker, request);
    }
    start_frame_loop(scope, inbox, worker)
}

/// Schedule one frame per animation callback, forever.
fn start_frame_loop(
    scope: DedicatedWorkerGlobalScope,
    inbox: Rc<Inbox>,
    worker: SharedRuntime,
) -> Result<(), WebError> {
    let frame: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));
    let next = frame.clone();
    let loop_scope = scope.clone();

    *frame.borrow_mut() = Some(Closure::new(move |time: f64| {
        let mut requests = Vec::new();
        let result = {
            let mut worker = worker.borrow_mut();
            for message in inbox.drain() {
                requests.extend(worker.handle(message));
            }
            worker.tick(time)
        };
        for request in requests {
            dispatch(&loop_scope, &worker, request);
        }
        if let Err(err) = result {
            error!(error = %err, "frame failed, render loop stopped");
            return;
        }
        if let Some(callback) = next.borrow().as_ref() {
            if let Err(err) = loop_scope.request_animation_frame(callback.as_ref().unchecked_ref()) {
                error!(error = ?err, "frame scheduling failed, render loop stopped");
            }
        }
    }));

    let first = frame.borrow();
    if let Some(callback) = first.as_ref() {
        scope
            .request_animation_frame(callback.as_ref().unchecked_ref())
            .map_err(WebError::js)?;
    }
    info!("render loop started");
    Ok(())
}

fn dispatch(scope: &DedicatedWorkerGlobalScope, worker: &SharedRuntime, request: WorkerRequest) {
    match request {
        WorkerRequest::FetchMesh { url } => {
            let scope = scope.clone();
            let worker = worker.clone();
            spawn_local(async move {
                debug!(url = %url, "fetching mesh");
                match fetch_bytes(&scope, &url).await {
                    Ok(bytes) => {
                        if let Err(err) = worker.borrow_mut().on_mesh_loaded(&url, &bytes) {
                            error!(url = %url, error = %err, "mesh load failed");
                        }
                    }
                    Err(err) => worker.borrow_mut().on_mesh_failed(&url, &err),
                }
            });
        }
    }
}

/// Custom shader sources, if configured. A single URL serves both stages.
async fn fetch_shaders(
    scope: &DedicatedWorkerGlobalScope,
    config: &EngineConfig,
) -> Result<Option<(ShaderSource, ShaderSource)>, WebError> {
    let urls = (&config.vertex_shader_url, &config.fragment_shader_url);
    let (vertex_url, fragment_url) = match urls {
        (Some(v), Some(f)) => (v, f),
        (Some(only), None) | (None, Some(only)) => (only, only),
        (None, None) => return Ok(None),
    };
    let vertex = ShaderSource::new(vertex_url.as_str(), fetch_text(scope, vertex_url).await?);
    let fragment = if fragment_url == vertex_url {
        ShaderSource::new(fragment_url.as_str(), vertex.text.clone())
    } else {
        ShaderSource::new(fragment_url.as_str(), fetch_text(scope, fragment_url).await?)
    };
    Ok(Some((vertex, fragment)))
}

async fn fetch_response(scope: &DedicatedWorkerGlobalScope, url: &str) -> Result<Response, WebError> {
    let fetch_err = |reason: String| WebError::Fetch {
        url: url.to_string(),
        reason,
    };
    let value = JsFuture::from(scope.fetch_with_str(url))
        .await
        .map_err(|err| fetch_err(format!("{err:?}")))?;
    let response: Response = value.dyn_into().map_err(WebError::js)?;
    if !response.ok() {
        return Err(fetch_err(format!(
            "HTTP {} {}",
            response.status(),
            response.status_text()
        )));
    }
    Ok(response)
}

async fn fetch_bytes(scope: &DedicatedWorkerGlobalScope, url: &str) -> Result<Vec<u8>, WebError> {
    let response = fetch_response(scope, url).await?;
    let buffer = JsFuture::from(response.array_buffer().map_err(WebError::js)?)
        .await
        .map_err(WebError::js)?;
    Ok(Uint8Array::new(&buffer).to_vec())
}

async fn fetch_text(scope: &DedicatedWorkerGlobalScope, url: &str) -> Result<String, WebError> {
    let response = fetch_response(scope, url).await?;
    let text = JsFuture::from(response.text().map_err(WebError::js)?)
        .await
        .map_err(WebError::js)?;
    text.as_string().ok_or_else(|| WebError::Fetch {
        url: url.to_string(),
        reason: "response body is not text".into(),
    })
}
