//! Page side: spawn the render worker, hand it the canvas, forward input.

use crate::error::WebError;
use crate::js;
use js_sys::Array;
use kiln_common::EngineConfig;
use kiln_protocol::{Bootstrap, CustomCommand, DomEvent, DomEventKind, Message};
use tracing::{debug, info, warn};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
    AddEventListenerOptions, Event, EventTarget, HtmlCanvasElement, KeyboardEvent, PointerEvent,
    WheelEvent, Window, Worker,
};

#[wasm_bindgen(module = "/js/spawn.js")]
extern "C" {
    /// Created from JS so bundlers see the worker script as a dependency.
    #[wasm_bindgen(js_name = "createWorker")]
    fn create_worker(script: &str, name: &str) -> Worker;
}

/// Boxed entry closure whose address travels in the bootstrap message.
pub(crate) type WorkerEntry = Box<dyn FnOnce() + Send>;

/// Input kinds forwarded by [`connect_worker`].
const FORWARDED: [DomEventKind; 5] = [
    DomEventKind::PointerMove,
    DomEventKind::PointerDown,
    DomEventKind::PointerUp,
    DomEventKind::KeyDown,
    DomEventKind::KeyUp,
];

/// The page's handle to the render worker. Dropping it terminates the worker.
pub struct MainWorker {
    handle: Worker,
    name: String,
}

impl MainWorker {
    /// Start a worker that runs `entry` once it has loaded this module
    /// against the page's shared memory.
    pub fn spawn(
        config: &EngineConfig,
        id: u32,
        entry: impl FnOnce() + Send + 'static,
    ) -> Result<Self, WebError> {
        let handle = create_worker(&config.worker_script, &config.worker_name);
        // Double box: `dyn FnOnce` is unsized, the outer box gives a thin pointer.
        let ptr = Box::into_raw(Box::new(Box::new(entry) as WorkerEntry));
        let bootstrap = Bootstrap {
            module: wasm_bindgen::module(),
            worker_id: id,
            memory: wasm_bindgen::memory(),
            entry_point: ptr as u32,
        };
        if let Err(err) = handle.post_message(&js::array_from_fields(bootstrap.encode())) {
            // SAFETY: the message was not delivered, so nothing else owns `ptr`.
            drop(unsafe { Box::from_raw(ptr) });
            handle.terminate();
            return Err(WebError::js(err));
        }
        info!(worker = %config.worker_name, id, "render worker spawned");
        Ok(Self {
            handle,
            name: config.worker_name.clone(),
        })
    }

    /// Transfer drawing control of `canvas` to the worker. The page cannot
    /// get a context for it afterwards.
    pub fn attach_canvas(&self, canvas: &HtmlCanvasElement) -> Result<(), WebError> {
        let offscreen = canvas.transfer_control_to_offscreen().map_err(WebError::js)?;
        let message = js::encode(Message::AttachCanvas(JsValue::from(offscreen.clone())));
        let transfer = Array::of1(&offscreen);
        self.handle
            .post_message_with_transfer(&message, &transfer)
            .map_err(WebError::js)?;
        debug!(worker = %self.name, "canvas transferred");
        Ok(())
    }

    pub fn post(&self, message: Message<JsValue>) -> Result<(), WebError> {
        self.handle
            .post_message(&js::encode(message))
            .map_err(WebError::js)
    }

    pub fn worker(&self) -> &Worker {
        &self.handle
    }
}

impl Drop for MainWorker {
    fn drop(&mut self) {
        self.handle.terminate();
        info!(worker = %self.name, "render worker terminated");
    }
}

/// Registered DOM listeners. Dropping (or [`disconnect`](Self::disconnect))
/// removes every one of them.
pub struct Disconnect {
    target: EventTarget,
    listeners: Vec<(&'static str, Closure<dyn FnMut(Event)>)>,
}

impl Disconnect {
    fn new(target: &EventTarget) -> Self {
        Self {
            target: target.clone(),
            listeners: Vec::new(),
        }
    }

    fn listen(
        &mut self,
        name: &'static str,
        options: Option<&AddEventListenerOptions>,
        callback: impl FnMut(Event) + 'static,
    ) -> Result<(), WebError> {
        let closure = Closure::<dyn FnMut(Event)>::new(callback);
        let function: &js_sys::Function = closure.as_ref().unchecked_ref();
        match options {
            Some(options) => self
                .target
                .add_event_listener_with_callback_and_add_event_listener_options(
                    name, function, options,
                ),
            None => self.target.add_event_listener_with_callback(name, function),
        }
        .map_err(WebError::js)?;
        self.listeners.push((name, closure));
        Ok(())
    }

    /// Number of listeners still attached.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn disconnect(self) {}
}

impl Drop for Disconnect {
    fn drop(&mut self) {
        for (name, closure) in self.listeners.drain(..) {
            if let Err(err) = self
                .target
                .remove_event_listener_with_callback(name, closure.as_ref().unchecked_ref())
            {
                warn!(event = name, error = ?err, "listener removal failed");
            }
        }
    }
}

/// Forward pointer and keyboard input on `target` to `worker`.
///
/// Disconnecting stops the forwarding only; the worker's render loop keeps
/// running.
pub fn connect_worker(worker: &Worker, target: &EventTarget) -> Result<Disconnect, WebError> {
    let mut listeners = Disconnect::new(target);
    for kind in FORWARDED {
        let worker = worker.clone();
        listeners.listen(kind.dom_name(), None, move |event: Event| {
            let Some(dom) = dom_event(kind, &event) else {
                return;
            };
            if let Err(err) = worker.post_message(&js::encode(Message::Dom(dom))) {
                warn!(event = kind.dom_name(), error = ?err, "input not forwarded");
            }
        })?;
    }
    debug!(listeners = listeners.len(), "input forwarding connected");
    Ok(listeners)
}

/// Forward window resizes, in CSS pixels plus the device pixel ratio.
pub fn forward_resize(worker: &Worker, window: &Window) -> Result<Disconnect, WebError> {
    let mut listeners = Disconnect::new(window);
    let worker = worker.clone();
    let window = window.clone();
    listeners.listen("resize", None, move |_event: Event| {
        let size = (window.inner_width(), window.inner_height());
        let (Ok(width), Ok(height)) = size else {
            return;
        };
        let (Some(width), Some(height)) = (width.as_f64(), height.as_f64()) else {
            return;
        };
        let event = DomEvent::Resize {
            width,
            height,
            scale_factor: window.device_pixel_ratio(),
        };
        if let Err(err) = worker.post_message(&js::encode(Message::Dom(event))) {
            warn!(error = ?err, "resize not forwarded");
        }
    })?;
    Ok(listeners)
}

/// Forward wheel scrolling over `target` as zoom events. The listener is
/// not passive, so the page does not scroll underneath.
pub fn forward_zoom(worker: &Worker, target: &EventTarget) -> Result<Disconnect, WebError> {
    let mut listeners = Disconnect::new(target);
    let worker = worker.clone();
    let options = AddEventListenerOptions::new();
    options.set_passive(false);
    listeners.listen("wheel", Some(&options), move |event: Event| {
        let Some(wheel) = event.dyn_ref::<WheelEvent>() else {
            return;
        };
        wheel.prevent_default();
        let zoom = DomEvent::Zoom {
            delta_y: wheel.delta_y(),
            delta_mode: f64::from(wheel.delta_mode()),
        };
        if let Err(err) = worker.post_message(&js::encode(Message::Dom(zoom))) {
            warn!(error = ?err, "zoom not forwarded");
        }
    })?;
    Ok(listeners)
}

fn dom_event(kind: DomEventKind, event: &Event) -> Option<DomEvent> {
    let pointer = || {
        let e = event.dyn_ref::<PointerEvent>()?;
        Some((f64::from(e.client_x()), f64::from(e.client_y())))
    };
    let key = || event.dyn_ref::<KeyboardEvent>().map(KeyboardEvent::key);
    Some(match kind {
        DomEventKind::PointerMove => {
            let (x, y) = pointer()?;
            DomEvent::PointerMove { x, y }
        }
        DomEventKind::PointerDown => {
            let (x, y) = pointer()?;
            DomEvent::PointerDown { x, y }
        }
        DomEventKind::PointerUp => {
            let (x, y) = pointer()?;
            DomEvent::PointerUp { x, y }
        }
        DomEventKind::KeyDown => DomEvent::KeyDown { key: key()? },
        DomEventKind::KeyUp => DomEvent::KeyUp { key: key()? },
        DomEventKind::Wheel | DomEventKind::Resize | DomEventKind::Zoom => return None,
    })
}

/// Look up the canvas and size its drawing buffer to physical pixels.
fn find_canvas(window: &Window, selector: &str) -> Result<HtmlCanvasElement, WebError> {
    let document = window.document().ok_or(WebError::MissingGlobal("document"))?;
    let canvas = document
        .query_selector(selector)
        .map_err(WebError::js)?
        .ok_or_else(|| WebError::CanvasNotFound(selector.to_string()))?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| WebError::CanvasNotFound(selector.to_string()))?;
    let scale = window.device_pixel_ratio();
    let width = (f64::from(canvas.client_width()) * scale).max(1.0) as u32;
    let height = (f64::from(canvas.client_height()) * scale).max(1.0) as u32;
    canvas.set_width(width);
    canvas.set_height(height);
    Ok(canvas)
}

/// A running engine as seen from the page.
#[wasm_bindgen]
pub struct WebApp {
    worker: MainWorker,
    input: Option<Disconnect>,
    zoom: Option<Disconnect>,
    _resize: Disconnect,
}

#[wasm_bindgen]
impl WebApp {
    /// Stop forwarding input. Rendering continues.
    pub fn disconnect(&mut self) {
        let input = self.input.take();
        let zoom = self.zoom.take();
        if input.is_some() || zoom.is_some() {
            info!("input forwarding disconnected");
        }
    }

    /// Send a JSON-encoded custom command to the render worker.
    #[wasm_bindgen(js_name = "sendCommand")]
    pub fn send_command(&self, json: &str) -> Result<(), JsValue> {
        let command =
            CustomCommand::from_json(json).map_err(|err| JsValue::from_str(&err.to_string()))?;
        self.worker.post(Message::Custom(command))?;
        Ok(())
    }

    #[wasm_bindgen(js_name = "loadMesh")]
    pub fn load_mesh(&self, url: &str) -> Result<(), JsValue> {
        let command = CustomCommand::LoadMesh { url: url.to_string() };
        self.worker.post(Message::Custom(command))?;
        Ok(())
    }
}

/// Page entry point: spawn the render worker for the configured canvas.
#[wasm_bindgen]
pub fn start(config_json: &str) -> Result<WebApp, JsValue> {
    crate::init_logging();
    let config = EngineConfig::from_json(config_json).map_err(WebError::from)?;
    let window = web_sys::window().ok_or(WebError::MissingGlobal("window"))?;
    let canvas = find_canvas(&window, &config.canvas_selector)?;

    let worker_config = config.clone();
    let worker = MainWorker::spawn(&config, 1, move || {
        crate::worker::spawn_render_loop(worker_config);
    })?;
    worker.attach_canvas(&canvas)?;
    let input = connect_worker(worker.worker(), &window)?;
    let zoom = forward_zoom(worker.worker(), &canvas)?;
    let resize = forward_resize(worker.worker(), &window)?;
    info!(canvas = %config.canvas_selector, "engine started");
    Ok(WebApp {
        worker,
        input: Some(input),
        zoom: Some(zoom),
        _resize: resize,
    })
}
