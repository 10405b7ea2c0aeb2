use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{error, info};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Document, Event, EventTarget, HtmlCanvasElement, KeyboardEvent, MouseEvent, TouchEvent, WheelEvent, Window,
};

use crate::config::AppConfig;
use crate::controller::frame_loop::{Clock, SystemClock};
use crate::controller::input::{wasm as dom, InputEvent};
use crate::controller::App;
use crate::logging;
use crate::model::SizeState;
use crate::view::{GpuContext, SceneRenderer};

type WebApp = App<SceneRenderer>;
type EguiEvents = Rc<RefCell<Vec<egui::Event>>>;

thread_local! {
    static RUNNING: RefCell<Option<Running>> = const { RefCell::new(None) };
}

struct Running {
    app: Rc<RefCell<WebApp>>,
    frames: Option<AnimationFrames>,
    _listeners: Vec<Listener>,
}

#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    logging::init();
    let (window, document, canvas) = init_canvas()?;
    let size = canvas_size(&window);
    apply_size(&canvas, size);

    let app = Rc::new(RefCell::new(WebApp::start(AppConfig::default(), size)));
    let egui_events: EguiEvents = Rc::new(RefCell::new(Vec::new()));
    let listeners = setup_input_listeners(&window, &document, &canvas, &app, &egui_events)?;
    RUNNING.with(|running| {
        *running.borrow_mut() = Some(Running { app: app.clone(), frames: None, _listeners: listeners });
    });

    // Initialize GPU
    let gpu = GpuContext::new(&canvas, size.width, size.height)
        .await
        .map_err(|e| js_error(format!("GPU init failed: {e}")))?;
    if app.borrow().is_disposed() {
        return Ok(());
    }
    app.borrow_mut().set_renderer(SceneRenderer::new(gpu, size.pixel_ratio));

    let clock = SystemClock::new();
    let frames = AnimationFrames::start(window.clone(), {
        let app = app.clone();
        move || run_frame(&app, &egui_events, &window, clock.now())
    })?;
    RUNNING.with(|running| {
        if let Some(running) = running.borrow_mut().as_mut() {
            running.frames = Some(frames);
        }
    });
    info!("web app running");
    Ok(())
}

/// Stop the frame loop, remove every DOM listener and release the world.
#[wasm_bindgen]
pub fn dispose() {
    let Some(mut running) = RUNNING.with(|running| running.borrow_mut().take()) else { return };
    if let Some(frames) = running.frames.as_mut() {
        frames.cancel();
    }
    running.app.borrow_mut().dispose();
}

fn run_frame(app: &Rc<RefCell<WebApp>>, egui_events: &EguiEvents, window: &Window, now: f64) {
    let mut app = app.borrow_mut();
    if let Some(renderer) = app.renderer_mut() {
        let events = std::mem::take(&mut *egui_events.borrow_mut());
        renderer.set_egui_input(egui::RawInput { events, ..Default::default() });
    }

    if let Err(err) = app.frame(now) {
        error!("frame failed: {err}");
    }

    let output = app.renderer_mut().and_then(SceneRenderer::take_platform_output);
    for command in output.into_iter().flat_map(|o| o.commands) {
        if let egui::OutputCommand::OpenUrl(open) = command {
            let _ = window.open_with_url_and_target(&open.url, "_blank");
        }
    }
}

/// DOM listener, removed again on drop.
struct Listener {
    target: EventTarget,
    kind: &'static str,
    closure: Closure<dyn FnMut(Event)>,
}

impl Listener {
    fn add(target: &EventTarget, kind: &'static str, f: impl FnMut(Event) + 'static) -> Result<Self, JsValue> {
        let closure = Closure::wrap(Box::new(f) as Box<dyn FnMut(Event)>);
        target.add_event_listener_with_callback(kind, closure.as_ref().unchecked_ref())?;
        Ok(Self { target: target.clone(), kind, closure })
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = self
            .target
            .remove_event_listener_with_callback(self.kind, self.closure.as_ref().unchecked_ref());
    }
}

/// Setup all input event listeners with platform-agnostic abstractions
fn setup_input_listeners(
    window: &Window,
    document: &Document,
    canvas: &HtmlCanvasElement,
    app: &Rc<RefCell<WebApp>>,
    egui_events: &EguiEvents,
) -> Result<Vec<Listener>, JsValue> {
    let mut listeners = Vec::new();

    // Keyboard, by physical key code
    for (kind, is_down) in [("keydown", true), ("keyup", false)] {
        let app = app.clone();
        listeners.push(Listener::add(document, kind, move |e| {
            let Some(e) = e.dyn_ref::<KeyboardEvent>() else { return };
            if e.code().starts_with("Arrow") {
                e.prevent_default();
            }
            app.borrow_mut().handle_input(dom::keyboard_event_to_input(e, is_down));
        })?);
    }

    // Focus loss and hidden tab release every held key
    {
        let app = app.clone();
        listeners.push(Listener::add(window, "blur", move |_| {
            app.borrow_mut().handle_input(InputEvent::FocusLost);
        })?);
    }
    {
        let app = app.clone();
        let doc = document.clone();
        listeners.push(Listener::add(document, "visibilitychange", move |_| {
            app.borrow_mut()
                .handle_input(InputEvent::VisibilityChanged { visible: !doc.hidden() });
        })?);
    }

    // Mouse: overlay first, then orbit drag
    {
        let app = app.clone();
        let egui_events = egui_events.clone();
        listeners.push(Listener::add(canvas, "mousemove", move |e| {
            let Some(e) = e.dyn_ref::<MouseEvent>() else { return };
            let pos = egui::pos2(e.offset_x() as f32, e.offset_y() as f32);
            egui_events.borrow_mut().push(egui::Event::PointerMoved(pos));

            let mut app = app.borrow_mut();
            let over_overlay = app
                .renderer_mut()
                .is_some_and(|r| r.egui_ctx().is_pointer_over_area());
            if over_overlay {
                return;
            }
            if let Some(event) = dom::mouse_drag_to_input(e) {
                app.handle_input(event);
            }
        })?);
    }
    for (kind, pressed) in [("mousedown", true), ("mouseup", false)] {
        let egui_events = egui_events.clone();
        listeners.push(Listener::add(canvas, kind, move |e| {
            let Some(e) = e.dyn_ref::<MouseEvent>() else { return };
            if e.button() != 0 {
                return;
            }
            egui_events.borrow_mut().push(egui::Event::PointerButton {
                pos: egui::pos2(e.offset_x() as f32, e.offset_y() as f32),
                button: egui::PointerButton::Primary,
                pressed,
                modifiers: egui::Modifiers::default(),
            });
        })?);
    }
    {
        let app = app.clone();
        listeners.push(Listener::add(canvas, "wheel", move |e| {
            let Some(e) = e.dyn_ref::<WheelEvent>() else { return };
            e.prevent_default();
            app.borrow_mut().handle_input(dom::wheel_to_input(e));
        })?);
    }

    // Touch joystick, anchored where the finger went down
    let origin: Rc<Cell<Option<(f32, f32)>>> = Rc::new(Cell::new(None));
    {
        let origin = origin.clone();
        listeners.push(Listener::add(canvas, "touchstart", move |e| {
            let Some(e) = e.dyn_ref::<TouchEvent>() else { return };
            origin.set(first_touch(e));
        })?);
    }
    {
        let app = app.clone();
        let origin = origin.clone();
        listeners.push(Listener::add(canvas, "touchmove", move |e| {
            let Some(e) = e.dyn_ref::<TouchEvent>() else { return };
            e.prevent_default();
            if let (Some(start), Some(current)) = (origin.get(), first_touch(e)) {
                app.borrow_mut().handle_input(dom::touch_to_joystick(start, current));
            }
        })?);
    }
    for kind in ["touchend", "touchcancel"] {
        let app = app.clone();
        let origin = origin.clone();
        listeners.push(Listener::add(canvas, kind, move |_| {
            origin.set(None);
            app.borrow_mut().handle_input(InputEvent::JoystickReleased);
        })?);
    }

    // Window resize
    {
        let app = app.clone();
        let win = window.clone();
        let canvas = canvas.clone();
        listeners.push(Listener::add(window, "resize", move |_| {
            let size = canvas_size(&win);
            apply_size(&canvas, size);
            app.borrow_mut().resize(size.width, size.height, size.pixel_ratio);
        })?);
    }

    Ok(listeners)
}

fn first_touch(e: &TouchEvent) -> Option<(f32, f32)> {
    let touch = e.touches().get(0)?;
    Some((touch.client_x() as f32, touch.client_y() as f32))
}

/// requestAnimationFrame loop that can be cancelled.
struct AnimationFrames {
    window: Window,
    request: Rc<Cell<Option<i32>>>,
    callback: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>,
}

impl AnimationFrames {
    fn start(window: Window, mut f: impl FnMut() + 'static) -> Result<Self, JsValue> {
        let request = Rc::new(Cell::new(None));
        let callback: Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::new(RefCell::new(None));

        let this: Weak<RefCell<Option<Closure<dyn FnMut(f64)>>>> = Rc::downgrade(&callback);
        let next = {
            let window = window.clone();
            let request = request.clone();
            move || {
                let Some(callback) = this.upgrade() else { return };
                let callback = callback.borrow();
                let Some(closure) = callback.as_ref() else { return };
                match window.request_animation_frame(closure.as_ref().unchecked_ref()) {
                    Ok(id) => request.set(Some(id)),
                    Err(err) => error!("requestAnimationFrame failed: {err:?}"),
                }
            }
        };

        *callback.borrow_mut() = Some(Closure::wrap(Box::new(move |_timestamp: f64| {
            f();
            // Recursively schedule next frame
            next();
        }) as Box<dyn FnMut(f64)>));

        let id = match callback.borrow().as_ref() {
            Some(closure) => window.request_animation_frame(closure.as_ref().unchecked_ref())?,
            None => return Err(js_error("frame callback missing")),
        };
        request.set(Some(id));

        Ok(Self { window, request, callback })
    }

    fn cancel(&mut self) {
        if let Some(id) = self.request.take() {
            let _ = self.window.cancel_animation_frame(id);
        }
        self.callback.borrow_mut().take();
    }
}

impl Drop for AnimationFrames {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn canvas_size(window: &Window) -> SizeState {
    let css_width = window.inner_width().ok().and_then(|v| v.as_f64()).unwrap_or(800.0);
    let css_height = window.inner_height().ok().and_then(|v| v.as_f64()).unwrap_or(600.0);
    let ratio = window.device_pixel_ratio().min(2.0);
    SizeState::new(
        (css_width * ratio).round().max(1.0) as u32,
        (css_height * ratio).round().max(1.0) as u32,
        ratio as f32,
    )
}

fn apply_size(canvas: &HtmlCanvasElement, size: SizeState) {
    canvas.set_width(size.width);
    canvas.set_height(size.height);
}

fn init_canvas() -> Result<(Window, Document, HtmlCanvasElement), JsValue> {
    let window = web_sys::window().ok_or(js_error("no global `window`"))?;
    let document = window.document().ok_or(js_error("no document on window"))?;
    let body = document.body().ok_or(js_error("no body on document"))?;
    let canvas_el = document
        .create_element("canvas")?
        .dyn_into::<HtmlCanvasElement>()
        .map_err(|_| js_error("failed to create canvas"))?;
    canvas_el.set_attribute("style", "display:block;width:100vw;height:100vh;touch-action:none")?;
    body.append_child(&canvas_el)?;
    Ok((window, document, canvas_el))
}

fn js_error<E: Into<String>>(msg: E) -> JsValue {
    js_sys::Error::new(&msg.into()).into()
}
