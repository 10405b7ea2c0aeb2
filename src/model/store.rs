use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

type Listener<S> = Rc<dyn Fn(&S)>;

struct StoreInner<S> {
    initial: S,
    state: RefCell<S>,
    listeners: RefCell<Vec<(u64, Listener<S>)>>,
    next_id: Cell<u64>,
}

/// Small observable value container.
///
/// Cloning a `Store` clones the handle, not the state: every clone observes
/// and mutates the same value. Listeners run synchronously on every
/// `set_state`/`replace`/`reset`, in subscription order, with no coalescing.
pub struct Store<S> {
    inner: Rc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<S: Clone + 'static> Store<S> {
    pub fn new(initial: S) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                state: RefCell::new(initial.clone()),
                initial,
                listeners: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn get(&self) -> S {
        self.inner.state.borrow().clone()
    }

    /// Partial update: mutate the fields you care about, the rest is kept.
    pub fn set_state(&self, update: impl FnOnce(&mut S)) {
        let snapshot = {
            let mut state = self.inner.state.borrow_mut();
            update(&mut state);
            state.clone()
        };
        self.notify(&snapshot);
    }

    pub fn replace(&self, value: S) {
        self.set_state(|state| *state = value);
    }

    /// Back to the value the store was created with.
    pub fn reset(&self) {
        let initial = self.inner.initial.clone();
        self.replace(initial);
    }

    pub fn subscribe(&self, listener: impl Fn(&S) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.listeners.borrow_mut().push((id, Rc::new(listener)));

        let weak: Weak<StoreInner<S>> = Rc::downgrade(&self.inner);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    fn notify(&self, snapshot: &S) {
        // listeners may (un)subscribe while being notified, so iterate a copy
        let listeners: Vec<Listener<S>> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }
}

/// Handle returned by [`Store::subscribe`]. The listener stays registered
/// until this is dropped or [`Subscription::unsubscribe`] is called.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

/// Directional intent published by the input source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
}

impl InputState {
    pub fn is_moving(&self) -> bool {
        self.forward || self.backward || self.left || self.right
    }
}

/// Drawable surface size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeState {
    pub width: u32,
    pub height: u32,
    pub aspect: f32,
    pub pixel_ratio: f32,
}

impl SizeState {
    pub fn new(width: u32, height: u32, device_pixel_ratio: f32) -> Self {
        Self {
            width,
            height,
            aspect: width as f32 / height.max(1) as f32,
            pixel_ratio: device_pixel_ratio.min(2.0),
        }
    }
}

/// One-way readiness flags for the two asynchronous loads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppReadiness {
    pub physics_ready: bool,
    pub assets_ready: bool,
}

impl AppReadiness {
    pub fn is_ready(&self) -> bool {
        self.physics_ready && self.assets_ready
    }
}

/// The three stores shared across subsystems of one app session.
#[derive(Clone)]
pub struct Stores {
    pub size: Store<SizeState>,
    pub readiness: Store<AppReadiness>,
    pub input: Store<InputState>,
}

impl Stores {
    pub fn new(size: SizeState) -> Self {
        Self {
            size: Store::new(size),
            readiness: Store::new(AppReadiness::default()),
            input: Store::new(InputState::default()),
        }
    }

    pub fn reset(&self) {
        self.size.reset();
        self.readiness.reset();
        self.input.reset();
    }
}
