use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::AnimationConfig;
use crate::model::{ActionId, AnimationClip, AnimationMixer, InputState, Store, Subscription};

struct Selection {
    mixer: AnimationMixer,
    actions: HashMap<String, ActionId>,
    current: Option<ActionId>,
    cross_fades: usize,
    cross_fade: f32,
}

impl Selection {
    fn play(&mut self, name: &str) {
        let Some(&action) = self.actions.get(name) else {
            trace!(clip = name, "clip not loaded, ignoring");
            return;
        };
        if self.current == Some(action) {
            return;
        }

        self.mixer.reset(action);
        self.mixer.play(action);
        let previous = self.current.replace(action);

        if let Some(previous) = previous {
            self.mixer.cross_fade_from(action, previous, self.cross_fade, true);
            self.cross_fades += 1;
            debug!(clip = name, "cross-fade");
        }
    }
}

/// Picks `run` while any direction is held and `idle` otherwise.
pub struct AnimationSelector {
    config: AnimationConfig,
    selection: Rc<RefCell<Selection>>,
    subscription: Option<Subscription>,
}

impl AnimationSelector {
    /// Create a mixer action per clip and start on the idle clip. With no
    /// clips the selector stays inert.
    pub fn new(config: AnimationConfig, clips: &[AnimationClip], input: &Store<InputState>) -> Self {
        let mut mixer = AnimationMixer::new();
        let actions = clips
            .iter()
            .map(|clip| (clip.name.clone(), mixer.clip_action(clip)))
            .collect();

        let selection = Rc::new(RefCell::new(Selection {
            mixer,
            actions,
            current: None,
            cross_fades: 0,
            cross_fade: config.cross_fade,
        }));
        selection.borrow_mut().play(&config.idle_clip);

        let subscription = {
            let selection = selection.clone();
            let (idle, run) = (config.idle_clip.clone(), config.run_clip.clone());
            input.subscribe(move |state| {
                let clip = if state.is_moving() { &run } else { &idle };
                selection.borrow_mut().play(clip);
            })
        };

        Self {
            config,
            selection,
            subscription: Some(subscription),
        }
    }

    /// Switch to `name`. No-op if it is current or was never loaded.
    pub fn play(&self, name: &str) {
        self.selection.borrow_mut().play(name);
    }

    pub fn current_clip(&self) -> Option<String> {
        let selection = self.selection.borrow();
        let current = selection.current?;
        selection.mixer.action(current).map(|a| a.clip().name.clone())
    }

    /// How many cross-fades have been started so far.
    pub fn cross_fade_count(&self) -> usize {
        self.selection.borrow().cross_fades
    }

    pub fn is_running(&self) -> bool {
        self.current_clip().as_deref() == Some(self.config.run_clip.as_str())
    }

    /// Advance the mixer clock.
    pub fn update(&self, dt: f32) {
        self.selection.borrow_mut().mixer.update(dt);
    }

    /// Current action's blend weight, for the debug overlay.
    pub fn current_weight(&self) -> f32 {
        let selection = self.selection.borrow();
        selection
            .current
            .and_then(|id| selection.mixer.action(id))
            .map(|a| a.effective_weight())
            .unwrap_or(0.0)
    }

    pub fn dispose(&mut self) {
        self.subscription = None;
    }
}
