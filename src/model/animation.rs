/// Named animation clip. Only its timing matters to the mixer; keyframe
/// tracks are applied by whoever skins the avatar.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationClip {
    pub name: String,
    pub duration: f32,
}

impl AnimationClip {
    pub fn new(name: impl Into<String>, duration: f32) -> Self {
        Self { name: name.into(), duration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub usize);

/// Linear ramp from `from` to `to` over `[start, start + duration]` on the
/// mixer clock.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start: f32,
    duration: f32,
    from: f32,
    to: f32,
}

impl Ramp {
    fn value_at(&self, time: f32) -> f32 {
        if self.duration <= 0.0 {
            return self.to;
        }
        let t = ((time - self.start) / self.duration).clamp(0.0, 1.0);
        self.from + (self.to - self.from) * t
    }

    fn finished_at(&self, time: f32) -> bool {
        time >= self.start + self.duration
    }
}

/// Playback state of one clip inside a mixer.
#[derive(Debug, Clone)]
pub struct AnimationAction {
    clip: AnimationClip,
    pub time: f32,
    pub time_scale: f32,
    pub weight: f32,
    pub enabled: bool,
    playing: bool,
    fade: Option<Ramp>,
    warp: Option<Ramp>,
    effective_weight: f32,
    effective_time_scale: f32,
}

impl AnimationAction {
    fn new(clip: AnimationClip) -> Self {
        Self {
            clip,
            time: 0.0,
            time_scale: 1.0,
            weight: 1.0,
            enabled: true,
            playing: false,
            fade: None,
            warp: None,
            effective_weight: 1.0,
            effective_time_scale: 1.0,
        }
    }

    pub fn clip(&self) -> &AnimationClip {
        &self.clip
    }

    pub fn is_playing(&self) -> bool {
        self.playing && self.enabled
    }

    pub fn is_fading(&self) -> bool {
        self.fade.is_some()
    }

    pub fn is_warping(&self) -> bool {
        self.warp.is_some()
    }

    /// Blend weight after fading, as of the last mixer update.
    pub fn effective_weight(&self) -> f32 {
        self.effective_weight
    }

    pub fn effective_time_scale(&self) -> f32 {
        self.effective_time_scale
    }
}

/// Advances clip actions on a shared clock and resolves their fade and
/// time-warp ramps.
#[derive(Debug, Default)]
pub struct AnimationMixer {
    time: f32,
    actions: Vec<AnimationAction>,
}

impl AnimationMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Action for `clip`, created on first request.
    pub fn clip_action(&mut self, clip: &AnimationClip) -> ActionId {
        if let Some(idx) = self.actions.iter().position(|a| a.clip.name == clip.name) {
            return ActionId(idx);
        }
        self.actions.push(AnimationAction::new(clip.clone()));
        ActionId(self.actions.len() - 1)
    }

    pub fn action(&self, id: ActionId) -> Option<&AnimationAction> {
        self.actions.get(id.0)
    }

    pub fn play(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.playing = true;
        }
    }

    pub fn stop(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.playing = false;
            action.fade = None;
            action.warp = None;
        }
    }

    /// Rewind to the start with full weight and no pending ramps.
    pub fn reset(&mut self, id: ActionId) {
        if let Some(action) = self.actions.get_mut(id.0) {
            action.time = 0.0;
            action.enabled = true;
            action.fade = None;
            action.warp = None;
            action.weight = 1.0;
            action.effective_weight = 1.0;
        }
    }

    pub fn fade_in(&mut self, id: ActionId, duration: f32) {
        self.schedule_fade(id, duration, 0.0, 1.0);
    }

    pub fn fade_out(&mut self, id: ActionId, duration: f32) {
        self.schedule_fade(id, duration, 1.0, 0.0);
    }

    /// Ramp the action's time scale from `start_scale` to `end_scale`.
    pub fn warp(&mut self, id: ActionId, start_scale: f32, end_scale: f32, duration: f32) {
        let now = self.time;
        if let Some(action) = self.actions.get_mut(id.0) {
            let base = if action.time_scale == 0.0 { 1.0 } else { action.time_scale };
            action.warp = Some(Ramp {
                start: now,
                duration,
                from: start_scale / base,
                to: end_scale / base,
            });
        }
    }

    /// Fade `to` in while `from` fades out. With `warp`, both clips' speeds
    /// are ramped so their cycles line up during the blend.
    pub fn cross_fade_from(&mut self, to: ActionId, from: ActionId, duration: f32, warp: bool) {
        self.fade_out(from, duration);
        self.fade_in(to, duration);

        if warp {
            let (Some(in_clip), Some(out_clip)) = (self.action(to), self.action(from)) else {
                return;
            };
            let in_duration = in_clip.clip.duration;
            let out_duration = out_clip.clip.duration;
            if in_duration <= 0.0 || out_duration <= 0.0 {
                return;
            }
            self.warp(from, 1.0, out_duration / in_duration, duration);
            self.warp(to, in_duration / out_duration, 1.0, duration);
        }
    }

    fn schedule_fade(&mut self, id: ActionId, duration: f32, from: f32, to: f32) {
        let now = self.time;
        if let Some(action) = self.actions.get_mut(id.0) {
            action.fade = Some(Ramp { start: now, duration, from, to });
        }
    }

    /// Advance the mixer clock and every playing action by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.time += dt;
        let now = self.time;

        for action in self.actions.iter_mut().filter(|a| a.playing && a.enabled) {
            let mut weight = action.weight;
            if let Some(fade) = action.fade {
                let value = fade.value_at(now);
                weight *= value;
                if fade.finished_at(now) {
                    action.fade = None;
                    if value == 0.0 {
                        action.enabled = false;
                    }
                }
            }
            action.effective_weight = weight;

            let mut time_scale = action.time_scale;
            if let Some(warp) = action.warp {
                let value = warp.value_at(now);
                time_scale *= value;
                if warp.finished_at(now) {
                    action.warp = None;
                    action.time_scale = time_scale;
                }
            }
            action.effective_time_scale = time_scale;

            let duration = action.clip.duration;
            action.time += dt * time_scale;
            if duration > 0.0 {
                action.time = action.time.rem_euclid(duration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixer_with(clips: &[(&str, f32)]) -> (AnimationMixer, Vec<ActionId>) {
        let mut mixer = AnimationMixer::new();
        let ids = clips
            .iter()
            .map(|(name, duration)| mixer.clip_action(&AnimationClip::new(*name, *duration)))
            .collect();
        (mixer, ids)
    }

    #[test]
    fn clip_action_is_cached_per_clip() {
        let mut mixer = AnimationMixer::new();
        let clip = AnimationClip::new("idle", 2.0);
        assert_eq!(mixer.clip_action(&clip), mixer.clip_action(&clip));
    }

    #[test]
    fn playing_action_wraps_at_clip_duration() {
        let (mut mixer, ids) = mixer_with(&[("idle", 1.0)]);
        mixer.play(ids[0]);
        mixer.update(0.75);
        mixer.update(0.5);
        let time = mixer.action(ids[0]).unwrap().time;
        assert!((time - 0.25).abs() < 1e-5);
    }

    #[test]
    fn cross_fade_hands_weight_over_and_disables_outgoing() {
        let (mut mixer, ids) = mixer_with(&[("idle", 2.0), ("run", 1.0)]);
        let (idle, run) = (ids[0], ids[1]);
        mixer.play(idle);
        mixer.update(0.1);

        mixer.reset(run);
        mixer.play(run);
        mixer.cross_fade_from(run, idle, 0.3, false);

        mixer.update(0.15);
        let half_in = mixer.action(run).unwrap().effective_weight();
        let half_out = mixer.action(idle).unwrap().effective_weight();
        assert!((half_in - 0.5).abs() < 1e-4);
        assert!((half_out - 0.5).abs() < 1e-4);

        mixer.update(0.2);
        assert!(!mixer.action(idle).unwrap().enabled);
        assert!(!mixer.action(run).unwrap().is_fading());
        assert!((mixer.action(run).unwrap().effective_weight() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn warped_cross_fade_aligns_cycle_speeds() {
        let (mut mixer, ids) = mixer_with(&[("idle", 2.0), ("run", 1.0)]);
        let (idle, run) = (ids[0], ids[1]);
        mixer.play(idle);
        mixer.play(run);
        mixer.cross_fade_from(run, idle, 0.3, true);

        // run starts at in/out = 0.5x, idle ends at out/in = 2x
        mixer.update(0.0);
        assert!((mixer.action(run).unwrap().effective_time_scale() - 0.5).abs() < 1e-5);
        assert!((mixer.action(idle).unwrap().effective_time_scale() - 1.0).abs() < 1e-5);

        mixer.update(0.3);
        assert!(!mixer.action(run).unwrap().is_warping());
        assert!((mixer.action(run).unwrap().time_scale - 1.0).abs() < 1e-5);
    }
}
