//! Per-effect lifecycle hooks
//!
//! Effects are plain data; the few that need frame-to-frame bookkeeping are
//! told apart by [`EffectKind`]. Hooks are pure: they take the previous
//! [`HookState`] and return the next one plus uniform overrides.

use fxgraph_wgpu_build::CompiledEffect;
use fxgraph_wgpu_build::definition::ParamValue;
use std::collections::BTreeMap;

/// Parameter that clears persistent state instead of feeding a uniform
pub const RESET_STATE_PARAM: &str = "resetState";

/// Uniform carrying the extent of the media texture
pub const IMAGE_SIZE_UNIFORM: &str = "imageSize";

const MEDIA_FUNC: &str = "media";
const MEDIA_KEY: &str = "imageTex";

/// Values written over the frame's uniforms, by uniform name
pub type UniformOverrides = BTreeMap<String, ParamValue>;

/// Condition-gated passes that rerun when a tracked parameter changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gating {
    /// Condition flags raised while dirty
    pub flags: Vec<String>,
    /// Parameters whose change marks the effect dirty
    pub tracked: Vec<String>,
}

impl Gating {
    /// Gating of `effect`, `None` when no pass carries a condition
    ///
    /// Tracks `trackedParams`, or every parameter except `resetState` and the
    /// condition flags themselves.
    fn of(effect: &CompiledEffect) -> Option<Self> {
        let flags: Vec<String> = effect.graph.conditions().into_iter().map(str::to_string).collect();
        if flags.is_empty() {
            return None;
        }
        let tracked = match &effect.definition.tracked_params {
            Some(tracked) => tracked.clone(),
            None => effect
                .definition
                .globals
                .keys()
                .filter(|name| name.as_str() != RESET_STATE_PARAM && !flags.contains(*name))
                .cloned()
                .collect(),
        };
        Some(Self { flags, tracked })
    }

    /// Raises the flags when the tracked values differ from the last frame's
    fn update(&self, state: &mut HookState, context: &HookContext<'_>, overrides: &mut UniformOverrides) {
        let snapshot: BTreeMap<String, ParamValue> = self.tracked.iter().filter_map(|name| context.params.get(name).map(|value| (name.clone(), value.clone()))).collect();
        let dirty = context.reallocated || state.snapshot.as_ref() != Some(&snapshot);
        for flag in &self.flags {
            overrides.insert(flag.clone(), ParamValue::Bool(dirty));
        }
        state.snapshot = Some(snapshot);
    }
}

/// Behavior class of an effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectKind {
    /// No hook state
    Standard,
    Precompute(Gating),
    /// Publishes the extent of the host media texture as `imageSize`, and may gate passes too
    Media(Option<Gating>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookState {
    /// Tracked parameter values seen on the last frame, `None` before the first frame
    pub snapshot: Option<BTreeMap<String, ParamValue>>,
    /// Last known media extent
    pub media_extent: (u32, u32),
}

/// Read-only view of the frame a hook runs for
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub frame: u64,
    pub params: &'a BTreeMap<String, ParamValue>,
    /// Extents of connected boundary surfaces
    pub inputs: &'a BTreeMap<String, (u32, u32)>,
    /// Surfaces were reallocated since the last frame, so gated outputs are blank
    pub reallocated: bool,
}

impl EffectKind {
    /// Classifies a compiled effect
    ///
    /// `func: media` is a media effect. Any other effect with condition-gated
    /// passes is a precompute effect.
    pub fn classify(effect: &CompiledEffect) -> Self {
        let gating = Gating::of(effect);
        if effect.definition.func == MEDIA_FUNC {
            return Self::Media(gating);
        }
        gating.map_or(Self::Standard, Self::Precompute)
    }

    pub fn on_init(&self) -> HookState {
        HookState {
            snapshot: None,
            media_extent: (1, 1),
        }
    }

    /// Advances the hook state by one frame
    pub fn on_update(&self, state: &HookState, context: &HookContext<'_>) -> (HookState, UniformOverrides) {
        let mut overrides = UniformOverrides::new();
        let mut next = state.clone();
        match self {
            Self::Standard => {}
            Self::Precompute(gating) => gating.update(&mut next, context, &mut overrides),
            Self::Media(gating) => {
                let extent = context.inputs.get(MEDIA_KEY).copied().unwrap_or(state.media_extent);
                overrides.insert(IMAGE_SIZE_UNIFORM.to_string(), ParamValue::Vector(vec![extent.0.max(1) as f64, extent.1.max(1) as f64]));
                next.media_extent = extent;
                if let Some(gating) = gating {
                    gating.update(&mut next, context, &mut overrides);
                }
            }
        }
        (next, overrides)
    }
}
