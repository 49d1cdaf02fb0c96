//! Frame execution
//!
//! An [`EffectInstance`] owns the surfaces and state of one effect and runs
//! its resolved passes once per frame. Each frame is prepared in full
//! (programs, pipelines, surfaces, uniforms, counts) before the first pass is
//! submitted. A failure disables the instance, which then passes its input
//! through; persistent state written by a failed frame is rolled back.

use crate::backend::{Backend, DrawCall, PassShape, Primitive, SurfaceId, Viewport};
use crate::double_buffer::{DoubleBufferRegistry, PersistentPair};
use crate::error::{EffectError, ProgramError, ResourceError};
use crate::lifecycle::{EffectKind, HookContext, HookState, RESET_STATE_PARAM};
use crate::resource_allocator::{ResourceAllocator, SizingContext, SlotKey};
use crate::uniform_packer::{UniformValues, pack_program};
use bytes::Bytes;
use fxgraph_wgpu_build::CompiledEffect;
use fxgraph_wgpu_build::definition::{Axis, DEFAULT_ANIMATION_DURATION, DEFAULT_POINT_COUNT, DefinitionError, ParamValue, PointCount, RepeatSpec, TextureDescriptor};
use fxgraph_wgpu_build::graph::{Boundary, DrawMode, PassGraph, ResolvedPass, SurfaceBinding};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Registry key of the double-buffered final output
const OUTPUT_PAIR: &str = "outputTex";

/// A surface together with its extent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundSurface {
    pub id: SurfaceId,
    pub extent: (u32, u32),
}

/// Host-supplied inputs of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameContext {
    /// Seconds since start
    pub time: f64,
    /// Seconds since the previous frame
    pub delta: f64,
    /// Resolution of the primary input
    pub resolution: (u32, u32),
    /// Length of the animation loop oscillating parameters follow, in seconds
    pub duration: f64,
    /// Boundary surfaces by canonical key (`inputTex`, `inputTex3d`, `imageTex`, ...)
    pub inputs: BTreeMap<String, BoundSurface>,
}

impl FrameContext {
    pub fn new(time: f64, delta: f64, resolution: (u32, u32)) -> Self {
        Self {
            time,
            delta,
            resolution,
            duration: DEFAULT_ANIMATION_DURATION,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_input(mut self, key: &str, surface: BoundSurface) -> Self {
        self.inputs.insert(key.to_string(), surface);
        self
    }

    fn input_extents(&self) -> BTreeMap<String, (u32, u32)> {
        self.inputs.iter().map(|(key, surface)| (key.clone(), surface.extent)).collect()
    }
}

/// Surfaces an instance exposes after a frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameOutput {
    pub color: Option<BoundSurface>,
    pub volume: Option<BoundSurface>,
    pub geo: Option<BoundSurface>,
    /// Set when the instance is disabled and passed its input through
    pub error: Option<EffectError>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub frames: u64,
    pub passes_run: u64,
    pub passes_skipped: u64,
    pub draws: u64,
}

/// Everything a pass needs, computed before submission
#[derive(Debug)]
struct PassPlan {
    run: bool,
    iterations: u32,
    primitive: Primitive,
    viewport: Option<Viewport>,
    uniforms: Bytes,
    values: UniformValues,
}

/// A frame ready to submit; hook state and generation are kept only if it succeeds
#[derive(Debug)]
struct FramePlan {
    passes: Vec<PassPlan>,
    reset: bool,
    hook_state: HookState,
    generation: u64,
}

/// One live effect with its surfaces, parameters and hook state
#[derive(Debug)]
pub struct EffectInstance {
    effect: Arc<CompiledEffect>,
    kind: EffectKind,
    params: BTreeMap<String, ParamValue>,
    hook_state: HookState,
    allocator: ResourceAllocator,
    buffers: DoubleBufferRegistry,
    programs_ready: bool,
    failure: Option<EffectError>,
    frame: u64,
    /// Allocator generation bindings were last resolved against
    generation: u64,
    warned: BTreeSet<String>,
    stats: FrameStats,
}

impl EffectInstance {
    /// Instantiates `effect` with its default parameters
    ///
    /// Runs the effect's init hook. Surfaces and programs are created on the
    /// first frame.
    pub fn new(effect: Arc<CompiledEffect>) -> Result<Self, DefinitionError> {
        let params = effect.definition.default_params()?;
        let kind = EffectKind::classify(&effect);
        let hook_state = kind.on_init();
        tracing::info!(effect = %effect.id(), ?kind, "created effect instance");

        Ok(Self {
            allocator: ResourceAllocator::new(&effect.id()),
            effect,
            kind,
            params,
            hook_state,
            buffers: DoubleBufferRegistry::new(),
            programs_ready: false,
            failure: None,
            frame: 0,
            generation: 0,
            warned: BTreeSet::new(),
            stats: FrameStats::default(),
        })
    }

    pub fn id(&self) -> String {
        self.effect.id()
    }

    pub fn effect(&self) -> &Arc<CompiledEffect> {
        &self.effect
    }

    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Sets a declared parameter, type-checked and clamped by its declaration
    ///
    /// A changed value clears a previous failure so the next frame retries.
    pub fn set_param(&mut self, name: &str, value: impl Into<ParamValue>) -> Result<(), DefinitionError> {
        let spec = self
            .effect
            .definition
            .globals
            .get(name)
            .ok_or_else(|| DefinitionError::InvalidParameter(name.to_string(), "not declared by the effect".to_string()))?;
        let value = spec.coerce(name, value.into())?;
        if self.params.get(name) == Some(&value) {
            return Ok(());
        }
        self.params.insert(name.to_string(), value);

        if let Some(error) = self.failure.take() {
            tracing::info!(effect = %self.effect.id(), param = name, %error, "parameter changed, retrying failed effect");
            self.programs_ready = false;
        }
        Ok(())
    }

    /// Error that disabled the instance, if any
    pub fn failure(&self) -> Option<&EffectError> {
        self.failure.as_ref()
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn persistent_pair(&self, key: &str) -> Option<&PersistentPair> {
        self.buffers.pair(key)
    }

    /// Renders one frame
    ///
    /// Never fails: a disabled instance returns the upstream surfaces
    /// unchanged together with the error that disabled it.
    pub fn render_frame(&mut self, backend: &mut dyn Backend, frame: &FrameContext) -> FrameOutput {
        if let Some(error) = &self.failure {
            return pass_through(frame, Some(error.clone()));
        }

        match self.prepare(backend, frame).and_then(|plan| self.submit(backend, frame, plan)) {
            Ok(output) => output,
            Err(error) => {
                tracing::error!(effect = %self.effect.id(), %error, "effect disabled, passing input through");
                self.failure = Some(error.clone());
                pass_through(frame, Some(error))
            }
        }
    }

    /// Releases every surface of the instance, both halves of every persistent pair included
    ///
    /// The instance stays usable; the next frame starts from fresh state.
    pub fn destroy(&mut self, backend: &mut dyn Backend) {
        self.allocator.release_all(backend);
        self.buffers.clear();
        self.programs_ready = false;
        self.hook_state = self.kind.on_init();
        tracing::info!(effect = %self.effect.id(), "destroyed effect instance");
    }

    fn prepare(&mut self, backend: &mut dyn Backend, frame: &FrameContext) -> Result<FramePlan, EffectError> {
        let effect = Arc::clone(&self.effect);
        if !self.programs_ready {
            for program in effect.programs.values() {
                backend.compile_program(program)?;
            }
            self.programs_ready = true;
        }

        // Oscillators become plain numbers for this frame
        let params: BTreeMap<String, ParamValue> = self.params.iter().map(|(name, value)| (name.clone(), value.resolve(frame.time, frame.duration))).collect();
        let upstream = frame.input_extents();
        let sizing = SizingContext {
            screen: frame.resolution,
            params: &params,
            upstream: &upstream,
        };
        acquire_surfaces(&mut self.allocator, &mut self.buffers, backend, &effect.graph, &sizing)?;

        let generation = self.allocator.generation();
        let reallocated = generation != self.generation;
        if reallocated {
            tracing::debug!(effect = %effect.id(), generation, "surfaces changed, re-resolving bindings");
        }

        let context = HookContext {
            frame: self.frame,
            params: &params,
            inputs: &upstream,
            reallocated,
        };
        let (hook_state, overrides) = self.kind.on_update(&self.hook_state, &context);

        let (width, height) = frame.resolution;
        let aspect = width as f64 / height.max(1) as f64;
        let mut values = UniformValues::new();
        values.set("time", frame.time);
        values.set("deltaTime", frame.delta);
        values.set("frame", self.frame as i64);
        values.set_vector("resolution", &[width as f64, height as f64]);
        values.set("aspect", aspect);
        values.set("aspectRatio", aspect);
        for (name, value) in &params {
            let uniform = effect.definition.globals.get(name).and_then(|spec| spec.uniform.clone()).unwrap_or_else(|| name.clone());
            values.set(uniform, value.clone());
        }
        values.extend(overrides);

        let mut passes = Vec::with_capacity(effect.graph.passes.len());
        for pass in &effect.graph.passes {
            let program = effect.program(&pass.program).ok_or_else(|| ProgramError::Missing(pass.program.clone()))?;

            let mut pass_values = values.clone();
            for (uniform, param) in &pass.uniform_aliases {
                if let Some(value) = values.get(param) {
                    pass_values.set(uniform.clone(), value.clone());
                }
            }
            let packed = pack_program(program, &pass_values);
            for name in packed.unbound {
                if self.warned.insert(format!("{}/{name}", program.id)) {
                    tracing::warn!(effect = %effect.id(), program = %program.id, uniform = %name, "uniform has no value, left zero");
                }
            }

            // Gated passes are checked too; they may run on any later frame
            let primitive = primitive(pass, frame, &params)?;
            let inputs = self.resolve_inputs(pass, frame)?;
            let outputs = self.resolve_outputs(pass)?;
            backend.prepare_pass(&PassShape {
                label: &pass.label,
                program: &pass.program,
                inputs: &inputs,
                outputs: &outputs,
                primitive,
                blend: pass.blend,
            })?;

            passes.push(PassPlan {
                run: pass.condition.as_deref().is_none_or(|flag| values.get(flag).is_some_and(ParamValue::as_bool)),
                iterations: iterations(pass, &params),
                primitive,
                viewport: pass.viewport.as_ref().map(|viewport| Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.width.resolve(Axis::Width, &sizing),
                    height: viewport.height.resolve(Axis::Height, &sizing),
                }),
                uniforms: packed.bytes,
                values: pass_values,
            });
        }

        Ok(FramePlan {
            passes,
            reset: params.get(RESET_STATE_PARAM).is_some_and(ParamValue::as_bool),
            hook_state,
            generation,
        })
    }

    fn submit(&mut self, backend: &mut dyn Backend, frame: &FrameContext, plan: FramePlan) -> Result<FrameOutput, EffectError> {
        let effect = Arc::clone(&self.effect);
        if plan.reset {
            for (key, descriptor) in &effect.graph.persistent {
                self.buffers.reset(backend, key, descriptor.clear_value())?;
            }
            self.params.insert(RESET_STATE_PARAM.to_string(), ParamValue::Bool(false));
            tracing::debug!(effect = %effect.id(), "persistent state reset");
        }

        self.buffers.begin_frame();
        backend.begin_frame();
        if let Err(error) = self.record(backend, frame, &effect, &plan.passes) {
            backend.abort_frame();
            self.discard_frame(backend, &effect);
            return Err(error);
        }
        backend.end_frame();
        self.buffers.end_frame();

        self.hook_state = plan.hook_state;
        self.generation = plan.generation;
        self.frame += 1;
        self.stats.frames += 1;
        Ok(self.output(frame))
    }

    fn record(&mut self, backend: &mut dyn Backend, frame: &FrameContext, effect: &CompiledEffect, plan: &[PassPlan]) -> Result<(), EffectError> {
        for (pass, step) in effect.graph.passes.iter().zip(plan) {
            if !step.run {
                self.stats.passes_skipped += 1;
                tracing::trace!(effect = %effect.id(), pass = %pass.label, "condition not met, keeping previous output");
                continue;
            }
            self.stats.passes_run += 1;

            for iteration in 0..step.iterations {
                if iteration > 0 {
                    for binding in &pass.outputs {
                        if let SurfaceBinding::Persistent { key } = &binding.surface {
                            self.buffers.commit(key);
                        }
                    }
                }
                // Earlier passes of this frame become visible to this one
                for binding in &pass.inputs {
                    if let SurfaceBinding::Persistent { key } = &binding.surface {
                        self.buffers.commit(key);
                    }
                }

                let inputs = self.resolve_inputs(pass, frame)?;
                let outputs = self.resolve_outputs(pass)?;
                backend.draw(&DrawCall {
                    label: &pass.label,
                    program: &pass.program,
                    inputs: &inputs,
                    outputs: &outputs,
                    uniforms: &step.uniforms,
                    values: &step.values,
                    primitive: step.primitive,
                    blend: pass.blend,
                    viewport: step.viewport,
                })?;
                self.stats.draws += 1;

                for binding in &pass.outputs {
                    match &binding.surface {
                        SurfaceBinding::Persistent { key } => self.buffers.mark_written(key),
                        SurfaceBinding::Output if effect.graph.uses_self_tex => self.buffers.mark_written(OUTPUT_PAIR),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns persistent pairs to where the failed frame found them
    ///
    /// A pair whose committed surface was already overwritten cannot be
    /// restored and starts over from its initial condition.
    fn discard_frame(&mut self, backend: &mut dyn Backend, effect: &CompiledEffect) {
        for key in self.buffers.discard_pending() {
            let clear = effect.graph.persistent.get(&key).map_or_else(|| TextureDescriptor::default().clear_value(), TextureDescriptor::clear_value);
            tracing::warn!(effect = %effect.id(), key = %key, "persistent state overwritten by a failed frame, resetting it");
            if let Err(error) = self.buffers.reset(backend, &key, clear) {
                tracing::warn!(effect = %effect.id(), key = %key, %error, "failed to reset persistent state");
            }
        }
    }

    fn slot(&self, slot: &SlotKey) -> Result<SurfaceId, ResourceError> {
        self.allocator.surface(slot).ok_or_else(|| ResourceError::Unallocated(slot.to_string()))
    }

    /// Inputs of `pass`; boundaries the host did not connect are left unbound
    fn resolve_inputs(&self, pass: &ResolvedPass, frame: &FrameContext) -> Result<Vec<(String, SurfaceId)>, EffectError> {
        let mut inputs = Vec::with_capacity(pass.inputs.len());
        for binding in &pass.inputs {
            let surface = match &binding.surface {
                // Always the previous frame's output, even after this frame wrote it
                SurfaceBinding::Boundary(Boundary::SelfTex) => self.buffers.read(OUTPUT_PAIR),
                SurfaceBinding::Boundary(boundary) => frame.inputs.get(boundary.key()).map(|input| input.id),
                SurfaceBinding::Transient { physical_id } => Some(self.slot(&SlotKey::Transient(*physical_id))?),
                SurfaceBinding::Retained { key } => Some(self.slot(&SlotKey::Retained(key.clone()))?),
                SurfaceBinding::Persistent { key } => Some(self.buffers.read(key).ok_or_else(|| ResourceError::Unallocated(key.clone()))?),
                SurfaceBinding::Output => None,
            };
            if let Some(id) = surface {
                inputs.push((binding.local.clone(), id));
            }
        }
        Ok(inputs)
    }

    fn resolve_outputs(&self, pass: &ResolvedPass) -> Result<Vec<SurfaceId>, EffectError> {
        let mut outputs = Vec::with_capacity(pass.outputs.len());
        for binding in &pass.outputs {
            let surface = match &binding.surface {
                SurfaceBinding::Output if self.effect.graph.uses_self_tex => self.buffers.write(OUTPUT_PAIR),
                SurfaceBinding::Output => self.allocator.surface(&SlotKey::Output(0)),
                SurfaceBinding::Persistent { key } => self.buffers.write(key),
                SurfaceBinding::Transient { physical_id } => self.allocator.surface(&SlotKey::Transient(*physical_id)),
                SurfaceBinding::Retained { key } => self.allocator.surface(&SlotKey::Retained(key.clone())),
                SurfaceBinding::Boundary(_) => None,
            };
            outputs.push(surface.ok_or_else(|| ResourceError::Unallocated(binding.key.clone()))?);
        }
        Ok(outputs)
    }

    fn bound(&self, binding: &SurfaceBinding, frame: &FrameContext) -> Option<BoundSurface> {
        let (id, extent) = match binding {
            SurfaceBinding::Output if self.effect.graph.uses_self_tex => (self.buffers.read(OUTPUT_PAIR)?, self.allocator.extent(&SlotKey::Output(0))?),
            SurfaceBinding::Output => (self.allocator.surface(&SlotKey::Output(0))?, self.allocator.extent(&SlotKey::Output(0))?),
            SurfaceBinding::Persistent { key } => (self.buffers.read(key)?, self.allocator.extent(&SlotKey::Persistent(key.clone(), 0))?),
            SurfaceBinding::Retained { key } => {
                let slot = SlotKey::Retained(key.clone());
                (self.allocator.surface(&slot)?, self.allocator.extent(&slot)?)
            }
            SurfaceBinding::Transient { physical_id } => {
                let slot = SlotKey::Transient(*physical_id);
                (self.allocator.surface(&slot)?, self.allocator.extent(&slot)?)
            }
            SurfaceBinding::Boundary(boundary) => return frame.inputs.get(boundary.key()).copied(),
        };
        Some(BoundSurface { id, extent })
    }

    fn output(&self, frame: &FrameContext) -> FrameOutput {
        let graph = &self.effect.graph;
        let color = if graph.writes_output {
            self.bound(&SurfaceBinding::Output, frame)
        } else {
            frame.inputs.get(Boundary::InputTex.key()).copied()
        };
        FrameOutput {
            color,
            volume: graph.output_tex3d.as_ref().and_then(|binding| self.bound(binding, frame)),
            geo: graph.output_geo.as_ref().and_then(|binding| self.bound(binding, frame)),
            error: None,
        }
    }
}

/// Draws per frame; a fractional repeat parameter is floored
fn iterations(pass: &ResolvedPass, params: &BTreeMap<String, ParamValue>) -> u32 {
    match &pass.repeat {
        None => 1,
        Some(RepeatSpec::Count(count)) => (*count).max(1),
        Some(RepeatSpec::Param(name)) => params.get(name).and_then(ParamValue::as_f64).map_or(1, |count| count.floor().max(1.0) as u32),
    }
}

fn primitive(pass: &ResolvedPass, frame: &FrameContext, params: &BTreeMap<String, ParamValue>) -> Result<Primitive, ResourceError> {
    let count = match &pass.draw {
        DrawMode::FullSurface => return Ok(Primitive::FullSurface),
        DrawMode::Points { count } => count,
    };
    Ok(Primitive::Points(match count {
        PointCount::Fixed(count) => *count,
        PointCount::InputPixels => {
            let (width, height) = frame.inputs.get(Boundary::InputTex.key()).map_or(frame.resolution, |input| input.extent);
            let pixels = width as u64 * height as u64;
            u32::try_from(pixels).map_err(|_| ResourceError::TooManyPoints(pixels))?
        }
        PointCount::Param(name) => params.get(name).and_then(ParamValue::as_f64).map_or(DEFAULT_POINT_COUNT, |count| count.max(0.0) as u32),
    }))
}

/// Upstream surfaces forwarded unchanged
fn pass_through(frame: &FrameContext, error: Option<EffectError>) -> FrameOutput {
    FrameOutput {
        color: frame.inputs.get(Boundary::InputTex.key()).copied(),
        volume: frame.inputs.get(Boundary::InputTex3d.key()).copied(),
        geo: frame.inputs.get(Boundary::InputGeo.key()).copied(),
        error,
    }
}

/// Makes sure every surface of `graph` exists at its current extent
fn acquire_surfaces(allocator: &mut ResourceAllocator, buffers: &mut DoubleBufferRegistry, backend: &mut dyn Backend, graph: &PassGraph, sizing: &SizingContext<'_>) -> Result<(), EffectError> {
    for texture in &graph.physical_textures {
        allocator.acquire(backend, SlotKey::Transient(texture.id), &texture.descriptor, sizing)?;
    }
    for (key, descriptor) in &graph.retained {
        allocator.acquire(backend, SlotKey::Retained(key.clone()), descriptor, sizing)?;
    }
    for (key, descriptor) in &graph.persistent {
        acquire_pair(allocator, buffers, backend, key, [SlotKey::Persistent(key.clone(), 0), SlotKey::Persistent(key.clone(), 1)], descriptor, sizing)?;
    }

    let output = TextureDescriptor::default();
    if graph.uses_self_tex {
        acquire_pair(allocator, buffers, backend, OUTPUT_PAIR, [SlotKey::Output(0), SlotKey::Output(1)], &output, sizing)?;
    } else if graph.writes_output {
        allocator.acquire(backend, SlotKey::Output(0), &output, sizing)?;
    }
    Ok(())
}

/// Acquires both halves of a pair; freshly allocated pairs start from the initial condition
fn acquire_pair(
    allocator: &mut ResourceAllocator,
    buffers: &mut DoubleBufferRegistry,
    backend: &mut dyn Backend,
    key: &str,
    slots: [SlotKey; 2],
    descriptor: &TextureDescriptor,
    sizing: &SizingContext<'_>,
) -> Result<(), EffectError> {
    let [first, second] = slots;
    let a = allocator.acquire(backend, first, descriptor, sizing)?;
    let b = allocator.acquire(backend, second, descriptor, sizing)?;
    buffers.bind(key, [a.id, b.id]);
    if a.allocated || b.allocated {
        buffers.reset(backend, key, descriptor.clear_value())?;
    }
    Ok(())
}
