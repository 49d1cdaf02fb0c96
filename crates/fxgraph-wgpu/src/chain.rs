//! Ordered chains of effect instances
//!
//! Each instance's exported surfaces become the boundary inputs of the next:
//! color feeds `inputTex`, the volume atlas `inputTex3d` and the geometry
//! buffer `inputGeo`. Anything an instance does not export is forwarded
//! unchanged.

use crate::backend::Backend;
use crate::error::EffectError;
use crate::frame_executor::{BoundSurface, EffectInstance, FrameContext};
use fxgraph_wgpu_build::graph::Boundary;

/// Result of rendering a whole chain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainOutput {
    pub color: Option<BoundSurface>,
    pub volume: Option<BoundSurface>,
    pub geo: Option<BoundSurface>,
    /// Instances that passed their input through, by effect id
    pub errors: Vec<(String, EffectError)>,
}

#[derive(Debug, Default)]
pub struct EffectChain {
    instances: Vec<EffectInstance>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, instance: EffectInstance) {
        self.instances.push(instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EffectInstance> {
        self.instances.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut EffectInstance> {
        self.instances.get_mut(index)
    }

    /// Swaps the instance at `index`, destroying the old one
    ///
    /// Returns `false` and drops `instance` when `index` is out of range.
    pub fn replace(&mut self, backend: &mut dyn Backend, index: usize, instance: EffectInstance) -> bool {
        let Some(slot) = self.instances.get_mut(index) else {
            return false;
        };
        let mut old = std::mem::replace(slot, instance);
        old.destroy(backend);
        true
    }

    pub fn remove(&mut self, backend: &mut dyn Backend, index: usize) -> Option<EffectInstance> {
        if index >= self.instances.len() {
            return None;
        }
        let mut instance = self.instances.remove(index);
        instance.destroy(backend);
        Some(instance)
    }

    /// Renders every instance in order
    ///
    /// `frame` supplies the head of the chain; media inputs such as
    /// `imageTex` reach every instance.
    pub fn render_frame(&mut self, backend: &mut dyn Backend, frame: &FrameContext) -> ChainOutput {
        let mut context = frame.clone();
        let mut errors = Vec::new();

        for instance in &mut self.instances {
            let output = instance.render_frame(backend, &context);
            if let Some(error) = output.error {
                errors.push((instance.id(), error));
            }
            for (boundary, surface) in [(Boundary::InputTex, output.color), (Boundary::InputTex3d, output.volume), (Boundary::InputGeo, output.geo)] {
                if let Some(surface) = surface {
                    context.inputs.insert(boundary.key().to_string(), surface);
                }
            }
            if let Some(color) = output.color {
                context.resolution = color.extent;
            }
        }

        let exported = |boundary: Boundary| context.inputs.get(boundary.key()).copied();
        ChainOutput {
            color: exported(Boundary::InputTex),
            volume: exported(Boundary::InputTex3d),
            geo: exported(Boundary::InputGeo),
            errors,
        }
    }

    pub fn destroy(&mut self, backend: &mut dyn Backend) {
        for instance in &mut self.instances {
            instance.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, SurfaceDesc, SurfaceFormat};
    use crate::error::ProgramError;
    use fxgraph_wgpu_build::CompiledEffect;
    use std::sync::Arc;

    const STUB: &str = "@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }";

    const PRODUCER: &str = r#"
namespace: vol
func: noise3d
globals:
  volumeSize: {type: int, default: 8}
  seed: {type: float, default: 3.0}
textures:
  volume:
    width: {param: volumeSize}
    height: {param: volumeSize, power: 2}
outputTex3d: volume
passes:
  - {program: precompute, condition: needsPrecompute, outputs: {volume: volume}}
  - {program: show, inputs: {volume: volume}, outputs: {color: outputTex}}
"#;

    const CONSUMER: &str = r#"
namespace: vol
func: slice
globals:
  volumeSize: {type: int, default: 16}
textures:
  volume:
    width: {param: volumeSize, inputOverride: inputTex3d}
    height: {param: volumeSize, power: 2, inputOverride: inputTex3d}
outputTex3d: volume
passes:
  - {program: remap, inputs: {source: inputTex3d}, outputs: {volume: volume}}
  - {program: show, inputs: {volume: volume}, outputs: {color: outputTex}}
"#;

    fn instance(yaml: &str) -> EffectInstance {
        let effect = CompiledEffect::from_yaml(yaml, |_| Ok(STUB.to_string())).unwrap();
        EffectInstance::new(Arc::new(effect)).unwrap()
    }

    fn backend() -> SoftwareBackend {
        let mut backend = SoftwareBackend::new();
        backend.register_fragment("precompute", |ctx, _| vec![[ctx.value("seed"), 0.0, 0.0, 1.0]]);
        backend.register_fragment("remap", |ctx, (x, y)| vec![ctx.load("source", x as i64, y as i64)]);
        backend.register_fragment("show", |ctx, (x, y)| vec![ctx.load("volume", x as i64, y as i64)]);
        backend
    }

    #[test]
    fn test_volume_consumer_follows_upstream_extent() {
        let mut backend = backend();
        let mut chain = EffectChain::new();
        chain.push(instance(PRODUCER));
        chain.push(instance(CONSUMER));

        let output = chain.render_frame(&mut backend, &FrameContext::new(0.0, 0.0, (4, 4)));
        assert!(output.errors.is_empty());
        let volume = output.volume.unwrap();
        assert_eq!(volume.extent, (8, 64));
        assert_eq!(backend.read_surface(volume.id).unwrap()[0][0], 3.0);
        assert_eq!(backend.read_surface(output.color.unwrap().id).unwrap()[0][0], 3.0);
    }

    #[test]
    fn test_volume_consumer_alone_uses_its_own_size() {
        let mut backend = backend();
        let mut chain = EffectChain::new();
        chain.push(instance(CONSUMER));

        let output = chain.render_frame(&mut backend, &FrameContext::new(0.0, 0.0, (4, 4)));
        assert_eq!(output.volume.unwrap().extent, (16, 256));
    }

    #[test]
    fn test_failed_instance_is_bypassed() {
        let mut backend = backend();
        let mut chain = EffectChain::new();
        chain.push(instance(PRODUCER));
        chain.push(instance("namespace: filter\nfunc: broken\npasses:\n  - {program: missing, inputs: {src: inputTex}, outputs: {color: outputTex}}\n"));

        let frame = FrameContext::new(0.0, 0.0, (4, 4));
        let output = chain.render_frame(&mut backend, &frame);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].0, "filter/broken");
        assert!(matches!(output.errors[0].1, EffectError::Program(ProgramError::Compile { .. })));
        assert_eq!(backend.read_surface(output.color.unwrap().id).unwrap()[0][0], 3.0);
        assert_eq!(output.volume.unwrap().extent, (8, 64));
    }

    #[test]
    fn test_replace_destroys_previous_instance() {
        let mut backend = backend();
        let mut chain = EffectChain::new();
        chain.push(instance(PRODUCER));
        chain.render_frame(&mut backend, &FrameContext::new(0.0, 0.0, (4, 4)));
        assert!(backend.live_surfaces() > 0);

        let input = backend
            .create_surface(&SurfaceDesc {
                label: "input".to_string(),
                width: 4,
                height: 4,
                format: SurfaceFormat::Rgba16Float,
            })
            .unwrap();
        assert!(chain.replace(&mut backend, 0, instance(CONSUMER)));
        assert_eq!(backend.live_surfaces(), 1);
        assert!(!chain.replace(&mut backend, 3, instance(CONSUMER)));

        chain.destroy(&mut backend);
        backend.destroy_surface(input);
        assert_eq!(backend.live_surfaces(), 0);
    }
}
