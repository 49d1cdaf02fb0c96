//! CPU backend
//!
//! Programs are Rust closures registered by program id. Surfaces are plain
//! RGBA float buffers quantized to their format on every store, so results
//! match what a GPU would keep in the same format.

use super::{Backend, DrawCall, PassShape, Primitive, SurfaceDesc, SurfaceFormat, SurfaceId, Viewport};
use crate::error::{EffectError, ProgramError, ResourceError};
use crate::uniform_packer::UniformValues;
use fxgraph_wgpu_build::CompiledProgram;
use fxgraph_wgpu_build::graph::{BlendFactor, BlendMode};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Fragment program: returns one color per attachment for pixel `(x, y)`
pub type FragmentKernel = Box<dyn Fn(&KernelContext<'_>, (u32, u32)) -> Vec<[f32; 4]>>;

/// Point program: places point `index` at a pixel with one color per attachment, or culls it
pub type PointKernel = Box<dyn Fn(&KernelContext<'_>, u32) -> Option<((u32, u32), Vec<[f32; 4]>)>>;

/// Largest side a surface may have unless [`SoftwareBackend::with_max_extent`] says otherwise
pub const DEFAULT_MAX_EXTENT: u32 = 16384;

enum Kernel {
    Fragment(FragmentKernel),
    Points(PointKernel),
}

#[derive(Debug, Clone)]
struct SoftSurface {
    width: u32,
    height: u32,
    format: SurfaceFormat,
    pixels: Vec<[f32; 4]>,
}

impl SoftSurface {
    fn store(&mut self, x: u32, y: u32, src: [f32; 4], blend: Option<BlendMode>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let index = (y * self.width + x) as usize;
        let value = match blend {
            Some(mode) => apply_blend(mode, src, self.pixels[index]),
            None => src,
        };
        self.pixels[index] = quantize(self.format, value);
    }
}

/// Read-only view a kernel gets of its pass
pub struct KernelContext<'a> {
    textures: BTreeMap<&'a str, &'a SoftSurface>,
    values: &'a UniformValues,
    target: (u32, u32),
}

impl KernelContext<'_> {
    /// Extent of the first attachment
    pub fn target(&self) -> (u32, u32) {
        self.target
    }

    /// Extent of an input, `None` when nothing is bound to `name`
    pub fn extent(&self, name: &str) -> Option<(u32, u32)> {
        self.textures.get(name).map(|surface| (surface.width, surface.height))
    }

    /// Texel fetch with clamp-to-edge addressing; unbound inputs read as zero
    pub fn load(&self, name: &str, x: i64, y: i64) -> [f32; 4] {
        let Some(surface) = self.textures.get(name) else {
            return [0.0; 4];
        };
        let x = x.clamp(0, surface.width as i64 - 1) as u32;
        let y = y.clamp(0, surface.height as i64 - 1) as u32;
        surface.pixels[(y * surface.width + x) as usize]
    }

    /// Nearest-neighbor sample at normalized coordinates
    pub fn sample(&self, name: &str, uv: [f32; 2]) -> [f32; 4] {
        let Some((width, height)) = self.extent(name) else {
            return [0.0; 4];
        };
        self.load(name, (uv[0] * width as f32).floor() as i64, (uv[1] * height as f32).floor() as i64)
    }

    /// First component of a uniform value, zero when unset
    pub fn value(&self, name: &str) -> f32 {
        self.values.scalar(name).unwrap_or(0.0)
    }

    pub fn values(&self) -> &UniformValues {
        self.values
    }
}

/// Deterministic CPU implementation of [`Backend`]
pub struct SoftwareBackend {
    surfaces: HashMap<SurfaceId, SoftSurface>,
    kernels: HashMap<String, Kernel>,
    compiled: BTreeSet<String>,
    invocations: BTreeMap<String, u32>,
    frames: u64,
    max_extent: u32,
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self {
            surfaces: HashMap::new(),
            kernels: HashMap::new(),
            compiled: BTreeSet::new(),
            invocations: BTreeMap::new(),
            frames: 0,
            max_extent: DEFAULT_MAX_EXTENT,
        }
    }
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects surfaces larger than `limit` on either side
    pub fn with_max_extent(mut self, limit: u32) -> Self {
        self.max_extent = limit;
        self
    }

    pub fn register_fragment(&mut self, program: &str, kernel: impl Fn(&KernelContext<'_>, (u32, u32)) -> Vec<[f32; 4]> + 'static) {
        self.kernels.insert(program.to_string(), Kernel::Fragment(Box::new(kernel)));
        self.compiled.remove(program);
    }

    pub fn register_points(&mut self, program: &str, kernel: impl Fn(&KernelContext<'_>, u32) -> Option<((u32, u32), Vec<[f32; 4]>)> + 'static) {
        self.kernels.insert(program.to_string(), Kernel::Points(Box::new(kernel)));
        self.compiled.remove(program);
    }

    /// Number of draws issued with `program`
    pub fn invocations(&self, program: &str) -> u32 {
        self.invocations.get(program).copied().unwrap_or(0)
    }

    /// Number of frames begun
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn live_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn surface_extent(&self, id: SurfaceId) -> Option<(u32, u32)> {
        self.surfaces.get(&id).map(|surface| (surface.width, surface.height))
    }

    fn region(viewport: Option<Viewport>, (width, height): (u32, u32)) -> (u32, u32, u32, u32) {
        match viewport {
            Some(viewport) => {
                let x0 = viewport.x.min(width);
                let y0 = viewport.y.min(height);
                (x0, y0, viewport.x.saturating_add(viewport.width).min(width), viewport.y.saturating_add(viewport.height).min(height))
            }
            None => (0, 0, width, height),
        }
    }
}

impl Backend for SoftwareBackend {
    fn name(&self) -> &str {
        "software"
    }

    fn create_surface(&mut self, desc: &SurfaceDesc) -> Result<SurfaceId, ResourceError> {
        let too_large = ResourceError::TooLarge {
            width: desc.width,
            height: desc.height,
            limit: self.max_extent,
        };
        if desc.width > self.max_extent || desc.height > self.max_extent {
            return Err(too_large);
        }
        let len = usize::try_from(desc.width as u64 * desc.height as u64).map_err(|_| too_large)?;
        let id = SurfaceId::next();
        let zero = quantize(desc.format, [0.0; 4]);
        self.surfaces.insert(
            id,
            SoftSurface {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                pixels: vec![zero; len],
            },
        );
        Ok(id)
    }

    fn destroy_surface(&mut self, id: SurfaceId) {
        self.surfaces.remove(&id);
    }

    fn clear_surface(&mut self, id: SurfaceId, value: [f32; 4]) -> Result<(), ResourceError> {
        let surface = self.surfaces.get_mut(&id).ok_or(ResourceError::MissingSurface(id))?;
        let value = quantize(surface.format, value);
        surface.pixels.fill(value);
        Ok(())
    }

    fn write_surface(&mut self, id: SurfaceId, pixels: &[[f32; 4]]) -> Result<(), ResourceError> {
        let surface = self.surfaces.get_mut(&id).ok_or(ResourceError::MissingSurface(id))?;
        if pixels.len() != surface.pixels.len() {
            return Err(ResourceError::SizeMismatch {
                expected: surface.pixels.len(),
                actual: pixels.len(),
            });
        }
        let format = surface.format;
        for (dst, src) in surface.pixels.iter_mut().zip(pixels) {
            *dst = quantize(format, *src);
        }
        Ok(())
    }

    fn compile_program(&mut self, program: &CompiledProgram) -> Result<(), ProgramError> {
        if let Some(message) = &program.compile_error {
            return Err(ProgramError::Compile {
                program: program.id.clone(),
                message: message.clone(),
            });
        }
        if !self.kernels.contains_key(&program.id) {
            return Err(ProgramError::Compile {
                program: program.id.clone(),
                message: "no kernel registered".to_string(),
            });
        }
        self.compiled.insert(program.id.clone());
        Ok(())
    }

    fn prepare_pass(&mut self, pass: &PassShape<'_>) -> Result<(), EffectError> {
        if !self.compiled.contains(pass.program) {
            return Err(ProgramError::Missing(pass.program.to_string()).into());
        }
        let kernel = self.kernels.get(pass.program).ok_or_else(|| ProgramError::Missing(pass.program.to_string()))?;
        check_shape(pass.program, kernel, pass.primitive)?;

        let mut seen = BTreeSet::new();
        for id in pass.outputs {
            if !seen.insert(*id) || pass.inputs.iter().any(|(_, input)| input == id) {
                return Err(ResourceError::Aliased(pass.label.to_string()).into());
            }
            if !self.surfaces.contains_key(id) {
                return Err(ResourceError::MissingSurface(*id).into());
            }
        }
        for (_, id) in pass.inputs {
            if !self.surfaces.contains_key(id) {
                return Err(ResourceError::MissingSurface(*id).into());
            }
        }
        Ok(())
    }

    fn begin_frame(&mut self) {
        self.frames += 1;
    }

    fn draw(&mut self, call: &DrawCall<'_>) -> Result<(), EffectError> {
        self.prepare_pass(&call.shape())?;
        let kernel = self.kernels.get(call.program).ok_or_else(|| ProgramError::Missing(call.program.to_string()))?;

        // Attachments leave the map while the kernel borrows the inputs
        let mut targets: Vec<(SurfaceId, SoftSurface)> = call.outputs.iter().filter_map(|id| self.surfaces.remove(id).map(|surface| (*id, surface))).collect();
        let target = targets.first().map(|(_, surface)| (surface.width, surface.height)).unwrap_or((0, 0));
        let context = KernelContext {
            textures: call.inputs.iter().filter_map(|(name, id)| self.surfaces.get(id).map(|surface| (name.as_str(), surface))).collect(),
            values: call.values,
            target,
        };
        let (x0, y0, x1, y1) = Self::region(call.viewport, target);
        let inside = |x: u32, y: u32| x >= x0 && x < x1 && y >= y0 && y < y1;

        let mut store = |x: u32, y: u32, colors: &[[f32; 4]]| {
            for ((_, surface), color) in targets.iter_mut().zip(colors) {
                surface.store(x, y, *color, call.blend);
            }
        };
        let result = match (kernel, call.primitive) {
            (Kernel::Fragment(kernel), Primitive::FullSurface) => {
                for y in y0..y1 {
                    for x in x0..x1 {
                        store(x, y, &kernel(&context, (x, y)));
                    }
                }
                Ok(())
            }
            (Kernel::Points(kernel), Primitive::Points(count)) => {
                for index in 0..count {
                    if let Some(((x, y), colors)) = kernel(&context, index) {
                        if inside(x, y) {
                            store(x, y, &colors);
                        }
                    }
                }
                Ok(())
            }
            (kernel, primitive) => check_shape(call.program, kernel, primitive),
        };
        drop(context);

        self.surfaces.extend(targets);
        result?;
        *self.invocations.entry(call.program.to_string()).or_default() += 1;
        Ok(())
    }

    fn end_frame(&mut self) {}

    /// Draws are applied as they are issued; the executor restores persistent state itself
    fn abort_frame(&mut self) {}

    fn read_surface(&mut self, id: SurfaceId) -> Result<Vec<[f32; 4]>, ResourceError> {
        self.surfaces.get(&id).map(|surface| surface.pixels.clone()).ok_or(ResourceError::MissingSurface(id))
    }
}

/// Fragment kernels draw full surfaces, point kernels draw points
fn check_shape(program: &str, kernel: &Kernel, primitive: Primitive) -> Result<(), ProgramError> {
    let entry = match (kernel, primitive) {
        (Kernel::Fragment(_), Primitive::Points(_)) => "vertex",
        (Kernel::Points(_), Primitive::FullSurface) => "fragment",
        _ => return Ok(()),
    };
    Err(ProgramError::MissingEntryPoint {
        program: program.to_string(),
        entry: entry.to_string(),
    })
}

/// Rounds a value to what `format` can store
fn quantize(format: SurfaceFormat, value: [f32; 4]) -> [f32; 4] {
    let mut out = [0.0, 0.0, 0.0, 1.0];
    for (channel, component) in value.iter().enumerate().take(format.channels()) {
        out[channel] = match format {
            SurfaceFormat::Rgba8Unorm => (component.clamp(0.0, 1.0) * 255.0).round() / 255.0,
            SurfaceFormat::Rgba16Float | SurfaceFormat::R16Float | SurfaceFormat::Rg16Float => half::f16::from_f32(*component).to_f32(),
            SurfaceFormat::Rgba32Float | SurfaceFormat::R32Float | SurfaceFormat::Rg32Float => *component,
        };
    }
    out
}

fn apply_blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let factor = |factor: BlendFactor, channel: usize| match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::Src => src[channel],
        BlendFactor::OneMinusSrc => 1.0 - src[channel],
        BlendFactor::SrcAlpha => src[3],
        BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
        BlendFactor::Dst => dst[channel],
        BlendFactor::OneMinusDst => 1.0 - dst[channel],
        BlendFactor::DstAlpha => dst[3],
        BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
    };
    std::array::from_fn(|channel| src[channel] * factor(mode.src, channel) + dst[channel] * factor(mode.dst, channel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fxgraph_wgpu_build::CompiledEffect;

    fn surface(backend: &mut SoftwareBackend, width: u32, height: u32, format: SurfaceFormat) -> SurfaceId {
        backend
            .create_surface(&SurfaceDesc {
                label: "test".to_string(),
                width,
                height,
                format,
            })
            .unwrap()
    }

    fn program(id: &str) -> CompiledProgram {
        let yaml = format!("func: t\npasses:\n  - {{program: {id}, outputs: {{o: outputTex}}}}\n");
        let effect = CompiledEffect::from_yaml(&yaml, |_| Ok("@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }".to_string())).unwrap();
        effect.programs[id].clone()
    }

    fn call<'a>(program: &'a str, inputs: &'a [(String, SurfaceId)], outputs: &'a [SurfaceId], values: &'a UniformValues, primitive: Primitive) -> DrawCall<'a> {
        DrawCall {
            label: program,
            program,
            inputs,
            outputs,
            uniforms: &[],
            values,
            primitive,
            blend: None,
            viewport: None,
        }
    }

    #[test]
    fn test_fragment_kernel_reads_inputs_and_values() {
        let mut backend = SoftwareBackend::new();
        backend.register_fragment("scale", |ctx, (x, _)| {
            let (width, _) = ctx.extent("src").unwrap();
            let v = ctx.sample("src", [(x as f32 + 0.5) / width as f32, 0.5]);
            vec![[v[0] * ctx.value("gain"), 0.0, 0.0, 1.0]]
        });
        backend.compile_program(&program("scale")).unwrap();

        let src = surface(&mut backend, 2, 1, SurfaceFormat::Rgba32Float);
        let dst = surface(&mut backend, 2, 1, SurfaceFormat::Rgba32Float);
        backend.write_surface(src, &[[1.0, 0.0, 0.0, 1.0], [2.0, 0.0, 0.0, 1.0]]).unwrap();
        let mut values = UniformValues::new();
        values.set("gain", 3.0);
        let inputs = [("src".to_string(), src)];
        backend.draw(&call("scale", &inputs, &[dst], &values, Primitive::FullSurface)).unwrap();

        let pixels = backend.read_surface(dst).unwrap();
        assert_eq!(pixels[0][0], 3.0);
        assert_eq!(pixels[1][0], 6.0);
        assert_eq!(backend.invocations("scale"), 1);
    }

    #[test]
    fn test_additive_points_inside_viewport() {
        let mut backend = SoftwareBackend::new();
        backend.register_points("splat", |_, index| Some(((index % 2, 0), vec![[0.25, 0.0, 0.0, 0.0]])));
        backend.compile_program(&program("splat")).unwrap();

        let dst = surface(&mut backend, 2, 1, SurfaceFormat::Rgba16Float);
        let values = UniformValues::new();
        let mut draw = call("splat", &[], std::slice::from_ref(&dst), &values, Primitive::Points(6));
        draw.blend = Some(BlendMode::ADDITIVE);
        draw.viewport = Some(Viewport { x: 1, y: 0, width: 1, height: 1 });
        backend.draw(&draw).unwrap();

        let pixels = backend.read_surface(dst).unwrap();
        assert_eq!(pixels[0][0], 0.0);
        assert_eq!(pixels[1][0], 0.75);
    }

    #[test]
    fn test_aliasing_is_rejected() {
        let mut backend = SoftwareBackend::new();
        backend.register_fragment("copy", |ctx, (x, y)| vec![ctx.load("src", x as i64, y as i64)]);
        backend.compile_program(&program("copy")).unwrap();

        let id = surface(&mut backend, 1, 1, SurfaceFormat::Rgba16Float);
        let values = UniformValues::new();
        let inputs = [("src".to_string(), id)];
        let err = backend.draw(&call("copy", &inputs, &[id], &values, Primitive::FullSurface)).unwrap_err();
        assert_eq!(err, EffectError::Resource(ResourceError::Aliased("copy".into())));
        assert_eq!(backend.live_surfaces(), 1);
    }

    #[test]
    fn test_formats_quantize_on_store() {
        let mut backend = SoftwareBackend::new();
        let half = surface(&mut backend, 1, 1, SurfaceFormat::Rgba16Float);
        let byte = surface(&mut backend, 1, 1, SurfaceFormat::Rgba8Unorm);
        let red = surface(&mut backend, 1, 1, SurfaceFormat::R32Float);
        backend.clear_surface(half, [0.1, 0.0, 0.0, 1.0]).unwrap();
        backend.clear_surface(byte, [2.0, 0.5, -1.0, 1.0]).unwrap();
        backend.clear_surface(red, [0.5, 0.5, 0.5, 0.5]).unwrap();

        assert_eq!(backend.read_surface(half).unwrap()[0][0], half::f16::from_f32(0.1).to_f32());
        assert_eq!(backend.read_surface(byte).unwrap()[0], [1.0, 128.0 / 255.0, 0.0, 1.0]);
        assert_eq!(backend.read_surface(red).unwrap()[0], [0.5, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_unregistered_programs_fail_to_compile() {
        let mut backend = SoftwareBackend::new();
        let err = backend.compile_program(&program("ghost")).unwrap_err();
        assert!(matches!(err, ProgramError::Compile { program, .. } if program == "ghost"));
    }

    #[test]
    fn test_extent_limit() {
        let mut backend = SoftwareBackend::new().with_max_extent(16);
        let err = backend
            .create_surface(&SurfaceDesc {
                label: "big".to_string(),
                width: 32,
                height: 8,
                format: SurfaceFormat::Rgba16Float,
            })
            .unwrap_err();
        assert_eq!(err, ResourceError::TooLarge { width: 32, height: 8, limit: 16 });

        // Sides past the default cap are rejected before their area is computed
        let err = SoftwareBackend::new()
            .create_surface(&SurfaceDesc {
                label: "atlas".to_string(),
                width: 70000,
                height: u32::MAX,
                format: SurfaceFormat::Rgba16Float,
            })
            .unwrap_err();
        assert!(matches!(err, ResourceError::TooLarge { limit: DEFAULT_MAX_EXTENT, .. }));
    }

    #[test]
    fn test_shape_mismatch_is_caught_before_drawing() {
        let mut backend = SoftwareBackend::new();
        backend.register_fragment("flat", |_, _| vec![[1.0; 4]]);
        backend.compile_program(&program("flat")).unwrap();
        let dst = surface(&mut backend, 1, 1, SurfaceFormat::Rgba16Float);

        let values = UniformValues::new();
        let draw = call("flat", &[], std::slice::from_ref(&dst), &values, Primitive::Points(4));
        let err = backend.prepare_pass(&draw.shape()).unwrap_err();
        assert!(matches!(err, EffectError::Program(ProgramError::MissingEntryPoint { entry, .. }) if entry == "vertex"));
        assert!(backend.draw(&draw).is_err());
        assert_eq!(backend.invocations("flat"), 0);
        assert_eq!(backend.read_surface(dst).unwrap()[0][0], 0.0);
    }
}
