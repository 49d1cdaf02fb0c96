//! Program interface reflection
//!
//! Parses and validates WGSL with `naga` and extracts what the engine needs to
//! bind a program: its textures, samplers, uniform block shape and entry points.

use serde::Serialize;
use std::collections::BTreeMap;

/// A texture or sampler binding declared by a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
}

/// Scalar type of a uniform struct member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScalarType {
    Float,
    Sint,
    Uint,
    Bool,
}

/// A scalar or vector member of the uniform struct
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformMember {
    pub name: String,
    /// Byte offset inside the block
    pub offset: u32,
    pub scalar: ScalarType,
    /// 1 for scalars, 2 to 4 for vectors
    pub components: u32,
}

/// The program's `var<uniform>` block
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniformBlock {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    /// Size in bytes
    pub size: u32,
    pub members: Vec<UniformMember>,
    /// Number of `vec4<f32>` registers when the block is made of them only
    pub registers: Option<u32>,
}

/// Everything a backend and the load-time checks need to know about a program
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgramInterface {
    pub textures: Vec<ResourceSlot>,
    pub samplers: Vec<ResourceSlot>,
    pub uniform_block: Option<UniformBlock>,
    pub vertex_entries: Vec<String>,
    /// Fragment entry point -> number of color targets it writes
    pub fragment_entries: BTreeMap<String, u32>,
}

impl ProgramInterface {
    pub fn texture(&self, name: &str) -> Option<&ResourceSlot> {
        self.textures.iter().find(|slot| slot.name == name)
    }
}

/// Parses, validates and reflects a WGSL program
///
/// # Arguments
/// * `source` - WGSL source code
///
/// # Returns
/// The program interface, or a human readable compile error
pub fn reflect_wgsl(source: &str) -> Result<ProgramInterface, String> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| e.emit_to_string(source))?;
    let mut validator = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all());
    validator.validate(&module).map_err(|e| format!("validation error: {e}"))?;

    let mut interface = ProgramInterface::default();

    for (_, variable) in module.global_variables.iter() {
        let (Some(binding), Some(name)) = (&variable.binding, &variable.name) else {
            continue;
        };
        let slot = ResourceSlot {
            name: name.clone(),
            group: binding.group,
            binding: binding.binding,
        };
        match (&variable.space, &module.types[variable.ty].inner) {
            (naga::AddressSpace::Uniform, inner) => {
                interface.uniform_block = Some(uniform_block(&module, slot, inner));
            }
            (naga::AddressSpace::Handle, naga::TypeInner::Image { .. }) => interface.textures.push(slot),
            (naga::AddressSpace::Handle, naga::TypeInner::Sampler { .. }) => interface.samplers.push(slot),
            _ => {}
        }
    }

    for entry in &module.entry_points {
        match entry.stage {
            naga::ShaderStage::Vertex => interface.vertex_entries.push(entry.name.clone()),
            naga::ShaderStage::Fragment => {
                let targets = match &entry.function.result {
                    Some(result) => match (&result.binding, &module.types[result.ty].inner) {
                        (Some(naga::Binding::Location { .. }), _) => 1,
                        (None, naga::TypeInner::Struct { members, .. }) => members.iter().filter(|m| matches!(m.binding, Some(naga::Binding::Location { .. }))).count() as u32,
                        _ => 0,
                    },
                    None => 0,
                };
                interface.fragment_entries.insert(entry.name.clone(), targets);
            }
            _ => {}
        }
    }

    Ok(interface)
}

fn uniform_block(module: &naga::Module, slot: ResourceSlot, inner: &naga::TypeInner) -> UniformBlock {
    let mut block = UniformBlock {
        name: slot.name,
        group: slot.group,
        binding: slot.binding,
        size: inner.size(module.to_ctx()),
        members: Vec::new(),
        registers: None,
    };

    match inner {
        naga::TypeInner::Struct { members, span } => {
            let mut all_registers = true;
            for member in members {
                let member_inner = &module.types[member.ty].inner;
                all_registers &= register_count(module, member_inner).is_some();
                if let (Some(name), Some((scalar, components))) = (&member.name, scalar_shape(member_inner)) {
                    block.members.push(UniformMember {
                        name: name.clone(),
                        offset: member.offset,
                        scalar,
                        components,
                    });
                }
            }
            if all_registers && span % 16 == 0 {
                block.registers = Some(span / 16);
            }
        }
        other => block.registers = register_count(module, other),
    }

    block
}

/// Registers occupied by a `vec4<f32>` or an `array<vec4<f32>, N>`
fn register_count(module: &naga::Module, inner: &naga::TypeInner) -> Option<u32> {
    match inner {
        naga::TypeInner::Vector {
            size: naga::VectorSize::Quad,
            scalar: naga::Scalar { kind: naga::ScalarKind::Float, width: 4 },
        } => Some(1),
        naga::TypeInner::Array {
            base,
            size: naga::ArraySize::Constant(count),
            ..
        } => register_count(module, &module.types[*base].inner).map(|per_element| per_element * count.get()),
        _ => None,
    }
}

fn scalar_shape(inner: &naga::TypeInner) -> Option<(ScalarType, u32)> {
    let (scalar, components) = match inner {
        naga::TypeInner::Scalar(scalar) => (scalar, 1),
        naga::TypeInner::Vector { size, scalar } => (scalar, *size as u32),
        _ => return None,
    };
    let scalar = match scalar.kind {
        naga::ScalarKind::Float => ScalarType::Float,
        naga::ScalarKind::Sint => ScalarType::Sint,
        naga::ScalarKind::Uint => ScalarType::Uint,
        naga::ScalarKind::Bool => ScalarType::Bool,
        _ => return None,
    };
    Some((scalar, components))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTER_PROGRAM: &str = r#"
struct Uniforms {
    data: array<vec4<f32>, 3>,
}

@group(0) @binding(0) var<uniform> uniforms: Uniforms;
@group(0) @binding(1) var inputTex: texture_2d<f32>;
@group(0) @binding(2) var samp: sampler;

struct FragmentOutput {
    @location(0) color: vec4<f32>,
    @location(1) geo: vec4<f32>,
}

@fragment
fn main(@builtin(position) position: vec4<f32>) -> FragmentOutput {
    let uv = position.xy / vec2<f32>(textureDimensions(inputTex));
    let c = textureSample(inputTex, samp, uv) * uniforms.data[0].x;
    return FragmentOutput(c, vec4<f32>(uniforms.data[2].yzw, 1.0));
}
"#;

    #[test]
    fn test_register_block_reflection() {
        let interface = reflect_wgsl(REGISTER_PROGRAM).unwrap();
        let block = interface.uniform_block.as_ref().unwrap();
        assert_eq!(block.name, "uniforms");
        assert_eq!(block.size, 48);
        assert_eq!(block.registers, Some(3));
        assert!(block.members.is_empty());

        assert_eq!(interface.texture("inputTex").map(|t| t.binding), Some(1));
        assert_eq!(interface.samplers.len(), 1);
        assert_eq!(interface.fragment_entries.get("main"), Some(&2));
        assert!(interface.vertex_entries.is_empty());
    }

    #[test]
    fn test_named_members_reflection() {
        let source = r#"
struct Params {
    time: f32,
    frame: i32,
    resolution: vec2<f32>,
    tint: vec3<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@fragment
fn main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return vec4<f32>(params.tint * params.time, f32(params.frame));
}
"#;
        let interface = reflect_wgsl(source).unwrap();
        let block = interface.uniform_block.as_ref().unwrap();
        assert_eq!(block.registers, None);
        let offsets: Vec<_> = block.members.iter().map(|m| (m.name.as_str(), m.offset, m.components)).collect();
        assert_eq!(offsets, vec![("time", 0, 1), ("frame", 4, 1), ("resolution", 8, 2), ("tint", 16, 3)]);
        assert_eq!(block.members[1].scalar, ScalarType::Sint);
        assert_eq!(interface.fragment_entries.get("main"), Some(&1));
    }

    #[test]
    fn test_invalid_program_reports_error() {
        let err = reflect_wgsl("@fragment fn main() -> @location(0) vec4<f32> { return undefined_value; }").unwrap_err();
        assert!(!err.is_empty());
    }
}
