//! Uniform packing
//!
//! Turns the flat name -> value map of a frame into the bytes of a program's
//! uniform buffer. Programs with a register layout get dense `vec4<f32>`
//! registers; programs without one get each member of their uniform struct
//! written at its reflected offset.

use bytes::{Bytes, BytesMut};
use fxgraph_wgpu_build::CompiledProgram;
use fxgraph_wgpu_build::definition::ParamValue;
use fxgraph_wgpu_build::reflect::{ScalarType, UniformBlock};
use fxgraph_wgpu_build::uniforms::{COMPONENT_SIZE, UniformLayout};
use std::collections::BTreeMap;

/// Values visible to programs during one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformValues(BTreeMap<String, ParamValue>);

impl UniformValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn set_vector(&mut self, name: impl Into<String>, components: &[f64]) {
        self.0.insert(name.into(), ParamValue::Vector(components.to_vec()));
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Components of `name` as written into a buffer
    ///
    /// `width` and `height` fall back to the components of `resolution`,
    /// `channels` to 4.
    pub fn components(&self, name: &str) -> Option<Vec<f32>> {
        if let Some(value) = self.0.get(name) {
            return Some(value.components());
        }
        let resolution = |index: usize| self.0.get("resolution").and_then(|value| value.components().get(index).copied()).map(|c| vec![c]);
        match name {
            "width" => resolution(0),
            "height" => resolution(1),
            "channels" => Some(vec![4.0]),
            _ => None,
        }
    }

    /// First component of `name`
    pub fn scalar(&self, name: &str) -> Option<f32> {
        self.components(name).and_then(|components| components.first().copied())
    }
}

impl Extend<(String, ParamValue)> for UniformValues {
    fn extend<T: IntoIterator<Item = (String, ParamValue)>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

/// A packed uniform buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedUniforms {
    pub bytes: Bytes,
    /// Uniforms the program expects but no value was supplied for; left zero
    pub unbound: Vec<String>,
}

/// Packs `values` for `program`, picking register or member packing
pub fn pack_program(program: &CompiledProgram, values: &UniformValues) -> PackedUniforms {
    match (&program.layout, program.interface.as_ref().and_then(|interface| interface.uniform_block.as_ref())) {
        (Some(layout), _) => pack_registers(layout, values),
        (None, Some(block)) => pack_members(block, values),
        (None, None) => PackedUniforms::default(),
    }
}

/// Packs values into `(max slot + 1)` `vec4<f32>` registers
///
/// Booleans become 1.0 or 0.0. A value with fewer components than its mask
/// fills the leading components; extra components are dropped.
pub fn pack_registers(layout: &UniformLayout, values: &UniformValues) -> PackedUniforms {
    let mut registers = vec![[0.0f32; 4]; layout.register_count() as usize];
    let mut unbound = Vec::new();

    for (name, slot) in layout.iter() {
        let Some(components) = values.components(name) else {
            unbound.push(name.to_string());
            continue;
        };
        let register = &mut registers[slot.slot as usize];
        for (lane, component) in register[slot.components.first as usize..].iter_mut().zip(components.iter().take(slot.components.count as usize)) {
            *lane = *component;
        }
    }

    PackedUniforms {
        bytes: Bytes::copy_from_slice(bytemuck::cast_slice(&registers)),
        unbound,
    }
}

/// Writes each member of a reflected uniform struct from the value of the same name
pub fn pack_members(block: &UniformBlock, values: &UniformValues) -> PackedUniforms {
    let mut buffer = BytesMut::zeroed(block.size as usize);
    let mut unbound = Vec::new();

    for member in &block.members {
        let Some(components) = values.components(&member.name) else {
            unbound.push(member.name.clone());
            continue;
        };
        for (index, component) in components.iter().take(member.components as usize).enumerate() {
            let at = member.offset as usize + index * COMPONENT_SIZE;
            let bytes = match member.scalar {
                ScalarType::Float => component.to_le_bytes(),
                ScalarType::Sint => (component.round() as i32).to_le_bytes(),
                ScalarType::Uint => (component.round().max(0.0) as u32).to_le_bytes(),
                ScalarType::Bool => u32::from(*component != 0.0).to_le_bytes(),
            };
            buffer[at..at + COMPONENT_SIZE].copy_from_slice(&bytes);
        }
    }

    PackedUniforms { bytes: buffer.freeze(), unbound }
}
