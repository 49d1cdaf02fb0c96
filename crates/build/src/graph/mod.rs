//! Pass graph resolution and transient surface pooling

mod pass_graph;
mod physical_texture;

pub use pass_graph::*;
pub use physical_texture::{PhysicalTexture, TextureLifetime, assign_physical_textures};
