//! Transient texture pooling
//!
//! Transient textures only live between the pass that writes them and the
//! last pass that reads them within a frame. Textures whose lifetimes don't
//! overlap and whose descriptors are identical share one physical surface.

use crate::definition::TextureDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;

/// Lifetime of a logical transient texture within one frame
#[derive(Debug, Clone)]
pub struct TextureLifetime {
    /// Texture key as written in the definition
    pub logical_id: String,
    pub descriptor: TextureDescriptor,
    /// Index of the first pass writing the texture
    pub created_at: usize,
    /// Index of the last pass touching the texture
    pub last_used_at: usize,
}

/// A pooled surface shared by one or more transient textures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhysicalTexture {
    pub id: u32,
    pub descriptor: TextureDescriptor,
    /// Logical textures mapped onto this surface, in assignment order
    pub logical_ids: Vec<String>,
}

/// Assigns physical textures to logical lifetimes, reusing a physical texture
/// when its current occupant is dead before the new lifetime starts and the
/// descriptors match.
///
/// # Arguments
/// * `texture_lifetimes` - Lifetimes sorted by `created_at`
///
/// # Returns
/// A tuple containing:
/// * `Vec<PhysicalTexture>` - Physical textures, indexed by id
/// * `BTreeMap<String, u32>` - Logical texture key -> physical texture id
pub fn assign_physical_textures(texture_lifetimes: &[TextureLifetime]) -> (Vec<PhysicalTexture>, BTreeMap<String, u32>) {
    let mut physical_textures: Vec<PhysicalTexture> = Vec::new();
    let mut assignments = BTreeMap::new();
    // Last lifetime occupying each physical texture
    let mut occupants: Vec<TextureLifetime> = Vec::new();

    for lifetime in texture_lifetimes {
        let reusable = occupants
            .iter()
            .position(|occupant| occupant.last_used_at < lifetime.created_at && occupant.descriptor == lifetime.descriptor);

        let physical_id = match reusable {
            Some(index) => {
                occupants[index] = lifetime.clone();
                physical_textures[index].logical_ids.push(lifetime.logical_id.clone());
                index as u32
            }
            None => {
                let id = physical_textures.len() as u32;
                occupants.push(lifetime.clone());
                physical_textures.push(PhysicalTexture {
                    id,
                    descriptor: lifetime.descriptor.clone(),
                    logical_ids: vec![lifetime.logical_id.clone()],
                });
                id
            }
        };

        assignments.insert(lifetime.logical_id.clone(), physical_id);
    }

    (physical_textures, assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Dimension;

    fn lifetime(id: &str, created_at: usize, last_used_at: usize) -> TextureLifetime {
        TextureLifetime {
            logical_id: id.to_string(),
            descriptor: TextureDescriptor::default(),
            created_at,
            last_used_at,
        }
    }

    fn quarter(mut lifetime: TextureLifetime) -> TextureLifetime {
        lifetime.descriptor.width = Dimension::Percent(25.0);
        lifetime.descriptor.height = Dimension::Percent(25.0);
        lifetime
    }

    #[test]
    fn test_empty() {
        let (physical, assignments) = assign_physical_textures(&[]);
        assert!(physical.is_empty());
        assert!(assignments.is_empty());
    }

    #[test]
    fn test_sequential_lifetimes_share_a_texture() {
        let (physical, assignments) = assign_physical_textures(&[lifetime("blurH", 0, 1), lifetime("blurV", 2, 3)]);
        assert_eq!(physical.len(), 1);
        assert_eq!(assignments["blurH"], 0);
        assert_eq!(assignments["blurV"], 0);
        assert_eq!(physical[0].logical_ids, vec!["blurH", "blurV"]);
    }

    #[test]
    fn test_touching_lifetimes_do_not_share() {
        // blurV is written by the pass that last reads blurH
        let (physical, assignments) = assign_physical_textures(&[lifetime("blurH", 0, 1), lifetime("blurV", 1, 2)]);
        assert_eq!(physical.len(), 2);
        assert_ne!(assignments["blurH"], assignments["blurV"]);
    }

    #[test]
    fn test_descriptor_mismatch_prevents_reuse() {
        let (physical, assignments) = assign_physical_textures(&[lifetime("full", 0, 0), quarter(lifetime("small", 1, 2)), lifetime("again", 3, 3)]);
        assert_eq!(physical.len(), 2);
        assert_eq!(assignments["full"], 0);
        assert_eq!(assignments["small"], 1);
        assert_eq!(assignments["again"], 0);
        assert_eq!(physical[1].descriptor.width, Dimension::Percent(25.0));
    }

    #[test]
    fn test_reuse_picks_first_free_texture() {
        let lifetimes = [lifetime("a", 0, 1), lifetime("b", 1, 4), lifetime("c", 2, 3), lifetime("d", 5, 6), lifetime("e", 5, 6)];
        let (physical, assignments) = assign_physical_textures(&lifetimes);
        assert_eq!(assignments["a"], 0);
        assert_eq!(assignments["b"], 1);
        assert_eq!(assignments["c"], 0);
        assert_eq!(assignments["d"], 0);
        assert_eq!(assignments["e"], 1);
        assert_eq!(physical.len(), 2);
        for (index, texture) in physical.iter().enumerate() {
            assert_eq!(texture.id as usize, index);
        }
    }
}
