//! Surface allocation
//!
//! Surfaces are cached per slot and reused across frames. A slot is
//! reallocated only when its resolved extent or format changes.

use crate::backend::{Backend, SurfaceDesc, SurfaceFormat, SurfaceId};
use crate::error::ResourceError;
use fxgraph_wgpu_build::definition::{ParamValue, SizingInputs, TextureDescriptor};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a cached surface within one effect instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKey {
    /// Pooled transient surface
    Transient(u32),
    /// Dedicated surface surviving across frames
    Retained(String),
    /// One half of a double-buffered pair
    Persistent(String, u8),
    /// Final output; index 1 exists only when the output is double-buffered
    Output(u8),
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient(id) => write!(f, "transient #{id}"),
            Self::Retained(key) => write!(f, "{key}"),
            Self::Persistent(key, half) => write!(f, "{key}[{half}]"),
            Self::Output(half) => write!(f, "output[{half}]"),
        }
    }
}

/// Frame-time values descriptors are resolved against
#[derive(Debug, Clone, Copy)]
pub struct SizingContext<'a> {
    /// Resolution of the primary input
    pub screen: (u32, u32),
    pub params: &'a BTreeMap<String, ParamValue>,
    /// Extents of connected boundary surfaces
    pub upstream: &'a BTreeMap<String, (u32, u32)>,
}

impl SizingInputs for SizingContext<'_> {
    fn screen(&self) -> (u32, u32) {
        self.screen
    }

    fn param(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(ParamValue::as_f64)
    }

    fn upstream_extent(&self, boundary: &str) -> Option<(u32, u32)> {
        self.upstream.get(boundary).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Allocation {
    id: SurfaceId,
    extent: (u32, u32),
    format: SurfaceFormat,
}

/// Result of [`ResourceAllocator::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired {
    pub id: SurfaceId,
    /// The surface was created by this call and holds zeros
    pub allocated: bool,
}

/// Per-instance surface cache
#[derive(Debug, Default)]
pub struct ResourceAllocator {
    owner: String,
    slots: BTreeMap<SlotKey, Allocation>,
    generation: u64,
}

impl ResourceAllocator {
    /// Creates an empty allocator; `owner` prefixes surface labels
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            ..Default::default()
        }
    }

    /// Returns the surface of `slot` for `descriptor`, creating or resizing it as needed
    ///
    /// # Arguments
    /// * `backend` - Backend owning the surfaces
    /// * `slot` - Cache identity of the surface
    /// * `descriptor` - Texture descriptor to resolve
    /// * `sizing` - Current input resolution, parameters and upstream extents
    pub fn acquire(&mut self, backend: &mut dyn Backend, slot: SlotKey, descriptor: &TextureDescriptor, sizing: &SizingContext<'_>) -> Result<Acquired, ResourceError> {
        let format: SurfaceFormat = descriptor.format.parse()?;
        self.acquire_extent(backend, slot, descriptor.extent(sizing), format)
    }

    /// Like [`ResourceAllocator::acquire`] with an already resolved extent
    pub fn acquire_extent(&mut self, backend: &mut dyn Backend, slot: SlotKey, extent: (u32, u32), format: SurfaceFormat) -> Result<Acquired, ResourceError> {
        if let Some(existing) = self.slots.get(&slot) {
            if existing.extent == extent && existing.format == format {
                return Ok(Acquired { id: existing.id, allocated: false });
            }
            tracing::debug!(owner = %self.owner, %slot, from = ?existing.extent, to = ?extent, "reallocating surface");
            backend.destroy_surface(existing.id);
            self.slots.remove(&slot);
        }

        let id = backend.create_surface(&SurfaceDesc {
            label: format!("{} {slot}", self.owner),
            width: extent.0,
            height: extent.1,
            format,
        })?;
        tracing::debug!(owner = %self.owner, %slot, width = extent.0, height = extent.1, ?format, "allocated surface");
        self.slots.insert(slot, Allocation { id, extent, format });
        self.generation += 1;
        Ok(Acquired { id, allocated: true })
    }

    pub fn surface(&self, slot: &SlotKey) -> Option<SurfaceId> {
        self.slots.get(slot).map(|allocation| allocation.id)
    }

    pub fn extent(&self, slot: &SlotKey) -> Option<(u32, u32)> {
        self.slots.get(slot).map(|allocation| allocation.extent)
    }

    /// Incremented on every allocation; a change means bindings must be re-resolved
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Destroys every surface this allocator owns
    pub fn release_all(&mut self, backend: &mut dyn Backend) {
        for (_, allocation) in std::mem::take(&mut self.slots) {
            backend.destroy_surface(allocation.id);
        }
        self.generation += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;

    fn descriptor(yaml: &str) -> TextureDescriptor {
        serde_norway::from_str(yaml).unwrap()
    }

    #[test]
    fn test_surfaces_are_cached_and_resized() {
        let mut backend = SoftwareBackend::new();
        let mut allocator = ResourceAllocator::new("test");
        let mut params = BTreeMap::new();
        params.insert("volumeSize".to_string(), ParamValue::Int(32));
        let upstream = BTreeMap::new();
        let volume = descriptor("width: {param: volumeSize}\nheight: {param: volumeSize, power: 2}\n");

        let sizing = SizingContext { screen: (64, 64), params: &params, upstream: &upstream };
        let first = allocator.acquire(&mut backend, SlotKey::Retained("volume".into()), &volume, &sizing).unwrap();
        assert!(first.allocated);
        assert_eq!(backend.surface_extent(first.id), Some((32, 1024)));

        let again = allocator.acquire(&mut backend, SlotKey::Retained("volume".into()), &volume, &sizing).unwrap();
        assert_eq!(again, Acquired { id: first.id, allocated: false });
        assert_eq!(allocator.generation(), 1);

        params.insert("volumeSize".to_string(), ParamValue::Int(16));
        let sizing = SizingContext { screen: (64, 64), params: &params, upstream: &upstream };
        let resized = allocator.acquire(&mut backend, SlotKey::Retained("volume".into()), &volume, &sizing).unwrap();
        assert!(resized.allocated);
        assert_ne!(resized.id, first.id);
        assert_eq!(allocator.extent(&SlotKey::Retained("volume".into())), Some((16, 256)));
        assert_eq!(backend.live_surfaces(), 1);
        assert_eq!(allocator.generation(), 2);
    }

    #[test]
    fn test_percentages_floor_and_override_follows_upstream() {
        let mut backend = SoftwareBackend::new();
        let mut allocator = ResourceAllocator::new("test");
        let params = BTreeMap::new();
        let mut upstream = BTreeMap::new();
        upstream.insert("inputTex3d".to_string(), (8, 64));
        let sizing = SizingContext { screen: (101, 51), params: &params, upstream: &upstream };

        let half = allocator.acquire(&mut backend, SlotKey::Transient(0), &descriptor("width: 50%\nheight: 50%\n"), &sizing).unwrap();
        assert_eq!(backend.surface_extent(half.id), Some((50, 25)));

        let follow = descriptor("width: {param: volumeSize, inputOverride: inputTex3d}\nheight: {param: volumeSize, power: 2, inputOverride: inputTex3d}\n");
        let volume = allocator.acquire(&mut backend, SlotKey::Retained("volume".into()), &follow, &sizing).unwrap();
        assert_eq!(backend.surface_extent(volume.id), Some((8, 64)));
    }

    #[test]
    fn test_unsupported_format_and_release() {
        let mut backend = SoftwareBackend::new();
        let mut allocator = ResourceAllocator::new("test");
        let params = BTreeMap::new();
        let upstream = BTreeMap::new();
        let sizing = SizingContext { screen: (4, 4), params: &params, upstream: &upstream };

        let err = allocator.acquire(&mut backend, SlotKey::Transient(0), &descriptor("format: rgb565\n"), &sizing).unwrap_err();
        assert_eq!(err, ResourceError::UnsupportedFormat("rgb565".into()));

        allocator.acquire(&mut backend, SlotKey::Persistent("state".into(), 0), &TextureDescriptor::default(), &sizing).unwrap();
        allocator.acquire(&mut backend, SlotKey::Persistent("state".into(), 1), &TextureDescriptor::default(), &sizing).unwrap();
        assert_eq!(backend.live_surfaces(), 2);
        allocator.release_all(&mut backend);
        assert_eq!(backend.live_surfaces(), 0);
        assert!(allocator.is_empty());
    }
}
