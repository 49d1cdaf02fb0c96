//! Double-buffered persistent surfaces
//!
//! Every persistent key owns two surfaces and a parity bit. Passes read the
//! committed surface and write the other one; a write only becomes visible
//! once the pair is committed, which flips the parity. Parities are
//! checkpointed when a frame starts so a failed frame can be undone.

use crate::backend::{Backend, SurfaceId};
use crate::error::ResourceError;
use std::collections::BTreeMap;

/// Two surfaces backing one persistent key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentPair {
    surfaces: [SurfaceId; 2],
    parity: u8,
    /// Written since the last commit
    pending: bool,
    /// Parity when the current frame started
    checkpoint: u8,
    /// The surface committed at the checkpoint was written this frame
    clobbered: bool,
}

impl PersistentPair {
    pub fn new(surfaces: [SurfaceId; 2]) -> Self {
        Self {
            surfaces,
            parity: 0,
            pending: false,
            checkpoint: 0,
            clobbered: false,
        }
    }

    /// Surface holding the committed state
    pub fn read(&self) -> SurfaceId {
        self.surfaces[self.parity as usize]
    }

    /// Surface the next write goes to
    pub fn write(&self) -> SurfaceId {
        self.surfaces[(self.parity ^ 1) as usize]
    }

    pub fn parity(&self) -> u8 {
        self.parity
    }

    pub fn surfaces(&self) -> [SurfaceId; 2] {
        self.surfaces
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn mark_written(&mut self) {
        if self.write() == self.surfaces[self.checkpoint as usize] {
            self.clobbered = true;
        }
        self.pending = true;
    }

    /// Publishes a pending write; returns whether the parity flipped
    pub fn commit(&mut self) -> bool {
        if !self.pending {
            return false;
        }
        self.parity ^= 1;
        self.pending = false;
        true
    }
}

/// Persistent pairs of one effect instance
#[derive(Debug, Default)]
pub struct DoubleBufferRegistry {
    pairs: BTreeMap<String, PersistentPair>,
}

impl DoubleBufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to two surfaces
    ///
    /// Rebinding the same surfaces keeps the parity; new surfaces start over
    /// at parity 0.
    pub fn bind(&mut self, key: &str, surfaces: [SurfaceId; 2]) {
        match self.pairs.get(key) {
            Some(pair) if pair.surfaces == surfaces => {}
            _ => {
                self.pairs.insert(key.to_string(), PersistentPair::new(surfaces));
            }
        }
    }

    pub fn pair(&self, key: &str) -> Option<&PersistentPair> {
        self.pairs.get(key)
    }

    /// Committed surface of `key`, without publishing pending writes
    pub fn read(&self, key: &str) -> Option<SurfaceId> {
        self.pairs.get(key).map(PersistentPair::read)
    }

    pub fn write(&self, key: &str) -> Option<SurfaceId> {
        self.pairs.get(key).map(PersistentPair::write)
    }

    pub fn mark_written(&mut self, key: &str) {
        if let Some(pair) = self.pairs.get_mut(key) {
            pair.mark_written();
        }
    }

    /// Publishes a pending write of `key`
    ///
    /// Called before a later pass reads what an earlier pass of the same frame wrote.
    pub fn commit(&mut self, key: &str) {
        if let Some(pair) = self.pairs.get_mut(key) {
            pair.commit();
        }
    }

    /// Checkpoints every parity before a frame's first write
    pub fn begin_frame(&mut self) {
        for pair in self.pairs.values_mut() {
            pair.checkpoint = pair.parity;
            pair.pending = false;
            pair.clobbered = false;
        }
    }

    /// Drops every write since [`DoubleBufferRegistry::begin_frame`]
    ///
    /// Parities return to their checkpoint. Returns the keys whose committed
    /// surface was overwritten in the meantime; their state is lost.
    pub fn discard_pending(&mut self) -> Vec<String> {
        let mut lost = Vec::new();
        for (key, pair) in &mut self.pairs {
            if pair.clobbered {
                lost.push(key.clone());
            }
            pair.parity = pair.checkpoint;
            pair.pending = false;
            pair.clobbered = false;
        }
        lost
    }

    /// Commits every pending pair; unwritten pairs keep their parity
    pub fn end_frame(&mut self) {
        for pair in self.pairs.values_mut() {
            pair.commit();
        }
    }

    /// Clears both surfaces of `key` to `value` and resets its parity
    pub fn reset(&mut self, backend: &mut dyn Backend, key: &str, value: [f32; 4]) -> Result<(), ResourceError> {
        let Some(pair) = self.pairs.get_mut(key) else {
            return Ok(());
        };
        for surface in pair.surfaces {
            backend.clear_surface(surface, value)?;
        }
        *pair = PersistentPair::new(pair.surfaces);
        Ok(())
    }

    /// Forgets every pair; the surfaces belong to the allocator
    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, SurfaceDesc, SurfaceFormat};

    fn pair(backend: &mut SoftwareBackend) -> [SurfaceId; 2] {
        let desc = SurfaceDesc {
            label: "pair".to_string(),
            width: 1,
            height: 1,
            format: SurfaceFormat::Rgba32Float,
        };
        [backend.create_surface(&desc).unwrap(), backend.create_surface(&desc).unwrap()]
    }

    #[test]
    fn test_reads_never_alias_writes() {
        let mut backend = SoftwareBackend::new();
        let surfaces = pair(&mut backend);
        let mut registry = DoubleBufferRegistry::new();
        registry.bind("state", surfaces);

        assert_eq!(registry.read("state"), Some(surfaces[0]));
        assert_eq!(registry.write("state"), Some(surfaces[1]));

        registry.mark_written("state");
        // Not yet visible
        assert_eq!(registry.read("state"), Some(surfaces[0]));
        assert!(registry.pair("state").unwrap().is_pending());
        registry.commit("state");
        assert_eq!(registry.read("state"), Some(surfaces[1]));
        assert_eq!(registry.write("state"), Some(surfaces[0]));
        assert!(!registry.pair("state").unwrap().is_pending());

        // A second commit without a write does nothing
        registry.end_frame();
        assert_eq!(registry.pair("state").unwrap().parity(), 1);
    }

    #[test]
    fn test_rebinding_keeps_parity_unless_surfaces_change() {
        let mut backend = SoftwareBackend::new();
        let surfaces = pair(&mut backend);
        let mut registry = DoubleBufferRegistry::new();
        registry.bind("state", surfaces);
        registry.mark_written("state");
        registry.end_frame();

        registry.bind("state", surfaces);
        assert_eq!(registry.pair("state").unwrap().parity(), 1);

        let replaced = pair(&mut backend);
        registry.bind("state", replaced);
        assert_eq!(registry.pair("state").unwrap().parity(), 0);
        assert_eq!(registry.read("state"), Some(replaced[0]));
    }

    #[test]
    fn test_discarded_frame_restores_checkpoint() {
        let mut backend = SoftwareBackend::new();
        let (a, b) = (pair(&mut backend), pair(&mut backend));
        let mut registry = DoubleBufferRegistry::new();
        registry.bind("a", a);
        registry.bind("b", b);
        registry.mark_written("a");
        registry.end_frame();

        registry.begin_frame();
        // One write to the free surface of `a`
        registry.mark_written("a");
        // Two writes to `b`, the second landing on its checkpointed surface
        registry.mark_written("b");
        registry.commit("b");
        registry.mark_written("b");

        let lost = registry.discard_pending();
        assert_eq!(lost, vec!["b".to_string()]);
        assert_eq!(registry.read("a"), Some(a[1]));
        assert_eq!(registry.read("b"), Some(b[0]));
        assert!(!registry.pair("a").unwrap().is_pending());

        // Nothing to undo after a completed frame
        registry.begin_frame();
        registry.mark_written("a");
        registry.end_frame();
        registry.begin_frame();
        assert!(registry.discard_pending().is_empty());
        assert_eq!(registry.read("a"), Some(a[0]));
    }

    #[test]
    fn test_reset_clears_both_surfaces() {
        let mut backend = SoftwareBackend::new();
        let surfaces = pair(&mut backend);
        backend.clear_surface(surfaces[0], [5.0; 4]).unwrap();
        backend.clear_surface(surfaces[1], [6.0; 4]).unwrap();
        let mut registry = DoubleBufferRegistry::new();
        registry.bind("state", surfaces);
        registry.mark_written("state");
        registry.end_frame();

        registry.reset(&mut backend, "state", [1.0, 0.0, 0.0, 1.0]).unwrap();
        for surface in surfaces {
            assert_eq!(backend.read_surface(surface).unwrap(), vec![[1.0, 0.0, 0.0, 1.0]]);
        }
        assert_eq!(registry.pair("state").unwrap().parity(), 0);
    }
}
