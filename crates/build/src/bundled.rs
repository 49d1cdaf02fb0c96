//! Effects shipped with the engine.
//!
//! Maps effect ids to definition files relative to the workspace root. The
//! runtime crate embeds the same files; this list is what the tooling
//! binaries walk.

pub const BUNDLED_EFFECTS: &[(&str, &str)] = &[
    // Single-pass filters
    ("filter/invert", "effects/filter/invert/definition.yaml"),
    // Feedback through selfTex
    ("filter/trail", "effects/filter/trail/definition.yaml"),
    // Persistent simulation state with repeat and resetState
    ("sim/rd", "effects/sim/rd/definition.yaml"),
    // Condition-gated volume precompute with MRT output
    ("vol/noise3d", "effects/vol/noise3d/definition.yaml"),
    // Volume consumer following the upstream atlas size
    ("vol/slice", "effects/vol/slice/definition.yaml"),
    // Point deposit into a persistent trail
    ("sim/deposit", "effects/sim/deposit/definition.yaml"),
];
