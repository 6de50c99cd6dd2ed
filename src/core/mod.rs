/// Report model and payload decoding.
pub mod report;

/// Country-of-origin predicate over decoded reports.
pub mod filter;

/// Table formatting with a single serialized writer.
pub mod render;

/// Message handler chaining decode, filter and render.
pub mod pipeline;

/// Shutdown signals and teardown.
pub mod lifecycle;
