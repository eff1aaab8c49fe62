//! Map Resource Surface (spec.md §4.9, component C9): the read path for
//! style/tile/glyph/sprite bytes, the `default` fallback chain, and
//! upload/delete mutations on the `custom` slot.

pub mod routes;

pub use routes::router;
