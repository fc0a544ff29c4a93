//! Hash map used for dynamic scope bindings.

/// Fx hashing by default. The `std-hash` feature switches to SipHash.
pub mod map {
    #[cfg(feature = "std-hash")]
    pub use std::collections::HashMap;

    #[cfg(not(feature = "std-hash"))]
    pub use rustc_hash::FxHashMap as HashMap;
}
