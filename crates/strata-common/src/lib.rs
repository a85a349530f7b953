//! # Strata Common
//!
//! Common types, utilities, and shared abstractions for Project Strata.
//!
//! This crate provides foundational types used across the streaming
//! subsystems:
//! - World-space points and axis-aligned bounds
//! - Chunk key types
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod bounds;
pub mod error;
pub mod keys;
pub mod point;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bounds::*;
    pub use crate::error::*;
    pub use crate::keys::*;
    pub use crate::point::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_in_bounds() {
        let bounds = Aabb::new(WorldPoint::new(0.0, 0.0, 0.0), WorldPoint::new(10.0, 10.0, 10.0))
            .expect("valid bounds");
        assert!(bounds.contains_point(WorldPoint::new(5.0, 5.0, 5.0)));
        assert!(!bounds.contains_point(WorldPoint::new(10.0, 5.0, 5.0)));
    }

    #[test]
    fn test_malformed_bounds_rejected() {
        let result = Aabb::new(WorldPoint::new(5.0, 0.0, 0.0), WorldPoint::new(0.0, 10.0, 10.0));
        assert!(result.is_err());
    }
}
