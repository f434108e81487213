//! # Rustform - A Declarative Resource Provisioning Engine
//!
//! Rustform is the core every infrastructure-as-code tool needs: a
//! declarative resource dependency resolver and apply engine. Declarations
//! reference each other's output attributes; Rustform turns them into a
//! validated dependency graph, orders them, and applies them against a
//! provider in parallel waves, capturing outputs and containing partial
//! failure.
//!
//! ## Core Concepts
//!
//! - **Stacks**: A named set of resource declarations plus exports
//! - **Resources**: Units of external infrastructure state (VPCs, subnets,
//!   instances) with typed kinds and per-kind schemas
//! - **References**: `${resource.attribute}` markers wiring one resource's
//!   inputs to another's outputs, collected as first-class graph edges
//! - **Waves**: Maximal sets of mutually independent resources, applied
//!   concurrently between sequential barriers
//! - **Providers**: The external seam that actually creates, updates, and
//!   deletes resources
//! - **Recorded state**: Last-known applied form of each resource, driving
//!   create/update/no-op decisions and idempotent re-applies
//! - **Exports**: Named output values surfaced at the end of a pass
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Stack Declarations                            │
//! │              (typed resource specs + exports, YAML loader)           │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Resource Graph Builder                         │
//! │     (reference edges, schema validation, cycle detection)            │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       Dependency Resolver                            │
//! │        (stable topological order, wave partitioning)                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Apply Engine                                │
//! │   (waves on tokio, diff vs recorded state, failure containment)      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                  │                                  │
//!                  ▼                                  ▼
//! ┌───────────────────────────┐        ┌─────────────────────────────────┐
//! │         Provider          │        │          Output Store           │
//! │ (create/update/delete)    │        │ (resolved outputs -> exports)   │
//! └───────────────────────────┘        └─────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rustform::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let stack = Stack::from_file("stack.yml").await?;
//!
//!     let provider: Arc<dyn Provider> = Arc::new(MemoryProvider::new());
//!     let engine = ApplyEngine::new(provider);
//!
//!     let mut state = StateStore::new();
//!     let report = engine.apply(&stack, &mut state).await?;
//!
//!     println!("{}", report.summary());
//!     for (name, value) in &report.exports {
//!         println!("{name} = {value}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    // Error handling
    pub use crate::error::{Error, Result};

    // Declarations
    pub use crate::resource::{
        AttrRef, Lifecycle, PropertyValue, ResourceKind, ResourceSpec,
    };
    pub use crate::stack::{Export, Stack};

    // Graph and resolution
    pub use crate::graph::DependencyGraph;

    // Apply engine
    pub use crate::engine::{
        ApplyEngine, ApplyOutcome, ApplyReport, ApplyStats, ApplyStatus, EngineConfig,
    };

    // Providers
    pub use crate::provider::{CreatedResource, MemoryProvider, Provider, ProviderError};

    // State and outputs
    pub use crate::outputs::OutputStore;
    pub use crate::state::{ChangeAction, RecordedResource, StateStore};
}

// ============================================================================
// Core Modules
// ============================================================================

/// Error types and result aliases for Rustform operations.
///
/// This module provides the main [`Error`](error::Error) enum covering
/// declaration errors (dangling references, cycles, schema violations),
/// apply errors (provider failures, internal invariants), and io/parse
/// conversions.
pub mod error;

/// Resource declarations and the property model.
///
/// Resource kinds are tagged variants with statically known schemas, so an
/// invalid declaration is rejected before any external call. Property bags
/// carry first-class references to other resources' output attributes.
pub mod resource;

/// Dependency graph construction and resolution.
///
/// References become explicit edges collected during graph construction,
/// enabling upfront cycle detection. The resolver produces a stable
/// topological order and the wave partition the engine executes.
pub mod graph;

// ============================================================================
// Execution
// ============================================================================

/// The apply engine.
///
/// Walks the resolved order in waves: sequential barriers between waves,
/// bounded parallelism within them. Diffs desired against recorded state
/// for idempotent re-applies, deletes orphans, and contains partial
/// failure to the failed resource and its transitive dependents.
pub mod engine;

/// Provider interface and the in-memory provider.
///
/// The narrow async seam to the external system that actually mutates
/// infrastructure. [`MemoryProvider`](provider::MemoryProvider) implements
/// it without external dependencies for tests and local runs.
pub mod provider;

// ============================================================================
// State and Declarations
// ============================================================================

/// Output store: resolved output attributes addressable by resource name.
pub mod outputs;

/// Stack declarations and the YAML loader.
pub mod stack;

/// Recorded state: the last-known applied form of each resource.
pub mod state;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of Rustform.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
