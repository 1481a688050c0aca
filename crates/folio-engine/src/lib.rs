pub mod config;
pub mod editing;
pub mod error;
pub mod io;
pub mod reconciler;

// Re-export key types for easier usage
pub use config::{EditorConfig, FlushMode};
pub use editing::{
    Command, Editor, ElementKind, NodeKey, NodeRegistry, Selection, Snapshot, TextFormat,
    Transaction, UpdateOptions,
};
pub use error::{EngineError, Result};
pub use reconciler::{MemorySurface, Reconciler, RenderSurface};
