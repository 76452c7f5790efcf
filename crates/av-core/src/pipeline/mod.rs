//! Avatar generation pipeline built from task primitives.

pub mod generator;
pub mod record;
pub mod selection;
pub mod state;
pub mod traits;

pub use generator::{computation_parameters, AvatarGenerator, Gender, GenerationRequest, StateObserver};
pub use record::GenerationRecord;
pub use selection::select_identity;
pub use state::GenerationState;
pub use traits::{PipelineKind, PipelineTraits};
