pub mod chain_state;
pub mod processor;
pub mod requests;
pub mod states;

// Re-export core models for easy access
pub use chain_state::{ChainState, ErrorRecord};
pub use processor::{Processor, WorkloadProperties};
pub use requests::{ProcessorUpload, ProgressReport};
pub use states::{ChainRunState, OverallState, VersionState};
