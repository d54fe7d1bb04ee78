pub mod command;
pub mod locker;
pub mod mysql;
pub mod rsync;
pub mod store;

// Trait-based abstractions for testability
pub mod executor;

// Re-export commonly used types and traits
#[allow(unused_imports)]
pub use executor::{CommandExecutor, CommandOutput, RealExecutor};
#[allow(unused_imports)]
pub use store::{DiskStore, GenerationStore};
