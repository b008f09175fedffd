// Joblane Infrastructure - Process Adapters
// Implements: JobWork for external evaluation commands

pub mod command_work;

pub use command_work::CommandWork;
