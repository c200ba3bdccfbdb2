pub mod bootstrap;
pub mod wire;

pub use bootstrap::ApplicationBootstrap;
pub use wire::{ApplicationContext, build_collaborators, in_memory_collaborators, initialize};
