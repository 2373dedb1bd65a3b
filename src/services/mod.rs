pub mod artifacts;
pub mod launcher;
pub mod script;
pub mod setup;
pub mod stage;
pub mod tasks;
pub mod voices;
pub mod workflow;
