pub mod epub;
pub mod process;
