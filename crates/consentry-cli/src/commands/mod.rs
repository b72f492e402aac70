pub mod serve;
pub mod sweep;

pub use serve::ServeCommand;
pub use sweep::SweepCommand;
