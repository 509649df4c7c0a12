pub mod clock;
pub mod generators;
