//! Command implementations

mod ping;
mod run;
mod status;

pub use ping::ping;
pub use run::run;
pub use status::status;
