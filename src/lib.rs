pub mod config;
pub mod errors;
pub mod gate;
pub mod generation;
pub mod isolation;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod server;
pub mod util;
pub mod workspace;
