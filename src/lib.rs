pub mod actuator;
pub mod board;
pub mod config;
pub mod consts;
pub mod gesture;
pub mod logging;
pub mod message;
pub mod outputs;
pub mod process;
pub mod rules;
pub mod scenario;
pub mod transport;
