
pub mod logging;
pub mod config;
pub mod xf;
pub mod tilt_series;
pub mod imod;
pub mod protocols;
