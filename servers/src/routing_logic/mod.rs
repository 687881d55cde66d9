pub mod config;
pub mod logger;
pub mod model;
pub mod downstream;
pub mod housekeeping;
