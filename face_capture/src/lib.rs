mod routes;
mod server;

pub mod app;
pub mod bootstrap;
pub mod camera;
pub mod config;
pub mod cv_utils;
pub mod decision;
pub mod display;
pub mod recognition;
pub mod recognition_loop;
pub mod telemetry;

pub use app::start_app;
