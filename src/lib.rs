pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod queue;
pub mod services;
pub mod state;
pub mod worker;
