pub mod background;
pub mod config;
pub mod consumers;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod repository;
pub mod services;

#[cfg(test)]
mod testing;
