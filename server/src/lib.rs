pub mod clock;
pub mod config;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;
