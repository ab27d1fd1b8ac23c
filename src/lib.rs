pub mod audit;
pub mod batch;
pub mod conf;
pub mod error;
pub mod es_client;
pub mod health;
pub mod migrate;
pub mod models;
pub mod restore;
pub mod runner;
pub mod shutdown;
pub mod utils;

#[cfg(test)]
mod testing;
