pub mod account;
pub mod api;
pub mod compare;
pub mod config;
pub mod course;
pub mod error;
pub mod logging;
pub mod migration;
pub mod models;
pub mod warehouse;

#[cfg(test)]
mod test_support;
