pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod mcm;
pub mod models;
pub mod response;
pub mod routes;
pub mod schema;
pub mod state;
pub mod sync;
pub mod utils;
pub mod xsdb;
