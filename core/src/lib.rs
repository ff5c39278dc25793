pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod shopping;
pub mod units;
