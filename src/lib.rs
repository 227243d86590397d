pub mod analytics;
pub mod cli;
pub mod config;
pub mod data_service;
pub mod db;
pub mod downloaders;
pub mod error;
pub mod ledger;
pub mod models;
pub mod repositories;
