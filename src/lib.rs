pub mod aggregator;
pub mod analyzer;
pub mod breaker;
pub mod categorizer;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod engine;
pub mod model;
pub mod storage;
pub mod validator;
pub mod web;
