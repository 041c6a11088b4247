// src/edgar/mod.rs
pub mod client;
pub mod daily_index;
pub mod models;

pub use client::{EdgarClient, Fetch, RateLimited};
