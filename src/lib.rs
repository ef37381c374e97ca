// src/lib.rs

//! Listing Watcher Library
//!
//! Polls a listing page, detects listings that were not there last time,
//! announces them to a notification sink and persists what was seen.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
