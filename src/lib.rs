//! Profile verification pipeline
//!
//! Claims queued profile reviews, runs photo and bio moderation, classifies
//! each profile with a pure decision policy, persists the verification state
//! and sends one outcome notification per decision.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
