//! TCR Core
//!
//! Core types shared by the TCR control plane and its clients.
//!
//! This crate contains:
//! - Domain types: Jobs, runners and fleet signals
//! - DTOs: Wire payloads exchanged with runners, agents and the provider API

pub mod domain;
pub mod dto;
