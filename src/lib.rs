//! Aisle Guide - offline shopping assistant for blind and low-vision users
//!
//! A camera feed is analyzed per frame and spoken answers are produced on command:
//! - Identify, count and obstacle queries from an object detector
//! - Banknote value from a classifier with OCR fallback
//! - Shelf price from OCR
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Inputs                           │
//! │      Camera frames   │   Keyboard   │   Voice        │
//! └──────────┬───────────────────────────────┬──────────┘
//!            │                               │
//! ┌──────────▼──────────┐         ┌──────────▼──────────┐
//! │     Perception      │         │     Dispatcher      │
//! │ vision │ OCR │ note │         │ state machine with  │
//! └──────────┬──────────┘         │ per-command cooldown│
//!            │ samples            └──────────┬──────────┘
//! ┌──────────▼──────────┐   result           │ announcement
//! │     Stabilizer      ├────────────────────┤
//! │ per-query voting    │         ┌──────────▼──────────┐
//! └─────────────────────┘         │   Speech worker     │
//!                                 └─────────────────────┘
//! ```

pub mod camera;
pub mod config;
pub mod cooldown;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod input;
pub mod perception;
pub mod speech;
pub mod stabilizer;

pub use config::Config;
pub use cooldown::CooldownGate;
pub use dispatch::{CommandId, CommandRequest, Dispatcher, DispatchState, InputEvent};
pub use engine::{Engine, SelfCheckReport, self_check};
pub use error::{Error, Result};
pub use perception::{DetectionSample, Perception, QueryType};
pub use stabilizer::{StabilizedResult, Stabilizer, StabilizerConfig};
