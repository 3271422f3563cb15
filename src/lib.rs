//! LightLDA: topic modelling with an O(1) Metropolis-Hastings sampler.
//!
//! Each pass walks the vocabulary slice by slice. For a slice, alias tables
//! are built once from the current counts, then every document's tokens of
//! that slice are resampled by alternating word proposals (alias draws) and
//! doc proposals, each corrected by an MH test against live counts.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod alias;
pub mod config;
pub mod data_block;
pub mod doc_counter;
pub mod document;
pub mod engine;
pub mod error;
pub mod likelihood;
pub mod model;
pub mod rng;
pub mod row;
pub mod sampler;
pub mod synthetic;
pub mod table;
pub mod vocab;

pub use crate::config::LdaConfig;
pub use crate::data_block::DataBlock;
pub use crate::document::{Document, Token};
pub use crate::engine::{LdaEngine, ModelSummary};
pub use crate::error::{LdaError, Result};
pub use crate::rng::Xorshift;
