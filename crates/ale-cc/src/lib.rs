// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ALE Command-Cycle Engine
//!
//! Compiles command cycle specifications into tag operations, drives them
//! through a reader connector and assembles per-cycle reports for
//! subscribers on a background worker.
//!
//! # Features
//!
//! - **Tag Operations**: read, check, initialize, add, write, delete,
//!   password, kill, lock and custom commands on Gen2 memory banks
//! - **ISO Item Data**: variable fields addressed by object identifier,
//!   encoded through a pluggable [`iso::ItemCodec`]
//! - **Write Coalescing**: overlapping writes within one batch see each
//!   other's pending bytes without a reader round-trip
//! - **Asynchronous Reports**: one worker per cycle waits for tag
//!   completion and delivers report envelopes
//!
//! # Quick Start
//!
//! ```bash
//! ale-cc-sim --spec cycle.toml --population tags.toml --rounds 3
//! ```
//!
//! # Cycle Specification
//!
//! ```toml
//! name = "dock-door"
//!
//! [[reports]]
//! name = "lots"
//! stats = ["TagCount"]
//!
//! [[reports.operations]]
//! name = "lot"
//! type = "WRITE"
//! field = "@3.urn:oid:1.0.15961.9.1"
//! data = { literal = "LOT-42" }
//! ```

pub mod bits;
pub mod config;
pub mod context;
pub mod counter;
pub mod cycle;
pub mod data;
pub mod error;
pub mod field;
pub mod filter;
pub mod iso;
pub mod operation;
pub mod reader;
pub mod report;
pub mod result;
pub mod sim;
pub mod spec;
pub mod stats;
pub mod subscriber;
pub mod tag;
pub mod tags;

pub use config::{ConfigError, EngineConfig, TagsConfig};
pub use context::Context;
pub use cycle::CommandCycle;
pub use error::{Error, ReaderError, Result, ValidationError};
pub use reader::{Field, ReaderConnector, ReaderOperation, ReaderOperationKind};
pub use report::envelope::CycleReport;
pub use report::{CycleInfo, Report, Reports};
pub use result::{OperationResult, ResultState};
pub use sim::{MemoryReader, Population};
pub use spec::{CycleSpec, DataSpec, FilterSpec, OperationSpec, ReportSpec};
pub use subscriber::{ChannelSubscriber, DeliveryMode, Subscriber};
pub use tag::{Tag, TagKey};
pub use tags::Tags;
