// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::data::DataSources;
use crate::field::FieldRegistry;
use crate::iso::{CompactCodec, ItemCodec};
use std::sync::Arc;

/// Registries shared by every compiled cycle of one engine.
#[derive(Clone)]
pub struct Context {
    pub fields: Arc<FieldRegistry>,
    pub sources: Arc<DataSources>,
    pub codec: Arc<dyn ItemCodec>,
}

impl Context {
    /// Built-in fields, no caches, [`CompactCodec`].
    pub fn new() -> Self {
        Self {
            fields: Arc::new(FieldRegistry::with_builtins()),
            sources: Arc::new(DataSources::new()),
            codec: Arc::new(CompactCodec),
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ItemCodec>) -> Self {
        self.codec = codec;
        self
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("fields", &self.fields.len())
            .finish_non_exhaustive()
    }
}
