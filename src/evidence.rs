// src/evidence.rs

//! Evidence lookup.
//!
//! Evidence images are stored and owned elsewhere; the orchestrator only
//! needs to know whether an id exists and where its image can be read.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::types::EvidenceId;

/// Reference to one evidence image, handed to plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceRef {
    pub id: EvidenceId,
    pub image: PathBuf,
}

/// Read-only access to the external evidence store.
pub trait EvidenceCatalog: Send + Sync {
    fn resolve(&self, id: EvidenceId) -> Option<EvidenceRef>;

    fn contains(&self, id: EvidenceId) -> bool {
        self.resolve(id).is_some()
    }
}

/// Catalog backed by a fixed id -> image map (from the `[[evidence]]`
/// config entries).
#[derive(Debug, Clone, Default)]
pub struct StaticEvidenceCatalog {
    images: BTreeMap<EvidenceId, PathBuf>,
}

impl StaticEvidenceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_image(mut self, id: EvidenceId, image: impl Into<PathBuf>) -> Self {
        self.images.insert(id, image.into());
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = EvidenceId> + '_ {
        self.images.keys().copied()
    }
}

impl EvidenceCatalog for StaticEvidenceCatalog {
    fn resolve(&self, id: EvidenceId) -> Option<EvidenceRef> {
        self.images.get(&id).map(|image| EvidenceRef {
            id,
            image: image.clone(),
        })
    }
}
