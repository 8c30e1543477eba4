//! Effect Catalog
//!
//! Designer-authored JSON entries resolved against the built-in
//! definitions:
//!
//! ```json
//! [{ "id": "firebomb", "contractId": "fireball",
//!    "definition": { "motion": "parabolic" },
//!    "parameters": { "speed": 96 }, "jsEffect": "firebomb" }]
//! ```
//!
//! The registry's hash covers every resolved definition and the protocol
//! version; clients compare it at join.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::hash::StateHasher;
use crate::game::effects::definition::{
    builtin_definitions, DeliveryKind, EffectDefinition, EndPolicy, ImpactPolicy, MotionKind,
    ReplicationSpec, ShapeKind,
};
use crate::game::effects::hooks::HookId;
use crate::game::status::StatusKind;
use crate::PROTOCOL_VERSION;

/// Designer catalog shipped with the server.
const EMBEDDED_CATALOG: &str = include_str!("../../../data/effects/catalog.json");

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// File could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Io {
        /// Path.
        path: String,
        /// Cause.
        source: std::io::Error,
    },

    /// JSON did not match the schema (including unknown hook names).
    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// ID outside `^[a-z0-9-]+$`.
    #[error("invalid effect id {0:?}")]
    InvalidId(String),

    /// `contractId` names no built-in definition.
    #[error("entry {id} references unknown contract {contract}")]
    UnknownContract {
        /// Entry ID.
        id: String,
        /// Contract ID.
        contract: String,
    },

    /// `explodeOnImpact` names no definition.
    #[error("entry {id} explodes into unknown effect {effect}")]
    UnknownFollowUp {
        /// Entry ID.
        id: String,
        /// Follow-up ID.
        effect: String,
    },
}

/// Partial geometry in sub-units.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeometryOverlay {
    offset_x: Option<i32>,
    offset_y: Option<i32>,
    width: Option<i32>,
    height: Option<i32>,
    radius: Option<i32>,
    length: Option<i32>,
    arc_degrees: Option<i32>,
    rotation: Option<i32>,
}

/// Partial hook bindings; a present list replaces the base list.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HookOverlay {
    on_spawn: Option<Vec<HookId>>,
    on_tick: Option<Vec<HookId>>,
    on_hit: Option<Vec<HookId>>,
    on_expire: Option<Vec<HookId>>,
}

/// Fields an entry may override on its contract.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DefinitionOverlay {
    delivery: Option<DeliveryKind>,
    shape: Option<ShapeKind>,
    motion: Option<MotionKind>,
    impact: Option<ImpactPolicy>,
    lifetime_ticks: Option<u64>,
    pierce: Option<u32>,
    tick_every: Option<u64>,
    geometry: Option<GeometryOverlay>,
    params: Option<BTreeMap<String, i64>>,
    hooks: Option<HookOverlay>,
    replication: Option<ReplicationSpec>,
    end_policy: Option<EndPolicy>,
    managed_by_client: Option<bool>,
    owner_anchored: Option<bool>,
    explode_on_impact: Option<String>,
    status_effect: Option<StatusKind>,
}

/// One catalog entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Effect type ID.
    pub id: String,
    /// Built-in definition this entry specializes.
    pub contract_id: String,
    /// Overrides.
    #[serde(default)]
    pub definition: DefinitionOverlay,
    /// Parameter overrides.
    #[serde(default)]
    pub parameters: BTreeMap<String, i64>,
    /// Client visual hint.
    pub js_effect: Option<String>,
}

impl CatalogEntry {
    fn resolve(&self, base: &EffectDefinition) -> EffectDefinition {
        let mut def = base.clone();
        let o = &self.definition;
        def.type_id = self.id.clone();

        if let Some(v) = o.delivery { def.delivery = v; }
        if let Some(v) = o.shape {
            def.shape = v;
            def.geometry.shape = v;
        }
        if let Some(v) = o.motion { def.motion = v; }
        if let Some(v) = o.impact { def.impact = v; }
        if let Some(v) = o.lifetime_ticks { def.lifetime_ticks = v; }
        if let Some(v) = o.pierce { def.pierce = v; }
        if let Some(v) = o.tick_every { def.tick_every = v.max(1); }
        if let Some(g) = &o.geometry {
            if let Some(v) = g.offset_x { def.geometry.offset_x = v; }
            if let Some(v) = g.offset_y { def.geometry.offset_y = v; }
            if let Some(v) = g.width { def.geometry.width = v; }
            if let Some(v) = g.height { def.geometry.height = v; }
            if let Some(v) = g.radius { def.geometry.radius = v; }
            if let Some(v) = g.length { def.geometry.length = v; }
            if let Some(v) = g.arc_degrees { def.geometry.arc_degrees = v; }
            if let Some(v) = g.rotation { def.geometry.rotation = v; }
        }
        if let Some(params) = &o.params {
            def.params.extend(params.iter().map(|(k, v)| (k.clone(), *v)));
        }
        if let Some(h) = &o.hooks {
            if let Some(v) = &h.on_spawn { def.hooks.on_spawn = v.clone(); }
            if let Some(v) = &h.on_tick { def.hooks.on_tick = v.clone(); }
            if let Some(v) = &h.on_hit { def.hooks.on_hit = v.clone(); }
            if let Some(v) = &h.on_expire { def.hooks.on_expire = v.clone(); }
        }
        if let Some(v) = &o.replication { def.replication = v.clone(); }
        if let Some(v) = o.end_policy { def.end_policy = v; }
        if let Some(v) = o.managed_by_client { def.managed_by_client = v; }
        if let Some(v) = o.owner_anchored { def.owner_anchored = v; }
        if let Some(v) = &o.explode_on_impact { def.explode_on_impact = Some(v.clone()); }
        if let Some(v) = o.status_effect { def.status_effect = Some(v); }

        def.params.extend(self.parameters.iter().map(|(k, v)| (k.clone(), *v)));
        if let Some(js) = &self.js_effect {
            def.client_effect = Some(js.clone());
        }
        def
    }
}

/// Check an ID against `^[a-z0-9-]+$`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Resolved definitions by type ID.
#[derive(Debug, Clone)]
pub struct EffectRegistry {
    definitions: BTreeMap<String, Arc<EffectDefinition>>,
    hash: String,
}

impl EffectRegistry {
    /// Built-in definitions only.
    pub fn builtin() -> Self {
        let definitions = builtin_definitions()
            .into_iter()
            .map(|d| (d.type_id.clone(), Arc::new(d)))
            .collect();
        let hash = compute_hash(&definitions);
        Self { definitions, hash }
    }

    /// Built-ins merged with the embedded designer catalog.
    pub fn embedded() -> Result<Self, CatalogError> {
        Self::from_catalog_json(EMBEDDED_CATALOG)
    }

    /// Built-ins merged with a catalog file.
    pub fn from_file(path: &Path) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_catalog_json(&json)
    }

    /// Built-ins merged with catalog JSON.
    ///
    /// Entries whose ID collides with a built-in are skipped.
    pub fn from_catalog_json(json: &str) -> Result<Self, CatalogError> {
        let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
        let mut registry = Self::builtin();

        for entry in &entries {
            if !is_valid_id(&entry.id) {
                return Err(CatalogError::InvalidId(entry.id.clone()));
            }
            if registry.definitions.contains_key(&entry.id) {
                warn!(id = %entry.id, "catalog entry shadows a built-in; keeping the built-in");
                continue;
            }
            let base = registry
                .definitions
                .get(&entry.contract_id)
                .ok_or_else(|| CatalogError::UnknownContract {
                    id: entry.id.clone(),
                    contract: entry.contract_id.clone(),
                })?;
            let resolved = entry.resolve(base);
            registry.definitions.insert(entry.id.clone(), Arc::new(resolved));
        }

        for def in registry.definitions.values() {
            if let Some(follow_up) = &def.explode_on_impact {
                if !registry.definitions.contains_key(follow_up) {
                    return Err(CatalogError::UnknownFollowUp {
                        id: def.type_id.clone(),
                        effect: follow_up.clone(),
                    });
                }
            }
        }

        registry.hash = compute_hash(&registry.definitions);
        info!(definitions = registry.definitions.len(), hash = %registry.hash, "effect catalog loaded");
        Ok(registry)
    }

    /// Definition by type ID.
    pub fn get(&self, type_id: &str) -> Option<&Arc<EffectDefinition>> {
        self.definitions.get(type_id)
    }

    /// Definitions in ID order.
    pub fn definitions(&self) -> impl Iterator<Item = &EffectDefinition> {
        self.definitions.values().map(|d| d.as_ref())
    }

    /// Hex SHA-256 over the resolved registry.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// True when empty.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

fn compute_hash(definitions: &BTreeMap<String, Arc<EffectDefinition>>) -> String {
    let mut hasher = StateHasher::for_effect_catalog(PROTOCOL_VERSION);
    hasher.update_u32(definitions.len() as u32);
    for (id, def) in definitions {
        hasher.update_str(id);
        // Struct field order and BTreeMap params make this canonical
        match serde_json::to_string(def.as_ref()) {
            Ok(json) => hasher.update_str(&json),
            Err(err) => {
                warn!(id = %id, error = %err, "definition not hashable");
                hasher.update_str("");
            }
        }
    }
    hasher.finalize_hex()
}
