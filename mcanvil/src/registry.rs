//! The shared table of known block identities, their legacy numeric ids,
//! and the cross-version substitution/remapping data the chunk codec needs.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use arcstr::ArcStr;
use bitfields::bitfield;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, File, FileFormat};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::chunk::{BlockState, DEFAULT_BIOME};
use crate::error::{Error, Result};
use crate::version::DataVersion;

/// Bound on substitute chain walking; exceeding it means the substitution
/// data contains a cycle.
const MAX_SUBSTITUTE_HOPS: usize = 10;

const DEFAULT_BIOME_ID: i32 = 1;

/// A pre-flattening numeric block id plus its 4-bit damage value.
#[bitfield(u16)]
#[derive(Clone, Copy)]
pub struct LegacyId {
    #[bits(12)]
    id: u16,
    #[bits(4)]
    meta: u8,
}

impl LegacyId {
    pub fn pack(id: u16, meta: u8) -> LegacyId {
        let mut packed = LegacyId::new();
        packed.set_id(id);
        packed.set_meta(meta);
        packed
    }

    fn table_key(self) -> u16 {
        (self.id() << 4) | self.meta() as u16
    }
}

/// A namespaced block identity. Created once, registered into a registry,
/// and never mutated afterwards except for the substitute back-reference,
/// which may be set exactly once.
#[derive(Debug)]
pub struct BlockIdentity {
    name: ArcStr,
    since: DataVersion,
    legacy: Option<LegacyId>,
    substitute: OnceLock<ArcStr>,
}

impl BlockIdentity {
    pub fn new(name: ArcStr, since: DataVersion) -> BlockIdentity {
        BlockIdentity {
            name,
            since,
            legacy: None,
            substitute: OnceLock::new(),
        }
    }

    pub fn with_legacy(mut self, id: u16, meta: u8) -> BlockIdentity {
        self.legacy = Some(LegacyId::pack(id, meta));
        self
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    /// The data version this block first appeared in; 0 for blocks that
    /// predate data versions (and for auto-registered placeholders).
    pub fn since(&self) -> DataVersion {
        self.since
    }

    pub fn legacy(&self) -> Option<LegacyId> {
        self.legacy
    }

    pub fn substitute(&self) -> Option<&ArcStr> {
        self.substitute.get()
    }

    /// Set the identity written in place of this block for versions that
    /// predate it. Only the first call takes effect.
    pub fn set_substitute(&self, name: ArcStr) -> bool {
        self.substitute.set(name).is_ok()
    }
}

#[derive(Clone, Debug)]
struct Rename {
    at: DataVersion,
    to: ArcStr,
}

/// Append-only table of block identities, shared by all decode tasks of a
/// world. Lookups vastly outnumber inserts, so reads take a shared lock and
/// unknown names go through a read-then-write upgrade.
#[derive(Debug)]
pub struct Registry {
    blocks: RwLock<HashMap<ArcStr, Arc<BlockIdentity>>>,
    legacy: HashMap<u16, ArcStr>,
    renames: HashMap<ArcStr, Rename>,
    biome_names: HashMap<i32, ArcStr>,
    biome_ids: HashMap<ArcStr, i32>,
}

/// Qualify a bare name with the default namespace.
fn normalize(name: &str) -> ArcStr {
    if name.contains(':') {
        ArcStr::from(name)
    } else {
        ArcStr::from(format!("minecraft:{name}"))
    }
}

impl Registry {
    fn empty() -> Registry {
        Registry {
            blocks: RwLock::new(HashMap::new()),
            legacy: HashMap::new(),
            renames: HashMap::new(),
            biome_names: HashMap::new(),
            biome_ids: HashMap::new(),
        }
    }

    /// Configuration pre-loaded with the built-in block and biome tables.
    /// Callers may layer further sources on top before building.
    pub fn config_builder() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(
            include_str!("blocks_default.toml"),
            FileFormat::Toml,
        ))
    }

    /// Registry with only the built-in tables.
    pub fn builtin() -> Result<Registry> {
        Registry::from_config(&Registry::config_builder().build()?)
    }

    pub fn from_config(config: &Config) -> Result<Registry> {
        let raw_blocks: HashMap<String, RawBlockEntry> = config.get("blocks")?;
        let raw_renames: HashMap<String, RawRename> = config.get("renames")?;
        let raw_biomes: HashMap<String, String> = config.get("biome_ids")?;

        let mut registry = Registry::empty();
        for (name, entry) in &raw_blocks {
            let mut identity = BlockIdentity::new(normalize(name), DataVersion(entry.since));
            if let Some(id) = entry.legacy_id {
                identity = identity.with_legacy(id, entry.legacy_meta);
            }
            registry.register(identity);
        }
        // Substitutes resolve in a second pass so a chain can reference any
        // entry regardless of table order.
        for (name, entry) in &raw_blocks {
            if let Some(substitute) = &entry.substitute
                && let Some(identity) = registry.get(name)
            {
                identity.set_substitute(normalize(substitute));
            }
        }
        for (name, rename) in raw_renames {
            registry.renames.insert(
                normalize(&name),
                Rename {
                    at: DataVersion(rename.at),
                    to: normalize(&rename.to),
                },
            );
        }
        for (id, biome) in raw_biomes {
            let id: i32 = id
                .parse()
                .map_err(|_| Error::format(format!("invalid numeric biome id: {id:?}")))?;
            let name = normalize(&biome);
            registry.biome_ids.insert(name.clone(), id);
            registry.biome_names.insert(id, name);
        }
        Ok(registry)
    }

    /// Register an identity, also indexing its legacy numeric id if it has
    /// one. A name that is already registered keeps its existing identity.
    pub fn register(&mut self, identity: BlockIdentity) -> Arc<BlockIdentity> {
        let blocks = self.blocks.get_mut();
        match blocks.get(identity.name()) {
            Some(existing) => existing.clone(),
            None => {
                let identity = Arc::new(identity);
                if let Some(legacy) = identity.legacy() {
                    self.legacy
                        .entry(legacy.table_key())
                        .or_insert_with(|| identity.name().clone());
                }
                blocks.insert(identity.name().clone(), identity.clone());
                identity
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<BlockIdentity>> {
        self.blocks.read().get(&normalize(name)).cloned()
    }

    /// Look up an identity, auto-registering a placeholder for a well-formed
    /// name this build does not know. Content written by a future version
    /// must still decode, so this is logged rather than treated as an error.
    pub fn get_or_register(&self, name: &str) -> Arc<BlockIdentity> {
        let name = normalize(name);
        let lock = self.blocks.read();
        if let Some(identity) = lock.get(&name) {
            return identity.clone();
        }
        drop(lock);
        // Take the write lock, check again for a racing insert, otherwise
        // register the placeholder.
        let mut lock = self.blocks.write();
        if let Some(identity) = lock.get(&name) {
            identity.clone()
        } else {
            log::debug!("registering placeholder identity for unknown block {name}");
            let identity = Arc::new(BlockIdentity::new(name.clone(), DataVersion(0)));
            lock.insert(name, identity.clone());
            identity
        }
    }

    /// Resolve an identity for a target version. An identity that postdates
    /// the target follows its substitute chain until a valid identity is
    /// found or the chain is exhausted (`None`: the block has no
    /// representation at that version and is written as air).
    pub fn resolve(&self, name: &str, target: DataVersion) -> Result<Option<Arc<BlockIdentity>>> {
        let mut current = self.get_or_register(name);
        for _ in 0..=MAX_SUBSTITUTE_HOPS {
            if current.since() <= target {
                return Ok(Some(current));
            }
            match current.substitute() {
                Some(substitute) => current = self.get_or_register(substitute.as_str()),
                None => return Ok(None),
            }
        }
        Err(Error::internal(format!(
            "substitute chain for {name} exceeded {MAX_SUBSTITUTE_HOPS} hops"
        )))
    }

    /// Resolve a full block state for a target version. Properties do not
    /// survive substitution: a substitute is a different block whose
    /// property schema need not match.
    pub fn resolve_state(&self, state: &BlockState, target: DataVersion) -> Result<Option<BlockState>> {
        match self.resolve(&state.name, target)? {
            None => Ok(None),
            Some(identity) if *identity.name() == state.name => Ok(Some(state.clone())),
            Some(identity) => Ok(Some(BlockState::new(identity.name().clone()))),
        }
    }

    /// Apply the rename table to a name read from data older than the
    /// rename boundary.
    pub fn remap(&self, name: &str, source: DataVersion) -> ArcStr {
        let name = normalize(name);
        match self.renames.get(&name) {
            Some(rename) if source < rename.at => rename.to.clone(),
            _ => name,
        }
    }

    /// Resolve a legacy numeric (id, damage) pair, falling back to the
    /// zero-damage entry for unindexed damage values.
    pub fn resolve_legacy(&self, id: u16, meta: u8) -> Option<Arc<BlockIdentity>> {
        let name = self
            .legacy
            .get(&LegacyId::pack(id, meta).table_key())
            .or_else(|| self.legacy.get(&LegacyId::pack(id, 0).table_key()))?;
        Some(self.get_or_register(name.as_str()))
    }

    pub fn legacy_id(&self, name: &str) -> Option<LegacyId> {
        self.get(name)?.legacy()
    }

    pub fn biome_name(&self, id: i32) -> ArcStr {
        self.biome_names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| self.default_biome())
    }

    pub fn biome_id(&self, name: &str) -> i32 {
        self.biome_ids
            .get(&normalize(name))
            .copied()
            .unwrap_or(DEFAULT_BIOME_ID)
    }

    pub fn default_biome(&self) -> ArcStr {
        DEFAULT_BIOME
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawBlockEntry {
    #[serde(default)]
    since: u32,
    legacy_id: Option<u16>,
    #[serde(default)]
    legacy_meta: u8,
    substitute: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRename {
    at: u32,
    to: String,
}
