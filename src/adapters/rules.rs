//! # Ingest Rules
//!
//! Reads the JSON rules file that tells ingestion which columns are foreign
//! keys and which non-key groupings should attract each other.
//!
//! ```json
//! {
//!   "foreign_keys": [ { "pattern": "(?i)^(.+)_id$" } ],
//!   "mappings": { "Track.AlbumId": "Album" },
//!   "trait_cluster": { "columns": ["Country"], "weight": 0.5 },
//!   "domain_cluster": { "domains": { "music": ["Artist", "Album"] }, "weight": 0.3 }
//! }
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::core::schema::is_primary_key_name;
use crate::core::{ForeignKey, MycoError, MycoResult, Payload, PayloadKey, Schema, TableId};
use crate::ports::PayloadStore;
use crate::swarm::ClusterHint;

/// Column patterns used when a rules file names none
pub const DEFAULT_FK_PATTERNS: [&str; 2] = [r"(?i)^(.+)_id$", r"(?i)^(.+?)id$"];

// ============================================================================
// File format
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RulesFile {
    foreign_keys: Option<Vec<PatternEntry>>,
    mappings: BTreeMap<String, String>,
    trait_cluster: Option<TraitCluster>,
    domain_cluster: Option<DomainCluster>,
}

#[derive(Debug, Deserialize)]
struct PatternEntry {
    pattern: String,
    #[serde(default)]
    table: Option<String>,
}

/// Group payloads sharing a value in any of `columns`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TraitCluster {
    pub columns: Vec<String>,
    #[serde(default = "default_trait_weight")]
    pub weight: f32,
}

/// Group root payloads of tables in the same named domain
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DomainCluster {
    pub domains: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_domain_weight")]
    pub weight: f32,
}

fn default_trait_weight() -> f32 {
    0.5
}

fn default_domain_weight() -> f32 {
    0.3
}

// ============================================================================
// Compiled rules
// ============================================================================

#[derive(Debug, Clone)]
struct FkPattern {
    regex: Regex,
    table: Option<String>,
}

/// Compiled ingest rules
#[derive(Debug, Clone)]
pub struct IngestRules {
    patterns: Vec<FkPattern>,
    /// (table, column) lower-cased -> parent table name
    mappings: HashMap<(String, String), String>,
    pub trait_cluster: Option<TraitCluster>,
    pub domain_cluster: Option<DomainCluster>,
}

impl Default for IngestRules {
    fn default() -> Self {
        let patterns = DEFAULT_FK_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .map(|regex| FkPattern { regex, table: None })
            .collect();
        Self {
            patterns,
            mappings: HashMap::new(),
            trait_cluster: None,
            domain_cluster: None,
        }
    }
}

impl IngestRules {
    pub fn from_json_str(json: &str) -> MycoResult<Self> {
        let file: RulesFile = serde_json::from_str(json).map_err(|e| MycoError::Rules(e.to_string()))?;

        let mut rules = IngestRules::default();
        if let Some(entries) = file.foreign_keys {
            rules.patterns = entries
                .into_iter()
                .map(|entry| {
                    let regex = Regex::new(&entry.pattern)
                        .map_err(|e| MycoError::Rules(format!("pattern {:?}: {}", entry.pattern, e)))?;
                    if regex.captures_len() < 2 && entry.table.is_none() {
                        return Err(MycoError::Rules(format!(
                            "pattern {:?} needs a capture group or a table",
                            entry.pattern
                        )));
                    }
                    Ok(FkPattern {
                        regex,
                        table: entry.table,
                    })
                })
                .collect::<MycoResult<Vec<_>>>()?;
        }
        for (key, parent) in file.mappings {
            let (table, column) = key
                .split_once('.')
                .ok_or_else(|| MycoError::Rules(format!("mapping key {:?} is not Table.Column", key)))?;
            rules
                .mappings
                .insert((table.trim().to_ascii_lowercase(), column.trim().to_ascii_lowercase()), parent);
        }
        rules.trait_cluster = file.trait_cluster;
        rules.domain_cluster = file.domain_cluster;
        Ok(rules)
    }

    pub fn from_json_file(path: &Path) -> MycoResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MycoError::Rules(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }

    /// Name of the parent table a column points into, before schema lookup
    pub fn parent_table_name(&self, table: &str, column: &str) -> Option<String> {
        let mapped = (table.to_ascii_lowercase(), column.to_ascii_lowercase());
        if let Some(parent) = self.mappings.get(&mapped) {
            return Some(parent.clone());
        }
        if is_primary_key_name(table, column) {
            return None;
        }
        self.patterns.iter().find_map(|p| {
            let caps = p.regex.captures(column)?;
            match caps.get(1).map(|m| m.as_str()).filter(|s| !s.is_empty()) {
                Some(prefix) => Some(prefix.to_string()),
                None => p.table.clone(),
            }
        })
    }

    /// Parent table of a column, if it exists in the schema
    pub fn resolve_parent(&self, schema: &Schema, table: &str, column: &str) -> Option<TableId> {
        let name = self.parent_table_name(table, column)?;
        schema
            .find(&name)
            .or_else(|| schema.find(&format!("{}s", name)))
            .or_else(|| name.strip_suffix(['s', 'S']).and_then(|n| schema.find(n)))
    }

    /// Declare foreign keys on every table and link every payload.
    /// Returns the number of non-null references.
    pub fn link(&self, schema: &mut Schema, store: &mut dyn PayloadStore) -> usize {
        self.declare(schema);
        let mut linked = 0;
        for i in 0..store.len() {
            if let Some(payload) = store.at_mut(i) {
                linked += link_payload(schema, payload);
            }
        }
        debug!(linked, "Linked foreign keys");
        linked
    }

    /// Declare foreign keys for every column the rules recognise
    pub fn declare(&self, schema: &mut Schema) {
        let mut found = Vec::new();
        for table in schema.tables() {
            for column in &table.columns {
                if let Some(parent) = self.resolve_parent(schema, &table.name, column) {
                    found.push((table.id, column.clone(), parent));
                }
            }
        }
        for (table, column, parent) in found {
            if let Some(t) = schema.table_mut(table) {
                t.declare_foreign_key(&column, parent);
            }
        }
    }

    /// Soft attraction targets from trait and domain groupings
    pub fn cluster_hints(&self, schema: &Schema, store: &dyn PayloadStore) -> Vec<ClusterHint> {
        let has_parent = |p: &Payload| {
            p.foreign_keys
                .iter()
                .filter_map(ForeignKey::parent_key)
                .any(|k| k != p.key() && store.contains(k))
        };

        let mut hints = Vec::new();
        let mut grouped: HashSet<PayloadKey> = HashSet::new();

        if let Some(traits) = &self.trait_cluster {
            let mut anchors: HashMap<(String, String), PayloadKey> = HashMap::new();
            for p in store.iter().filter(|p| !has_parent(p)) {
                for column in &traits.columns {
                    let Some(value) = p.field(column).filter(|v| !v.is_null()) else {
                        continue;
                    };
                    let group = (column.to_ascii_lowercase(), value.to_string());
                    match anchors.get(&group) {
                        Some(&anchor) => {
                            hints.push(ClusterHint {
                                child: p.key(),
                                anchor,
                                strength: traits.weight,
                            });
                            grouped.insert(p.key());
                            grouped.insert(anchor);
                        }
                        None => {
                            anchors.insert(group, p.key());
                        }
                    }
                    break;
                }
            }
        }

        if let Some(domains) = &self.domain_cluster {
            let mut domain_of: HashMap<TableId, &str> = HashMap::new();
            for (domain, tables) in &domains.domains {
                for name in tables {
                    if let Some(id) = schema.find(name) {
                        domain_of.entry(id).or_insert(domain.as_str());
                    }
                }
            }
            let mut anchors: HashMap<&str, PayloadKey> = HashMap::new();
            for p in store.iter() {
                if has_parent(p) || grouped.contains(&p.key()) {
                    continue;
                }
                let Some(&domain) = domain_of.get(&p.table) else { continue };
                match anchors.get(domain) {
                    Some(&anchor) => hints.push(ClusterHint {
                        child: p.key(),
                        anchor,
                        strength: domains.weight,
                    }),
                    None => {
                        anchors.insert(domain, p.key());
                    }
                }
            }
        }
        hints
    }
}

/// Rebuild a payload's references from its table's declarations.
/// Keeps the settled flag of references that did not change.
pub fn link_payload(schema: &Schema, payload: &mut Payload) -> usize {
    let Some(table) = schema.table(payload.table) else {
        return 0;
    };
    let old = std::mem::take(&mut payload.foreign_keys);
    for decl in &table.foreign_keys {
        let parent_id = payload.field(&decl.column).and_then(|v| v.as_i64());
        let mut fk = ForeignKey::new(decl.column.clone(), decl.parent, parent_id);
        fk.settled = old
            .iter()
            .any(|o| o.settled && o.column.eq_ignore_ascii_case(&fk.column) && o.parent_key() == fk.parent_key());
        payload.foreign_keys.push(fk);
    }
    payload.foreign_keys.iter().filter(|fk| fk.parent_id.is_some()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::MemoryStore;
    use crate::core::Field;

    fn chinook_schema() -> Schema {
        let mut schema = Schema::new();
        for (name, cols) in [
            ("Artist", vec!["ArtistId", "Name", "Country"]),
            ("Album", vec!["AlbumId", "Title", "ArtistId"]),
            ("Track", vec!["TrackId", "Name", "AlbumId", "genre_id"]),
            ("Genre", vec!["GenreId", "Name"]),
        ] {
            let id = schema.add_table(name);
            if let Some(t) = schema.table_mut(id) {
                t.columns = cols.into_iter().map(String::from).collect();
            }
        }
        schema
    }

    #[test]
    fn test_default_patterns() {
        let rules = IngestRules::default();
        assert_eq!(rules.parent_table_name("Album", "ArtistId"), Some("Artist".into()));
        assert_eq!(rules.parent_table_name("Track", "genre_id"), Some("genre".into()));
        assert_eq!(rules.parent_table_name("Album", "id"), None);
        // A table's own key is never a reference
        assert_eq!(rules.parent_table_name("Album", "AlbumId"), None);
        assert_eq!(rules.parent_table_name("Album", "Title"), None);
    }

    #[test]
    fn test_resolve_parent_needs_existing_table() {
        let schema = chinook_schema();
        let rules = IngestRules::default();
        assert_eq!(rules.resolve_parent(&schema, "Album", "ArtistId"), schema.find("Artist"));
        assert_eq!(rules.resolve_parent(&schema, "Track", "genre_id"), schema.find("Genre"));
        assert_eq!(rules.resolve_parent(&schema, "Track", "Paid"), None);
    }

    #[test]
    fn test_mappings_win_over_patterns() {
        let rules = IngestRules::from_json_str(r#"{ "mappings": { "Track.AlbumId": "Artist" } }"#).unwrap();
        assert_eq!(rules.parent_table_name("track", "albumid"), Some("Artist".into()));
        assert_eq!(rules.parent_table_name("Album", "ArtistId"), Some("Artist".into()));
    }

    #[test]
    fn test_explicit_patterns_replace_defaults() {
        let rules = IngestRules::from_json_str(
            r#"{ "foreign_keys": [ { "pattern": "^owner$", "table": "Artist" } ] }"#,
        )
        .unwrap();
        assert_eq!(rules.parent_table_name("Album", "owner"), Some("Artist".into()));
        assert_eq!(rules.parent_table_name("Album", "ArtistId"), None);
    }

    #[test]
    fn test_bad_rules_are_rejected() {
        assert!(matches!(IngestRules::from_json_str("{ nope"), Err(MycoError::Rules(_))));
        assert!(matches!(
            IngestRules::from_json_str(r#"{ "foreign_keys": [ { "pattern": "(" } ] }"#),
            Err(MycoError::Rules(_))
        ));
        assert!(matches!(
            IngestRules::from_json_str(r#"{ "foreign_keys": [ { "pattern": "_ref$" } ] }"#),
            Err(MycoError::Rules(_))
        ));
        assert!(matches!(
            IngestRules::from_json_str(r#"{ "mappings": { "NoDot": "Artist" } }"#),
            Err(MycoError::Rules(_))
        ));
    }

    #[test]
    fn test_link_sets_references() {
        let mut schema = chinook_schema();
        let artist = schema.find("Artist").unwrap();
        let album = schema.find("Album").unwrap();
        let mut store = MemoryStore::new();
        store.insert(Payload::new(artist, 5, vec![Field::new("ArtistId", 5i64)]));
        store.insert(Payload::new(
            album,
            1,
            vec![Field::new("AlbumId", 1i64), Field::new("ArtistId", 5i64)],
        ));
        store.insert(Payload::new(
            album,
            2,
            vec![Field::new("AlbumId", 2i64), Field::new("ArtistId", crate::core::Value::Null)],
        ));

        let linked = IngestRules::default().link(&mut schema, &mut store);

        assert_eq!(linked, 1);
        let a1 = store.get(PayloadKey::new(album, 1)).unwrap();
        assert_eq!(a1.foreign_keys.len(), 1);
        assert_eq!(a1.foreign_keys[0].parent_key(), Some(PayloadKey::new(artist, 5)));
        let a2 = store.get(PayloadKey::new(album, 2)).unwrap();
        assert_eq!(a2.foreign_keys[0].parent_id, None);
        assert!(schema.table(album).unwrap().foreign_key("artistid").is_some());
    }

    #[test]
    fn test_link_payload_keeps_settled_flag() {
        let mut schema = chinook_schema();
        IngestRules::default().declare(&mut schema);
        let album = schema.find("Album").unwrap();
        let mut p = Payload::new(album, 1, vec![Field::new("ArtistId", 5i64)]);
        link_payload(&schema, &mut p);
        p.foreign_keys[0].settled = true;

        link_payload(&schema, &mut p);
        assert!(p.foreign_keys[0].settled);

        p.set_field("ArtistId", 6i64.into());
        link_payload(&schema, &mut p);
        assert!(!p.foreign_keys[0].settled);
    }

    #[test]
    fn test_cluster_hints() {
        let schema = chinook_schema();
        let artist = schema.find("Artist").unwrap();
        let genre = schema.find("Genre").unwrap();
        let mut store = MemoryStore::new();
        for (id, country) in [(1, "AU"), (2, "UK"), (3, "AU")] {
            store.insert(Payload::new(
                artist,
                id,
                vec![Field::new("ArtistId", id), Field::new("Country", country)],
            ));
        }
        store.insert(Payload::new(genre, 1, vec![Field::new("GenreId", 1i64)]));

        let rules = IngestRules::from_json_str(
            r#"{
                "trait_cluster": { "columns": ["Country"], "weight": 0.6 },
                "domain_cluster": { "domains": { "music": ["Artist", "Genre"] } }
            }"#,
        )
        .unwrap();
        let hints = rules.cluster_hints(&schema, &store);

        let trait_hint = ClusterHint {
            child: PayloadKey::new(artist, 3),
            anchor: PayloadKey::new(artist, 1),
            strength: 0.6,
        };
        assert!(hints.contains(&trait_hint));
        // Artist 2 is ungrouped, so it anchors the domain for Genre 1
        assert!(hints.contains(&ClusterHint {
            child: PayloadKey::new(genre, 1),
            anchor: PayloadKey::new(artist, 2),
            strength: 0.3,
        }));
        assert_eq!(hints.len(), 2);
    }
}
