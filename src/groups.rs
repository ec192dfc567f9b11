//! Imports certificate groups bundled with certificates.
//!
//! Exported groups are files that contain the group definitions
//! followed by the members' certificates.  The definitions are TOML,
//! and live outside of the ASCII-armored blocks:
//!
//! ```toml
//! [[group]]
//! id = "3f2a...."
//! name = "Release signers"
//! members = [ "C08B3B0DAD0B7C4E30E62B0F6B2E7E2C4A6F2E1A" ]
//! ```

use std::path::Path;

use anyhow::Context;
use toml_edit::{
    Array,
    ArrayOfTables,
    DocumentMut,
    Item,
    Table,
    value,
};

use crate::{
    Result,
    cache::KeyCache,
    outcome::ImportOutcome,
    types::{
        Fingerprint,
        GroupStatus,
        ImportedGroup,
        KeyGroup,
    },
};

/// Extracts group definitions from an imported file.
pub trait GroupParser: Send + Sync {
    fn parse_groups_from_file(&self, path: &Path) -> Result<Vec<KeyGroup>>;
}

/// A parser that never finds any groups.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGroups;

impl GroupParser for NoGroups {
    fn parse_groups_from_file(&self, _: &Path) -> Result<Vec<KeyGroup>> {
        Ok(vec![])
    }
}

/// Reads `[[group]]` tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlGroupParser;

impl GroupParser for TomlGroupParser {
    fn parse_groups_from_file(&self, path: &Path) -> Result<Vec<KeyGroup>> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Reading {}", path.display()))?;

        // Binary certificates carry no group definitions.
        let Ok(text) = std::str::from_utf8(&bytes) else {
            return Ok(vec![]);
        };

        parse_groups(text)
            .with_context(|| format!("Parsing groups in {}", path.display()))
    }
}

/// Returns `text` without ASCII-armored blocks.
fn strip_armor(text: &str) -> String {
    let mut in_armor = false;
    let mut rest = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if ! in_armor && trimmed.starts_with("-----BEGIN ") {
            in_armor = true;
        } else if in_armor && trimmed.starts_with("-----END ") {
            in_armor = false;
        } else if ! in_armor {
            rest.push_str(line);
            rest.push('\n');
        }
    }
    rest
}

/// Parses the group definitions in `text`.
///
/// Armored blocks are skipped.
pub fn parse_groups(text: &str) -> Result<Vec<KeyGroup>> {
    let doc: DocumentMut = strip_armor(text).parse()?;

    let Some(item) = doc.get("group") else {
        return Ok(vec![]);
    };
    let tables = item.as_array_of_tables()
        .ok_or_else(|| anyhow::anyhow!(
            "group is not an array of tables but a {}", item.type_name()))?;

    tables.iter().enumerate()
        .map(|(i, t)| parse_group(t).with_context(|| format!("group #{}", i)))
        .collect()
}

fn parse_group(table: &Table) -> Result<KeyGroup> {
    let id = table.get("id").and_then(Item::as_str)
        .filter(|id| ! id.is_empty())
        .ok_or_else(|| anyhow::anyhow!("missing id"))?;
    let name = table.get("name").and_then(Item::as_str).unwrap_or(id);

    let members = match table.get("members") {
        None => vec![],
        Some(item) => item.as_array()
            .ok_or_else(|| anyhow::anyhow!("members is not an array"))?
            .iter()
            .map(|m| m.as_str().map(Fingerprint::new)
                 .ok_or_else(|| anyhow::anyhow!("member is not a string")))
            .collect::<Result<Vec<_>>>()?,
    };

    Ok(KeyGroup {
        id: id.into(),
        name: name.into(),
        members,
    })
}

/// Serializes groups in the format read by [`parse_groups`].
pub fn groups_to_toml<'a, I>(groups: I) -> String
where
    I: IntoIterator<Item = &'a KeyGroup>,
{
    let mut tables = ArrayOfTables::new();
    for group in groups {
        let mut t = Table::new();
        t.insert("id", value(group.id.as_str()));
        t.insert("name", value(group.name.as_str()));
        let members = group.members.iter()
            .map(|m| m.as_str())
            .collect::<Array>();
        t.insert("members", value(members));
        tables.push(t);
    }

    let mut doc = DocumentMut::new();
    doc.insert("group", Item::ArrayOfTables(tables));
    doc.to_string()
}

/// Inserts or updates the groups found in imported files.
pub struct GroupImporter<'a> {
    parser: &'a dyn GroupParser,
    cache: &'a dyn KeyCache,
}

impl<'a> GroupImporter<'a> {
    pub fn new(parser: &'a dyn GroupParser, cache: &'a dyn KeyCache) -> Self {
        GroupImporter {
            parser,
            cache,
        }
    }

    /// Imports the groups of every file that was imported
    /// successfully.
    ///
    /// Failures are logged, and otherwise ignored.
    pub fn import(&self, outcomes: &[ImportOutcome]) -> Vec<ImportedGroup> {
        let mut files: Vec<(&str, &Path)> = vec![];
        for o in outcomes.iter().filter(|o| o.is_success()) {
            if let Some(path) = o.file.as_deref() {
                if ! files.iter().any(|(_, p)| *p == path) {
                    files.push((&o.label, path));
                }
            }
        }

        let mut imported = vec![];
        for (label, path) in files {
            let groups = match self.parser.parse_groups_from_file(path) {
                Ok(groups) => groups,
                Err(err) => {
                    tracing::debug!("No groups imported from {}: {:#}",
                                    path.display(), err);
                    continue;
                }
            };

            for group in groups {
                let (status, result) = if self.cache.has_group(&group.id) {
                    (GroupStatus::Updated, self.cache.update_group(group.clone()))
                } else {
                    (GroupStatus::New, self.cache.insert_group(group.clone()))
                };

                match result {
                    Ok(()) => {
                        tracing::debug!(id = %group.id, ?status,
                                        "imported group from {}", label);
                        imported.push(ImportedGroup {
                            source_label: label.to_string(),
                            group,
                            status,
                        });
                    }
                    Err(err) => tracing::warn!(
                        "Failed to import group {:?} from {}: {:#}",
                        group.name, label, err),
                }
            }
        }

        imported
    }
}
