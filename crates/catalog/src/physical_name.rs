use crate::CatalogError;
use once_cell::sync::Lazy;
use regex::Regex;
use core::fmt;

/// Generated physical names: `tab<id>`, `col<id>`, `sch<id>`, with an
/// optional revision suffix `r<n>` appended when an entity is redefined
/// without an id change.
static PHYSICAL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(col|tab|sch)([0-9]+)(r([0-9]+))?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalKind {
    Table,
    Column,
    Schema,
}

impl PhysicalKind {
    fn prefix(self) -> &'static str {
        match self {
            PhysicalKind::Table => "tab",
            PhysicalKind::Column => "col",
            PhysicalKind::Schema => "sch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PhysicalName {
    pub kind: PhysicalKind,
    pub id: u64,
    pub revision: u32,
}

impl PhysicalName {
    pub fn table(id: u64) -> Self {
        Self { kind: PhysicalKind::Table, id, revision: 0 }
    }

    pub fn column(id: u64) -> Self {
        Self { kind: PhysicalKind::Column, id, revision: 0 }
    }

    pub fn schema(id: u64) -> Self {
        Self { kind: PhysicalKind::Schema, id, revision: 0 }
    }

    /// The next revision of the same entity, used when a column is redefined
    /// in place.
    pub fn bump_revision(self) -> Self {
        Self { revision: self.revision + 1, ..self }
    }

    pub fn parse(name: &str) -> Result<Self, CatalogError> {
        let caps = PHYSICAL_NAME_RE
            .captures(name)
            .ok_or_else(|| CatalogError::BadPhysicalName(name.to_string()))?;
        let kind = match &caps[1] {
            "tab" => PhysicalKind::Table,
            "col" => PhysicalKind::Column,
            _ => PhysicalKind::Schema,
        };
        let id = caps[2]
            .parse()
            .map_err(|_| CatalogError::BadPhysicalName(name.to_string()))?;
        let revision = caps
            .get(4)
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|_| CatalogError::BadPhysicalName(name.to_string()))?
            .unwrap_or(0);
        Ok(Self { kind, id, revision })
    }
}

impl fmt::Display for PhysicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.id)?;
        if self.revision > 0 {
            write!(f, "r{}", self.revision)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_display() {
        for name in [
            PhysicalName::table(42),
            PhysicalName::column(7).bump_revision(),
            PhysicalName::schema(0),
        ] {
            assert_eq!(PhysicalName::parse(&name.to_string()).unwrap(), name);
        }
    }

    #[test]
    fn rejects_foreign_names() {
        assert!(PhysicalName::parse("users").is_err());
        assert!(PhysicalName::parse("tab").is_err());
        assert!(PhysicalName::parse("tab1r").is_err());
        assert!(PhysicalName::parse("idx9").is_err());
    }

    #[test]
    fn revision_suffix_renders_only_when_set() {
        assert_eq!(PhysicalName::table(3).to_string(), "tab3");
        assert_eq!(PhysicalName::table(3).bump_revision().to_string(), "tab3r1");
    }
}
