//! Canonical key encodings. Identifiers render as lowercase hex, 32
//! characters, no separators, so any component can derive table and row
//! names from an id without a lookup.

use uuid::Uuid;

use crate::storage::store::StoreError;

/// The shared group-list index table.
pub const ALL_GROUPS_TABLE: &str = "AllGroups";

// Table names must begin with a letter; ids don't always.
pub const GROUP_TABLE_PREFIX: &str = "t";

/// Fixed partition tokens.
pub mod partitions {
    /// Index entries in the AllGroups table and reverse-index rows in user
    /// tables.
    pub const GROUP: &str = "Group";
    /// The metadata singleton inside a group table.
    pub const METADATA: &str = "Metadata";
    pub const USER: &str = "User";
    pub const MESSAGE: &str = "Message";
}

/// Row key of the metadata singleton; shares the partition's token.
pub const METADATA_ROW_KEY: &str = "Metadata";

/// Canonical string form of an identifier.
pub fn id_string(id: Uuid) -> String {
    id.simple().to_string()
}

pub fn group_table(group_id: Uuid) -> String {
    format!("{}{}", GROUP_TABLE_PREFIX, group_id.simple())
}

/// User reverse-index tables are named by the bare canonical id.
pub fn user_table(user_id: Uuid) -> String {
    id_string(user_id)
}

pub fn parse_id(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::try_parse(raw).map_err(|_| StoreError::Decode(format!("bad id in row key: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_string_is_fixed_width_lowercase_hex() {
        let id = Uuid::new_v4();
        let s = id_string(id);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(!s.contains('-'));
    }

    #[test]
    fn group_table_starts_with_a_letter() {
        let name = group_table(Uuid::new_v4());
        assert!(name.starts_with(GROUP_TABLE_PREFIX));
        assert_eq!(name.len(), 33);
    }

    #[test]
    fn canonical_form_parses_back() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id_string(id)).unwrap(), id);
    }

    #[test]
    fn junk_row_key_is_a_decode_error() {
        assert!(matches!(parse_id("not-an-id"), Err(StoreError::Decode(_))));
    }
}
