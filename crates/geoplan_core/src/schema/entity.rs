//! Entity descriptors.
//!
//! # Responsibility
//! - Describe one physical table per entity: name, primary-key shape and
//!   ordered column list.
//! - Carry no behavior beyond metadata lookups.
//!
//! # Invariants
//! - Generated-id entities start with the managed `id`, `created_at` and
//!   `updated_at` columns, in that order.
//! - Composite-key entities declare both key columns as required `Id`
//!   columns and never carry a generated `id`.

/// Primary-key column of every generated-id entity.
pub const ID_COLUMN: &str = "id";
/// Managed creation timestamp (epoch ms) of generated-id entities.
pub const CREATED_AT_COLUMN: &str = "created_at";
/// Managed update timestamp (epoch ms) of generated-id entities.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Opaque generated identifier (UUID text).
    Id,
    /// UTF-8 text with an optional maximum length in characters.
    Text { max_len: Option<u32> },
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// Stored as 0/1.
    Boolean,
    /// Opaque JSON document, validated only for well-formedness.
    Json,
    /// Epoch milliseconds.
    Timestamp,
}

impl ColumnType {
    /// Text column limited to `max_len` characters.
    pub fn text(max_len: u32) -> Self {
        Self::Text {
            max_len: Some(max_len),
        }
    }

    /// Unbounded text column.
    pub fn long_text() -> Self {
        Self::Text { max_len: None }
    }

    /// SQLite storage class used for this type.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Id | Self::Text { .. } | Self::Json => "TEXT",
            Self::Integer | Self::Boolean | Self::Timestamp => "INTEGER",
            Self::Real => "REAL",
        }
    }

    /// Short label used in error messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Text { .. } => "text",
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Boolean => "boolean",
            Self::Json => "json",
            Self::Timestamp => "timestamp",
        }
    }
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    /// Maintained by the store; callers may not write it.
    pub managed: bool,
}

impl ColumnDef {
    /// Declares a NOT NULL column.
    pub fn required(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            name: name.into(),
            ty,
            nullable: false,
            unique: false,
            managed: false,
        }
    }

    /// Declares a nullable column.
    pub fn optional(name: impl Into<String>, ty: ColumnType) -> Self {
        Self {
            nullable: true,
            ..Self::required(name, ty)
        }
    }

    /// Marks the column as unique across the table.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    fn managed(name: &str, ty: ColumnType) -> Self {
        Self {
            managed: true,
            ..Self::required(name, ty)
        }
    }
}

/// Primary-key shape. No entity mixes the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// Single generated `id` column.
    GeneratedId,
    /// Pair of participant foreign-key columns.
    Composite { left: String, right: String },
}

/// Static descriptor of one entity/table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: String,
    pub primary_key: PrimaryKey,
    pub columns: Vec<ColumnDef>,
}

impl EntityDef {
    /// Starts a generated-id entity with its managed columns.
    pub fn generated(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: PrimaryKey::GeneratedId,
            columns: vec![
                ColumnDef::managed(ID_COLUMN, ColumnType::Id),
                ColumnDef::managed(CREATED_AT_COLUMN, ColumnType::Timestamp),
                ColumnDef::managed(UPDATED_AT_COLUMN, ColumnType::Timestamp),
            ],
        }
    }

    /// Starts an associative entity keyed by `(left, right)`.
    pub fn associative(
        name: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        let left = left.into();
        let right = right.into();
        Self {
            name: name.into(),
            columns: vec![
                ColumnDef::required(left.clone(), ColumnType::Id),
                ColumnDef::required(right.clone(), ColumnType::Id),
            ],
            primary_key: PrimaryKey::Composite { left, right },
        }
    }

    /// Appends one column.
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn is_associative(&self) -> bool {
        matches!(self.primary_key, PrimaryKey::Composite { .. })
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Primary-key column names in declaration order.
    pub fn key_columns(&self) -> Vec<&str> {
        match &self.primary_key {
            PrimaryKey::GeneratedId => vec![ID_COLUMN],
            PrimaryKey::Composite { left, right } => vec![left.as_str(), right.as_str()],
        }
    }

    /// Columns a caller may supply through `create`/`update`.
    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|column| !column.managed)
    }

    /// Extra attributes living on an associative row.
    pub fn payload_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        let keys = self.key_columns();
        self.columns
            .iter()
            .filter(move |column| !column.managed && !keys.contains(&column.name.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::{ColumnDef, ColumnType, EntityDef, ID_COLUMN};

    #[test]
    fn generated_entity_starts_with_managed_columns() {
        let entity = EntityDef::generated("layer")
            .column(ColumnDef::required("name", ColumnType::text(120)));

        let names: Vec<&str> = entity.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![ID_COLUMN, "created_at", "updated_at", "name"]);
        assert_eq!(entity.key_columns(), vec![ID_COLUMN]);
        let writable: Vec<&str> = entity.writable_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(writable, vec!["name"]);
    }

    #[test]
    fn associative_entity_separates_keys_from_payload() {
        let entity = EntityDef::associative("project_ties_layer", "project_id", "layer_id")
            .column(ColumnDef::optional("settings", ColumnType::Json));

        assert!(entity.is_associative());
        assert_eq!(entity.key_columns(), vec!["project_id", "layer_id"]);
        let payload: Vec<&str> = entity.payload_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(payload, vec!["settings"]);
    }
}
