//! Column and association metadata per model.
//!
//! [`MetadataRegistry`] is the single source of truth for a model's table
//! name, schema, columns and associations. Each model's own declarations
//! are stored once; columns inherited from ancestors are merged in on every
//! [`entity_metadata`](MetadataRegistry::entity_metadata) lookup, so the
//! order in which a hierarchy is declared never matters.
//!
//! Every model implicitly descends from [`BASE_MODEL`], which declares the
//! auto-incrementing `id` primary key.

use crate::association::Association;
use crate::datatype::{DataType, INT};
use crate::registry::ModelRegistry;
use relmodel_core::{Error, Result, SchemaErrorKind};
use relmodel_query::{ColumnSpec, ReferentialAction, References, SqlType, Table, TableRef};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Metadata key of the implicit root of every model hierarchy.
pub const BASE_MODEL: &str = "basemodel";

/// Schema used when a model does not name one.
pub const DEFAULT_SCHEMA: &str = "public";

/// Foreign-key target of a column. The referenced table and schema are
/// looked up from the target model when table descriptors are built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    /// Metadata key of the referenced model
    pub model: String,
    pub column: String,
    pub on_delete: ReferentialAction,
}

/// One declared column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Physical column name
    pub name: String,
    /// Attribute name on the entity
    pub property: String,
    pub data_type: DataType,
    /// Declared length for `STRING` columns
    pub length: Option<u32>,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    pub index: bool,
    pub auto_increment: bool,
    pub references: Option<ColumnReference>,
}

impl ColumnDefinition {
    /// A column for `property`; the physical name is the lower-cased property.
    pub fn new(property: impl Into<String>, data_type: DataType) -> Self {
        let property = property.into();
        Self {
            name: property.to_lowercase(),
            property,
            data_type,
            length: None,
            primary_key: false,
            unique: false,
            not_null: false,
            index: false,
            auto_increment: false,
            references: None,
        }
    }

    /// Auto-incrementing integer primary key.
    pub fn primary(property: impl Into<String>) -> Self {
        Self::new(property, INT)
            .primary_key()
            .auto_increment()
            .not_null()
    }

    /// Not-null, indexed integer column referencing `model`'s `id`.
    pub fn foreign_key(
        name: impl Into<String>,
        model: impl Into<String>,
        on_delete: ReferentialAction,
    ) -> Self {
        Self::new(name, INT)
            .not_null()
            .index()
            .references(model, "id", on_delete)
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    #[must_use]
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    #[must_use]
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    #[must_use]
    pub fn references(
        mut self,
        model: impl Into<String>,
        column: impl Into<String>,
        on_delete: ReferentialAction,
    ) -> Self {
        self.references = Some(ColumnReference {
            model: model.into().to_lowercase(),
            column: column.into(),
            on_delete,
        });
        self
    }

    /// Storage type of this column.
    pub fn sql_type(&self) -> Result<SqlType> {
        self.data_type.sql_type(self.length, self.auto_increment)
    }

    /// Does `attribute` name this column, by property or physical name?
    pub fn matches(&self, attribute: &str) -> bool {
        self.property == attribute || self.name == attribute
    }
}

/// Everything known about one model.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    /// Table name
    pub name: String,
    /// Schema, or `None` for the registry default
    pub schema: Option<String>,
    columns: Vec<ColumnDefinition>,
    associations: Vec<Association>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            associations: Vec::new(),
        }
    }

    /// Columns in declaration order, ancestors first.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Column by physical name.
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Column by property or physical name.
    pub fn column_for(&self, attribute: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.property == attribute)
            .or_else(|| self.column(attribute))
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> Option<&Association> {
        self.associations.iter().find(|a| a.name() == name)
    }

    /// Insert or replace a column, keeping the position of a replaced one.
    fn put_column(&mut self, column: ColumnDefinition) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
    }

    fn put_association(&mut self, association: Association) {
        match self
            .associations
            .iter_mut()
            .find(|a| a.name() == association.name())
        {
            Some(existing) => *existing = association,
            None => self.associations.push(association),
        }
    }
}

/// Registry of per-model metadata and, once built, table descriptors.
#[derive(Debug)]
pub struct MetadataRegistry {
    entities: HashMap<String, EntityMetadata>,
    parents: HashMap<String, String>,
    tables: HashMap<String, Arc<Table>>,
    default_schema: String,
    built: bool,
}

impl Default for MetadataRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataRegistry {
    pub fn new() -> Self {
        let mut base = EntityMetadata::new(BASE_MODEL);
        base.put_column(ColumnDefinition::primary("id"));

        let mut entities = HashMap::new();
        entities.insert(BASE_MODEL.to_string(), base);

        Self {
            entities,
            parents: HashMap::new(),
            tables: HashMap::new(),
            default_schema: DEFAULT_SCHEMA.to_string(),
            built: false,
        }
    }

    pub fn default_schema(&self) -> &str {
        &self.default_schema
    }

    pub fn set_default_schema(&mut self, schema: impl Into<String>) {
        self.default_schema = schema.into();
    }

    /// The model's own metadata, created on first access.
    pub fn entity_mut(&mut self, model: &str) -> &mut EntityMetadata {
        let key = model.to_lowercase();
        self.entities
            .entry(key.clone())
            .or_insert_with(|| EntityMetadata::new(key))
    }

    /// Declare `parent` as the model `model` inherits columns from.
    pub fn set_parent(&mut self, model: &str, parent: &str) {
        self.parents
            .insert(model.to_lowercase(), parent.to_lowercase());
    }

    /// The parent of `model`; the base model when none was declared.
    pub fn parent_of(&self, model: &str) -> Option<&str> {
        let key = model.to_lowercase();
        if key == BASE_MODEL {
            return None;
        }
        Some(
            self.parents
                .get(&key)
                .map_or(BASE_MODEL, String::as_str),
        )
    }

    pub fn add_column(&mut self, model: &str, column: ColumnDefinition) {
        self.entity_mut(model).put_column(column);
    }

    /// Register an association on its source model.
    pub fn add_association(&mut self, association: Association) {
        let source = association.source().to_string();
        self.entity_mut(&source).put_association(association);
    }

    /// Metadata of `model` with every ancestor's columns merged in.
    ///
    /// Ancestor columns come first, root first; a descendant column replaces
    /// an ancestor column with the same physical name in place. The merge is
    /// recomputed on every call.
    pub fn entity_metadata(&self, model: &str) -> EntityMetadata {
        let key = model.to_lowercase();
        let mut merged = self
            .entities
            .get(&key)
            .cloned()
            .unwrap_or_else(|| EntityMetadata::new(key.clone()));

        let mut chain = Vec::new();
        let mut seen = HashSet::from([key.clone()]);
        let mut current = self.parent_of(&key);
        while let Some(parent) = current {
            if !seen.insert(parent.to_string()) {
                break;
            }
            if let Some(entity) = self.entities.get(parent) {
                chain.push(entity);
            }
            current = self.parent_of(parent);
        }

        let own = std::mem::take(&mut merged.columns);
        for ancestor in chain.iter().rev() {
            for column in &ancestor.columns {
                merged.put_column(column.clone());
            }
        }
        for column in own {
            merged.put_column(column);
        }
        merged
    }

    /// Schema a model's table lives in.
    pub fn schema_of(&self, metadata: &EntityMetadata) -> String {
        metadata
            .schema
            .clone()
            .unwrap_or_else(|| self.default_schema.clone())
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// The table descriptor of `model`. Only available after [`build`](Self::build).
    pub fn sql_entity(&self, model: &str) -> Result<Arc<Table>> {
        if !self.built {
            return Err(Error::schema(
                SchemaErrorKind::NotBuilt,
                format!("Table descriptors requested for {model} before the registry was built"),
            ));
        }
        self.tables.get(&model.to_lowercase()).cloned().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownModel,
                format!("Model {model} has not been defined"),
            )
        })
    }

    /// Resolve associations, then render a table descriptor per model.
    ///
    /// Phase one walks the models in dependency order and builds each
    /// declared association: targets are resolved through `models`,
    /// many-to-many through models are registered and foreign-key columns
    /// are added. Phase two renders every model's table from its complete
    /// column set. Running it again re-derives everything from the current
    /// declarations.
    pub fn build(&mut self, models: &mut ModelRegistry) -> Result<()> {
        self.built = false;
        self.tables.clear();

        for model in models.models(self)? {
            let declared = self.entity_mut(model.key()).associations.clone();
            for mut association in declared {
                association.build(self, models)?;
                self.add_association(association);
            }
        }

        let mut tables = HashMap::new();
        for model in models.models(self)? {
            let metadata = self.entity_metadata(model.key());
            tables.insert(model.key().to_string(), Arc::new(self.render_table(&metadata)?));
        }

        tracing::debug!(tables = tables.len(), "metadata built");
        self.tables = tables;
        self.built = true;
        Ok(())
    }

    fn render_table(&self, metadata: &EntityMetadata) -> Result<Table> {
        let columns = metadata
            .columns
            .iter()
            .map(|column| self.column_spec(column))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table::new(
            TableRef::new(self.schema_of(metadata), metadata.name.clone()),
            columns,
        ))
    }

    fn column_spec(&self, column: &ColumnDefinition) -> Result<ColumnSpec> {
        let mut spec = ColumnSpec::new(column.name.clone(), column.sql_type()?);
        spec.primary_key = column.primary_key;
        spec.unique = column.unique;
        spec.not_null = column.not_null;
        spec.index = column.index;
        spec.auto_increment = column.auto_increment;
        spec.references = column.references.as_ref().map(|reference| {
            let target = self.entity_metadata(&reference.model);
            References {
                table: TableRef::new(self.schema_of(&target), target.name.clone()),
                column: reference.column.clone(),
                on_delete: reference.on_delete,
            }
        });
        Ok(spec)
    }
}
