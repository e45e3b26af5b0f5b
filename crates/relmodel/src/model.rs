//! Model declarations.
//!
//! A model is declared by handing a [`ModelDef`] to
//! [`Registry::define`](crate::Registry::define): its columns, associations,
//! parent model, table overrides, derived columns and lifecycle hooks.
//! Typed models implement [`Model`] and wrap an [`Entity`].

use crate::association::Association;
use crate::datatype::DataType;
use crate::entity::Entity;
use crate::metadata::ColumnDefinition;
use crate::query::{Filter, FindOptions};
use crate::registry::Registry;
use regex::Regex;
use relmodel_core::{Cx, Error, ExecutionContext, Outcome, Result, SchemaErrorKind, Value};
use std::fmt;
use std::sync::{Arc, OnceLock};

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn identifier_regex() -> &'static std::result::Result<Regex, regex::Error> {
    static IDENTIFIER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    IDENTIFIER.get_or_init(|| Regex::new(IDENTIFIER_PATTERN))
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    let regex = identifier_regex()
        .as_ref()
        .map_err(|e| Error::Custom(format!("invalid identifier pattern: {e}")))?;
    if regex.is_match(name) {
        Ok(())
    } else {
        Err(Error::schema(
            SchemaErrorKind::Invalid,
            format!("Invalid {kind} name '{name}'"),
        ))
    }
}

/// Lifecycle hooks run by [`Entity::save`](crate::Entity::save).
///
/// Every hook receives the entity being saved and may modify it. An error
/// aborts the save.
pub trait ModelEvents: Send + Sync {
    fn before_save(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_save(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn before_create(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_create(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn before_update(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }

    fn after_update(&self, _entity: &mut Entity) -> Result<()> {
        Ok(())
    }
}

/// A read-only attribute computed from an entity's stored values.
#[derive(Clone)]
pub struct DerivedColumn {
    pub name: String,
    compute: Arc<dyn Fn(&Entity) -> Value + Send + Sync>,
}

impl DerivedColumn {
    pub fn new(
        name: impl Into<String>,
        compute: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }

    pub fn compute(&self, entity: &Entity) -> Value {
        (self.compute)(entity)
    }
}

impl fmt::Debug for DerivedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedColumn")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A registered, concrete model.
pub struct ModelInfo {
    pub(crate) name: String,
    pub(crate) key: String,
    pub(crate) derived: Vec<DerivedColumn>,
    pub(crate) events: Option<Arc<dyn ModelEvents>>,
}

impl ModelInfo {
    /// A model with no derived columns or hooks, e.g. a many-to-many
    /// through model.
    pub(crate) fn plain(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: name.to_lowercase(),
            name,
            derived: Vec::new(),
            events: None,
        }
    }

    /// Declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower-cased lookup key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn derived(&self) -> &[DerivedColumn] {
        &self.derived
    }

    pub fn events(&self) -> Option<&Arc<dyn ModelEvents>> {
        self.events.as_ref()
    }
}

impl fmt::Debug for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInfo")
            .field("name", &self.name)
            .field("derived", &self.derived)
            .field("events", &self.events.is_some())
            .finish()
    }
}

/// Declaration of one model.
///
/// ```ignore
/// registry.define(
///     ModelDef::new("Student")
///         .column("name", STRING)
///         .many_to_one("teacher", "Teacher"),
/// )?;
/// ```
pub struct ModelDef {
    pub(crate) name: String,
    pub(crate) table: Option<String>,
    pub(crate) schema: Option<String>,
    pub(crate) parent: Option<String>,
    pub(crate) is_abstract: bool,
    pub(crate) columns: Vec<ColumnDefinition>,
    pub(crate) associations: Vec<Association>,
    pub(crate) derived: Vec<DerivedColumn>,
    pub(crate) events: Option<Arc<dyn ModelEvents>>,
    /// Column type names that failed to resolve, reported by `validate`
    unresolved_types: Vec<String>,
}

impl ModelDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            schema: None,
            parent: None,
            is_abstract: false,
            columns: Vec::new(),
            associations: Vec::new(),
            derived: Vec::new(),
            events: None,
            unresolved_types: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a column for `property` with the given type.
    #[must_use]
    pub fn column(self, property: impl Into<String>, data_type: DataType) -> Self {
        self.column_with(ColumnDefinition::new(property, data_type))
    }

    /// Add a column whose type is given by name (`"STRING"`, `"INT"`, ...).
    /// An unknown name is reported when the model is defined.
    #[must_use]
    pub fn column_named(mut self, property: impl Into<String>, type_name: &str) -> Self {
        match DataType::from_name(type_name) {
            Ok(data_type) => self.column(property, data_type),
            Err(_) => {
                self.unresolved_types.push(type_name.to_string());
                self
            }
        }
    }

    /// Add a fully specified column.
    #[must_use]
    pub fn column_with(mut self, column: ColumnDefinition) -> Self {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(existing) => *existing = column,
            None => self.columns.push(column),
        }
        self
    }

    #[must_use]
    pub fn many_to_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(Association::many_to_one(name, target))
    }

    #[must_use]
    pub fn one_to_one(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(Association::one_to_one(name, target))
    }

    #[must_use]
    pub fn many_to_many(self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.association(Association::many_to_many(name, target))
    }

    #[must_use]
    pub fn association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    /// Inherit every column of `parent`.
    #[must_use]
    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Override the table name (defaults to the lower-cased model name).
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Declare metadata for descendants only: no table, not listed as a model.
    #[must_use]
    pub fn abstract_model(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    #[must_use]
    pub fn derived(
        mut self,
        name: impl Into<String>,
        compute: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.derived.push(DerivedColumn::new(name, compute));
        self
    }

    #[must_use]
    pub fn events(mut self, events: impl ModelEvents + 'static) -> Self {
        self.events = Some(Arc::new(events));
        self
    }

    /// Check names and column types.
    pub fn validate(&self) -> Result<()> {
        for type_name in &self.unresolved_types {
            DataType::from_name(type_name)?;
        }
        check_identifier("model", &self.name)?;
        if let Some(table) = &self.table {
            check_identifier("table", table)?;
        }
        for column in &self.columns {
            check_identifier("column", &column.name)?;
            column.sql_type()?;
        }
        for association in &self.associations {
            check_identifier("association", association.name())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ModelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDef")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("schema", &self.schema)
            .field("parent", &self.parent)
            .field("is_abstract", &self.is_abstract)
            .field("columns", &self.columns)
            .field("associations", &self.associations)
            .finish_non_exhaustive()
    }
}

/// A typed model backed by an [`Entity`].
///
/// Implementors declare their metadata in [`define`](Model::define) and get
/// typed versions of the entity operations for free.
#[allow(async_fn_in_trait)]
pub trait Model: Sized {
    /// Declared model name.
    const NAME: &'static str;

    fn define(def: ModelDef) -> ModelDef;

    fn from_entity(entity: Entity) -> Self;

    fn entity(&self) -> &Entity;

    fn entity_mut(&mut self) -> &mut Entity;

    fn into_entity(self) -> Entity;

    /// A new, empty instance.
    fn create(registry: &Arc<Registry>) -> Result<Self> {
        Entity::new(registry, Self::NAME).map(Self::from_entity)
    }

    fn id(&self) -> Option<i64> {
        self.entity().id()
    }

    async fn get(cx: &Cx, ctx: &ExecutionContext, id: i64) -> Outcome<Self, Error> {
        match Entity::get_by_id(cx, ctx, Self::NAME, id).await {
            Outcome::Ok(entity) => Outcome::Ok(Self::from_entity(entity)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn find_one(
        cx: &Cx,
        ctx: &ExecutionContext,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Self, Error> {
        match Entity::find_one(cx, ctx, Self::NAME, filter, options).await {
            Outcome::Ok(entity) => Outcome::Ok(Self::from_entity(entity)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn find_at_most_one(
        cx: &Cx,
        ctx: &ExecutionContext,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Option<Self>, Error> {
        match Entity::find_at_most_one(cx, ctx, Self::NAME, filter, options).await {
            Outcome::Ok(entity) => Outcome::Ok(entity.map(Self::from_entity)),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn find_all(
        cx: &Cx,
        ctx: &ExecutionContext,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Vec<Self>, Error> {
        match Entity::find_all(cx, ctx, Self::NAME, filter, options).await {
            Outcome::Ok(entities) => {
                Outcome::Ok(entities.into_iter().map(Self::from_entity).collect())
            }
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }

    async fn count(cx: &Cx, ctx: &ExecutionContext, filter: &Filter) -> Outcome<i64, Error> {
        Entity::count(cx, ctx, Self::NAME, filter).await
    }

    async fn delete_where(
        cx: &Cx,
        ctx: &ExecutionContext,
        filter: &Filter,
    ) -> Outcome<(), Error> {
        Entity::delete_where(cx, ctx, Self::NAME, filter).await
    }

    async fn save(&mut self, cx: &Cx, ctx: &ExecutionContext) -> Outcome<(), Error> {
        self.entity_mut().save(cx, ctx).await
    }

    async fn delete(&self, cx: &Cx, ctx: &ExecutionContext) -> Outcome<(), Error> {
        self.entity().delete(cx, ctx).await
    }
}

/// Generate typed getters and setters on a [`Model`] wrapper.
///
/// ```ignore
/// impl Student {
///     relmodel::accessors! {
///         name / set_name: String => "name",
///     }
/// }
/// ```
#[macro_export]
macro_rules! accessors {
    ($($getter:ident / $setter:ident : $ty:ty => $attribute:literal),* $(,)?) => {
        $(
            pub fn $getter(&self) -> ::std::option::Option<$ty> {
                $crate::Model::entity(self).get_as::<$ty>($attribute)
            }

            pub fn $setter(
                &mut self,
                value: impl ::std::convert::Into<$crate::Value>,
            ) -> $crate::Result<()> {
                $crate::Model::entity_mut(self).set($attribute, value)
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::{INT, STRING};

    #[test]
    fn valid_definition() {
        let def = ModelDef::new("Student")
            .column("firstName", STRING)
            .column_named("age", "number")
            .many_to_one("teacher", "Teacher");
        assert!(def.validate().is_ok());
        assert_eq!(def.columns[1].data_type, INT);
    }

    #[test]
    fn invalid_names_are_rejected() {
        assert!(ModelDef::new("bad name").validate().is_err());
        assert!(ModelDef::new("Ok").column("1st", STRING).validate().is_err());
        assert!(ModelDef::new("Ok").table("a;drop").validate().is_err());
        assert!(
            ModelDef::new("Ok")
                .many_to_one("te acher", "Teacher")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn unknown_type_name_is_reported() {
        let err = ModelDef::new("Ok")
            .column_named("when", "DATETIME")
            .validate()
            .unwrap_err();
        assert!(err.is_unresolvable_column_type());
    }

    #[test]
    fn overlong_string_is_rejected() {
        let def = ModelDef::new("Ok").column_with(ColumnDefinition::new("bio", STRING).length(300));
        assert!(def.validate().is_err());
    }

    #[test]
    fn redeclared_column_replaces() {
        let def = ModelDef::new("Ok")
            .column("name", STRING)
            .column("name", INT);
        assert_eq!(def.columns.len(), 1);
        assert_eq!(def.columns[0].data_type, INT);
    }
}
