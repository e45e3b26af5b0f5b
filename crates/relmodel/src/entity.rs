//! Model instances.
//!
//! An [`Entity`] is one row of a model: dirty-tracked column attributes plus
//! the current values of its associations. Every read and write of a column
//! goes through its [`Attribute`], so [`save`](Entity::save) writes only what
//! changed.
//!
//! Database operations retrieve the active [`Transaction`] from the
//! [`ExecutionContext`] they are given; calling one outside a transaction
//! fails with a `NotActive` transaction error.

use crate::association::{Association, AssociationInput, AssociationValue};
use crate::attribute::Attribute;
use crate::group::group_data;
use crate::metadata::{ColumnDefinition, EntityMetadata};
use crate::model::ModelInfo;
use crate::query::{Filter, FindOptions};
use crate::record::{Record, RecordValue};
use crate::registry::Registry;
use crate::transaction::Transaction;
use relmodel_core::{
    BoxFuture, Cx, Error, ExecutionContext, FromValue, Outcome, RecordError, RecordErrorKind,
    ResolutionError, ResolutionErrorKind, Result, SchemaErrorKind, Value, try_outcome,
    try_result,
};
use std::fmt;
use std::sync::Arc;

/// One instance of a registered model.
#[derive(Clone)]
pub struct Entity {
    registry: Arc<Registry>,
    model: Arc<ModelInfo>,
    attributes: Vec<Attribute>,
    associations: Vec<(String, AssociationValue)>,
}

impl Entity {
    /// An empty instance of `model`.
    pub fn new(registry: &Arc<Registry>, model: &str) -> Result<Self> {
        let model = Arc::clone(registry.model(model)?);
        Ok(Self {
            registry: Arc::clone(registry),
            model,
            attributes: Vec::new(),
            associations: Vec::new(),
        })
    }

    /// An instance holding the declared fields of `record`, all dirty.
    ///
    /// Fields naming neither a column nor an association are dropped.
    pub fn from_record(registry: &Arc<Registry>, model: &str, record: Record) -> Result<Self> {
        let mut entity = Self::new(registry, model)?;
        entity.assign(record)?;
        Ok(entity)
    }

    /// [`from_record`](Self::from_record) over a JSON object.
    pub fn from_json(
        registry: &Arc<Registry>,
        model: &str,
        json: &serde_json::Value,
    ) -> Result<Self> {
        let record = Record::from_json(json)
            .ok_or_else(|| Error::Serde(format!("{model} can only be built from a JSON object")))?;
        Self::from_record(registry, model, record)
    }

    /// An instance read from the database: nothing is dirty, at any depth.
    pub(crate) fn from_database(
        registry: &Arc<Registry>,
        model: &str,
        record: Record,
    ) -> Result<Self> {
        let mut entity = Self::from_record(registry, model, record)?;
        entity.clean();
        Ok(entity)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn model(&self) -> &Arc<ModelInfo> {
        &self.model
    }

    /// Merged metadata of this entity's model.
    pub fn metadata(&self) -> EntityMetadata {
        self.registry.entity_metadata(self.model.key())
    }

    /// Set every declared field of `record`.
    pub fn assign(&mut self, record: Record) -> Result<()> {
        let metadata = self.metadata();
        for (key, value) in record {
            if let Some(column) = metadata.column_for(&key) {
                match value {
                    RecordValue::Value(value) => self.store(column, value),
                    RecordValue::Record(_) | RecordValue::List(_) => tracing::debug!(
                        model = %self.model.name(),
                        attribute = %key,
                        "nested value for a column ignored"
                    ),
                }
            } else if let Some(association) = metadata.association(&key) {
                self.store_association(association, value.into())?;
            } else {
                tracing::trace!(
                    model = %self.model.name(),
                    attribute = %key,
                    "undeclared attribute dropped"
                );
            }
        }
        Ok(())
    }

    fn store(&mut self, column: &ColumnDefinition, value: Value) {
        let value = column.data_type.coerce(value);
        match self
            .attributes
            .iter_mut()
            .find(|a| a.name() == column.property)
        {
            Some(attribute) => attribute.set(value),
            None => self
                .attributes
                .push(Attribute::new(column.property.clone(), value)),
        }
    }

    // ==================== Columns ====================

    /// Current value of a column, by property or column name.
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        if let Some(found) = self.attributes.iter().find(|a| a.name() == attribute) {
            return Some(found.value());
        }
        let metadata = self.metadata();
        let property = &metadata.column_for(attribute)?.property;
        self.attributes
            .iter()
            .find(|a| a.name() == property)
            .map(Attribute::value)
    }

    /// Current value of a column converted to `T`.
    pub fn get_as<T: FromValue>(&self, attribute: &str) -> Option<T> {
        self.get(attribute)
            .and_then(|value| T::from_value(value).ok())
    }

    /// Set a column, marking it dirty if the value changed.
    pub fn set(&mut self, attribute: &str, value: impl Into<Value>) -> Result<()> {
        let metadata = self.metadata();
        let column = metadata.column_for(attribute).ok_or_else(|| {
            Error::Resolution(ResolutionError {
                kind: ResolutionErrorKind::Unresolved,
                attribute: attribute.to_string(),
                candidates: Vec::new(),
            })
        })?;
        self.store(column, value.into());
        Ok(())
    }

    /// Primary key, once persisted.
    pub fn id(&self) -> Option<i64> {
        self.attributes
            .iter()
            .find(|a| a.name() == "id")
            .and_then(|a| a.value().as_i64())
    }

    fn set_id(&mut self, id: i64) {
        match self.attributes.iter_mut().find(|a| a.name() == "id") {
            Some(attribute) => attribute.set(id),
            None => self.attributes.push(Attribute::new("id", id)),
        }
    }

    /// Value of a derived column.
    pub fn derived(&self, name: &str) -> Option<Value> {
        self.model
            .derived()
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.compute(self))
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    // ==================== Associations ====================

    pub fn association(&self, name: &str) -> Option<&AssociationValue> {
        self.associations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// The entity held by a to-one association.
    pub fn one(&self, name: &str) -> Option<&Entity> {
        self.association(name).and_then(AssociationValue::as_one)
    }

    /// The entities held by a many-to-many association.
    pub fn many(&self, name: &str) -> &[Entity] {
        self.association(name)
            .map_or(&[], AssociationValue::as_many)
    }

    /// Set an association from an entity, entities or records.
    ///
    /// Input the association cannot hold is ignored.
    pub fn set_association(
        &mut self,
        name: &str,
        input: impl Into<AssociationInput>,
    ) -> Result<()> {
        let metadata = self.metadata();
        let association = metadata.association(name).ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownAssociation,
                format!("Association {name} is not defined on {}", self.model.name()),
            )
        })?;
        self.store_association(association, input.into())
    }

    fn store_association(
        &mut self,
        association: &Association,
        input: AssociationInput,
    ) -> Result<()> {
        match association.coerce(&self.registry, input)? {
            Some(value) => self.put_association(association.name(), value),
            None => tracing::debug!(
                model = %self.model.name(),
                association = %association.name(),
                "association input ignored"
            ),
        }
        Ok(())
    }

    pub(crate) fn take_association(&mut self, name: &str) -> Option<AssociationValue> {
        let position = self.associations.iter().position(|(n, _)| n == name)?;
        Some(self.associations.remove(position).1)
    }

    pub(crate) fn put_association(&mut self, name: &str, value: AssociationValue) {
        match self.associations.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.associations.push((name.to_string(), value)),
        }
    }

    // ==================== Dirty tracking ====================

    pub fn is_dirty(&self) -> bool {
        self.attributes.iter().any(Attribute::is_dirty)
    }

    /// `(property, value)` of every dirty column.
    pub fn dirty_data(&self) -> Vec<(String, Value)> {
        self.attributes
            .iter()
            .filter(|a| a.is_dirty())
            .map(|a| (a.name().to_string(), a.value().clone()))
            .collect()
    }

    /// Mark this entity's own columns persisted.
    pub fn clean_model(&mut self) {
        self.attributes.iter_mut().for_each(Attribute::clean);
    }

    /// Mark this entity and every associated entity persisted.
    pub fn clean(&mut self) {
        self.clean_model();
        for (_, value) in &mut self.associations {
            value.clean();
        }
    }

    /// Take over the attribute values and dirty flags of `other`.
    pub fn overwrite(&mut self, other: &Entity) {
        self.attributes.clone_from(&other.attributes);
    }

    // ==================== Serialization ====================

    /// Columns, derived columns and loaded associations as a JSON object.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = serde_json::Map::new();
        for attribute in &self.attributes {
            object.insert(attribute.name().to_string(), attribute.value().to_json());
        }
        for derived in self.model.derived() {
            object.insert(derived.name.clone(), derived.compute(self).to_json());
        }
        for (name, value) in &self.associations {
            object.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(object)
    }

    // ==================== Instance operations ====================

    /// Save associations, then this entity's own row.
    pub fn save<'a>(
        &'a mut self,
        cx: &'a Cx,
        ctx: &'a ExecutionContext,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let metadata = self.metadata();
            for association in metadata.associations() {
                try_outcome!(association.save(cx, ctx, self).await);
            }
            self.model_only_save(cx, ctx).await
        })
    }

    /// Insert or update this entity's own row, running its lifecycle hooks.
    /// Nothing is written when no column is dirty.
    pub async fn model_only_save(&mut self, cx: &Cx, ctx: &ExecutionContext) -> Outcome<(), Error> {
        let tx = try_result!(Transaction::current(ctx));
        let events = self.model.events().cloned();

        if let Some(events) = &events {
            try_result!(events.before_save(self));
        }

        if self.is_dirty() {
            if let Some(id) = self.id() {
                if let Some(events) = &events {
                    try_result!(events.before_update(self));
                }
                let mut values = self.dirty_data();
                values.retain(|(attribute, _)| attribute != "id");
                values.push(("id".to_string(), Value::BigInt(id)));
                try_outcome!(
                    tx.engine()
                        .modify(cx, &*tx, self.model.key(), &values)
                        .await
                );
                if let Some(events) = &events {
                    try_result!(events.after_update(self));
                }
            } else {
                if let Some(events) = &events {
                    try_result!(events.before_create(self));
                }
                let id = try_outcome!(
                    tx.engine()
                        .insert(cx, &*tx, self.model.key(), &self.dirty_data())
                        .await
                );
                self.set_id(id);
                if let Some(events) = &events {
                    try_result!(events.after_create(self));
                }
            }
            self.clean_model();
        }

        if let Some(events) = &events {
            try_result!(events.after_save(self));
        }
        Outcome::Ok(())
    }

    /// Delete this entity's row. A no-op before the first save.
    pub async fn delete(&self, cx: &Cx, ctx: &ExecutionContext) -> Outcome<(), Error> {
        let Some(id) = self.id() else {
            return Outcome::Ok(());
        };
        let tx = try_result!(Transaction::current(ctx));
        tx.engine()
            .delete(cx, &*tx, self.model.key(), &Filter::by_id(id))
            .await
    }

    // ==================== Model operations ====================

    /// Every instance matching `filter`, with eager and included
    /// associations loaded.
    pub async fn find_all(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Vec<Entity>, Error> {
        let tx = try_result!(Transaction::current(ctx));
        let rows = try_outcome!(tx.engine().select(cx, &*tx, model, filter, options).await);
        let registry = tx.engine().registry();
        let mut entities = Vec::new();
        for record in group_data(&rows) {
            entities.push(try_result!(Entity::from_database(registry, model, record)));
        }
        Outcome::Ok(entities)
    }

    /// Exactly one instance matching `filter`.
    pub async fn find_one(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Entity, Error> {
        let mut found = try_outcome!(Self::find_all(cx, ctx, model, filter, options).await);
        if found.len() > 1 {
            return Outcome::Err(record_error(
                RecordErrorKind::MultipleFound,
                ctx,
                model,
                filter,
            ));
        }
        match found.pop() {
            Some(entity) => Outcome::Ok(entity),
            None => Outcome::Err(record_error(RecordErrorKind::NotFound, ctx, model, filter)),
        }
    }

    /// The instance matching `filter`, if any.
    pub async fn find_at_most_one(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Outcome<Option<Entity>, Error> {
        let mut found = try_outcome!(Self::find_all(cx, ctx, model, filter, options).await);
        if found.len() > 1 {
            return Outcome::Err(record_error(
                RecordErrorKind::MultipleFound,
                ctx,
                model,
                filter,
            ));
        }
        Outcome::Ok(found.pop())
    }

    /// The instance with primary key `id`.
    pub async fn get_by_id(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        id: i64,
    ) -> Outcome<Entity, Error> {
        Self::find_one(cx, ctx, model, &Filter::by_id(id), &FindOptions::new()).await
    }

    pub async fn count(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        filter: &Filter,
    ) -> Outcome<i64, Error> {
        let tx = try_result!(Transaction::current(ctx));
        tx.engine().count(cx, &*tx, model, filter).await
    }

    /// Delete every row matching `filter`; an empty filter empties the table.
    pub async fn delete_where(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        filter: &Filter,
    ) -> Outcome<(), Error> {
        let tx = try_result!(Transaction::current(ctx));
        tx.engine().delete(cx, &*tx, model, filter).await
    }

    /// Insert the dirty columns of every dirty entity in one batch. Clean
    /// entities are skipped; each inserted entity receives its generated id
    /// and is marked clean. Ids come back in the order of the inserted
    /// entities.
    pub async fn insert_all(
        cx: &Cx,
        ctx: &ExecutionContext,
        model: &str,
        entities: &mut [Entity],
    ) -> Outcome<Vec<i64>, Error> {
        let mut dirty: Vec<&mut Entity> = entities.iter_mut().filter(|e| e.is_dirty()).collect();
        if dirty.is_empty() {
            return Outcome::Ok(Vec::new());
        }
        let tx = try_result!(Transaction::current(ctx));
        let rows: Vec<_> = dirty.iter().map(|e| e.dirty_data()).collect();
        let ids = try_outcome!(tx.engine().insert_all(cx, &*tx, model, &rows).await);
        for (entity, id) in dirty.iter_mut().zip(&ids) {
            entity.set_id(*id);
            entity.clean_model();
        }
        Outcome::Ok(ids)
    }

    /// Create the model's table and indexes if missing.
    pub async fn sync(cx: &Cx, ctx: &ExecutionContext, model: &str) -> Outcome<(), Error> {
        let tx = try_result!(Transaction::current(ctx));
        tx.engine().create_table_if_not_exists(cx, &*tx, model).await
    }

    /// Drop the model's table if present.
    pub async fn drop_table(cx: &Cx, ctx: &ExecutionContext, model: &str) -> Outcome<(), Error> {
        let tx = try_result!(Transaction::current(ctx));
        tx.engine().drop_table_if_exists(cx, &*tx, model).await
    }

    /// Check the model's live table against its declared columns.
    pub async fn verify_table(cx: &Cx, ctx: &ExecutionContext, model: &str) -> Outcome<(), Error> {
        let tx = try_result!(Transaction::current(ctx));
        tx.engine().verify_table(cx, &*tx, model).await
    }
}

fn record_error(kind: RecordErrorKind, ctx: &ExecutionContext, model: &str, filter: &Filter) -> Error {
    let model = Transaction::current(ctx)
        .ok()
        .and_then(|tx| {
            tx.engine()
                .registry()
                .model(model)
                .ok()
                .map(|info| info.name().to_string())
        })
        .unwrap_or_else(|| model.to_string());
    Error::Record(RecordError {
        kind,
        model,
        key: filter.to_string(),
    })
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("model", &self.model.name())
            .field("attributes", &self.attributes)
            .field("associations", &self.associations)
            .finish()
    }
}

/// `{Model} - {json}`
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.model.name(), self.to_json())
    }
}

/// Same model and the same value in every column either side has set; an
/// unset column compares as null.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        if self.model.key() != other.model.key() {
            return false;
        }
        let value_of = |entity: &Entity, name: &str| {
            entity
                .attributes
                .iter()
                .find(|a| a.name() == name)
                .map_or(Value::Null, |a| a.value().clone())
        };
        self.attributes
            .iter()
            .chain(&other.attributes)
            .all(|a| value_of(self, a.name()).same_as(&value_of(other, a.name())))
    }
}
