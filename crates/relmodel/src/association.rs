//! Associations between models.
//!
//! An association is declared on its source model with the name of its
//! target. Targets are resolved by name when the registry is built, so two
//! models may refer to each other regardless of declaration order.
//!
//! - [`AssociationKind::ManyToOne`] and [`AssociationKind::OneToOne`] keep a
//!   `{target}_id` foreign key on the source table.
//! - [`AssociationKind::ManyToMany`] keeps `{source}_id` and `{target}_id`
//!   on a through model that is registered like any other model.

use crate::entity::Entity;
use crate::metadata::{ColumnDefinition, MetadataRegistry};
use crate::model::ModelInfo;
use crate::query::Filter;
use crate::record::{Record, RecordValue};
use crate::registry::{ModelRegistry, Registry};
use relmodel_core::{
    BoxFuture, Cx, Error, ExecutionContext, Outcome, Result, SchemaErrorKind, Value, try_outcome,
    try_result,
};
use relmodel_query::{Join, ReferentialAction, Select};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationKind {
    OneToOne,
    ManyToOne,
    ManyToMany,
}

impl AssociationKind {
    /// Does the source hold at most one target?
    pub const fn is_to_one(self) -> bool {
        matches!(self, AssociationKind::OneToOne | AssociationKind::ManyToOne)
    }
}

/// A declared relationship from a source model to a target model.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    name: String,
    /// Metadata key of the declaring model
    source: String,
    /// Target model name as declared
    target: String,
    kind: AssociationKind,
    eager: bool,
    on_delete: ReferentialAction,
    through: Option<String>,
    resolved_target: Option<String>,
    resolved_through: Option<String>,
}

impl Association {
    fn new(kind: AssociationKind, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            target: target.into(),
            kind,
            eager: false,
            on_delete: ReferentialAction::default(),
            through: None,
            resolved_target: None,
            resolved_through: None,
        }
    }

    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(AssociationKind::ManyToOne, name, target)
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(AssociationKind::OneToOne, name, target)
    }

    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(AssociationKind::ManyToMany, name, target)
    }

    /// Join this association on every select of the source model.
    #[must_use]
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    /// `ON DELETE` action of the generated foreign key(s). Defaults to cascade.
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Name of the many-to-many through model. Defaults to
    /// `{Source}{Target}`. Two associations naming the same through model
    /// share its table.
    #[must_use]
    pub fn through(mut self, name: impl Into<String>) -> Self {
        self.through = Some(name.into());
        self
    }

    #[must_use]
    pub(crate) fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_lowercase();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Target model name as declared.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn kind(&self) -> AssociationKind {
        self.kind
    }

    pub fn is_eager(&self) -> bool {
        self.eager
    }

    pub fn is_built(&self) -> bool {
        self.resolved_target.is_some()
    }

    /// Metadata key of the target model.
    pub fn target_key(&self) -> String {
        self.resolved_target
            .clone()
            .unwrap_or_else(|| self.target.to_lowercase())
    }

    /// Foreign-key column on the source table of a to-one association.
    pub fn foreign_key(&self) -> String {
        format!("{}_id", self.target_key())
    }

    /// Through-table column holding the source id.
    pub fn source_id_name(&self) -> String {
        format!("{}_id", self.source)
    }

    /// Through-table column holding the target id.
    pub fn target_id_name(&self) -> String {
        format!("{}_id", self.target_key())
    }

    /// Metadata key of the through model, once built.
    pub fn through_key(&self) -> Result<&str> {
        self.resolved_through.as_deref().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::NotBuilt,
                format!(
                    "Association {}.{} has no through model before the registry is built",
                    self.source, self.name
                ),
            )
        })
    }

    /// Resolve the target and add the foreign-key columns.
    pub(crate) fn build(
        &mut self,
        metadata: &mut MetadataRegistry,
        models: &mut ModelRegistry,
    ) -> Result<()> {
        let target = models.get_model(&self.target).cloned().ok_or_else(|| {
            Error::schema(
                SchemaErrorKind::UnknownModel,
                format!(
                    "Association {}.{} targets undefined model {}",
                    self.source, self.name, self.target
                ),
            )
        })?;
        self.resolved_target = Some(target.key().to_string());

        if self.kind.is_to_one() {
            metadata.add_column(
                &self.source,
                ColumnDefinition::foreign_key(self.foreign_key(), target.key(), self.on_delete),
            );
            return Ok(());
        }

        if target.key() == self.source {
            return Err(Error::schema(
                SchemaErrorKind::Invalid,
                format!(
                    "Many-to-many association {}.{} cannot target its own model",
                    self.source, self.name
                ),
            ));
        }
        let source_name = models
            .get_model(&self.source)
            .map_or_else(|| self.source.clone(), |m| m.name().to_string());
        let through_name = self
            .through
            .clone()
            .unwrap_or_else(|| format!("{source_name}{}", target.name()));
        let through = match models.get_model(&through_name) {
            Some(existing) => Arc::clone(existing),
            None => models.add_model(ModelInfo::plain(through_name)),
        };

        metadata.add_column(
            through.key(),
            ColumnDefinition::foreign_key(self.source_id_name(), &self.source, self.on_delete),
        );
        metadata.add_column(
            through.key(),
            ColumnDefinition::foreign_key(self.target_id_name(), target.key(), self.on_delete),
        );
        tracing::debug!(
            association = %self.name,
            through = %through.name(),
            "through model registered"
        );
        self.resolved_through = Some(through.key().to_string());
        Ok(())
    }

    /// Add this association's LEFT JOIN(s) to a select over the source.
    pub fn join(&self, select: Select, metadata: &MetadataRegistry) -> Result<Select> {
        let source = metadata.sql_entity(&self.source)?;
        let target = metadata.sql_entity(&self.target_key())?;

        if self.kind.is_to_one() {
            return Ok(select.join(Join::left(
                target.table.clone(),
                target
                    .column("id")
                    .eq_column(&source.column(self.foreign_key())),
            )));
        }

        let through = metadata.sql_entity(self.through_key()?)?;
        Ok(select
            .join(Join::left(
                through.table.clone(),
                through
                    .column(self.source_id_name())
                    .eq_column(&source.column("id")),
            ))
            .join(Join::left(
                target.table.clone(),
                target
                    .column("id")
                    .eq_column(&through.column(self.target_id_name())),
            )))
    }

    /// Normalize setter input into a stored association value.
    ///
    /// To-one associations take an entity or a record; given a list they keep
    /// its first element. Many-to-many associations take a list of entities
    /// or records. Entities of another model are dropped. Anything else
    /// yields `None`.
    pub(crate) fn coerce(
        &self,
        registry: &Arc<Registry>,
        input: AssociationInput,
    ) -> Result<Option<AssociationValue>> {
        let target = self.target_key();
        let value = match (self.kind.is_to_one(), input) {
            (true, AssociationInput::Entity(entity)) => {
                Some(AssociationValue::One(Box::new(entity)))
            }
            (true, AssociationInput::Entities(entities)) => entities
                .into_iter()
                .next()
                .map(|entity| AssociationValue::One(Box::new(entity))),
            (true, AssociationInput::Record(record)) => Some(AssociationValue::One(Box::new(
                Entity::from_record(registry, &target, record)?,
            ))),
            (true, AssociationInput::Records(records)) => match records.into_iter().next() {
                Some(record) => Some(AssociationValue::One(Box::new(Entity::from_record(
                    registry, &target, record,
                )?))),
                None => None,
            },
            (false, AssociationInput::Entities(entities)) => Some(AssociationValue::Many(
                entities
                    .into_iter()
                    .filter(|entity| self.accepts(entity, &target))
                    .collect(),
            )),
            (false, AssociationInput::Records(records)) => Some(AssociationValue::Many(
                records
                    .into_iter()
                    .map(|record| Entity::from_record(registry, &target, record))
                    .collect::<Result<Vec<_>>>()?,
            )),
            (_, AssociationInput::Value(_))
            | (false, AssociationInput::Entity(_) | AssociationInput::Record(_)) => None,
        };

        if let Some(AssociationValue::One(entity)) = &value {
            if !self.accepts(entity, &target) {
                return Ok(None);
            }
        }
        Ok(value)
    }

    fn accepts(&self, entity: &Entity, target: &str) -> bool {
        if entity.model().key() == target {
            return true;
        }
        tracing::debug!(
            association = %self.name,
            model = %entity.model().name(),
            "entity of another model ignored"
        );
        false
    }

    /// Persist the associated value(s) of `source`.
    pub(crate) fn save<'a>(
        &'a self,
        cx: &'a Cx,
        ctx: &'a ExecutionContext,
        source: &'a mut Entity,
    ) -> BoxFuture<'a, Outcome<(), Error>> {
        Box::pin(async move {
            let Some(mut value) = source.take_association(&self.name) else {
                return Outcome::Ok(());
            };
            let outcome = if self.kind.is_to_one() {
                self.save_to_one(cx, ctx, source, &mut value).await
            } else {
                self.save_many(cx, ctx, source, &mut value).await
            };
            source.put_association(&self.name, value);
            outcome
        })
    }

    /// Save the target, then point the source's foreign key at it.
    async fn save_to_one(
        &self,
        cx: &Cx,
        ctx: &ExecutionContext,
        source: &mut Entity,
        value: &mut AssociationValue,
    ) -> Outcome<(), Error> {
        let AssociationValue::One(target) = value else {
            return Outcome::Ok(());
        };
        try_outcome!(target.save(cx, ctx).await);
        if let Some(id) = target.id() {
            try_result!(source.set(&self.foreign_key(), id));
        }
        Outcome::Ok(())
    }

    /// Replace every link of the source with one link per current target.
    async fn save_many(
        &self,
        cx: &Cx,
        ctx: &ExecutionContext,
        source: &mut Entity,
        value: &mut AssociationValue,
    ) -> Outcome<(), Error> {
        let AssociationValue::Many(targets) = value else {
            return Outcome::Ok(());
        };
        let through = try_result!(self.through_key()).to_string();

        if source.id().is_none() {
            try_outcome!(source.model_only_save(cx, ctx).await);
        }
        let Some(source_id) = source.id() else {
            return Outcome::Err(missing_id(source));
        };

        try_outcome!(
            Entity::delete_where(
                cx,
                ctx,
                &through,
                &Filter::new().eq(self.source_id_name(), source_id),
            )
            .await
        );

        let registry = Arc::clone(source.registry());
        let mut links = Vec::with_capacity(targets.len());
        for target in targets.iter_mut() {
            try_outcome!(target.model_only_save(cx, ctx).await);
            let Some(target_id) = target.id() else {
                return Outcome::Err(missing_id(target));
            };
            let link = Record::new()
                .with(self.source_id_name(), source_id)
                .with(self.target_id_name(), target_id);
            links.push(try_result!(Entity::from_record(&registry, &through, link)));
        }

        tracing::trace!(association = %self.name, source_id, links = links.len(), "links replaced");
        try_outcome!(Entity::insert_all(cx, ctx, &through, &mut links).await);
        Outcome::Ok(())
    }
}

fn missing_id(entity: &Entity) -> Error {
    Error::Custom(format!("{} has no id after save", entity.model().name()))
}

/// The current value of an association on an entity.
#[derive(Debug, Clone)]
pub enum AssociationValue {
    One(Box<Entity>),
    Many(Vec<Entity>),
}

impl AssociationValue {
    pub fn as_one(&self) -> Option<&Entity> {
        match self {
            AssociationValue::One(entity) => Some(entity),
            AssociationValue::Many(_) => None,
        }
    }

    pub fn as_many(&self) -> &[Entity] {
        match self {
            AssociationValue::One(_) => &[],
            AssociationValue::Many(entities) => entities,
        }
    }

    pub(crate) fn clean(&mut self) {
        match self {
            AssociationValue::One(entity) => entity.clean(),
            AssociationValue::Many(entities) => entities.iter_mut().for_each(Entity::clean),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            AssociationValue::One(entity) => entity.to_json(),
            AssociationValue::Many(entities) => {
                serde_json::Value::Array(entities.iter().map(Entity::to_json).collect())
            }
        }
    }
}

/// Anything an association setter accepts.
#[derive(Debug, Clone)]
pub enum AssociationInput {
    Entity(Entity),
    Entities(Vec<Entity>),
    Record(Record),
    Records(Vec<Record>),
    Value(Value),
}

impl From<Entity> for AssociationInput {
    fn from(entity: Entity) -> Self {
        AssociationInput::Entity(entity)
    }
}

impl From<Vec<Entity>> for AssociationInput {
    fn from(entities: Vec<Entity>) -> Self {
        AssociationInput::Entities(entities)
    }
}

impl From<Record> for AssociationInput {
    fn from(record: Record) -> Self {
        AssociationInput::Record(record)
    }
}

impl From<Vec<Record>> for AssociationInput {
    fn from(records: Vec<Record>) -> Self {
        AssociationInput::Records(records)
    }
}

impl From<RecordValue> for AssociationInput {
    fn from(value: RecordValue) -> Self {
        match value {
            RecordValue::Value(value) => AssociationInput::Value(value),
            RecordValue::Record(record) => AssociationInput::Record(record),
            RecordValue::List(records) => AssociationInput::Records(records),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::STRING;
    use crate::model::ModelDef;
    use relmodel_query::Dialect;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .define(ModelDef::new("Teacher").column("subject", STRING))
            .unwrap();
        registry
            .define(
                ModelDef::new("Student")
                    .column("name", STRING)
                    .association(
                        Association::many_to_one("teacher", "Teacher")
                            .on_delete(ReferentialAction::SetNull),
                    )
                    .many_to_many("teachers", "Teacher"),
            )
            .unwrap();
        registry.build().unwrap();
        registry
    }

    #[test]
    fn to_one_adds_foreign_key_on_source() {
        let registry = registry();
        let student = registry.entity_metadata("student");
        let fk = student.column("teacher_id").unwrap();
        assert!(fk.not_null && fk.index);
        let reference = fk.references.as_ref().unwrap();
        assert_eq!(reference.model, "teacher");
        assert_eq!(reference.column, "id");
        assert_eq!(reference.on_delete, ReferentialAction::SetNull);
    }

    #[test]
    fn many_to_many_synthesizes_through_model() {
        let registry = registry();
        let association = registry
            .entity_metadata("student")
            .association("teachers")
            .cloned()
            .unwrap();
        assert_eq!(association.through_key().unwrap(), "studentteacher");

        let through = registry.entity_metadata("StudentTeacher");
        let columns: Vec<_> = through.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(columns, vec!["id", "student_id", "teacher_id"]);
        assert!(through.columns()[1].not_null);
        assert!(registry.table("studentteacher").is_ok());
    }

    #[test]
    fn shared_through_model() {
        let mut registry = Registry::new();
        registry
            .define(ModelDef::new("Teacher").association(
                Association::many_to_many("students", "Student").through("TeacherStudent"),
            ))
            .unwrap();
        registry
            .define(ModelDef::new("Student").association(
                Association::many_to_many("teachers", "Teacher").through("TeacherStudent"),
            ))
            .unwrap();
        registry.build().unwrap();

        let through = registry.entity_metadata("teacherstudent");
        assert_eq!(through.columns().len(), 3);
        assert_eq!(registry.models().len(), 3);
    }

    #[test]
    fn unknown_target_fails_build() {
        let mut registry = Registry::new();
        registry
            .define(ModelDef::new("Student").many_to_one("teacher", "Nobody"))
            .unwrap();
        let err = registry.build().unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(ref s) if s.kind == SchemaErrorKind::UnknownModel
        ));
    }

    #[test]
    fn many_to_many_join_goes_through_link_table() {
        let registry = registry();
        let metadata = registry.metadata();
        let association = metadata
            .entity_metadata("student")
            .association("teachers")
            .cloned()
            .unwrap();
        let student = metadata.sql_entity("student").unwrap();
        let query = association
            .join(student.select(), metadata)
            .unwrap()
            .build(Dialect::Sqlite);
        assert_eq!(
            query.text,
            concat!(
                r#"SELECT "student".* FROM "student" "#,
                r#"LEFT JOIN "studentteacher" ON ("studentteacher"."student_id" = "student"."id") "#,
                r#"LEFT JOIN "teacher" ON ("teacher"."id" = "studentteacher"."teacher_id")"#
            )
        );
    }

    #[test]
    fn coercion_rules() {
        let registry = Arc::new(registry());
        let metadata = registry.entity_metadata("student");
        let to_one = metadata.association("teacher").unwrap();
        let many = metadata.association("teachers").unwrap();
        let maths = || Record::new().with("subject", "maths");

        let value = to_one
            .coerce(&registry, AssociationInput::Records(vec![maths(), maths()]))
            .unwrap()
            .unwrap();
        assert_eq!(
            value.as_one().unwrap().get("subject"),
            Some(&Value::Text("maths".into()))
        );

        let value = many
            .coerce(&registry, AssociationInput::Records(vec![maths(), maths()]))
            .unwrap()
            .unwrap();
        assert_eq!(value.as_many().len(), 2);

        assert!(
            many.coerce(&registry, AssociationInput::Record(maths()))
                .unwrap()
                .is_none()
        );
        assert!(
            to_one
                .coerce(&registry, AssociationInput::Value(Value::from(3_i64)))
                .unwrap()
                .is_none()
        );

        let student = Entity::new(&registry, "Student").unwrap();
        assert!(
            to_one
                .coerce(&registry, AssociationInput::Entity(student.clone()))
                .unwrap()
                .is_none()
        );

        let teacher = Entity::from_record(&registry, "Teacher", maths()).unwrap();
        let value = many
            .coerce(
                &registry,
                AssociationInput::Entities(vec![student, teacher]),
            )
            .unwrap()
            .unwrap();
        assert_eq!(value.as_many().len(), 1);
        assert_eq!(value.as_many()[0].model().key(), "teacher");
    }
}
