use asupersync::runtime::RuntimeBuilder;
use std::sync::Arc;

use relmodel::prelude::*;
use relmodel::{AssociationValue, Connection, SchemaErrorKind, SqlQuery};
use relmodel_sqlite::SqliteConfig;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

/// The cause of a unit of work rolled back by a table mismatch.
fn table_mismatch(outcome: Outcome<(), Error>) -> String {
    let Outcome::Err(Error::Transaction(err)) = outcome else {
        panic!("expected a rolled back unit of work");
    };
    let Some(Error::Schema(cause)) = err.source.as_deref() else {
        panic!("rollback should wrap a schema error");
    };
    assert_eq!(cause.kind, SchemaErrorKind::TableMismatch);
    cause.message.clone()
}

/// In-memory databases are private to one connection, so the pool holds
/// exactly one.
fn orm(registry: Registry) -> Orm {
    let pool = relmodel_sqlite::pool(SqliteConfig::memory(), PoolConfig::new(1));
    Orm::init(OrmConfig::new(Dialect::Sqlite), registry, pool).expect("init orm")
}

fn school() -> Registry {
    let mut registry = Registry::new();
    registry
        .define(
            ModelDef::new("Person")
                .abstract_model()
                .column("name", STRING),
        )
        .unwrap();
    registry
        .define(
            ModelDef::new("Teacher")
                .extends("Person")
                .column("subject", STRING)
                .column("active", BOOLEAN),
        )
        .unwrap();
    registry
        .define(
            ModelDef::new("Student")
                .extends("Person")
                .association(Association::many_to_one("teacher", "Teacher").eager())
                .many_to_many("mentors", "Teacher"),
        )
        .unwrap();
    registry
}

/// Mentoring only: one join per target table per query.
fn mentoring() -> Registry {
    let mut registry = Registry::new();
    registry
        .define(ModelDef::new("Teacher").column("name", STRING).column("subject", STRING))
        .unwrap();
    registry
        .define(
            ModelDef::new("Student")
                .column("name", STRING)
                .many_to_many("mentors", "Teacher"),
        )
        .unwrap();
    registry
}

struct Teacher(Entity);

impl Model for Teacher {
    const NAME: &'static str = "Teacher";

    fn define(def: ModelDef) -> ModelDef {
        def
    }

    fn from_entity(entity: Entity) -> Self {
        Self(entity)
    }

    fn entity(&self) -> &Entity {
        &self.0
    }

    fn entity_mut(&mut self) -> &mut Entity {
        &mut self.0
    }

    fn into_entity(self) -> Entity {
        self.0
    }
}

impl Teacher {
    relmodel::accessors! {
        name / set_name: String => "name",
        subject / set_subject: String => "subject",
        active / set_active: bool => "active",
    }
}

fn teacher(registry: &Arc<Registry>, name: &str, subject: &str) -> Entity {
    let mut entity = Entity::new(registry, "teacher").unwrap();
    entity.set("name", name).unwrap();
    entity.set("subject", subject).unwrap();
    entity
}

#[test]
fn save_get_round_trip_and_single_field_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(school());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        let original = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let mut ada = try_result!(Teacher::create(orm.registry()));
                try_result!(ada.set_name("Ada"));
                try_result!(ada.set_subject("math"));
                try_result!(ada.set_active(true));
                try_outcome!(ada.save(cx, &ctx).await);
                Outcome::Ok(ada.into_entity())
            })
            .await,
        );
        let id = original.id().expect("saved teacher has an id");

        let original = &original;
        let (name, subject, active) = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let mut found = try_outcome!(Teacher::get(cx, &ctx, id).await);
                assert!(!found.entity().is_dirty());
                assert_eq!(found.entity(), original);
                let loaded = (found.name(), found.subject(), found.active());

                try_result!(found.set_subject("physics"));
                assert_eq!(found.entity().dirty_data().len(), 1);
                try_outcome!(found.save(cx, &ctx).await);
                Outcome::Ok(loaded)
            })
            .await,
        );
        assert_eq!(name.as_deref(), Some("Ada"));
        assert_eq!(subject.as_deref(), Some("math"));
        assert_eq!(active, Some(true));

        let reloaded = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move { Teacher::get(cx, &ctx, id).await })
                .await,
        );
        assert_eq!(reloaded.name().as_deref(), Some("Ada"));
        assert_eq!(reloaded.subject().as_deref(), Some("physics"));
    });
}

#[test]
fn many_to_one_saves_owner_first_and_loads_eagerly() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let db = orm(school());
    let cx = &cx;
    let orm = &db;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let mut student = try_result!(Entity::new(orm.registry(), "student"));
                try_result!(student.set("name", "Lin"));
                try_result!(student.set_association("teacher", teacher(orm.registry(), "Ada", "math")));
                student.save(cx, &ctx).await
            })
            .await,
        );

        let students = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                Entity::find_all(cx, &ctx, "student", &Filter::new(), &FindOptions::new()).await
            })
            .await,
        );
        assert_eq!(students.len(), 1);
        let owner = students[0].one("teacher").expect("eager teacher loaded");
        assert_eq!(owner.get_as::<String>("name").as_deref(), Some("Ada"));
        assert_eq!(students[0].get_as::<i64>("teacher_id"), owner.id());
        assert!(students[0].many("mentors").is_empty());
    });
    unwrap_outcome(rt.block_on(db.end(cx)));
}

#[test]
fn many_to_many_save_replaces_links_and_degroups() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(mentoring());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        let student_id = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let registry = orm.registry();
                let mut student = try_result!(Entity::new(registry, "student"));
                try_result!(student.set("name", "Lin"));
                try_result!(student.set_association(
                    "mentors",
                    vec![teacher(registry, "Grace", "cs"), teacher(registry, "Emmy", "algebra")],
                ));
                try_outcome!(student.save(cx, &ctx).await);
                Outcome::Ok(student.id())
            })
            .await,
        )
        .expect("student saved");

        let mentors = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let options = FindOptions::new().include("mentors");
                let mut found = try_outcome!(
                    Entity::find_all(cx, &ctx, "student", &Filter::by_id(student_id), &options)
                        .await
                );
                assert_eq!(found.len(), 1);
                let mut student = found.remove(0);
                let names: Vec<String> = student
                    .many("mentors")
                    .iter()
                    .filter_map(|m| m.get_as::<String>("name"))
                    .collect();

                try_result!(student.set_association(
                    "mentors",
                    vec![teacher(orm.registry(), "Marie", "chemistry")],
                ));
                try_outcome!(student.save(cx, &ctx).await);
                Outcome::Ok(names)
            })
            .await,
        );
        assert_eq!(mentors, vec!["Grace".to_string(), "Emmy".to_string()]);

        let (links, reloaded) = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let links =
                    try_outcome!(Entity::count(cx, &ctx, "studentteacher", &Filter::new()).await);
                let student = try_outcome!(
                    Entity::find_one(
                        cx,
                        &ctx,
                        "student",
                        &Filter::by_id(student_id),
                        &FindOptions::new().include("mentors"),
                    )
                    .await
                );
                Outcome::Ok((links, student))
            })
            .await,
        );
        assert_eq!(links, 1);
        match reloaded.association("mentors") {
            Some(AssociationValue::Many(mentors)) => {
                assert_eq!(mentors.len(), 1);
                assert_eq!(mentors[0].get_as::<String>("name").as_deref(), Some("Marie"));
            }
            other => panic!("expected mentors, got {other:?}"),
        }
    });
}

#[test]
fn deleting_a_teacher_cascades_to_students() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(school());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        let remaining = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let registry = orm.registry();
                let mut owner = teacher(registry, "Ada", "math");
                try_outcome!(owner.save(cx, &ctx).await);
                for name in ["Lin", "Sam"] {
                    let mut student = try_result!(Entity::new(registry, "student"));
                    try_result!(student.set("name", name));
                    try_result!(student.set_association("teacher", owner.clone()));
                    try_outcome!(student.save(cx, &ctx).await);
                }
                assert_eq!(
                    try_outcome!(Entity::count(cx, &ctx, "student", &Filter::new()).await),
                    2
                );

                try_outcome!(owner.delete(cx, &ctx).await);
                Entity::count(cx, &ctx, "student", &Filter::new()).await
            })
            .await,
        );
        assert_eq!(remaining, 0);
    });
}

#[test]
fn lookup_cardinality_errors() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(school());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let registry = orm.registry();
                let mut batch = vec![
                    teacher(registry, "Ada", "math"),
                    teacher(registry, "Ada", "logic"),
                    teacher(registry, "Grace", "cs"),
                ];
                let ids = try_outcome!(Entity::insert_all(cx, &ctx, "teacher", &mut batch).await);
                assert_eq!(ids.len(), 3);
                assert!(batch.iter().all(|t| t.id().is_some() && !t.is_dirty()));

                let missing = Entity::get_by_id(cx, &ctx, "teacher", 999).await;
                assert!(matches!(&missing, Outcome::Err(e) if e.is_record_not_found()));

                let twice = Entity::find_one(
                    cx,
                    &ctx,
                    "teacher",
                    &Filter::new().eq("name", "Ada"),
                    &FindOptions::new(),
                )
                .await;
                assert!(matches!(&twice, Outcome::Err(e) if e.is_multiple_records_found()));

                let none = try_outcome!(
                    Entity::find_at_most_one(
                        cx,
                        &ctx,
                        "teacher",
                        &Filter::new().eq("name", "Emmy"),
                        &FindOptions::new(),
                    )
                    .await
                );
                assert!(none.is_none());
                Outcome::Ok(())
            })
            .await,
        );
    });
}

#[test]
fn failed_unit_of_work_rolls_back() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(school());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        unwrap_outcome(orm.sync(cx).await);
        let root = orm.context();

        let outcome = orm
            .transaction(cx, &root, |ctx| async move {
                let mut ada = teacher(orm.registry(), "Ada", "math");
                try_outcome!(ada.save(cx, &ctx).await);
                Entity::get_by_id(cx, &ctx, "teacher", 999).await
            })
            .await;
        let Outcome::Err(err) = outcome else {
            panic!("unit of work should fail");
        };
        assert!(matches!(err, Error::Transaction(_)));
        assert_eq!(err.http_status(), 404);

        let count = unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                Entity::count(cx, &ctx, "teacher", &Filter::new()).await
            })
            .await,
        );
        assert_eq!(count, 0);
    });
}

#[test]
fn inherited_columns_reach_the_table() {
    let orm = orm(school());
    let teacher = orm.registry().table("teacher").unwrap();
    let columns: Vec<&str> = teacher.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "name", "subject", "active"]);

    let student = orm.registry().table("student").unwrap();
    let columns: Vec<&str> = student.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "name", "teacher_id"]);

    let order: Vec<String> = orm
        .registry()
        .ordered_models()
        .unwrap()
        .iter()
        .map(|m| m.key().to_string())
        .collect();
    assert_eq!(order, vec!["teacher", "student", "studentteacher"]);
}

#[test]
fn verify_compares_tables_with_models() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let orm = orm(school());
    let cx = &cx;
    let orm = &orm;

    rt.block_on(async {
        assert_eq!(
            table_mismatch(orm.verify(cx).await),
            "Columns do not match for Teacher: table teacher does not exist"
        );

        unwrap_outcome(orm.sync(cx).await);
        unwrap_outcome(orm.verify(cx).await);

        let root = orm.context();
        unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                let tx = try_result!(Transaction::current(&ctx));
                let alter = SqlQuery::raw("ALTER TABLE \"student\" ADD COLUMN \"nickname\" TEXT");
                try_outcome!(tx.query(cx, &alter).await);
                Outcome::Ok(())
            })
            .await,
        );

        let outcome = orm
            .transaction(cx, &root, |ctx| async move {
                Entity::verify_table(cx, &ctx, "student").await
            })
            .await;
        assert_eq!(
            table_mismatch(outcome),
            "Columns do not match for Student: column nickname is not declared"
        );

        unwrap_outcome(
            orm.transaction(cx, &root, |ctx| async move {
                Entity::verify_table(cx, &ctx, "teacher").await
            })
            .await,
        );
    });
}
