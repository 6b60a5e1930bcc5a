use geoplan_core::schema::{ColumnDef, ColumnType};
use geoplan_core::{
    attrs, Attrs, Conflict, EntityRepository, FieldValue, RepoError, Store, ValidationError,
};
use serde_json::json;
use uuid::Uuid;

fn seed_master_data(store: &Store) -> (Uuid, Uuid) {
    let geom_type = store
        .entity("geom_type")
        .unwrap()
        .create(&attrs([("name", "polygon")]))
        .unwrap();
    let layer_data = store
        .entity("layer_data")
        .unwrap()
        .create(&attrs([("source", "s3://bucket/roads.geojson")]))
        .unwrap();
    (geom_type, layer_data)
}

fn layer_attrs(geom_type: Uuid, layer_data: Uuid) -> Attrs {
    attrs([
        ("name", FieldValue::from("Roads")),
        ("geom_type_id", geom_type.into()),
        ("layer_data_id", layer_data.into()),
        ("visible", true.into()),
        ("opacity", 0.75.into()),
        ("settings", json!({"min_zoom": 4, "labels": ["name"]}).into()),
    ])
}

fn sample_value(column: &ColumnDef) -> FieldValue {
    match column.ty {
        ColumnType::Id => Uuid::new_v4().into(),
        ColumnType::Text { .. } => format!("{}-{}", column.name, Uuid::new_v4().simple()).into(),
        ColumnType::Integer => 7_i64.into(),
        ColumnType::Timestamp => 1_700_000_000_000_i64.into(),
        ColumnType::Real => 0.5.into(),
        ColumnType::Boolean => true.into(),
        ColumnType::Json => json!({ "column": column.name.as_str() }).into(),
    }
}

/// Creates a fully populated `entity` row, creating whatever it references first.
fn seed_row(store: &Store, entity: &str) -> (Uuid, Attrs) {
    let graph = store.schema();
    let def = graph.entity(entity).unwrap();
    let mut values = Attrs::new();
    for column in def.writable_columns() {
        let value = match graph.foreign_key(entity, &column.name) {
            // Parent links stay empty so every seeded row is a root.
            Some(edge) if edge.target == entity => continue,
            Some(edge) => seed_row(store, &edge.target).0.into(),
            None => sample_value(column),
        };
        values.insert(column.name.clone(), value);
    }
    let id = store.entity(entity).unwrap().create(&values).unwrap();
    (id, values)
}

#[test]
fn create_then_get_returns_every_attribute() {
    let store = Store::open_in_memory().unwrap();
    let (geom_type, layer_data) = seed_master_data(&store);
    let layers = store.entity("layer").unwrap();

    let input = layer_attrs(geom_type, layer_data);
    let id = layers.create(&input).unwrap();
    let record = layers.get(id).unwrap();

    assert_eq!(record.id, id);
    assert_eq!(record.attrs, input);
    assert!(record.created_at > 0);
    assert_eq!(record.created_at, record.updated_at);
    assert_eq!(
        record.get("settings").and_then(FieldValue::as_json),
        Some(json!({"min_zoom": 4, "labels": ["name"]}))
    );
}

#[test]
fn update_patches_and_clears_columns() {
    let store = Store::open_in_memory().unwrap();
    let (geom_type, layer_data) = seed_master_data(&store);
    let layers = store.entity("layer").unwrap();
    let id = layers.create(&layer_attrs(geom_type, layer_data)).unwrap();

    let updated = layers
        .update(
            id,
            &attrs([("name", FieldValue::from("Rivers")), ("opacity", FieldValue::Null)]),
        )
        .unwrap();

    assert_eq!(updated.get("name"), Some(&FieldValue::from("Rivers")));
    assert!(updated.get("opacity").is_none());
    assert_eq!(updated.get("visible"), Some(&FieldValue::Bool(true)));
    assert!(updated.updated_at >= updated.created_at);
    assert_eq!(layers.get(id).unwrap(), updated);
}

#[test]
fn every_generated_entity_reads_back_what_was_written() {
    let store = Store::open_in_memory().unwrap();
    let names: Vec<String> = store
        .schema()
        .entities()
        .iter()
        .filter(|entity| !entity.is_associative())
        .map(|entity| entity.name.clone())
        .collect();
    assert_eq!(names.len(), 19);

    for name in &names {
        let (id, input) = seed_row(&store, name);
        let record = store.entity(name).unwrap().get(id).unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.attrs, input, "{name} attributes differ after create");
        assert_eq!(record.created_at, record.updated_at);
    }
}

#[test]
fn null_attributes_read_back_as_absent() {
    let store = Store::open_in_memory().unwrap();
    let memos = store.entity("memo").unwrap();

    let id = memos
        .create(&attrs([("title", FieldValue::from("Kickoff")), ("body", FieldValue::Null)]))
        .unwrap();
    let record = memos.get(id).unwrap();

    assert!(!record.attrs.contains_key("body"));
    assert_eq!(record.attrs, attrs([("title", "Kickoff")]));
}

#[test]
fn required_references_cannot_be_omitted_or_cleared() {
    let store = Store::open_in_memory().unwrap();
    let (geom_type, layer_data) = seed_master_data(&store);
    let layers = store.entity("layer").unwrap();

    let mut without_data = layer_attrs(geom_type, layer_data);
    without_data.remove("layer_data_id");
    match layers.create(&without_data).unwrap_err() {
        RepoError::Validation(ValidationError::MissingReference { entity, column, id }) => {
            assert_eq!(entity, "layer");
            assert_eq!(column, "layer_data_id");
            assert_eq!(id, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let id = layers.create(&layer_attrs(geom_type, layer_data)).unwrap();
    let err = layers
        .update(id, &attrs([("geom_type_id", FieldValue::Null)]))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::MissingReference { ref column, id: None, .. })
            if column == "geom_type_id"
    ));
    assert_eq!(layers.get(id).unwrap().id_of("geom_type_id"), Some(geom_type));

    // Plain required columns keep their own error.
    assert!(matches!(
        layers.update(id, &attrs([("name", FieldValue::Null)])),
        Err(RepoError::Validation(ValidationError::MissingRequired { .. }))
    ));
}

#[test]
fn missing_rows_are_not_found() {
    let store = Store::open_in_memory().unwrap();
    let memos = store.entity("memo").unwrap();
    let missing = Uuid::new_v4();

    assert!(matches!(memos.get(missing), Err(RepoError::NotFound { .. })));
    assert!(matches!(
        memos.update(missing, &attrs([("title", "x")])),
        Err(RepoError::NotFound { .. })
    ));
    assert!(matches!(memos.delete(missing), Err(RepoError::NotFound { .. })));
}

#[test]
fn declared_constraints_reject_bad_input_without_writing() {
    let store = Store::open_in_memory().unwrap();
    let (geom_type, layer_data) = seed_master_data(&store);
    let layers = store.entity("layer").unwrap();

    let mut too_long = layer_attrs(geom_type, layer_data);
    too_long.insert("name".to_string(), "x".repeat(256).into());
    assert!(matches!(
        layers.create(&too_long),
        Err(RepoError::Validation(ValidationError::TooLong { max: 255, actual: 256, .. }))
    ));

    let mut bad_json = layer_attrs(geom_type, layer_data);
    bad_json.insert("settings".to_string(), FieldValue::Json("{\"open\":".to_string()));
    assert!(matches!(
        layers.create(&bad_json),
        Err(RepoError::Validation(ValidationError::MalformedJson { .. }))
    ));

    let mut missing_parent = layer_attrs(geom_type, layer_data);
    missing_parent.insert("geom_type_id".to_string(), Uuid::new_v4().into());
    assert!(matches!(
        layers.create(&missing_parent),
        Err(RepoError::Validation(ValidationError::MissingReference { ref column, .. }))
            if column == "geom_type_id"
    ));

    let mut nil_parent = layer_attrs(geom_type, layer_data);
    nil_parent.insert("layer_data_id".to_string(), Uuid::nil().into());
    assert!(matches!(
        layers.create(&nil_parent),
        Err(RepoError::Validation(ValidationError::MissingReference { .. }))
    ));

    let mut managed = layer_attrs(geom_type, layer_data);
    managed.insert("id".to_string(), Uuid::new_v4().into());
    assert!(matches!(
        layers.create(&managed),
        Err(RepoError::Validation(ValidationError::ReadOnlyColumn { .. }))
    ));

    let count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM layer;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}

#[test]
fn unique_columns_conflict() {
    let store = Store::open_in_memory().unwrap();
    let people = store.entity("person").unwrap();

    people
        .create(&attrs([("name", "Ana"), ("email", "ana@example.com")]))
        .unwrap();
    let err = people
        .create(&attrs([("name", "Ana B"), ("email", "ana@example.com")]))
        .unwrap_err();

    match err {
        RepoError::Conflict(Conflict::Unique { entity, column }) => {
            assert_eq!(entity, "person");
            assert_eq!(column, "email");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn repository_shape_is_checked() {
    let store = Store::open_in_memory().unwrap();

    assert!(matches!(
        store.entity("project_ties_layer"),
        Err(RepoError::WrongShape { .. })
    ));
    assert!(matches!(store.links("layer"), Err(RepoError::WrongShape { .. })));
    assert!(matches!(store.entity("nope"), Err(RepoError::UnknownEntity(_))));
}

#[test]
fn list_by_parent_returns_children_in_creation_order() {
    let store = Store::open_in_memory().unwrap();
    let project = store
        .entity("project")
        .unwrap()
        .create(&attrs([("name", "Survey")]))
        .unwrap();
    let tasks = store.entity("task").unwrap();

    let ids: Vec<Uuid> = ["map roads", "map rivers", "review"]
        .into_iter()
        .map(|title| {
            tasks
                .create(&attrs([
                    ("title", FieldValue::from(title)),
                    ("project_id", project.into()),
                ]))
                .unwrap()
        })
        .collect();

    let listed: Vec<Uuid> = tasks
        .list_by_parent("project_id", project)
        .unwrap()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(listed, ids);
    assert!(matches!(
        tasks.list_by_parent("title", project),
        Err(RepoError::UnknownRelation { .. })
    ));
}
