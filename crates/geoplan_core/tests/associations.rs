use geoplan_core::{
    attrs, EntityRepository, FieldValue, LinkRepository, RepoError, Store, ValidationError,
};
use serde_json::json;
use uuid::Uuid;

struct Fixture {
    store: Store,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: Store::open_in_memory().unwrap(),
        }
    }

    fn project(&self, name: &str) -> Uuid {
        self.store
            .entity("project")
            .unwrap()
            .create(&attrs([("name", name)]))
            .unwrap()
    }

    fn layer(&self, name: &str) -> Uuid {
        let geom_type = self
            .store
            .entity("geom_type")
            .unwrap()
            .create(&attrs([("name", format!("type for {name}"))]))
            .unwrap();
        let layer_data = self
            .store
            .entity("layer_data")
            .unwrap()
            .create(&Default::default())
            .unwrap();
        self.store
            .entity("layer")
            .unwrap()
            .create(&attrs([
                ("name", FieldValue::from(name)),
                ("geom_type_id", geom_type.into()),
                ("layer_data_id", layer_data.into()),
            ]))
            .unwrap()
    }
}

#[test]
fn linking_twice_keeps_one_row_with_latest_payload() {
    let fixture = Fixture::new();
    let project = fixture.project("Survey");
    let layer = fixture.layer("Roads");
    let links = fixture.store.links("project_ties_layer").unwrap();

    links
        .link(
            project,
            layer,
            &attrs([("settings", FieldValue::from(json!({"zoom": 3}))), ("position", 1_i64.into())]),
        )
        .unwrap();
    links
        .link(project, layer, &attrs([("settings", json!({"zoom": 5}))]))
        .unwrap();

    let listed = links.list_by_left(project).unwrap();
    assert_eq!(listed.len(), 1);
    let payload = links.get_payload(project, layer).unwrap();
    assert_eq!(
        payload.get("settings").and_then(FieldValue::as_json),
        Some(json!({"zoom": 5}))
    );
    // Payload is replaced, not merged.
    assert!(payload.get("position").is_none());
}

#[test]
fn deleting_a_participant_removes_its_links() {
    let fixture = Fixture::new();
    let project = fixture.project("Survey");
    let layer = fixture.layer("Roads");
    let links = fixture.store.links("project_ties_layer").unwrap();
    links
        .link(project, layer, &attrs([("settings", json!({"zoom": 5}))]))
        .unwrap();

    fixture.store.entity("project").unwrap().delete(project).unwrap();

    assert!(links.list_by_right(layer).unwrap().is_empty());
    assert!(matches!(
        links.get_payload(project, layer),
        Err(RepoError::NotFound { .. })
    ));
    assert!(fixture.store.entity("layer").unwrap().get(layer).is_ok());
}

#[test]
fn link_requires_both_participants() {
    let fixture = Fixture::new();
    let project = fixture.project("Survey");
    let links = fixture.store.links("project_ties_layer").unwrap();

    let err = links
        .link(project, Uuid::new_v4(), &Default::default())
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::MissingReference { ref column, .. }) if column == "layer_id"
    ));
}

#[test]
fn unlink_removes_pair_and_reports_missing_pairs() {
    let fixture = Fixture::new();
    let people = fixture.store.entity("person").unwrap();
    let memo = fixture
        .store
        .entity("memo")
        .unwrap()
        .create(&attrs([("title", "Kickoff")]))
        .unwrap();
    let author = people
        .create(&attrs([("name", "Ana"), ("email", "ana@example.com")]))
        .unwrap();
    let reader = people
        .create(&attrs([("name", "Bo"), ("email", "bo@example.com")]))
        .unwrap();
    let posts = fixture.store.links("memo_posts_person").unwrap();

    posts
        .link(memo, author, &attrs([("is_author", FieldValue::Bool(true)), ("posted_at", 1_700_000_000_000_i64.into())]))
        .unwrap();
    posts.link(memo, reader, &Default::default()).unwrap();

    let by_memo = posts.list_by_left(memo).unwrap();
    assert_eq!(
        by_memo.iter().map(|link| link.right).collect::<Vec<_>>(),
        vec![author, reader]
    );
    assert_eq!(by_memo[0].payload.get("is_author"), Some(&FieldValue::Bool(true)));

    posts.unlink(memo, reader).unwrap();
    assert!(matches!(
        posts.unlink(memo, reader),
        Err(RepoError::NotFound { .. })
    ));
    assert_eq!(posts.list_by_right(author).unwrap().len(), 1);
}

#[test]
fn key_columns_are_not_payload() {
    let fixture = Fixture::new();
    let project = fixture.project("Survey");
    let layer = fixture.layer("Roads");
    let links = fixture.store.links("project_ties_layer").unwrap();

    let err = links
        .link(project, layer, &attrs([("layer_id", layer)]))
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::ReadOnlyColumn { .. })
    ));
}
