//! Declared GIS / project-management entity set.
//!
//! # Responsibility
//! - Declare every table of the platform with its columns.
//! - Declare every relationship edge with an explicit cascade policy.
//!
//! # Invariants
//! - Master data (`geom_type`, `layer_data`, `log_type`) is protected by
//!   `Restrict` edges.
//! - Associative rows disappear with either participant (`Cascade`).
//! - Optional references use `SetNull`.

use super::entity::{ColumnDef, ColumnType, EntityDef};
use super::error::SchemaResult;
use super::graph::SchemaGraph;
use super::relation::{belongs_to, parent_link, CascadePolicy, EdgeDef};

pub const ORGANIZATION: &str = "organization";
pub const PERSON: &str = "person";
pub const GROUP: &str = "group";
pub const WORKSPACE: &str = "workspace";
pub const PROJECT: &str = "project";
pub const TASK: &str = "task";
pub const LIST: &str = "list";
pub const GEOM_TYPE: &str = "geom_type";
pub const LAYER_DATA: &str = "layer_data";
pub const LAYER_STYLE: &str = "layer_style";
pub const LAYER: &str = "layer";
pub const LOG_TYPE: &str = "log_type";
pub const LOG: &str = "log";
pub const FORM_TYPE: &str = "form_type";
pub const FORM: &str = "form";
pub const FIELD: &str = "field";
pub const MEMO: &str = "memo";
pub const NOTIFICATION: &str = "notification";
pub const PROJECT_COMMENT: &str = "project_comment";

pub const LAYER_DESIGNS_LAYER_STYLE: &str = "layer_designs_layer_style";
pub const LAYER_TIES_TASK: &str = "layer_ties_task";
pub const PROJECT_TIES_LAYER: &str = "project_ties_layer";
pub const GROUP_FORMS_PERSON: &str = "group_forms_person";
pub const MEMO_POSTS_PERSON: &str = "memo_posts_person";
pub const PERSON_INTERACTS_TASK: &str = "person_interacts_task";
pub const FORM_IS_TYPE: &str = "form_is_type";

const NAME_LEN: u32 = 255;
const SHORT_LEN: u32 = 50;

/// Builds and validates the platform schema.
pub fn platform_schema() -> SchemaResult<SchemaGraph> {
    SchemaGraph::build(platform_entities(), platform_edges())
}

fn name() -> ColumnDef {
    ColumnDef::required("name", ColumnType::text(NAME_LEN))
}

fn settings() -> ColumnDef {
    ColumnDef::optional("settings", ColumnType::Json)
}

fn data() -> ColumnDef {
    ColumnDef::optional("data", ColumnType::Json)
}

fn reference(column: &str) -> ColumnDef {
    ColumnDef::required(column, ColumnType::Id)
}

fn optional_reference(column: &str) -> ColumnDef {
    ColumnDef::optional(column, ColumnType::Id)
}

fn platform_entities() -> Vec<EntityDef> {
    vec![
        EntityDef::generated(ORGANIZATION).column(name()).column(settings()),
        EntityDef::generated(PERSON)
            .column(name())
            .column(ColumnDef::required("email", ColumnType::text(NAME_LEN)).unique())
            .column(optional_reference("organization_id"))
            .column(settings()),
        EntityDef::generated(GROUP)
            .column(name())
            .column(reference("organization_id"))
            .column(ColumnDef::optional("permissions", ColumnType::Json)),
        EntityDef::generated(WORKSPACE)
            .column(name())
            .column(optional_reference("organization_id"))
            .column(settings()),
        EntityDef::generated(PROJECT)
            .column(name())
            .column(ColumnDef::optional("description", ColumnType::long_text()))
            .column(optional_reference("organization_id"))
            .column(optional_reference("workspace_id"))
            .column(settings()),
        EntityDef::generated(LIST).column(name()).column(ColumnDef::optional("items", ColumnType::Json)),
        EntityDef::generated(TASK)
            .column(ColumnDef::required("title", ColumnType::text(NAME_LEN)))
            .column(ColumnDef::optional("status", ColumnType::text(SHORT_LEN)))
            .column(ColumnDef::optional("due_at", ColumnType::Timestamp))
            .column(ColumnDef::optional("priority", ColumnType::Integer))
            .column(reference("project_id"))
            .column(optional_reference("list_id"))
            .column(data()),
        EntityDef::generated(GEOM_TYPE).column(name().unique()),
        EntityDef::generated(LAYER_DATA)
            .column(ColumnDef::optional("source", ColumnType::text(1024)))
            .column(data()),
        EntityDef::generated(LAYER_STYLE)
            .column(name())
            .column(ColumnDef::optional("definition", ColumnType::Json)),
        EntityDef::generated(LAYER)
            .column(name())
            .column(ColumnDef::optional("visible", ColumnType::Boolean))
            .column(ColumnDef::optional("opacity", ColumnType::Real))
            .column(reference("layer_data_id"))
            .column(reference("geom_type_id"))
            .column(optional_reference("workspace_id"))
            .column(settings()),
        EntityDef::generated(LOG_TYPE).column(name().unique()),
        EntityDef::generated(LOG)
            .column(ColumnDef::required("message", ColumnType::long_text()))
            .column(reference("log_type_id"))
            .column(optional_reference("person_id"))
            .column(optional_reference("project_id"))
            .column(data()),
        EntityDef::generated(FORM_TYPE).column(name().unique()),
        EntityDef::generated(FORM)
            .column(name())
            .column(optional_reference("project_id"))
            .column(ColumnDef::optional("schema", ColumnType::Json)),
        EntityDef::generated(FIELD)
            .column(name())
            .column(ColumnDef::required("kind", ColumnType::text(SHORT_LEN)))
            .column(reference("form_id"))
            .column(optional_reference("parent_id"))
            .column(settings()),
        EntityDef::generated(MEMO)
            .column(ColumnDef::required("title", ColumnType::text(NAME_LEN)))
            .column(ColumnDef::optional("body", ColumnType::long_text())),
        EntityDef::generated(NOTIFICATION)
            .column(ColumnDef::required("message", ColumnType::text(1024)))
            .column(ColumnDef::optional("read", ColumnType::Boolean))
            .column(reference("person_id"))
            .column(data()),
        EntityDef::generated(PROJECT_COMMENT)
            .column(ColumnDef::required("body", ColumnType::long_text()))
            .column(reference("project_id"))
            .column(optional_reference("person_id"))
            .column(optional_reference("parent_id")),
        EntityDef::associative(LAYER_DESIGNS_LAYER_STYLE, "layer_id", "layer_style_id")
            .column(ColumnDef::optional("value", ColumnType::Json)),
        EntityDef::associative(LAYER_TIES_TASK, "layer_id", "task_id").column(data()),
        EntityDef::associative(PROJECT_TIES_LAYER, "project_id", "layer_id")
            .column(settings())
            .column(ColumnDef::optional("position", ColumnType::Integer)),
        EntityDef::associative(GROUP_FORMS_PERSON, "group_id", "person_id")
            .column(ColumnDef::optional("role", ColumnType::text(SHORT_LEN)))
            .column(ColumnDef::optional("permissions", ColumnType::Json)),
        EntityDef::associative(MEMO_POSTS_PERSON, "memo_id", "person_id")
            .column(ColumnDef::optional("is_author", ColumnType::Boolean))
            .column(ColumnDef::optional("posted_at", ColumnType::Timestamp)),
        EntityDef::associative(PERSON_INTERACTS_TASK, "person_id", "task_id").column(data()),
        EntityDef::associative(FORM_IS_TYPE, "form_id", "form_type_id").column(data()),
    ]
}

fn platform_edges() -> Vec<EdgeDef> {
    use CascadePolicy::{Cascade, Restrict, SetNull};

    let declarations = [
        belongs_to(PERSON, "organization_id", ORGANIZATION, SetNull),
        belongs_to(GROUP, "organization_id", ORGANIZATION, Cascade),
        belongs_to(WORKSPACE, "organization_id", ORGANIZATION, SetNull),
        belongs_to(PROJECT, "organization_id", ORGANIZATION, SetNull),
        belongs_to(PROJECT, "workspace_id", WORKSPACE, SetNull),
        belongs_to(TASK, "project_id", PROJECT, Cascade),
        belongs_to(TASK, "list_id", LIST, SetNull),
        belongs_to(LAYER, "layer_data_id", LAYER_DATA, Restrict),
        belongs_to(LAYER, "geom_type_id", GEOM_TYPE, Restrict),
        belongs_to(LAYER, "workspace_id", WORKSPACE, SetNull),
        belongs_to(LOG, "log_type_id", LOG_TYPE, Restrict),
        belongs_to(LOG, "person_id", PERSON, SetNull),
        belongs_to(LOG, "project_id", PROJECT, Cascade),
        belongs_to(FORM, "project_id", PROJECT, SetNull),
        belongs_to(FIELD, "form_id", FORM, Cascade),
        parent_link(FIELD, "parent_id", Cascade, Some("form_id")),
        belongs_to(NOTIFICATION, "person_id", PERSON, Cascade),
        belongs_to(PROJECT_COMMENT, "project_id", PROJECT, Cascade),
        belongs_to(PROJECT_COMMENT, "person_id", PERSON, SetNull),
        parent_link(PROJECT_COMMENT, "parent_id", Cascade, Some("project_id")),
        belongs_to(LAYER_DESIGNS_LAYER_STYLE, "layer_id", LAYER, Cascade),
        belongs_to(LAYER_DESIGNS_LAYER_STYLE, "layer_style_id", LAYER_STYLE, Cascade),
        belongs_to(LAYER_TIES_TASK, "layer_id", LAYER, Cascade),
        belongs_to(LAYER_TIES_TASK, "task_id", TASK, Cascade),
        belongs_to(PROJECT_TIES_LAYER, "project_id", PROJECT, Cascade),
        belongs_to(PROJECT_TIES_LAYER, "layer_id", LAYER, Cascade),
        belongs_to(GROUP_FORMS_PERSON, "group_id", GROUP, Cascade),
        belongs_to(GROUP_FORMS_PERSON, "person_id", PERSON, Cascade),
        belongs_to(MEMO_POSTS_PERSON, "memo_id", MEMO, Cascade),
        belongs_to(MEMO_POSTS_PERSON, "person_id", PERSON, Cascade),
        belongs_to(PERSON_INTERACTS_TASK, "person_id", PERSON, Cascade),
        belongs_to(PERSON_INTERACTS_TASK, "task_id", TASK, Cascade),
        belongs_to(FORM_IS_TYPE, "form_id", FORM, Cascade),
        belongs_to(FORM_IS_TYPE, "form_type_id", FORM_TYPE, Cascade),
    ];
    declarations.into_iter().flatten().collect()
}
