//! End-to-end tests for the control-plane store contract.
//!
//! Every contract test runs twice, once against the in-memory backend and
//! once against redb, to check that callers cannot tell them apart.

use opencenter::api::{Api, ApiConfig};
use opencenter::error::StoreError;
use opencenter::facts::{FactType, FactTypeRegistry, Inheritance};
use opencenter::model::{self, EntityKind, Task};
use opencenter::schema::{Record, SchemaRegistry};
use opencenter::seeds;
use opencenter::task::TaskState;
use serde_json::{Value, json};

fn record(value: Value) -> Record {
    match value {
        Value::Object(m) => m,
        _ => panic!("expected an object"),
    }
}

fn persistent_api(dir: &std::path::Path) -> Api {
    Api::open(ApiConfig {
        data_dir: Some(dir.to_path_buf()),
        ..ApiConfig::default()
    })
    .unwrap()
}

/// Run `check` against a fresh in-memory api and a fresh redb-backed one.
fn on_both_backends(check: impl Fn(&Api)) {
    check(&Api::in_memory().unwrap());

    let dir = tempfile::TempDir::new().unwrap();
    check(&persistent_api(dir.path()));
}

#[test]
fn create_then_get_round_trips_every_entity() {
    on_both_backends(|api| {
        let inputs = [
            (EntityKind::Nodes, json!({"name": "web01", "adventure_id": null})),
            (EntityKind::Facts, json!({"node_id": 1, "key": "k", "value": [1, 2]})),
            (EntityKind::Attrs, json!({"node_id": 1, "key": "k", "value": "v"})),
            (
                EntityKind::Tasks,
                json!({"node_id": 1, "action": "install", "payload": {"pkg": "nova"}}),
            ),
            (EntityKind::Adventures, json!({"name": "Sleep", "dsl": {"start": "s"}})),
            (EntityKind::Filters, json!({"name": "all", "filter_type": "node", "expr": "true"})),
            (EntityKind::Primitives, json!({"name": "sleep", "args": {"t": 1}})),
        ];
        for (kind, input) in inputs {
            let mut data = record(input);
            data.insert("bogus".into(), json!("dropped"));
            let created = api.store(kind).create(&data).unwrap();
            let fetched = api.store(kind).get(created["id"].as_i64().unwrap()).unwrap();
            assert_eq!(fetched.as_ref(), Some(&created), "{kind}");

            let fetched = fetched.unwrap();
            assert!(!fetched.contains_key("bogus"));
            for (key, value) in data.iter().filter(|(k, _)| *k != "bogus") {
                assert_eq!(&fetched[key], value, "{kind}.{key}");
            }
        }
    });
}

#[test]
fn created_records_decode_into_typed_views() {
    on_both_backends(|api| {
        let create = |kind: EntityKind, input: Value| api.store(kind).create(&record(input)).unwrap();

        let node: model::Node = model::decode(&create(EntityKind::Nodes, json!({"name": "web01"}))).unwrap();
        assert_eq!(node.name, "web01");
        assert_eq!(node.adventure_id, None);

        let fact: model::Fact = model::decode(&create(
            EntityKind::Facts,
            json!({"node_id": node.id, "key": "backends", "value": ["node"]}),
        ))
        .unwrap();
        assert_eq!(fact.value, json!(["node"]));

        let attr: model::Attr = model::decode(&create(
            EntityKind::Attrs,
            json!({"node_id": node.id, "key": "locked", "value": true}),
        ))
        .unwrap();
        assert_eq!(attr.value, json!(true));

        let task: Task = model::decode(&create(
            EntityKind::Tasks,
            json!({"node_id": node.id, "action": "install"}),
        ))
        .unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.submitted.is_some());

        let adventure: model::Adventure =
            model::decode(&create(EntityKind::Adventures, json!({"name": "Sleep", "dsl": []}))).unwrap();
        assert_eq!(adventure.criteria.as_deref(), Some("true"));

        let filter: model::Filter = model::decode(&create(
            EntityKind::Filters,
            json!({"name": "all", "filter_type": "node", "expr": "true"}),
        ))
        .unwrap();
        assert_eq!(filter.parent_id, None);
        assert_eq!(filter.expr.as_deref(), Some("true"));

        let primitive: model::Primitive =
            model::decode(&create(EntityKind::Primitives, json!({"name": "sleep"}))).unwrap();
        assert_eq!(primitive.weight, 50);
        assert_eq!(primitive.timeout, 30);
        assert_eq!(primitive.constraints, json!([]));
        assert_eq!(primitive.consequences, json!([]));
    });
}

#[test]
fn missing_required_field_is_a_create_error() {
    on_both_backends(|api| {
        let err = api
            .store(EntityKind::Tasks)
            .create(&record(json!({"node_id": 1})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Create { .. }));
        assert!(api.store(EntityKind::Tasks).get_all().unwrap().is_empty());
    });
}

#[test]
fn duplicate_fact_keeps_the_first() {
    on_both_backends(|api| {
        let facts = api.store(EntityKind::Facts);
        facts
            .create(&record(json!({"node_id": 1, "key": "k", "value": 1})))
            .unwrap();
        let err = facts
            .create(&record(json!({"node_id": 1, "key": "k", "value": 2})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Create { .. }));

        let all = facts.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["value"], json!(1));
    });
}

#[test]
fn update_drops_read_only_fields_and_rolls_back_on_error() {
    on_both_backends(|api| {
        let nodes = api.store(EntityKind::Nodes);
        nodes.create(&record(json!({"name": "n1"}))).unwrap();

        let updated = nodes
            .update(1, &record(json!({"name": "renamed", "task_id": 4, "facts": {}})))
            .unwrap();
        assert_eq!(updated["name"], json!("n1"));
        assert_eq!(updated["task_id"], json!(4));

        let err = nodes
            .update(1, &record(json!({"task_id": "seven", "adventure_id": 2})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
        let row = nodes.get(1).unwrap().unwrap();
        assert_eq!(row["task_id"], json!(4));
        assert_eq!(row["adventure_id"], Value::Null);

        assert!(matches!(
            nodes.update(50, &record(json!({"task_id": 1}))),
            Err(StoreError::IdNotFound { id: 50, .. })
        ));
    });
}

#[test]
fn delete_missing_id_is_not_found() {
    on_both_backends(|api| {
        for kind in EntityKind::ALL {
            assert!(matches!(
                api.store(kind).delete(1),
                Err(StoreError::IdNotFound { id: 1, .. })
            ));
        }
    });
}

#[test]
fn deleting_a_node_cascades_to_owned_rows() {
    on_both_backends(|api| {
        let nodes = api.store(EntityKind::Nodes);
        let x = nodes.create(&record(json!({"name": "x"}))).unwrap();
        let y = nodes.create(&record(json!({"name": "y"}))).unwrap();
        for node in [&x, &y] {
            let id = &node["id"];
            api.store(EntityKind::Facts)
                .create(&record(json!({"node_id": id, "key": "a", "value": 1})))
                .unwrap();
            api.store(EntityKind::Attrs)
                .create(&record(json!({"node_id": id, "key": "a", "value": 1})))
                .unwrap();
            api.store(EntityKind::Tasks)
                .create(&record(json!({"node_id": id, "action": "a", "payload": {}})))
                .unwrap();
        }

        nodes.delete(x["id"].as_i64().unwrap()).unwrap();

        let gone = record(json!({"node_id": x["id"]}));
        let kept = record(json!({"node_id": y["id"]}));
        for kind in [EntityKind::Facts, EntityKind::Attrs, EntityKind::Tasks] {
            assert!(api.store(kind).filter(&gone).unwrap().is_empty(), "{kind}");
            assert_eq!(api.store(kind).filter(&kept).unwrap().len(), 1, "{kind}");
        }
    });
}

#[test]
fn task_lifecycle_stamps_completed_once() {
    on_both_backends(|api| {
        let tasks = api.store(EntityKind::Tasks);
        let created = tasks
            .create(&record(json!({"node_id": 1, "action": "run", "payload": {}})))
            .unwrap();
        let task: Task = model::decode(&created).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.submitted.is_some());
        assert_eq!(task.completed, None);

        let running = tasks
            .update(task.id, &record(json!({"state": "running"})))
            .unwrap();
        assert_eq!(running["completed"], Value::Null);

        let done = tasks
            .update(task.id, &record(json!({"state": "done", "result": {"ok": true}})))
            .unwrap();
        let t1 = done["completed"].clone();
        assert!(t1.is_i64());

        let cancelled = tasks
            .update(task.id, &record(json!({"state": "cancelled"})))
            .unwrap();
        assert_eq!(cancelled["completed"], t1);
        assert_eq!(cancelled["submitted"], created["submitted"]);

        assert!(matches!(
            tasks.update(task.id, &record(json!({"state": "exploded"}))),
            Err(StoreError::Validation { .. })
        ));
    });
}

#[test]
fn facts_inherit_down_the_seeded_tree() {
    on_both_backends(|api| {
        seeds::seed_defaults(api).unwrap();
        let nodes = api.store(EntityKind::Nodes);
        let host = nodes.create(&record(json!({"name": "compute01"}))).unwrap();
        let host_id = host["id"].as_i64().unwrap();

        let facts = api.store(EntityKind::Facts);
        facts
            .create(&record(json!({"node_id": host_id, "key": "parent_id", "value": 2})))
            .unwrap();
        facts
            .create(&record(json!({"node_id": host_id, "key": "backends", "value": ["agent", "node"]})))
            .unwrap();

        let resolved = api.node_facts(host_id).unwrap();
        assert_eq!(resolved["backends"], json!(["container", "node", "agent"]));
        assert_eq!(resolved["parent_id"], json!(2));

        let rendered = api.get_rendered(EntityKind::Nodes, host_id).unwrap().unwrap();
        assert_eq!(rendered["facts"], Value::Object(resolved));
        assert_eq!(rendered["attrs"], json!({}));
    });
}

#[test]
fn injected_registry_controls_merging() {
    let registry = FactTypeRegistry::builtin();
    registry.register(FactType::new("locked", Inheritance::ParentClobber));
    registry.register(FactType::new("x", Inheritance::ChildClobber));
    let api = Api::open(ApiConfig {
        data_dir: None,
        fact_types: registry,
    })
    .unwrap();

    let facts = api.store(EntityKind::Facts);
    for data in [
        json!({"node_id": 1, "key": "locked", "value": true}),
        json!({"node_id": 1, "key": "x", "value": 1}),
        json!({"node_id": 2, "key": "parent_id", "value": 1}),
        json!({"node_id": 2, "key": "locked", "value": false}),
        json!({"node_id": 3, "key": "parent_id", "value": 1}),
        json!({"node_id": 3, "key": "x", "value": 2}),
    ] {
        facts.create(&record(data)).unwrap();
    }

    assert_eq!(api.node_facts(2).unwrap()["locked"], json!(true));
    assert_eq!(api.node_facts(2).unwrap()["x"], json!(1));
    assert_eq!(api.node_facts(3).unwrap()["x"], json!(2));
}

#[test]
fn node_hierarchy_cycle_terminates() {
    on_both_backends(|api| {
        let facts = api.store(EntityKind::Facts);
        for (node, parent) in [(1, 3), (2, 1), (3, 2)] {
            facts
                .create(&record(json!({"node_id": node, "key": "parent_id", "value": parent})))
                .unwrap();
        }
        let resolver = api.resolver();
        assert_eq!(resolver.ancestry(1).unwrap(), vec![1, 3, 2]);
        assert_eq!(api.node_facts(1).unwrap()["parent_id"], json!(3));
    });
}

#[test]
fn ephemeral_ids_follow_max_plus_one() {
    let api = Api::in_memory().unwrap();
    let nodes = api.store(EntityKind::Nodes);
    assert_eq!(nodes.create(&record(json!({"name": "a"}))).unwrap()["id"], json!(1));
    nodes.delete(1).unwrap();
    assert_eq!(nodes.create(&record(json!({"name": "a"}))).unwrap()["id"], json!(1));
    assert_eq!(nodes.create(&record(json!({"name": "b"}))).unwrap()["id"], json!(2));
    nodes.delete(1).unwrap();
    assert_eq!(nodes.create(&record(json!({"name": "c"}))).unwrap()["id"], json!(3));
}

#[test]
fn filter_composition_through_the_api() {
    on_both_backends(|api| {
        let filters = api.store(EntityKind::Filters);
        let f1 = filters
            .create(&record(json!({"name": "F1", "expr": "a=1"})))
            .unwrap();
        let f2 = filters
            .create(&record(json!({"name": "F2", "expr": "b=2", "parent_id": f1["id"]})))
            .unwrap();

        let f1 = api.render(EntityKind::Filters, f1).unwrap();
        assert_eq!(f1["full_expr"], json!("a=1"));
        let id = f2["id"].as_i64().unwrap();
        assert_eq!(
            api.filter_full_expr(id).unwrap().as_deref(),
            Some("(b=2) and (a=1)")
        );
    });
}

#[test]
fn schema_reports_synthesized_fields() {
    let registry = SchemaRegistry;
    let api = Api::in_memory().unwrap();
    for def in registry.entities() {
        let schema = api.store(def.kind).get_schema();
        assert_eq!(schema, def.schema());
        for name in def.synthesized {
            let field = schema.field(name).unwrap();
            assert_eq!(field.ty, "TEXT");
            assert!(field.read_only && !field.updatable && !field.required && !field.unique);
        }
    }

    let json = serde_json::to_value(api.store(EntityKind::Facts).get_schema()).unwrap();
    assert_eq!(json["schema"]["node_id"]["fk"], json!("nodes.id"));
    assert_eq!(json["schema"]["id"]["type"], json!("INTEGER"));
    assert!(json["schema"]["key"].get("fk").is_none());
}

#[test]
fn query_forwards_to_the_evaluator() {
    let api = Api::in_memory().unwrap();
    let evaluator = |q: &str| -> Result<Vec<Record>, StoreError> {
        assert_eq!(q, "nodes: facts.backends ? 'node'");
        Ok(vec![record(json!({"id": 1, "name": "n"}))])
    };
    let found = api
        .query(EntityKind::Nodes, &evaluator, "facts.backends ? 'node'")
        .unwrap();
    assert_eq!(found.len(), 1);
}
