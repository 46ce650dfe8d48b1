use cascadia_core::{
    Cardinality, DependencyEdges, ReferentialAction, Value, build_dependency_report,
    validate_model_json,
};

const MODEL: &str = r#"
model_version = "0.1"

[[entities]]
name = "User"
attributes = [
  { name = "username", type = "string", allow_null = false },
  { name = "active", type = "boolean", default = true },
]

[[entities]]
name = "Task"
attributes = [{ name = "title", type = "string" }]

[[associations]]
source = "User"
target = "Task"
on_delete = "cascade"
on_update = "restrict"
"#;

fn parse(text: &str) -> serde_json::Value {
    toml::from_str(text).expect("parse toml")
}

#[test]
fn toml_model_builds_registry() {
    let model = validate_model_json(&parse(MODEL)).expect("valid model");
    let registry = model.into_registry().expect("registry");

    let user = registry.entity("User").expect("user entity");
    assert!(!user.attribute("username").unwrap().allow_null);
    assert_eq!(
        user.attribute("active").unwrap().default_value,
        Some(Value::Bool(true))
    );

    let assoc = &registry.associations()[0];
    assert_eq!(assoc.cardinality, Cardinality::OneToMany);
    assert_eq!(assoc.foreign_key, "UserId");
    assert_eq!(assoc.on_delete, ReferentialAction::Cascade);
    assert_eq!(assoc.on_update, ReferentialAction::Restrict);

    let report = build_dependency_report(&registry, DependencyEdges::Constrained);
    assert_eq!(
        report.topo_order.expect("acyclic"),
        vec!["User".to_string(), "Task".to_string()]
    );
}

#[test]
fn schema_rejects_unknown_action() {
    let text = MODEL.replace("on_delete = \"cascade\"", "on_delete = \"explode\"");
    let err = validate_model_json(&parse(&text)).unwrap_err();
    assert!(err.to_string().contains("invalid model document"));
}

#[test]
fn schema_rejects_unknown_fields() {
    let text = MODEL.replace("source = \"User\"", "source = \"User\"\nnullable = true");
    assert!(validate_model_json(&parse(&text)).is_err());
}

#[test]
fn undeclared_target_fails_registry_build() {
    let text = MODEL.replace("target = \"Task\"", "target = \"Project\"");
    let model = validate_model_json(&parse(&text)).expect("structurally valid");
    let err = model.into_registry().unwrap_err();
    assert!(err.to_string().contains("Project"));
}
