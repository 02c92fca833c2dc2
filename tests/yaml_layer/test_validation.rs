use std::collections::BTreeMap;
use stepline::core::yaml_layer::validate::{IssueSeverity, ValidationLayer};
use stepline::core::yaml_layer::{Dialect, ValidationReport, YamlLayer};

fn layer(env: &[(&str, &str)]) -> YamlLayer {
    let env: BTreeMap<String, String> = env
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    YamlLayer::default().with_env(env)
}

fn validate(text: &str) -> ValidationReport {
    let layer = layer(&[]);
    let loaded = layer.load(text, None).expect("load");
    layer.validate(&loaded)
}

fn codes(report: &ValidationReport) -> Vec<&str> {
    report.issues().map(|issue| issue.code.as_str()).collect()
}

#[test]
fn valid_documents_pass_every_layer() {
    let report = validate(
        "name: Login\nbase_url: https://example.test\nvariables:\n  user: alice\nsteps:\n  - navigate: /login\n  - assert: \"#user\"\n  - write: {selector: \"#user\", text: \"{{user}}\"}\n  - click: \"#submit\"\n",
    );
    assert!(report.ok, "{:?}", report.errors);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert_eq!(
        report.layers,
        vec![
            ValidationLayer::Schema,
            ValidationLayer::Semantic,
            ValidationLayer::CrossReference,
            ValidationLayer::BestPractice
        ]
    );
}

#[test]
fn fix_examples_use_the_document_dialect() {
    let report = validate(
        "name: Odd\ninfrastructure: {project: Web}\nsteps:\n  - type: interact\n    command: clik\n    target: \"#x\"\n",
    );
    assert!(!report.ok);
    let issue = &report.errors[0];
    assert_eq!(issue.code, "YAML-SCH-003");
    assert_eq!(issue.severity, IssueSeverity::Error);
    assert_eq!(issue.suggestion.as_deref(), Some("Did you mean 'click'?"));
    let example = issue.example.as_deref().expect("example");
    assert!(example.contains("type:"), "{}", example);
}

#[test]
fn environment_references_must_be_set() {
    let text = "name: Env\nsteps:\n  - navigate: \"${ENV:APP_URL}/login\"\n";
    let missing = layer(&[]);
    let report = missing.validate(&missing.load(text, None).expect("load"));
    assert_eq!(codes(&report), vec!["YAML-REF-001"]);
    assert!(report.errors[0].message.contains("APP_URL"));

    let present = layer(&[("APP_URL", "https://example.test")]);
    let report = present.validate(&present.load(text, None).expect("load"));
    assert!(report.ok, "{:?}", report.errors);
}

#[test]
fn foreach_over_an_undeclared_list_is_rejected() {
    let report = validate(
        "name: Loop\nsteps:\n  - navigate: https://example.test\n  - foreach:\n      over: \"{{skus}}\"\n      as: sku\n      steps:\n        - click: \"{{sku}}\"\n",
    );
    assert!(!report.ok);
    assert!(codes(&report).contains(&"YAML-REF-005"));
}

#[test]
fn loop_bounds_are_capped() {
    let report = validate(
        "name: Many\nsteps:\n  - navigate: https://example.test\n  - repeat:\n      times: 5000\n      steps:\n        - click: \"#next\"\n",
    );
    assert_eq!(codes(&report), vec!["YAML-SEM-002"]);
}

#[test]
fn duplicate_checkpoint_names_point_at_the_first() {
    let report = validate(
        "name: Dup\ncheckpoints:\n  - name: Cart\n    steps:\n      - navigate: https://example.test\n  - name: Cart\n    steps:\n      - click: \"#pay\"\n",
    );
    assert_eq!(codes(&report), vec!["YAML-SEM-001"]);
    assert!(report.errors[0].path.starts_with("checkpoints["));
}

#[test]
fn failed_reports_become_validation_errors() {
    let report = validate("test: Broken\ndo:\n  - clik: \"#go\"\n");
    let err = report.into_error();
    assert_eq!(err.code, "YAML-VAL-001");
    assert_eq!(err.path(), Some("do[0]"));
    assert!(err.context["issues"].contains("YAML-SCH-003"));
}

#[test]
fn forced_dialect_is_respected() {
    let layer = layer(&[]);
    let loaded = layer
        .load("name: Forced\nsteps:\n  - navigate: https://example.test\n", Some(Dialect::Simplified))
        .expect("load");
    assert!(layer.validate(&loaded).ok);
}

#[test]
fn variable_cycles_through_checkpoint_scopes_are_rejected() {
    let report = validate(
        "name: Greeting\nvariables:\n  name: \"{{greeting}}\"\ncheckpoints:\n  - name: Home\n    variables:\n      greeting: \"Hello {{name}}\"\n    steps:\n      - navigate: https://example.test\n      - assert: \"{{greeting}}\"\n",
    );
    assert!(!report.ok);
    assert_eq!(codes(&report), vec!["YAML-REF-006"]);
    assert_eq!(report.errors[0].path, "checkpoints[0].variables.greeting");
    assert!(report.errors[0].message.contains("greeting -> name"));
}
