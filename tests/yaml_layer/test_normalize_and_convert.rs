use stepline::core::yaml_layer::document::{StepKind, StepNode};
use stepline::core::yaml_layer::normalizer::{load_tree, normalize};
use stepline::core::yaml_layer::{convert, ArgValue, Dialect, NormalizedDocument};
use stepline::core::ErrorCategory;

fn normalized(text: &str, dialect: Dialect) -> NormalizedDocument {
    normalize(&load_tree(text).expect("yaml"), dialect).expect("normalize")
}

fn actions(document: &NormalizedDocument) -> Vec<(String, Vec<ArgValue>)> {
    document.document.checkpoints[0]
        .steps
        .iter()
        .filter_map(|step| match &step.kind {
            StepKind::Action(call) => Some((call.name.clone(), call.args.clone())),
            _ => None,
        })
        .collect()
}

const COMPACT: &str = r##"
test: Login
base: https://example.test
data:
  user: alice
do:
  - nav: /login
  - t: {"#user": "{{user}}"}
  - c: "#submit"
  - ch: Welcome
"##;

const SIMPLIFIED: &str = r##"
name: Login
base_url: https://example.test
variables:
  user: alice
steps:
  - navigate: /login
  - write: {selector: "#user", text: "{{user}}"}
  - click: "#submit"
  - assert: Welcome
"##;

#[test]
fn compact_and_simplified_spellings_normalize_alike() {
    let compact = normalized(COMPACT, Dialect::Compact);
    let simplified = normalized(SIMPLIFIED, Dialect::Simplified);
    assert_eq!(actions(&compact), actions(&simplified));
    assert_eq!(compact.document.base_url, simplified.document.base_url);
    assert_eq!(compact.document.variables, simplified.document.variables);
}

#[test]
fn normalizing_twice_is_stable() {
    let first = normalized(COMPACT, Dialect::Compact);
    let rendered = convert(&first, Dialect::Compact).expect("render");
    let second = normalized(&rendered.yaml, Dialect::Compact);
    assert_eq!(first.document, second.document);
}

#[test]
fn lossless_pairs_round_trip() {
    for (text, origin) in [(COMPACT, Dialect::Compact), (SIMPLIFIED, Dialect::Simplified)] {
        let original = normalized(text, origin);
        for target in Dialect::ALL {
            let there = convert(&original, target).expect("there");
            let back = convert(&normalized(&there.yaml, target), origin).expect("back");
            assert_eq!(
                normalized(&back.yaml, origin).document,
                original.document,
                "{} -> {} -> {}",
                origin,
                target,
                origin
            );
        }
    }
}

#[test]
fn extended_only_fields_warn_when_converted_to_compact() {
    let extended = normalized(
        "name: Rich\ninfrastructure:\n  project: Web\n  goal: Auth\nconfig:\n  screenshot_on_failure: true\nsteps:\n  - type: navigate\n    target: https://example.test\n",
        Dialect::Extended,
    );
    let conversion = convert(&extended, Dialect::Compact).expect("convert");
    assert_eq!(conversion.dialect, Dialect::Compact);
    assert!(!conversion.warnings.is_empty());
    assert!(conversion
        .warnings
        .iter()
        .any(|warning| warning.contains("screenshot_on_failure")));
    assert!(conversion.yaml.starts_with("test: Rich"));
}

#[test]
fn duplicate_keys_after_stringification_are_rejected() {
    let err = load_tree("test: Dup\ndata:\n  1: one\n  \"1\": uno\ndo: []\n").expect_err("duplicate");
    assert_eq!(err.category, ErrorCategory::NormalizationError);
    assert_eq!(err.code, "YAML-NORM-001");
    assert_eq!(err.path(), Some("data"));
}

#[test]
fn key_names_are_canonicalized() {
    let document = normalized("test: Keys\ndo:\n  - k: enter\n", Dialect::Compact);
    let step = &document.document.checkpoints[0].steps[0];
    assert_eq!(step.kind, StepNode::action("key", vec![ArgValue::text("Enter")]));
}

#[test]
fn empty_documents_are_rejected() {
    let err = load_tree("   \n").expect_err("empty");
    assert_eq!(err.code, "YAML-NORM-005");
}
