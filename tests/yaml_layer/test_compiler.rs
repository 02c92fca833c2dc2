use insta::assert_snapshot;
use stepline::core::types::ErrorCategory;
use stepline::core::yaml_layer::{
    compile, ActionKind, ArgValue, CheckpointRef, CompileContext, CompiledProgram, Dialect,
    YamlLayer,
};

const LOGIN: &str = "test: Login\ndo:\n  - nav: https://x.test\n  - c: Login\n  - ch: Welcome\n";

fn compiled(text: &str, ctx: &CompileContext) -> CompiledProgram {
    let layer = YamlLayer::default();
    let loaded = layer.load(text, None).expect("load");
    layer.compile(&loaded, ctx).expect("compile")
}

fn listing(program: &CompiledProgram) -> String {
    program
        .instructions
        .iter()
        .map(|instruction| {
            let args: Vec<String> = instruction.args.iter().map(ToString::to_string).collect();
            format!(
                "{}#{} {} {}",
                instruction.checkpoint,
                instruction.position,
                instruction.action,
                args.join(" | ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[test]
fn compact_document_compiles_to_positioned_instructions() {
    let program = compiled(LOGIN, &CompileContext::default());
    assert_eq!(program.dialect, Dialect::Compact);
    assert_eq!(program.instructions.len(), 3);

    let positions: Vec<u32> = program.instructions.iter().map(|i| i.position).collect();
    assert_eq!(positions, vec![1, 2, 3]);
    let actions: Vec<ActionKind> = program.instructions.iter().map(|i| i.action).collect();
    assert_eq!(
        actions,
        vec![ActionKind::Navigate, ActionKind::Click, ActionKind::AssertExists]
    );
    assert!(program.instructions.iter().all(|i| i.args.len() == 1));
    assert!(program
        .instructions
        .iter()
        .all(|i| i.checkpoint == CheckpointRef::Session));
}

#[test]
fn target_checkpoint_listing() {
    let program = compiled(LOGIN, &CompileContext::default().with_target_checkpoint("1680"));
    assert_snapshot!(listing(&program), @r###"
    1680#1 navigate https://x.test
    1680#2 click Login
    1680#3 assert-exists Welcome
    "###);
}

#[test]
fn session_position_offsets_numbering() {
    let ctx = CompileContext::default().with_session(Some("1680".to_string()), 4);
    let program = compiled(LOGIN, &ctx);
    let positions: Vec<u32> = program.instructions.iter().map(|i| i.position).collect();
    assert_eq!(positions, vec![4, 5, 6]);
}

#[test]
fn undeclared_variables_stop_compilation() {
    let text = "test: Broken\ndo:\n  - t: {\"#user\": \"{{username}}\"}\n";
    let layer = YamlLayer::default();
    let loaded = layer.load(text, None).expect("load");

    let err = compile(&loaded.normalized, &CompileContext::default()).expect_err("unresolved");
    assert_eq!(err.category, ErrorCategory::CompilationError);
    assert_eq!(err.code, "YAML-CMP-002");
    assert!(err.message.contains("username"), "{}", err.message);
    assert_eq!(err.path(), Some("do[0]"));

    let err = layer
        .compile(&loaded, &CompileContext::default())
        .expect_err("validated first");
    assert_eq!(err.code, "YAML-VAL-001");
    assert_eq!(err.path(), Some("do[0]"));
    assert!(err.context["issues"].contains("username"));
}

#[test]
fn equivalent_dialects_compile_to_the_same_instructions() {
    let compact = compiled(LOGIN, &CompileContext::default());
    let simplified = compiled(
        "name: Login\nsteps:\n  - navigate: https://x.test\n  - click: Login\n  - assert: Welcome\n",
        &CompileContext::default(),
    );
    let shape = |program: &CompiledProgram| -> Vec<(ActionKind, Vec<ArgValue>, u32)> {
        program
            .instructions
            .iter()
            .map(|i| (i.action, i.args.clone(), i.position))
            .collect()
    };
    assert_eq!(simplified.dialect, Dialect::Simplified);
    assert_eq!(shape(&compact), shape(&simplified));
}

#[test]
fn compilation_is_deterministic() {
    let text = "name: Cart\nvariables:\n  skus: [a1, b2]\nsteps:\n  - foreach:\n      over: skus\n      as: sku\n      steps:\n        - write: {selector: \"#sku\", text: \"{{sku}}\"}\n        - click: \"#add\"\n";
    let first = compiled(text, &CompileContext::default());
    let second = compiled(text, &CompileContext::default());
    assert_eq!(first.digest, second.digest);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );
    assert_eq!(first.instructions.len(), 4);
}
