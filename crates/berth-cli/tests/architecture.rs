use arch_lint::rules::{NoErrorSwallowing, NoSilentResultDrop};
use arch_lint::{Analyzer, Severity};

/// Runs AL003 (no-error-swallowing) and AL013 (no-silent-result-drop) against
/// every berth crate. Test code is excluded.
#[test]
fn arch_lint_al003_al013() {
    let root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root");

    let analyzer = Analyzer::builder()
        .root(root)
        .exclude("**/target/**")
        .exclude("**/tests/**")
        .exclude("examples/**")
        .exclude("**/.berth/**")
        .rule(NoErrorSwallowing::new())
        .rule(NoSilentResultDrop::new())
        .build()
        .expect("build analyzer");

    let result = analyzer.analyze().expect("analyze");

    if result.has_violations_at(Severity::Warning) {
        let report = result.format_test_report(Severity::Warning);
        panic!("{report}");
    }
}

/// Library crates only depend downward: cloud → build → core.
#[test]
fn crate_dependencies_point_toward_core() {
    let crates = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("crates dir");
    let manifest = |name: &str| {
        std::fs::read_to_string(crates.join(name).join("Cargo.toml")).expect("read manifest")
    };

    let core = manifest("berth-core");
    for upper in ["berth-build", "berth-cloud", "berth-cli", "tokio"] {
        assert!(!core.contains(upper), "berth-core must not depend on {upper}");
    }

    let build = manifest("berth-build");
    for upper in ["berth-cloud", "berth-cli"] {
        assert!(!build.contains(upper), "berth-build must not depend on {upper}");
    }

    assert!(!manifest("berth-cloud").contains("berth-cli"));
}
