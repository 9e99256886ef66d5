use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

const CI_VARS: [&str; 4] = [
    "CI_COMMIT_TAG",
    "CI_COMMIT_BRANCH",
    "CI_COMMIT_REF_NAME",
    "CI_DEFAULT_BRANCH",
];

fn berth() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("berth");
    for var in CI_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("BERTH_REGISTRY_USER")
        .env_remove("BERTH_REGISTRY_PASSWORD");
    cmd
}

const BASE_CONFIG: &str = r#"
[project]
name = "bot"

[image]
registry = "registry.example.com"
repository = "group/bot"
"#;

const DEPLOY_CONFIG: &str = r#"
[stores.bot]
kind = "dotenv"
path = ".env.production"

[[deploy.secrets]]
env = "DISCORD_TOKEN"
store = "bot"
key = "DISCORD_TOKEN"

[[deploy.volumes]]
mount_path = "/config"
read_only = true
source = { kind = "config", name = "bot-config" }

[[deploy.volumes]]
mount_path = "/data"
source = { kind = "persistent", claim = "bot-data" }

[deploy.init]
volume = "/data"
uid = 1000
gid = 1000
mode = "0775"
"#;

fn project(config: &str) -> TempDir {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("berth.toml"), config).unwrap();
    tmp
}

fn deploy_project() -> TempDir {
    let tmp = project(&format!("{BASE_CONFIG}{DEPLOY_CONFIG}"));
    std::fs::write(tmp.path().join(".env.production"), "DISCORD_TOKEN=abc\n").unwrap();
    tmp
}

// ── Help / Version ──

#[test]
fn shows_help() {
    berth()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build, tag, and publish Rust workloads"));
}

#[test]
fn shows_version() {
    berth()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("berth"));
}

#[test]
fn release_help_mentions_credentials_env() {
    berth()
        .args(["release", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("BERTH_REGISTRY_USER"))
        .stdout(predicate::str::contains("--no-push"));
}

// ── Tag Command ──

#[test]
fn branch_resolves_to_floating_tag() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--branch", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registry.example.com/group/bot:latest"))
        .stdout(predicate::str::contains("cache key: main"));
}

#[test]
fn tag_resolves_to_itself_with_tag_cache() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--tag", "0.1.1", "--branch", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("registry.example.com/group/bot:0.1.1"))
        .stdout(predicate::str::contains("cache key: tag_0-1-1"));
}

#[test]
fn ci_variables_select_the_ref() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .env("CI_COMMIT_TAG", "0.2.0")
        .env("CI_DEFAULT_BRANCH", "main")
        .args(["tag", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""tag": "0.2.0""#))
        .stdout(predicate::str::contains(r#""source": "ci""#));
}

#[test]
fn custom_floating_tag_is_used() {
    let tmp = project(&format!("{BASE_CONFIG}floating_tag = \"edge\"\n"));
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--branch", "develop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("group/bot:edge"));
}

#[test]
fn tag_equal_to_floating_tag_is_rejected() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--tag", "latest"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("floating tag"));
}

#[test]
fn invalid_tag_is_rejected() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--tag", "release/1.0"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid image tag"));
}

#[test]
fn malformed_config_is_reported() {
    let tmp = project("[image\nregistry = ");
    berth()
        .current_dir(tmp.path())
        .args(["tag", "--branch", "main"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config"));
}

// ── Render Command ──

#[test]
fn render_prints_native_descriptor() {
    let tmp = deploy_project();
    berth()
        .current_dir(tmp.path())
        .args(["render", "--tag", "0.1.1", "--branch", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""tag": "0.1.1""#))
        .stdout(predicate::str::contains(r#""step": "init""#))
        .stdout(predicate::str::contains(r#""claim": "bot-data""#))
        .stdout(predicate::str::contains("abc").not());
}

#[test]
fn render_kubernetes_deployment() {
    let tmp = deploy_project();
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--format", "kubernetes"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""kind": "Deployment""#))
        .stdout(predicate::str::contains("initContainers"))
        .stdout(predicate::str::contains(r#""1000:1000""#))
        .stdout(predicate::str::contains(r#""name": "pvc-data""#))
        .stdout(predicate::str::contains("secretKeyRef"))
        .stdout(predicate::str::contains("registry.example.com/group/bot:latest"));
}

#[test]
fn render_carries_plain_env() {
    let tmp = project(&format!(
        "{BASE_CONFIG}{DEPLOY_CONFIG}\n[deploy.env]\nCONFIG_PATH = \"/config\"\n"
    ));
    std::fs::write(tmp.path().join(".env.production"), "DISCORD_TOKEN=abc\n").unwrap();
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--format", "kubernetes"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""value": "/config""#));
}

#[test]
fn render_rejects_env_shadowing_a_secret() {
    let tmp = project(&format!(
        "{BASE_CONFIG}{DEPLOY_CONFIG}\n[deploy.env]\nDISCORD_TOKEN = \"plain\"\n"
    ));
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--no-verify"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("DISCORD_TOKEN"));
}

#[test]
fn render_writes_to_file() {
    let tmp = deploy_project();
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--out", "out/workload.json"])
        .assert()
        .success();

    let written = std::fs::read_to_string(tmp.path().join("out/workload.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&written).unwrap();
    assert_eq!(value["name"], "bot");
    assert_eq!(value["replicas"], 1);
}

#[test]
fn render_rejects_shared_mount_path() {
    let config = format!(
        r#"{BASE_CONFIG}
[[deploy.volumes]]
mount_path = "/cache"
source = {{ kind = "persistent", claim = "cache-a" }}

[[deploy.volumes]]
mount_path = "/cache"
source = {{ kind = "persistent", claim = "cache-b" }}

[deploy.init]
volume = "/cache"
"#
    );
    let tmp = project(&config);
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--no-verify"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("/cache"));
}

#[test]
fn render_requires_init_step() {
    let tmp = project(BASE_CONFIG);
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("[deploy.init] is required"));
}

#[test]
fn render_fails_on_unresolvable_secret() {
    let tmp = project(&format!("{BASE_CONFIG}{DEPLOY_CONFIG}"));
    std::fs::write(tmp.path().join(".env.production"), "OTHER=1\n").unwrap();
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main"])
        .assert()
        .code(13)
        .stderr(predicate::str::contains("DISCORD_TOKEN"));
}

#[test]
fn render_no_verify_skips_secret_lookup() {
    let tmp = project(&format!("{BASE_CONFIG}{DEPLOY_CONFIG}"));
    berth()
        .current_dir(tmp.path())
        .args(["render", "--branch", "main", "--no-verify"])
        .assert()
        .success();
}

// ── Release Command ──

#[test]
fn release_without_credentials_fails_before_building() {
    let tmp = project(BASE_CONFIG);
    std::fs::create_dir_all(tmp.path().join("src")).unwrap();
    std::fs::write(
        tmp.path().join("Cargo.toml"),
        "[package]\nname = \"bot\"\nversion = \"0.1.1\"\nedition = \"2021\"\n",
    )
    .unwrap();
    std::fs::write(tmp.path().join("src/main.rs"), "fn main() {}\n").unwrap();

    berth()
        .current_dir(tmp.path())
        .args(["release", "--branch", "main"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("registry credentials missing"));

    assert!(!tmp.path().join("target").exists());
}
