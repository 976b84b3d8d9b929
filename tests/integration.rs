use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn annot_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("annot");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // two blocks on page 1, a blank page 2
    fs::write(
        root.join("layout.json"),
        r#"[
  { "fragments": [
      { "text": "Rust is fast. It is safe.", "rect": { "x0": 0, "y0": 0, "x1": 125, "y1": 10 }, "font_size": 10 },
      { "text": "Cargo builds it.", "rect": { "x0": 0, "y0": 40, "x1": 80, "y1": 50 }, "font_size": 10 }
  ]},
  { "fragments": [] }
]"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/annotate.sqlite"

[server]
bind = "127.0.0.1:7341"
"#,
        root.display()
    );

    let config_path = config_dir.join("annotate.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_annot(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = annot_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run annot binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = setup_test_env();

    let (stdout, stderr, success) = run_annot(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully."));

    let (_, stderr, success) = run_annot(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_documents_empty() {
    let (_tmp, config) = setup_test_env();
    run_annot(&config, &["init"]);

    let (stdout, stderr, success) = run_annot(&config, &["documents"]);
    assert!(success, "documents failed: {}", stderr);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_import_activate_and_number() {
    let (tmp, config) = setup_test_env();
    run_annot(&config, &["init"]);

    let layout = tmp.path().join("layout.json");
    let (stdout, stderr, success) =
        run_annot(&config, &["import", "--layout", layout.to_str().unwrap()]);
    assert!(success, "import failed: {}", stderr);
    assert!(stdout.contains("Imported document 1 (2 pages)"));

    let (stdout, _, success) = run_annot(&config, &["documents"]);
    assert!(success);
    assert!(stdout.contains("layout.json"));

    let (stdout, stderr, success) =
        run_annot(&config, &["activate", "1", "--page", "1", "--block", "2"]);
    assert!(success, "activate failed: {}", stderr);
    assert!(stdout.contains("active at order 1"));

    let (_, stderr, success) =
        run_annot(&config, &["activate", "1", "--page", "1", "--block", "1"]);
    assert!(success, "activate failed: {}", stderr);

    // "Cargo" and "Rust" and "It" were seeded as starters
    let (stdout, stderr, success) = run_annot(&config, &["sentences", "1"]);
    assert!(success, "sentences failed: {}", stderr);
    assert!(stdout.contains("[1] (page 1, block 2) Cargo builds it."));
    assert!(stdout.contains("[2] (page 1, block 1) Rust is fast."));
    assert!(stdout.contains("[3] (page 1, block 1) It is safe."));

    let (_, stderr, success) = run_annot(
        &config,
        &["toggle", "1", "--page", "1", "--block", "1", "--word", "4"],
    );
    assert!(success, "toggle failed: {}", stderr);
    let (stdout, _, _) = run_annot(&config, &["sentences", "1"]);
    assert!(stdout.contains("[2] (page 1, block 1) Rust is fast. It is safe."));

    let (stdout, _, success) = run_annot(&config, &["blocks", "1"]);
    assert!(success);
    assert!(stdout.contains("--- page 2 (0 blocks) ---"));
}

#[test]
fn test_unknown_document_fails() {
    let (_tmp, config) = setup_test_env();
    run_annot(&config, &["init"]);

    let (_, stderr, success) = run_annot(&config, &["blocks", "42"]);
    assert!(!success);
    assert!(stderr.contains("document 42 not found"));
}

#[test]
fn test_label_disabled_provider_fails() {
    let (tmp, config) = setup_test_env();
    run_annot(&config, &["init"]);
    let layout = tmp.path().join("layout.json");
    run_annot(&config, &["import", "--layout", layout.to_str().unwrap()]);
    run_annot(&config, &["activate", "1", "--page", "1", "--block", "1"]);

    let (_, stderr, success) = run_annot(&config, &["label", "1"]);
    assert!(!success);
    assert!(stderr.contains("labeling failed"));
}

#[test]
fn test_reset_drops_documents() {
    let (tmp, config) = setup_test_env();
    run_annot(&config, &["init"]);
    let layout = tmp.path().join("layout.json");
    run_annot(&config, &["import", "--layout", layout.to_str().unwrap()]);

    let (stdout, stderr, success) = run_annot(&config, &["init", "--reset"]);
    assert!(success, "reset failed: {}", stderr);
    assert!(stdout.contains("Database reset successfully."));

    let (stdout, _, _) = run_annot(&config, &["documents"]);
    assert!(stdout.contains("No documents."));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_annot(&tmp.path().join("nope.toml"), &["documents"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
