use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn soul_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("soul");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // The registry URL points at a closed port: commands that reach the
    // network fail fast instead of hanging.
    let config_content = format!(
        r#"[paths]
soul_file = "{root}/SOUL.md"
backup_file = "{root}/.opensoul/backup.md"
cache_dir = "{root}/.opensoul/cache"

[registry]
base_url = "http://127.0.0.1:1"
timeout_secs = 2

[db]
path = "{root}/data/registry.sqlite"

[storage]
endpoint_url = ""
bucket = "opensoul"
region = "auto"
timeout_secs = 5

[server]
bind = "127.0.0.1:7731"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("opensoul.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_soul(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = soul_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run soul binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn write_persona(root: &Path, name: &str, content: &str) -> PathBuf {
    let dir = root.join("personas");
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.md", name));
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_soul(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/registry.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_soul(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_soul(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_apply_local_file_swaps_and_backs_up() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("SOUL.md"), "the original soul").unwrap();
    let persona = write_persona(tmp.path(), "pirate", "# Pirate\n\nSpeaks in nautical idiom.\n");

    let (stdout, stderr, success) =
        run_soul(&config_path, &["apply", persona.to_str().unwrap()]);
    assert!(success, "apply failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("applied soul 'pirate'"));
    assert!(stdout.contains("backed up"));

    let active = fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
    assert!(active.starts_with("<!-- opensoul:swapped -->\n"));
    assert!(active.contains("# Pirate"));

    let backup = fs::read_to_string(tmp.path().join(".opensoul/backup.md")).unwrap();
    assert_eq!(backup, "the original soul");
}

#[test]
fn test_repeated_apply_keeps_first_backup() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("SOUL.md"), "the original soul").unwrap();
    let pirate = write_persona(tmp.path(), "pirate", "# Pirate\n");
    let wizard = write_persona(tmp.path(), "wizard", "# Wizard\n");

    run_soul(&config_path, &["apply", pirate.to_str().unwrap()]);
    let (stdout, _, success) = run_soul(&config_path, &["apply", wizard.to_str().unwrap()]);
    assert!(success);
    // Second apply replaces content but must not claim a new backup.
    assert!(!stdout.contains("backed up"));

    let backup = fs::read_to_string(tmp.path().join(".opensoul/backup.md")).unwrap();
    assert_eq!(backup, "the original soul");
}

#[test]
fn test_apply_without_existing_file_skips_backup() {
    let (tmp, config_path) = setup_test_env();
    let persona = write_persona(tmp.path(), "fresh", "# Fresh\n");

    let (stdout, _, success) = run_soul(&config_path, &["apply", persona.to_str().unwrap()]);
    assert!(success);
    assert!(!stdout.contains("backed up"));
    assert!(!tmp.path().join(".opensoul/backup.md").exists());
    assert!(tmp.path().join("SOUL.md").exists());
}

#[test]
fn test_rollback_restores_original_and_is_repeatable() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("SOUL.md"), "the original soul").unwrap();
    let pirate = write_persona(tmp.path(), "pirate", "# Pirate\n");
    let wizard = write_persona(tmp.path(), "wizard", "# Wizard\n");

    run_soul(&config_path, &["apply", pirate.to_str().unwrap()]);
    run_soul(&config_path, &["apply", wizard.to_str().unwrap()]);

    let (stdout, stderr, success) = run_soul(&config_path, &["rollback"]);
    assert!(success, "rollback failed: stdout={}, stderr={}", stdout, stderr);
    let active = fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
    assert_eq!(active, "the original soul");

    // Rollback is repeatable: the backup is not consumed.
    let (_, _, success) = run_soul(&config_path, &["rollback"]);
    assert!(success);
    let active = fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
    assert_eq!(active, "the original soul");
}

#[test]
fn test_rollback_without_backup_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("SOUL.md"), "untouched").unwrap();

    let (_, stderr, success) = run_soul(&config_path, &["rollback"]);
    assert!(!success);
    assert!(stderr.contains("no backup"), "stderr: {}", stderr);

    let active = fs::read_to_string(tmp.path().join("SOUL.md")).unwrap();
    assert_eq!(active, "untouched");
}

#[test]
fn test_status_reports_state_transitions() {
    let (tmp, config_path) = setup_test_env();
    fs::write(tmp.path().join("SOUL.md"), "the original soul").unwrap();

    let (stdout, _, success) = run_soul(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("original"));

    let persona = write_persona(tmp.path(), "pirate", "# Pirate Captain\n");
    run_soul(&config_path, &["apply", persona.to_str().unwrap()]);

    let (stdout, _, success) = run_soul(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("swapped"));
    assert!(stdout.contains("present"));
    assert!(stdout.contains("# Pirate Captain"));
}

#[test]
fn test_apply_unknown_token_reports_not_found() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_soul(&config_path, &["apply", "no-such-soul-xyz"]);
    assert!(!success);
    assert!(stderr.contains("not found"), "stderr: {}", stderr);
}

#[test]
fn test_cached_list_empty_and_remove_missing() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_soul(&config_path, &["cached", "list"]);
    assert!(success);
    assert!(stdout.contains("no cached souls"));

    let (_, stderr, success) = run_soul(&config_path, &["cached", "remove", "ghost"]);
    assert!(!success);
    assert!(stderr.contains("ghost"), "stderr: {}", stderr);
}

#[test]
fn test_partial_config_is_filled_and_persisted_back() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("config/opensoul.toml");
    fs::create_dir_all(config_path.parent().unwrap()).unwrap();
    fs::write(
        &config_path,
        format!(
            "[paths]\nsoul_file = \"{}/SOUL.md\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, _, success) = run_soul(&config_path, &["status"]);
    assert!(success);

    let rewritten = fs::read_to_string(&config_path).unwrap();
    assert!(rewritten.contains("[registry]"), "config: {}", rewritten);
    assert!(rewritten.contains("[storage]"), "config: {}", rewritten);
    assert!(rewritten.contains("SOUL.md"), "config: {}", rewritten);
}
