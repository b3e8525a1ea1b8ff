use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::TempDir;

const EXIT_TEMPFAIL: i32 = 75;

/// Command wired to a temp-dir filesystem remote via environment variables,
/// the same layering the binary reads through figment.
fn icebox(dir: &TempDir, job_delay_secs: u64) -> Command {
    let mut cmd = Command::cargo_bin("icebox").unwrap();
    cmd.env_remove("ICEBOX_CONFIG")
        .env("ICEBOX_REMOTE__BACKEND", "filesystem")
        .env("ICEBOX_REMOTE__ROOT", dir.path().join("remote"))
        .env("ICEBOX_REMOTE__JOB_DELAY_SECS", job_delay_secs.to_string())
        .env("ICEBOX_CACHE__PATH", dir.path().join("cache.db"));
    cmd
}

fn create_vault(dir: &TempDir, job_delay_secs: u64) {
    icebox(dir, job_delay_secs)
        .args(["vault", "create", "v"])
        .assert()
        .success();
}

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn upload_then_list_shows_the_archive() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "doc1.txt", b"hello archive");

    icebox(&dir, 0)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "list", "v"])
        .assert()
        .success()
        .stdout("doc1.txt\n");
}

#[test]
fn stdin_upload_records_the_stdin_sentinel_name() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);

    icebox(&dir, 0)
        .args(["archive", "upload", "v", "-"])
        .write_stdin("streamed bytes")
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "list", "v"])
        .assert()
        .success()
        .stdout("<stdin>\n");
}

#[test]
fn vault_listing_includes_created_vaults() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);

    icebox(&dir, 0)
        .args(["vault", "list"])
        .assert()
        .success()
        .stdout("v\n");
}

#[test]
fn checkpresent_prints_the_name_for_a_fresh_upload() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "doc1.txt", b"hello");

    icebox(&dir, 0)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "checkpresent", "v", "doc1.txt"])
        .assert()
        .success()
        .stdout("doc1.txt\n");
}

#[test]
fn checkpresent_is_silent_success_for_unknown_archives() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);

    icebox(&dir, 0)
        .args(["archive", "checkpresent", "v", "ghost"])
        .assert()
        .success()
        .stdout("")
        .stderr(contains("not found"));
}

#[test]
fn retrieve_writes_byte_exact_output_over_a_longer_file() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "doc1.txt", b"exact payload");
    let out = dir.path().join("out.bin");
    fs::write(&out, b"pre-existing content that is much longer than the payload").unwrap();

    icebox(&dir, 0)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "retrieve", "v", "doc1.txt", "--wait", "-o"])
        .arg(&out)
        .assert()
        .success();

    assert_eq!(fs::read(&out).unwrap(), b"exact payload");
}

#[test]
fn retrieve_to_stdout_streams_the_payload() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "doc1.txt", b"stream me");

    icebox(&dir, 0)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "retrieve", "v", "doc1.txt", "--wait", "-o", "-"])
        .assert()
        .success()
        .stdout("stream me");
}

#[test]
fn retrieve_without_wait_is_a_temp_failure() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 3600);
    let file = write_file(&dir, "doc1.txt", b"later");

    icebox(&dir, 3600)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    icebox(&dir, 3600)
        .args(["archive", "retrieve", "v", "doc1.txt"])
        .assert()
        .code(EXIT_TEMPFAIL)
        .stderr(contains("queued retrieval job"));
}

#[test]
fn multi_retrieve_combines_outcomes_into_one_temp_failure() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 3600);
    let file = write_file(&dir, "doc1.txt", b"later");

    icebox(&dir, 3600)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();

    // One retryable (job queued), one hard failure (unknown archive):
    // the combined outcome is retryable and reports both.
    icebox(&dir, 3600)
        .args(["archive", "retrieve", "v", "doc1.txt", "ghost"])
        .assert()
        .code(EXIT_TEMPFAIL)
        .stderr(contains("queued retrieval job"))
        .stderr(contains("'ghost' not found"));
}

#[test]
fn multi_retrieve_rejects_a_single_output_filename() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);

    icebox(&dir, 0)
        .args(["archive", "retrieve", "v", "a", "b", "-o", "out.bin"])
        .assert()
        .code(1)
        .stderr(contains("cannot specify output filename"));
}

#[test]
fn vault_sync_without_wait_reports_the_queued_job() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 3600);

    icebox(&dir, 3600)
        .args(["vault", "sync", "v"])
        .assert()
        .code(EXIT_TEMPFAIL)
        .stderr(contains("queued inventory job"));
}

#[test]
fn job_list_shows_pending_inventory_jobs() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 3600);

    icebox(&dir, 3600)
        .args(["vault", "sync", "v"])
        .assert()
        .code(EXIT_TEMPFAIL);

    icebox(&dir, 3600)
        .args(["job", "list"])
        .assert()
        .success()
        .stdout(contains("i/p"));
}

#[test]
fn delete_tombstones_the_archive() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "doc1.txt", b"bye");

    icebox(&dir, 0)
        .args(["archive", "upload", "v", &file])
        .assert()
        .success();
    icebox(&dir, 0)
        .args(["archive", "delete", "v", "doc1.txt"])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["archive", "list", "v"])
        .assert()
        .success()
        .stdout("");

    icebox(&dir, 0)
        .args(["archive", "delete", "v", "doc1.txt"])
        .assert()
        .code(1)
        .stderr(contains("not found"));
}

#[test]
fn missing_configuration_is_a_hard_error_with_guidance() {
    let mut cmd = Command::cargo_bin("icebox").unwrap();
    for (key, _) in std::env::vars() {
        if key.starts_with("ICEBOX_") {
            cmd.env_remove(key);
        }
    }
    cmd.args(["vault", "list"])
        .assert()
        .code(1)
        .stderr(contains("no configuration provided"));
}

#[test]
fn annex_hook_empty_key_sentinels() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let empty_key = "SHA256E-s0--deadbeef";

    // Storing and removing the empty key are no-ops; checkpresent prints
    // the key.
    icebox(&dir, 0)
        .args(["annex-hook", "v", "store", empty_key])
        .assert()
        .success();
    icebox(&dir, 0)
        .args(["annex-hook", "v", "remove", empty_key])
        .assert()
        .success();
    icebox(&dir, 0)
        .args(["annex-hook", "v", "checkpresent", empty_key])
        .assert()
        .success()
        .stdout(format!("{empty_key}\n"));

    // Retrieving it creates the empty file locally.
    let target = dir.path().join("restored");
    icebox(&dir, 0)
        .args(["annex-hook", "v", "retrieve", empty_key])
        .arg(&target)
        .assert()
        .success();
    assert_eq!(fs::metadata(&target).unwrap().len(), 0);
}

#[test]
fn annex_hook_store_and_checkpresent_round_trip() {
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let key = "SHA256E-s5--cafe";
    let file = write_file(&dir, "object", b"12345");

    icebox(&dir, 0)
        .args(["annex-hook", "v", "store", key, &file])
        .assert()
        .success();

    icebox(&dir, 0)
        .args(["annex-hook", "v", "checkpresent", key])
        .assert()
        .success()
        .stdout(format!("{key}\n"));

    // Remove is idempotent.
    icebox(&dir, 0)
        .args(["annex-hook", "v", "remove", key])
        .assert()
        .success();
    icebox(&dir, 0)
        .args(["annex-hook", "v", "remove", key])
        .assert()
        .success();
}

#[test]
fn duplicate_names_force_id_qualified_listing(){
    let dir = TempDir::new().unwrap();
    create_vault(&dir, 0);
    let file = write_file(&dir, "payload", b"x");

    for _ in 0..2 {
        icebox(&dir, 0)
            .args(["archive", "upload", "v", &file, "--name", "foo"])
            .assert()
            .success();
    }

    let assert = icebox(&dir, 0)
        .args(["archive", "list", "v"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in &lines {
        assert!(line.starts_with("id:"), "{line}");
        assert!(line.ends_with("\tfoo"), "{line}");
    }

    // A bare-name reference is now ambiguous.
    icebox(&dir, 0)
        .args(["archive", "checkpresent", "v", "foo"])
        .assert()
        .code(1)
        .stderr(contains("ambiguous"));
}
