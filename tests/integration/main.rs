//! Integration tests for Navo

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[suites.web]
run_list = ["recipe[web]"]

[suites.web_api]
run_list = ["recipe[api]"]

[suites.db]
run_list = ["recipe[db]"]
"#;

    fn navo() -> Command {
        let mut cmd = cargo_bin_cmd!("navo");
        cmd.env_remove("NAVO_CONFIG").env_remove("RUST_LOG");
        cmd
    }

    fn repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".navo.toml"), CONFIG).unwrap();
        dir
    }

    #[test]
    fn help_displays() {
        navo()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Chef cookbook test suites"));
    }

    #[test]
    fn version_displays() {
        navo()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("navo"));
    }

    #[test]
    fn missing_config_fails_with_hint() {
        let dir = TempDir::new().unwrap();
        navo()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("No configuration file"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn list_shows_suites() {
        let dir = repo();
        navo()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .success()
            .stdout(predicate::str::contains("SUITE"))
            .stdout(predicate::str::contains("web_api"))
            .stdout(predicate::str::contains("absent"));
    }

    #[test]
    fn list_from_nested_directory() {
        let dir = repo();
        let nested = dir.path().join("cookbooks").join("web");
        std::fs::create_dir_all(&nested).unwrap();

        navo()
            .current_dir(&nested)
            .args(["list", "--format", "plain"])
            .assert()
            .success()
            .stdout("db\nweb\nweb_api\n");
    }

    #[test]
    fn list_json_with_pattern() {
        let dir = repo();
        navo()
            .current_dir(dir.path())
            .args(["list", "^web", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"name\": \"web\""))
            .stdout(predicate::str::contains("\"name\": \"web_api\""))
            .stdout(predicate::str::contains("\"db\"").not());
    }

    #[test]
    fn explicit_config_path() {
        let dir = repo();
        let elsewhere = TempDir::new().unwrap();
        navo()
            .current_dir(elsewhere.path())
            .args(["-c"])
            .arg(dir.path().join(".navo.toml"))
            .args(["list", "--format", "plain", "db"])
            .assert()
            .success()
            .stdout("db\n");
    }

    #[test]
    fn unmatched_pattern_fails() {
        let dir = repo();
        navo()
            .current_dir(dir.path())
            .args(["converge", "cache"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("No suites match 'cache'"));
    }

    #[test]
    fn login_requires_a_single_suite() {
        let dir = repo();
        navo()
            .current_dir(dir.path())
            .args(["login", "^web"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("matched more than one suite"));
    }

    #[test]
    fn invalid_config_is_reported() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".navo.toml"), "destroy = \"sometimes\"\n").unwrap();
        navo()
            .current_dir(dir.path())
            .arg("list")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));
    }

    #[test]
    fn missing_runtime_is_reported() {
        let dir = repo();
        std::fs::write(
            dir.path().join(".navo.toml"),
            format!("[docker]\nprogram = \"navo-no-such-engine\"\n{}", CONFIG),
        )
        .unwrap();
        navo()
            .current_dir(dir.path())
            .args(["create", "db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("navo-no-such-engine"));
    }
}
