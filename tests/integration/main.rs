//! Integration tests for the artifact cache

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a config rooted in `dir` and return its path
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let config = format!(
        r#"
[general]
audit_log_path = "{audit}"

[server]
public_url = "http://cache.test"

[storage]
data_dir = "{data}"

{extra}
"#,
        audit = dir.join("audit.log").display(),
        data = dir.join("data").display(),
    );
    let path = dir.join("config.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn scope_root(dir: &Path, scope: &str) -> PathBuf {
    dir.join("data").join("scopes").join(scope)
}

fn write_artifact(root: &Path, rel: &str, age_days: u64) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"artifact").unwrap();
    let when = std::time::SystemTime::now() - std::time::Duration::from_secs(age_days * 86_400);
    filetime::set_file_mtime(&path, filetime::FileTime::from_system_time(when)).unwrap();
    path
}

mod cli_tests {
    use super::*;
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;

    fn cache(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("artifact-cache");
        cmd.env("ARTIFACT_CACHE_CONFIG", config);
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("artifact-cache")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("HTTP build cache"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("artifact-cache")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("artifact-cache"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        cache(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_masks_tokens() {
        let dir = TempDir::new().unwrap();
        let config = write_config(
            dir.path(),
            r#"
[access]
mode = "token"

[[access.tokens]]
name = "ci"
token = "super-secret-value"
grants = ["*:write"]
"#,
        );
        cache(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[reaper]"))
            .stdout(predicate::str::contains("super-secret-value").not());
    }

    #[test]
    fn config_init_creates_then_refuses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fresh").join("config.toml");

        cache(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration initialized"));
        assert!(path.is_file());

        cache(&path)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn missing_explicit_config_fails() {
        let dir = TempDir::new().unwrap();
        cache(&dir.path().join("absent.toml"))
            .args(["ls", "global"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"))
            .stderr(predicate::str::contains("config init"));
    }

    #[test]
    fn ls_unknown_scope() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        cache(&config)
            .args(["ls", "nightly"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Scope not found"))
            .stderr(predicate::str::contains("[[scopes]]"));
    }

    #[test]
    fn ls_lists_and_previews() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        let root = scope_root(dir.path(), "global");
        write_artifact(&root, "org/app/1.0/app.pom", 0);
        write_artifact(&root, "org/app/1.0/app.jar", 0);

        cache(&config)
            .args(["ls", "global", "org/app/1.0", "--format", "plain"])
            .assert()
            .success()
            .stdout("app.jar\napp.pom\n");

        cache(&config)
            .args(["ls", "global", "org/app/1.0", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "http://cache.test/global/browse/org/app/1.0/app.jar",
            ));

        cache(&config)
            .args(["ls", "global", "org/app/1.0/app.pom"])
            .assert()
            .success()
            .stdout("artifact");
    }

    #[test]
    fn ls_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        cache(&config)
            .args(["ls", "global", "../../"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("escapes cache root"));
    }

    #[test]
    fn reap_dry_run_then_sweep() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        let root = scope_root(dir.path(), "global");
        let old = write_artifact(&root, "g/a/1.0/h1/a.jar", 8);
        let recent = write_artifact(&root, "g/a/1.0/h2/a.jar", 6);

        cache(&config)
            .args(["reap", "--dry-run"])
            .assert()
            .success()
            .stdout(predicate::str::contains("would remove 1 file(s), 1 dir(s)"))
            .stdout(predicate::str::contains("Dry run"));
        assert!(old.exists());

        cache(&config)
            .args(["reap", "--scope", "global", "--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"deleted_files\": 1"));
        assert!(!old.exists());
        assert!(!root.join("g/a/1.0/h1").exists());
        assert!(recent.exists());

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert!(audit.contains("reaper.sweep"));
    }

    #[test]
    fn reap_days_override() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        let root = scope_root(dir.path(), "global");
        let file = write_artifact(&root, "a/b.jar", 3);

        cache(&config)
            .args(["reap", "--days", "2", "--format", "plain"])
            .assert()
            .success()
            .stdout("global 1 1 8\n");
        assert!(!file.exists());
        assert!(root.is_dir());
    }

    #[test]
    fn reap_unknown_scope_fails() {
        let dir = TempDir::new().unwrap();
        let config = write_config(dir.path(), "");
        cache(&config)
            .args(["reap", "--scope", "nope"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Scope not found: nope"));
    }
}

mod http_tests {
    use super::*;
    use artifact_cache::config::ConfigManager;
    use artifact_cache::server::{app, AppState};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn router(dir: &Path, extra: &str) -> Router {
        let path = write_config(dir, extra);
        let config = ConfigManager::with_path(path).load().await.unwrap();
        let state = AppState::from_config(&config).unwrap();
        app(state)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: &'static [u8]) -> Response {
        send_with(router, method, uri, body, None).await
    }

    async fn send_with(
        router: &Router,
        method: &str,
        uri: &str,
        body: &'static [u8],
        token: Option<&str>,
    ) -> Response {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        router
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    #[tokio::test]
    async fn health() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        let response = send(&app, "GET", "/health", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"ok");
    }

    #[tokio::test]
    async fn put_then_get() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        let uri = "/global/repository/org.group/artifact/1.0/acf62bbb/artifact.jar";

        let response = send(&app, "PUT", uri, b"hello").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let receipt = body_json(response).await;
        assert_eq!(receipt["key"], "org.group/artifact/1.0/acf62bbb/artifact.jar");
        assert_eq!(receipt["size"], 5);
        assert_eq!(
            receipt["sha256"],
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let response = send(&app, "GET", uri, b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(headers[header::CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[header::CONTENT_LENGTH], "5");
        assert!(headers[header::LAST_MODIFIED]
            .to_str()
            .unwrap()
            .ends_with("GMT"));
        assert_eq!(body_bytes(response).await, b"hello");

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert!(audit.contains("artifact.stored"));
    }

    #[tokio::test]
    async fn overwrite_replaces() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        let uri = "/global/repository/a/b.pom";

        send(&app, "PUT", uri, b"first, and longer").await;
        send(&app, "PUT", uri, b"second").await;

        let response = send(&app, "GET", uri, b"").await;
        assert_eq!(body_bytes(response).await, b"second");
    }

    #[tokio::test]
    async fn missing_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;

        let response = send(&app, "GET", "/global/repository/never/stored.jar", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");

        let response = send(&app, "GET", "/nightly/repository/a.jar", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "SCOPE_NOT_FOUND");
    }

    #[tokio::test]
    async fn other_verbs_are_not_implemented() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;

        for method in ["POST", "DELETE", "HEAD", "PATCH"] {
            let response = send(&app, method, "/global/repository/a.jar", b"").await;
            assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED, "{method}");
        }
        assert!(!scope_root(dir.path(), "global").join("a.jar").exists());

        for uri in ["/global/repository", "/global/repository/"] {
            for method in ["POST", "DELETE"] {
                let response = send(&app, method, uri, b"").await;
                assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED, "{method} {uri}");
            }
        }
    }

    #[tokio::test]
    async fn empty_key_is_not_an_artifact() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;

        let response = send(&app, "PUT", "/global/repository/", b"x").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "INVALID_KEY");

        let response = send(&app, "GET", "/global/repository", b"").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn escapes_are_rejected() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;

        for uri in [
            "/global/repository/a/../../outside.jar",
            "/global/repository/%2e%2e/outside.jar",
        ] {
            let response = send(&app, "PUT", uri, b"x").await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body_json(response).await["error"]["code"], "PATH_ESCAPE");
        }
        assert!(!dir.path().join("data/scopes/outside.jar").exists());
        assert!(!dir.path().join("data/outside.jar").exists());
    }

    #[tokio::test]
    async fn put_over_directory_conflicts() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        send(&app, "PUT", "/global/repository/a/b/c.jar", b"x").await;

        let response = send(&app, "PUT", "/global/repository/a/b", b"y").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn put_beneath_stored_file_conflicts() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        let response = send(&app, "PUT", "/global/repository/a.jar", b"jar").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&app, "PUT", "/global/repository/a.jar/child", b"x").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "KEY_UNDER_FILE");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("a.jar/child"));

        let response = send(&app, "GET", "/global/repository/a.jar", b"").await;
        assert_eq!(body_bytes(response).await, b"jar");
    }

    #[tokio::test]
    async fn upload_limit() {
        let dir = TempDir::new().unwrap();
        let path = write_config(dir.path(), "");
        let mut config = ConfigManager::with_path(path).load().await.unwrap();
        config.server.max_artifact_mb = 1;
        let app = app(AppState::from_config(&config).unwrap());

        static BIG: [u8; 1024 * 1024 + 1] = [7u8; 1024 * 1024 + 1];
        let response = send(&app, "PUT", "/global/repository/big.bin", &BIG).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!scope_root(dir.path(), "global").join("big.bin").exists());

        let response = send(&app, "PUT", "/global/repository/small.bin", b"fits").await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn browse_lists_root_relative_hrefs() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), "").await;
        send(&app, "PUT", "/global/repository/a/x.jar", b"x").await;
        send(&app, "PUT", "/global/repository/a/y.jar", b"yy").await;

        let response = send(&app, "GET", "/global/browse/a", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing["kind"], "directory");
        let entries = listing["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["href"], "http://cache.test/global/browse/a/x.jar");
        assert_eq!(entries[1]["href"], "http://cache.test/global/browse/a/y.jar");
        assert_eq!(entries[1]["size"], 2);

        let response = send(&app, "GET", "/global/browse", b"").await;
        let listing = body_json(response).await;
        assert_eq!(listing["entries"][0]["name"], "a");
        assert_eq!(listing["entries"][0]["is_directory"], true);

        let response = send(&app, "GET", "/global/browse/a/y.jar", b"").await;
        let preview = body_json(response).await;
        assert_eq!(preview["kind"], "file");
        assert_eq!(preview["content"], "yy");

        let response = send(&app, "GET", "/global/browse/not/there", b"").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["entries"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    const TOKENS: &str = r#"
[access]
mode = "token"

[[access.tokens]]
name = "ci"
token = "writer-token"
grants = ["global:write"]

[[access.tokens]]
name = "dev"
token = "reader-token"
grants = ["*:read"]
"#;

    #[tokio::test]
    async fn token_gate_guards_scopes() {
        let dir = TempDir::new().unwrap();
        let app = router(dir.path(), TOKENS).await;
        let uri = "/global/repository/g/a/1.0/a.jar";

        let response = send(&app, "GET", uri, b"").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let response = send_with(&app, "GET", uri, b"", Some("wrong")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send_with(&app, "PUT", uri, b"data", Some("reader-token")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(!scope_root(dir.path(), "global").join("g").exists());

        let response = send_with(&app, "PUT", uri, b"data", Some("writer-token")).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send_with(&app, "GET", uri, b"", Some("reader-token")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"data");

        let response = send_with(&app, "GET", "/global/browse", b"", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let audit = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert!(audit.contains("access.denied"));
    }
}
