#[cfg(test)]
mod cli {
    use std::{error::Error, fs, io::Write};

    use assert_cmd::Command;
    use http::StatusCode;
    use predicates::{
        prelude::PredicateBooleanExt,
        str::{contains, is_empty},
    };
    use pretty_assertions::assert_eq;
    use tempfile::{NamedTempFile, tempdir};
    use test_utils::{main_command, mock_server, ratelimit_response, too_many_requests};
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string, header, method, path},
    };

    type Result<T> = std::result::Result<T, Box<dyn Error>>;

    /// The binary with a clean environment, pointed at the given server
    fn courier(server: &MockServer) -> Command {
        let mut cmd = main_command!();
        cmd.env_remove("COURIER_TOKEN")
            .env_remove("RUST_LOG")
            .arg("--base-url")
            .arg(server.uri());
        cmd
    }

    #[tokio::test]
    async fn test_success() {
        let server = mock_server!(StatusCode::OK, set_body_string("pong"));

        courier(&server)
            .arg("GET")
            .arg("/gateway")
            .assert()
            .success()
            .stdout(contains("[200] OK"))
            .stdout(contains("pong"));
    }

    #[tokio::test]
    async fn test_params_headers_token_and_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/42/messages"))
            .and(header("authorization", "Bearer s3cret"))
            .and(header("x-audit-log-reason", "testing"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"content":"hi"}"#))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        courier(&server)
            .env("COURIER_TOKEN", "s3cret")
            .arg("--token-type")
            .arg("Bearer")
            .arg("-H")
            .arg("X-Audit-Log-Reason: testing")
            .arg("post")
            .arg("/channels/:channel_id/messages")
            .arg("-p")
            .arg("channel_id=42")
            .arg("--json")
            .arg(r#"{"content":"hi"}"#)
            .assert()
            .success();
    }

    #[tokio::test]
    async fn test_failed_request() {
        let server = mock_server!(
            StatusCode::NOT_FOUND,
            set_body_string(r#"{"message": "Unknown Channel"}"#)
        );

        courier(&server)
            .arg("GET")
            .arg("/channels/1")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("Not found"))
            .stdout(contains("Unknown Channel"));
    }

    #[tokio::test]
    async fn test_missing_route_parameter() {
        let server = mock_server!(StatusCode::OK);

        courier(&server)
            .arg("GET")
            .arg("/channels/:channel_id")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("requires parameter `channel_id`"));

        let received = server.received_requests().await.unwrap_or_default();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn test_repeat() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ratelimit_response!(StatusCode::OK, "abcd", 10, 9, 5.0))
            .expect(3)
            .mount(&server)
            .await;

        let output = courier(&server)
            .arg("GET")
            .arg("/gateway")
            .arg("--repeat")
            .arg("3")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();

        let stdout = String::from_utf8(output).unwrap();
        assert_eq!(stdout.matches("[200] OK").count(), 3);
    }

    #[tokio::test]
    async fn test_rate_limited_requests_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(too_many_requests!(100))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        courier(&server)
            .arg("GET")
            .arg("/gateway")
            .assert()
            .success()
            .stdout(contains("[200] OK"))
            .stdout(contains("429").not());
    }

    #[tokio::test]
    async fn test_global_rate_limit_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(too_many_requests!(100, true))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        courier(&server)
            .arg("GET")
            .arg("/gateway")
            .assert()
            .success()
            .stdout(contains("[204] No Content"))
            .stderr(contains("Global rate limit hit"));
    }

    #[tokio::test]
    async fn test_unretryable_rate_limit() {
        let server = mock_server!(StatusCode::TOO_MANY_REQUESTS);

        courier(&server)
            .arg("GET")
            .arg("/gateway")
            .assert()
            .failure()
            .code(2)
            .stdout(contains("Rate limited"));
    }

    #[tokio::test]
    async fn test_config_file() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/channels/7"))
            .and(header("authorization", "Bot from-file"))
            .and(header("x-origin", "config"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = NamedTempFile::new()?;
        writeln!(config, "base_url = \"{}\"", server.uri())?;
        writeln!(config, "token = \"from-file\"")?;
        writeln!(config, "reclaim_interval = \"1s\"")?;
        writeln!(config, "[header]")?;
        writeln!(config, "X-Origin = \"config\"")?;

        main_command!()
            .env_remove("COURIER_TOKEN")
            .arg("--config")
            .arg(config.path())
            .arg("DELETE")
            .arg("/channels/:channel_id")
            .arg("-p")
            .arg("channel_id=7")
            .assert()
            .success();

        Ok(())
    }

    #[tokio::test]
    async fn test_default_config_file() -> Result<()> {
        let server = mock_server!(StatusCode::OK);
        let dir = tempdir()?;
        fs::write(
            dir.path().join("courier.toml"),
            format!("base_url = \"{}\"\n", server.uri()),
        )?;

        main_command!()
            .current_dir(dir.path())
            .env_remove("COURIER_TOKEN")
            .arg("GET")
            .arg("/gateway")
            .assert()
            .success()
            .stdout(contains("[200] OK"));

        Ok(())
    }

    #[test]
    fn test_invalid_default_config() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("courier.toml"), "base_url = 42\n")?;

        main_command!()
            .current_dir(dir.path())
            .arg("GET")
            .arg("/gateway")
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load default configuration file"));

        Ok(())
    }

    #[test]
    fn test_config_invalid_keys() -> Result<()> {
        let mut config = NamedTempFile::new()?;
        writeln!(config, "this_is_invalid = true")?;

        main_command!()
            .arg("--config")
            .arg(config.path())
            .arg("GET")
            .arg("/gateway")
            .assert()
            .failure()
            .code(3)
            .stderr(contains("unknown field `this_is_invalid`, expected one of"));

        Ok(())
    }

    #[test]
    fn test_missing_config_error() {
        main_command!()
            .arg("--config")
            .arg("config.does.not.exist.toml")
            .arg("GET")
            .arg("/gateway")
            .assert()
            .failure()
            .code(3)
            .stderr(contains("Cannot load configuration file"));
    }

    #[test]
    fn test_invalid_base_url() {
        main_command!()
            .arg("--base-url")
            .arg("not a url")
            .arg("GET")
            .arg("/gateway")
            .assert()
            .failure()
            .code(1)
            .stdout(is_empty());
    }

    #[test]
    fn test_usage_errors() {
        main_command!()
            .arg("GET")
            .arg("/gateway")
            .arg("--repeat")
            .arg("0")
            .assert()
            .failure();

        main_command!()
            .arg("GET")
            .arg("/gateway")
            .arg("-p")
            .arg("channel_id")
            .assert()
            .failure()
            .stderr(contains("name=value"));
    }
}
