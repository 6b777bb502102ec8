//! Certbot adapter
//!
//! Builds certbot command lines for the two invocations the updater needs
//! and runs them with `tokio::process`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, trace};

use cert_updater_common::CertIdentity;
use cert_updater_config::{Environment, UpdaterConfig};

use super::layout::{self, WorkingDir};
use super::{AcmeClient, ClientError, RenewOutcome};

/// A certbot invocation: subcommand plus arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertbotCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl CertbotCommand {
    pub fn new(program: impl Into<PathBuf>, subcommand: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![subcommand.into()],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an option followed by its value
    pub fn option(self, name: &str, value: impl Into<String>) -> Self {
        self.arg(name).arg(value)
    }

    pub fn option_path(self, name: &str, path: &Path) -> Self {
        self.option(name, path.to_string_lossy().into_owned())
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Shell-like rendering for logs and error messages
    pub fn to_command_string(&self) -> String {
        let mut parts = vec![self.program.to_string_lossy().into_owned()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }
}

/// Captured output of a finished invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `-1` when terminated by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// [`AcmeClient`] backed by the certbot executable and a DNS plugin
#[derive(Debug, Clone)]
pub struct CertbotClient {
    program: PathBuf,
    email: String,
    dns_plugin: String,
    environment: Environment,
    acme_server: String,
}

impl CertbotClient {
    pub fn new(
        program: impl Into<PathBuf>,
        email: impl Into<String>,
        dns_plugin: impl Into<String>,
        environment: Environment,
        acme_server: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            email: email.into(),
            dns_plugin: dns_plugin.into(),
            environment,
            acme_server: acme_server.into(),
        }
    }

    pub fn from_config(config: &UpdaterConfig) -> Self {
        Self::new(
            &config.certbot,
            &config.email,
            &config.dns_plugin,
            config.environment,
            &config.acme_server,
        )
    }

    /// Non-interactive arguments shared by every invocation
    fn base_command(&self, subcommand: &str, workdir: &WorkingDir) -> CertbotCommand {
        CertbotCommand::new(&self.program, subcommand)
            .arg("--noninteractive")
            .arg("--agree-tos")
            .option("--email", &self.email)
            .arg(format!("--{}", self.dns_plugin))
            .option_path("--config-dir", &workdir.config_dir())
            .option_path("--work-dir", &workdir.work_dir())
            .option_path("--logs-dir", &workdir.logs_dir())
    }

    /// `certonly` for a first issuance
    pub fn obtain_command(&self, workdir: &WorkingDir, identity: &CertIdentity) -> CertbotCommand {
        let mut cmd = self.base_command("certonly", workdir);
        for domain in identity.domains() {
            cmd = cmd.option("-d", domain);
        }
        cmd = cmd.option("--cert-name", identity.cert_name());

        match self.environment {
            Environment::Production => cmd.option("--server", &self.acme_server),
            Environment::Staging => cmd.arg("--staging"),
        }
    }

    /// `renew` over a restored working directory
    pub fn renew_command(&self, workdir: &WorkingDir) -> CertbotCommand {
        let cmd = self.base_command("renew", workdir);
        match self.environment {
            Environment::Production => cmd,
            Environment::Staging => cmd.arg("--force-renewal").arg("--staging"),
        }
    }

    /// Run a command to completion, failing on a non-zero exit status
    #[instrument(skip_all, fields(command = %cmd.to_command_string()))]
    pub async fn execute(&self, cmd: &CertbotCommand) -> Result<CommandOutput, ClientError> {
        debug!("Executing certbot");

        let output = Command::new(cmd.program())
            .args(cmd.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| {
                error!(error = %source, "Failed to spawn certbot");
                ClientError::Spawn {
                    program: cmd.program().to_string_lossy().into_owned(),
                    source,
                }
            })?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        trace!(stdout = %output.stdout, stderr = %output.stderr, "Certbot output");

        if !output.success() {
            error!(exit_code = output.exit_code, "Certbot failed");
            return Err(ClientError::Failed {
                command: cmd.to_command_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        debug!("Certbot finished");
        Ok(output)
    }
}

#[async_trait]
impl AcmeClient for CertbotClient {
    async fn obtain(
        &self,
        workdir: &WorkingDir,
        identity: &CertIdentity,
    ) -> Result<(), ClientError> {
        info!(
            cert_name = %identity.cert_name(),
            domains = ?identity.domains(),
            environment = %self.environment,
            "Requesting new certificate"
        );
        self.execute(&self.obtain_command(workdir, identity)).await?;
        Ok(())
    }

    async fn renew(&self, workdir: &WorkingDir) -> Result<RenewOutcome, ClientError> {
        layout::install_renewal_hook(workdir.root())?;

        info!(environment = %self.environment, "Renewing certificate");
        self.execute(&self.renew_command(workdir)).await?;

        if layout::renewal_marker_fired(workdir.root()) {
            Ok(RenewOutcome::Renewed)
        } else {
            Ok(RenewOutcome::NotDue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(environment: Environment) -> CertbotClient {
        CertbotClient::new(
            "certbot",
            "admin@example.com",
            "dns-route53",
            environment,
            "https://acme.example/directory",
        )
    }

    fn identity() -> CertIdentity {
        CertIdentity::new(vec!["example.com".into(), "*.example.com".into()], None)
    }

    fn has_pair(cmd: &CertbotCommand, name: &str, value: &str) -> bool {
        cmd.args().windows(2).any(|w| w[0] == name && w[1] == value)
    }

    #[test]
    fn test_obtain_production() {
        let workdir = WorkingDir::create().unwrap();
        let cmd = client(Environment::Production).obtain_command(&workdir, &identity());
        let args = cmd.args();

        assert_eq!(args[0], "certonly");
        assert!(args.contains(&"--noninteractive".to_string()));
        assert!(args.contains(&"--agree-tos".to_string()));
        assert!(args.contains(&"--dns-route53".to_string()));
        assert!(has_pair(&cmd, "--email", "admin@example.com"));
        assert!(has_pair(&cmd, "-d", "example.com"));
        assert!(has_pair(&cmd, "-d", "*.example.com"));
        assert!(has_pair(&cmd, "--cert-name", "example.com"));
        assert!(has_pair(&cmd, "--server", "https://acme.example/directory"));
        assert!(has_pair(
            &cmd,
            "--config-dir",
            &workdir.config_dir().to_string_lossy()
        ));
        assert!(!args.contains(&"--staging".to_string()));
    }

    #[test]
    fn test_obtain_staging() {
        let workdir = WorkingDir::create().unwrap();
        let cmd = client(Environment::Staging).obtain_command(&workdir, &identity());

        assert!(cmd.args().contains(&"--staging".to_string()));
        assert!(!cmd.args().contains(&"--server".to_string()));
    }

    #[test]
    fn test_renew_commands() {
        let workdir = WorkingDir::create().unwrap();

        let production = client(Environment::Production).renew_command(&workdir);
        assert_eq!(production.args()[0], "renew");
        assert!(!production.args().contains(&"--force-renewal".to_string()));
        assert!(!production.args().contains(&"-d".to_string()));
        assert!(has_pair(
            &production,
            "--logs-dir",
            &workdir.logs_dir().to_string_lossy()
        ));

        let staging = client(Environment::Staging).renew_command(&workdir);
        assert!(staging.args().contains(&"--force-renewal".to_string()));
        assert!(staging.args().contains(&"--staging".to_string()));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let workdir = WorkingDir::create().unwrap();
        let client = CertbotClient::new(
            "/nonexistent/certbot",
            "admin@example.com",
            "dns-route53",
            Environment::Staging,
            "",
        );

        let result = client.renew(&workdir).await;
        assert!(matches!(result, Err(ClientError::Spawn { .. })));
    }

    /// Scripts stand in for certbot. Kept in one test so no other test forks
    /// while a script is open for writing.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_scripted_certbot() {
        use std::os::unix::fs::PermissionsExt;

        let scripts = tempfile::TempDir::new().unwrap();
        let script = |name: &str, body: &str| {
            let path = scripts.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        };

        let runs_hooks = script(
            "runs-hooks",
            r#"config_dir=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--config-dir" ]; then config_dir="$2"; shift; fi
  shift
done
for hook in "$config_dir"/renewal-hooks/post/*; do "$hook"; done
exit 0"#,
        );
        let not_due = script("not-due", "exit 0");
        let fails = script("fails", "echo 'rate limited' >&2\nexit 3");

        let scripted = |program: &Path| {
            CertbotClient::new(
                program,
                "admin@example.com",
                "dns-route53",
                Environment::Production,
                "https://acme.example/directory",
            )
        };

        let workdir = WorkingDir::create().unwrap();
        let outcome = scripted(&runs_hooks).renew(&workdir).await.unwrap();
        assert_eq!(outcome, RenewOutcome::Renewed);

        let workdir = WorkingDir::create().unwrap();
        let outcome = scripted(&not_due).renew(&workdir).await.unwrap();
        assert_eq!(outcome, RenewOutcome::NotDue);

        let workdir = WorkingDir::create().unwrap();
        match scripted(&fails).obtain(&workdir, &identity()).await {
            Err(ClientError::Failed {
                exit_code, stderr, ..
            }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "rate limited");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
