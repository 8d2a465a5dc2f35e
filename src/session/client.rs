use super::*;

/// How long a detached channel is kept open so the remote side can pick up
/// the command before the handle is dropped.
const DETACHED_GRACE: Duration = Duration::from_secs(3);

/// SFTP request timeout for configuration uploads.
const UPLOAD_TIMEOUT_SECS: u64 = 30;

impl SshConnector {
    pub fn new(level: SecurityLevel, timeouts: SessionTimeouts) -> Self {
        Self {
            port: 22,
            level,
            server_check: level.server_check(),
            timeouts,
        }
    }

    /// Connector using the run's security level and timeouts.
    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.security, config.timeouts)
    }

    /// Overrides the host key check implied by the security level.
    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl Connector for SshConnector {
    type Shell = SshShell;

    async fn connect(
        &self,
        host: Ipv4Addr,
        username: &str,
        password: &str,
    ) -> Result<SshShell, ConnectError> {
        let budget = self.timeouts.attempt_budget();
        let config = Config {
            preferred: self.level.profile().preferred(),
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        };

        let connecting = Client::connect_with_config(
            (host.to_string(), self.port),
            username,
            AuthMethod::with_password(password),
            self.server_check.clone(),
            config,
        );
        let client = tokio::time::timeout(budget, connecting)
            .await
            .map_err(|_| ConnectError::ConnectTimeout(budget.as_secs()))??;
        debug!("[{}] SSH session established", host);

        Ok(SshShell {
            host,
            client: Some(client),
        })
    }
}

impl SshShell {
    fn client(&self) -> Result<&Client, ConnectError> {
        self.client.as_ref().ok_or(ConnectError::SessionClosed)
    }
}

impl RemoteShell for SshShell {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectError> {
        let result = self.client()?.execute(command).await?;
        trace!(
            "[{}] '{}' exited with {}",
            self.host, command, result.exit_status
        );
        Ok(ExecOutput {
            exit_status: result.exit_status,
            stdout: result.stdout,
            stderr: result.stderr,
        })
    }

    async fn exec_detached(&mut self, command: &str) -> Result<(), ConnectError> {
        let mut channel = self.client()?.get_channel().await?;
        channel.exec(false, command).await?;

        let host = self.host;
        tokio::spawn(async move {
            // The device may drop the connection mid-command (reboot), so the
            // outcome is never inspected.
            let _ = tokio::time::timeout(DETACHED_GRACE, channel.wait()).await;
            trace!("[{}] detached channel released", host);
        });
        Ok(())
    }

    async fn fetch_file(&mut self, remote: &str, local: &Path) -> Result<(), ConnectError> {
        self.client()?
            .download_file(remote.to_string(), local)
            .await?;
        debug!("[{}] downloaded {} to {}", self.host, remote, local.display());
        Ok(())
    }

    async fn push_file(&mut self, local: &Path, remote: &str) -> Result<(), ConnectError> {
        self.client()?
            .upload_file(
                local.display().to_string(),
                remote.to_string(),
                Some(UPLOAD_TIMEOUT_SECS),
                None,
                false,
            )
            .await?;
        debug!("[{}] uploaded {} to {}", self.host, local.display(), remote);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        // async-ssh2-tokio disconnects when the client is dropped.
        if self.client.take().is_some() {
            debug!("[{}] SSH session closed", self.host);
        }
        Ok(())
    }
}
