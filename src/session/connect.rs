use super::*;

/// Opens a session to `host`, walking the run's credentials in order.
///
/// In dry-run mode a simulated session is returned without any network I/O.
/// Otherwise the primary password is tried first, then every alternate in
/// listed order; each attempt is wrapped in the run's retry policy. Returns
/// `None` once every credential has failed.
pub async fn open_session<C: Connector>(
    connector: &C,
    host: Ipv4Addr,
    config: &RunConfig,
    recorder: Option<SessionRecorder>,
) -> Option<DeviceSession<C::Shell>> {
    let credentials = &config.credentials;

    if config.dry_run {
        info!(
            "[{}] DRY-RUN: simulating connection (username: {})",
            host, credentials.username
        );
        return Some(DeviceSession::simulated(host, recorder));
    }

    for (attempt, password) in credentials.attempt_order().enumerate() {
        let label = if attempt == 0 {
            "primary password".to_string()
        } else {
            format!("alternate password {attempt}")
        };
        let password_tag = fingerprint(password);
        info!(
            "[{}] Connecting as {} with {} ({})",
            host, credentials.username, label, password_tag
        );

        let result = with_retry(&config.connect_retry, &format!("[{host}] connect"), || {
            connector.connect(host, &credentials.username, password)
        })
        .await;

        if let Some(recorder) = recorder.as_ref() {
            let _ = recorder.record_event(SessionEvent::ConnectAttempt {
                host,
                attempt,
                password_fingerprint: password_tag.clone(),
                ok: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
            });
        }

        match result {
            Ok(shell) => {
                info!("[{}] Connected with {}", host, label);
                return Some(DeviceSession::live(host, shell, recorder));
            }
            Err(e) => error!("[{}] Connection with {} failed: {}", host, label, e),
        }
    }

    error!(
        "[{}] {}",
        host,
        ConnectError::CredentialsExhausted(credentials.attempt_count())
    );
    None
}
