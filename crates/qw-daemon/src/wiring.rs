//! Builds the engine's collaborators from the effective config and secrets.
//!
//! Shared by the daemon binary and `qw-cli` so both talk to the same broker
//! and mail relay the same way.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use qw_broker::{BrokerClient, ManagementClient, ManagementSettings};
use qw_config::{GuardianConfig, ResolvedSecrets};
use qw_db::Store;
use qw_notify::{LogNotifier, Notifier, SmtpNotifier, SmtpSettings};
use qw_reconcile::{Engine, EngineSettings, Guardian};
use tracing::info;

pub fn management_settings(cfg: &GuardianConfig, secrets: &ResolvedSecrets) -> ManagementSettings {
    ManagementSettings {
        base_url: cfg.rabbit.management_url.clone(),
        vhost: cfg.rabbit.vhost.clone(),
        user: cfg.rabbit.user.clone(),
        password: secrets.rabbit_password.clone(),
        timeout: std::time::Duration::from_secs(cfg.rabbit.timeout_secs),
    }
}

pub fn broker_from_config(
    cfg: &GuardianConfig,
    secrets: &ResolvedSecrets,
) -> Result<Arc<dyn BrokerClient>> {
    let client = ManagementClient::new(management_settings(cfg, secrets))
        .context("broker client setup failed")?;
    Ok(Arc::new(client))
}

/// SMTP when emails are enabled, a log-only notifier otherwise.
pub fn notifier_from_config(
    cfg: &GuardianConfig,
    secrets: &ResolvedSecrets,
) -> Result<Arc<dyn Notifier>> {
    if !cfg.email.enabled {
        info!("emails disabled; notifications are logged only");
        return Ok(Arc::new(LogNotifier));
    }
    let settings = SmtpSettings {
        from: cfg.email.from.clone(),
        server: cfg.email.smtp_server.clone(),
        port: cfg.email.smtp_port,
        ssl: cfg.email.ssl,
        account: cfg.email.account.clone(),
        password: secrets.email_password.clone(),
    };
    let notifier = SmtpNotifier::new(&settings).context("smtp notifier setup failed")?;
    Ok(Arc::new(notifier))
}

pub fn engine_from_config(
    cfg: &GuardianConfig,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
) -> Result<Engine> {
    let settings = EngineSettings::from_config(cfg)?;
    Engine::new(settings, broker, store, notifier)
        .map_err(|e| anyhow!("CONFIG_THRESHOLDS_INVALID: {e}"))
}

/// Engine plus the polling loop configured from `cfg.polling`.
pub fn guardian_from_config(
    cfg: &GuardianConfig,
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
) -> Result<Guardian> {
    let engine = engine_from_config(cfg, broker, store, notifier)?;
    Ok(Guardian::new(
        engine,
        cfg.polling.interval(),
        cfg.polling.backoff_step(),
        cfg.polling.max_interval(),
    ))
}
