//! Account-management flows on top of [`BrokerClient`].
//!
//! An account may only touch its own namespace: it reads any exchange but
//! configures and writes only `queue/<user>/...` and `exchange/<user>/...`.

use tracing::{info, warn};

use crate::{BrokerClient, BrokerError, Permissions};

/// Permission regexes granted to a freshly provisioned account.
pub fn account_permissions(username: &str) -> Permissions {
    let u = regex::escape(username);
    let write_conf = format!("^(queue/{u}/.*|exchange/{u}/.*)");
    Permissions {
        configure: write_conf.clone(),
        write: write_conf,
        read: format!("^(queue/{u}/.*|exchange/.*)"),
    }
}

/// At least six characters, with at least one digit and one letter.
pub fn strong_password(password: &str) -> bool {
    password.chars().count() >= 6
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| c.is_ascii_alphabetic())
}

/// Create the broker user and grant its namespace permissions.
pub async fn provision_account(
    client: &dyn BrokerClient,
    vhost: &str,
    username: &str,
    password: &str,
) -> Result<(), BrokerError> {
    client.create_account(username, password, "").await?;
    client
        .set_permissions(vhost, username, &account_permissions(username))
        .await?;
    info!(account = %username, "broker account provisioned");
    Ok(())
}

/// Provision `username` only if the broker has no such user yet.
///
/// Returns `false`, touching nothing, when the user already exists.
pub async fn provision_new_account(
    client: &dyn BrokerClient,
    vhost: &str,
    username: &str,
    password: &str,
) -> Result<bool, BrokerError> {
    if client.get_account(username).await?.is_some() {
        warn!(account = %username, "broker user already exists; not provisioning");
        return Ok(false);
    }
    provision_account(client, vhost, username, password).await?;
    Ok(true)
}

/// Rotate a password by recreating the broker user.
///
/// The delete is best-effort: a user missing on the broker is recreated.
pub async fn change_password(
    client: &dyn BrokerClient,
    vhost: &str,
    username: &str,
    new_password: &str,
) -> Result<(), BrokerError> {
    if let Err(e) = client.delete_account(username).await {
        if e.is_transport() {
            return Err(e);
        }
        warn!(account = %username, error = %e, "delete before password change failed; recreating");
    }
    provision_account(client, vhost, username, new_password).await
}

/// Remove the broker user. A user already gone is not an error.
pub async fn deprovision_account(
    client: &dyn BrokerClient,
    username: &str,
) -> Result<(), BrokerError> {
    match client.delete_account(username).await {
        Ok(()) => {
            info!(account = %username, "broker account deleted");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_are_scoped_to_the_account() {
        let p = account_permissions("alice");
        assert_eq!(p.read, "^(queue/alice/.*|exchange/.*)");
        assert_eq!(p.write, "^(queue/alice/.*|exchange/alice/.*)");
        assert_eq!(p.configure, p.write);
    }

    #[test]
    fn username_is_regex_escaped() {
        let p = account_permissions("a.b");
        assert_eq!(p.write, r"^(queue/a\.b/.*|exchange/a\.b/.*)");
    }

    #[test]
    fn password_strength() {
        assert!(strong_password("abc123"));
        assert!(!strong_password("abcdef"));
        assert!(!strong_password("123456"));
        assert!(!strong_password("ab12"));
    }
}
