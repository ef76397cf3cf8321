//! Queue name → owning account.

const QUEUE_PREFIX: &str = "queue/";

/// Account encoded in a conforming queue name `queue/<account>/<suffix>`.
///
/// Returns `None` for anything else (`abnormal.queue`, `queue/alice`,
/// `queue//foo`).
pub fn queue_account(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(QUEUE_PREFIX)?;
    let (account, _suffix) = rest.split_once('/')?;
    if account.is_empty() {
        return None;
    }
    Some(account)
}
