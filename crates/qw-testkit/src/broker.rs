use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use qw_broker::{BrokerClient, BrokerError, BrokerUser, Permissions};
use qw_schemas::{BindingSnapshot, ExchangeRef, IncomingStat, QueueDetail, QueueSnapshot};

#[derive(Default)]
struct BrokerState {
    queues: Vec<QueueSnapshot>,
    bindings: Vec<BindingSnapshot>,
    exchanges: BTreeMap<String, String>,
    failure: Option<BrokerError>,
    delete_failure: Option<BrokerError>,
    deleted: Vec<(String, String)>,
    detail_calls: Vec<String>,
    users: BTreeMap<String, (String, String)>,
    permissions: BTreeMap<(String, String), Permissions>,
}

/// Scripted [`BrokerClient`].
///
/// `delete_queue` removes the queue (and its bindings) from later listings,
/// like a real broker would.
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Replace or add a queue snapshot (matched by name).
    pub fn put_queue(&self, snapshot: QueueSnapshot) {
        let mut st = self.lock();
        st.queues.retain(|q| q.name != snapshot.name);
        st.queues.push(snapshot);
    }

    /// Remove a queue behind the engine's back.
    pub fn drop_queue(&self, name: &str) {
        let mut st = self.lock();
        st.queues.retain(|q| q.name.as_deref() != Some(name));
        st.bindings.retain(|b| b.destination != name);
    }

    pub fn set_queues(&self, queues: Vec<QueueSnapshot>) {
        self.lock().queues = queues;
    }

    pub fn set_bindings(&self, bindings: Vec<BindingSnapshot>) {
        self.lock().bindings = bindings;
    }

    pub fn add_binding(&self, binding: BindingSnapshot) {
        self.lock().bindings.push(binding);
    }

    /// Exchange reported as the queue's first incoming stream.
    pub fn set_exchange(&self, queue: &str, exchange: &str) {
        self.lock()
            .exchanges
            .insert(queue.to_string(), exchange.to_string());
    }

    /// Every call fails with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<BrokerError>) {
        self.lock().failure = err;
    }

    /// Only `delete_queue` fails with `err` (the queue stays listed) until
    /// cleared with `None`.
    pub fn set_delete_failure(&self, err: Option<BrokerError>) {
        self.lock().delete_failure = err;
    }

    /// `(vhost, queue)` for each `delete_queue` call, in order.
    pub fn deleted(&self) -> Vec<(String, String)> {
        self.lock().deleted.clone()
    }

    pub fn delete_count(&self, queue: &str) -> usize {
        self.lock().deleted.iter().filter(|(_, q)| q == queue).count()
    }

    /// Queue names passed to `get_queue_detail`, in order.
    pub fn detail_calls(&self) -> Vec<String> {
        self.lock().detail_calls.clone()
    }

    /// `(password, tags)` of a broker user.
    pub fn user(&self, name: &str) -> Option<(String, String)> {
        self.lock().users.get(name).cloned()
    }

    pub fn permissions(&self, vhost: &str, user: &str) -> Option<Permissions> {
        self.lock()
            .permissions
            .get(&(vhost.to_string(), user.to_string()))
            .cloned()
    }

    fn check(&self) -> Result<(), BrokerError> {
        match &self.lock().failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

fn not_found(path: String) -> BrokerError {
    BrokerError::Api {
        status: 404,
        path,
        message: "Object Not Found".to_string(),
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn list_queues(&self) -> Result<Vec<QueueSnapshot>, BrokerError> {
        self.check()?;
        Ok(self.lock().queues.clone())
    }

    async fn list_bindings(&self) -> Result<Vec<BindingSnapshot>, BrokerError> {
        self.check()?;
        Ok(self.lock().bindings.clone())
    }

    async fn queue_bindings(
        &self,
        _vhost: &str,
        queue: &str,
    ) -> Result<Vec<BindingSnapshot>, BrokerError> {
        self.check()?;
        Ok(self
            .lock()
            .bindings
            .iter()
            .filter(|b| b.destination == queue && b.is_tracked())
            .cloned()
            .collect())
    }

    async fn get_queue_detail(&self, _vhost: &str, queue: &str) -> Result<QueueDetail, BrokerError> {
        self.check()?;
        let mut st = self.lock();
        st.detail_calls.push(queue.to_string());
        if !st.queues.iter().any(|q| q.name.as_deref() == Some(queue)) {
            return Err(not_found(format!("queues/{queue}")));
        }
        let incoming = st
            .exchanges
            .get(queue)
            .map(|ex| {
                vec![IncomingStat {
                    exchange: ExchangeRef {
                        name: ex.clone(),
                        vhost: Some("/".to_string()),
                    },
                }]
            })
            .unwrap_or_default();
        Ok(QueueDetail {
            name: Some(queue.to_string()),
            incoming,
        })
    }

    async fn delete_queue(&self, vhost: &str, queue: &str) -> Result<(), BrokerError> {
        self.check()?;
        let mut st = self.lock();
        st.deleted.push((vhost.to_string(), queue.to_string()));
        if let Some(e) = st.delete_failure.clone() {
            return Err(e);
        }
        st.queues.retain(|q| q.name.as_deref() != Some(queue));
        st.bindings.retain(|b| b.destination != queue);
        Ok(())
    }

    async fn get_account(&self, username: &str) -> Result<Option<BrokerUser>, BrokerError> {
        self.check()?;
        Ok(self.lock().users.get(username).map(|(_, tags)| BrokerUser {
            name: username.to_string(),
            tags: serde_json::Value::String(tags.clone()),
        }))
    }

    async fn create_account(
        &self,
        username: &str,
        password: &str,
        tags: &str,
    ) -> Result<(), BrokerError> {
        self.check()?;
        self.lock().users.insert(
            username.to_string(),
            (password.to_string(), tags.to_string()),
        );
        Ok(())
    }

    async fn delete_account(&self, username: &str) -> Result<(), BrokerError> {
        self.check()?;
        let mut st = self.lock();
        if st.users.remove(username).is_none() {
            return Err(not_found(format!("users/{username}")));
        }
        st.permissions.retain(|(_, u), _| u != username);
        Ok(())
    }

    async fn set_permissions(
        &self,
        vhost: &str,
        username: &str,
        permissions: &Permissions,
    ) -> Result<(), BrokerError> {
        self.check()?;
        self.lock().permissions.insert(
            (vhost.to_string(), username.to_string()),
            permissions.clone(),
        );
        Ok(())
    }
}
