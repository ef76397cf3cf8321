use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use qw_db::{Store, StoreError, StoreResult};
use qw_schemas::{normalize_email, Account, BindingRecord, Owner, QueueRecord};

#[derive(Default)]
struct MemState {
    next_id: i64,
    owners: BTreeMap<i64, Owner>,
    accounts: BTreeMap<i64, Account>,
    /// (account_id, owner_id)
    account_owners: BTreeSet<(i64, i64)>,
    queues: BTreeMap<String, QueueRecord>,
    bindings: BTreeSet<BindingRecord>,
    /// (queue_name, email)
    notifications: BTreeSet<(String, String)>,
    mutations: Vec<String>,
    failure: Option<StoreError>,
}

impl MemState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check(&self) -> StoreResult<()> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn log(&mut self, entry: String) {
        self.mutations.push(entry);
    }

    fn queue_mut(&mut self, name: &str) -> StoreResult<&mut QueueRecord> {
        self.queues
            .get_mut(name)
            .ok_or_else(|| StoreError::not_found("queue", name))
    }

    fn remove_queue(&mut self, name: &str) {
        self.bindings.retain(|b| b.queue_name != name);
        self.notifications.retain(|(q, _)| q != name);
        self.queues.remove(name);
    }
}

/// In-memory [`Store`] with the same semantics as the Postgres one.
///
/// Every successful mutation appends a line to [`MemStore::mutations`].
#[derive(Default)]
pub struct MemStore {
    state: Mutex<MemState>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Insert an owner directly (not logged as a mutation).
    pub fn seed_owner(&self, email: &str, admin: bool) -> Owner {
        let mut st = self.lock();
        let owner = Owner {
            id: st.next_id(),
            email: normalize_email(email),
            admin,
        };
        st.owners.insert(owner.id, owner.clone());
        owner
    }

    /// Insert an account linked to `owners` directly (not logged).
    pub fn seed_account(&self, username: &str, owners: &[&Owner]) -> Account {
        let mut st = self.lock();
        let account = Account {
            id: st.next_id(),
            username: username.to_string(),
        };
        st.accounts.insert(account.id, account.clone());
        for o in owners {
            st.account_owners.insert((account.id, o.id));
        }
        account
    }

    /// Insert a queue record directly (not logged).
    pub fn seed_queue(&self, record: QueueRecord) {
        self.lock().queues.insert(record.name.clone(), record);
    }

    /// Insert a binding record directly (not logged).
    pub fn seed_binding(&self, binding: BindingRecord) {
        self.lock().bindings.insert(binding);
    }

    /// Subscribe `email` to a queue directly (not logged).
    pub fn seed_subscriber(&self, queue: &str, email: &str) {
        self.lock()
            .notifications
            .insert((queue.to_string(), normalize_email(email)));
    }

    pub fn queue(&self, name: &str) -> Option<QueueRecord> {
        self.lock().queues.get(name).cloned()
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.lock().queues.keys().cloned().collect()
    }

    pub fn account(&self, username: &str) -> Option<Account> {
        self.lock()
            .accounts
            .values()
            .find(|a| a.username == username)
            .cloned()
    }

    pub fn owner_ids_of(&self, account_id: i64) -> Vec<i64> {
        self.lock()
            .account_owners
            .iter()
            .filter(|(a, _)| *a == account_id)
            .map(|(_, o)| *o)
            .collect()
    }

    /// Stored `exchange-routing_key` keys of a queue, sorted.
    pub fn binding_keys(&self, queue: &str) -> Vec<String> {
        self.lock()
            .bindings
            .iter()
            .filter(|b| b.queue_name == queue)
            .map(BindingRecord::key)
            .collect()
    }

    pub fn mutations(&self) -> Vec<String> {
        self.lock().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.lock().mutations.clear();
    }

    /// Every call fails with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<StoreError>) {
        self.lock().failure = err;
    }
}

#[async_trait]
impl Store for MemStore {
    async fn create_owner(&self, email: &str, admin: bool) -> StoreResult<Owner> {
        let mut st = self.lock();
        st.check()?;
        let email = normalize_email(email);
        if st.owners.values().any(|o| o.email == email) {
            return Err(StoreError::Conflict(format!("owner {email} exists")));
        }
        let owner = Owner {
            id: st.next_id(),
            email,
            admin,
        };
        st.owners.insert(owner.id, owner.clone());
        st.log(format!("create_owner {}", owner.email));
        Ok(owner)
    }

    async fn owner_by_email(&self, email: &str) -> StoreResult<Option<Owner>> {
        let st = self.lock();
        st.check()?;
        let email = normalize_email(email);
        Ok(st.owners.values().find(|o| o.email == email).cloned())
    }

    async fn list_owners(&self) -> StoreResult<Vec<Owner>> {
        let st = self.lock();
        st.check()?;
        Ok(st.owners.values().cloned().collect())
    }

    async fn admin_owners(&self) -> StoreResult<Vec<Owner>> {
        let st = self.lock();
        st.check()?;
        Ok(st.owners.values().filter(|o| o.admin).cloned().collect())
    }

    async fn set_owner_admin(&self, owner_id: i64, admin: bool) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        let owner = st
            .owners
            .get_mut(&owner_id)
            .ok_or_else(|| StoreError::not_found("owner", owner_id.to_string()))?;
        owner.admin = admin;
        st.log(format!("set_owner_admin {owner_id} {admin}"));
        Ok(())
    }

    async fn delete_owner(&self, owner_id: i64) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if st.owners.remove(&owner_id).is_none() {
            return Err(StoreError::not_found("owner", owner_id.to_string()));
        }
        st.account_owners.retain(|(_, o)| *o != owner_id);
        st.log(format!("delete_owner {owner_id}"));
        Ok(())
    }

    async fn create_account(&self, username: &str, owner_ids: &[i64]) -> StoreResult<Account> {
        let mut st = self.lock();
        st.check()?;
        if st.accounts.values().any(|a| a.username == username) {
            return Err(StoreError::Conflict(format!("account {username} exists")));
        }
        let account = Account {
            id: st.next_id(),
            username: username.to_string(),
        };
        st.accounts.insert(account.id, account.clone());
        for o in owner_ids {
            st.account_owners.insert((account.id, *o));
        }
        st.log(format!("create_account {username}"));
        Ok(account)
    }

    async fn account_by_id(&self, account_id: i64) -> StoreResult<Option<Account>> {
        let st = self.lock();
        st.check()?;
        Ok(st.accounts.get(&account_id).cloned())
    }

    async fn account_by_username(&self, username: &str) -> StoreResult<Option<Account>> {
        let st = self.lock();
        st.check()?;
        Ok(st.accounts.values().find(|a| a.username == username).cloned())
    }

    async fn list_accounts(&self) -> StoreResult<Vec<Account>> {
        let st = self.lock();
        st.check()?;
        let mut out: Vec<Account> = st.accounts.values().cloned().collect();
        out.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(out)
    }

    async fn account_owners(&self, account_id: i64) -> StoreResult<Vec<Owner>> {
        let st = self.lock();
        st.check()?;
        Ok(st
            .account_owners
            .iter()
            .filter(|(a, _)| *a == account_id)
            .filter_map(|(_, o)| st.owners.get(o).cloned())
            .collect())
    }

    async fn add_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if !st.accounts.contains_key(&account_id) {
            return Err(StoreError::not_found("account", account_id.to_string()));
        }
        if !st.owners.contains_key(&owner_id) {
            return Err(StoreError::not_found("owner", owner_id.to_string()));
        }
        if st.account_owners.insert((account_id, owner_id)) {
            st.log(format!("add_account_owner {account_id} {owner_id}"));
        }
        Ok(())
    }

    async fn remove_account_owner(&self, account_id: i64, owner_id: i64) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if st.account_owners.remove(&(account_id, owner_id)) {
            st.log(format!("remove_account_owner {account_id} {owner_id}"));
        }
        Ok(())
    }

    async fn account_queues(&self, account_id: i64) -> StoreResult<Vec<QueueRecord>> {
        let st = self.lock();
        st.check()?;
        Ok(st
            .queues
            .values()
            .filter(|q| q.account_id == Some(account_id))
            .cloned()
            .collect())
    }

    async fn delete_account(&self, account_id: i64) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if !st.accounts.contains_key(&account_id) {
            return Err(StoreError::not_found("account", account_id.to_string()));
        }
        let names: Vec<String> = st
            .queues
            .values()
            .filter(|q| q.account_id == Some(account_id))
            .map(|q| q.name.clone())
            .collect();
        for name in &names {
            st.remove_queue(name);
        }
        st.account_owners.retain(|(a, _)| *a != account_id);
        st.accounts.remove(&account_id);
        st.log(format!("delete_account {account_id}"));
        Ok(())
    }

    async fn create_queue(&self, queue: &QueueRecord) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if st.queues.contains_key(&queue.name) {
            return Err(StoreError::Conflict(format!("queue {} exists", queue.name)));
        }
        st.queues.insert(queue.name.clone(), queue.clone());
        st.log(format!("create_queue {}", queue.name));
        Ok(())
    }

    async fn queue_by_name(&self, name: &str) -> StoreResult<Option<QueueRecord>> {
        let st = self.lock();
        st.check()?;
        Ok(st.queues.get(name).cloned())
    }

    async fn list_queues(&self) -> StoreResult<Vec<QueueRecord>> {
        let st = self.lock();
        st.check()?;
        Ok(st.queues.values().cloned().collect())
    }

    async fn update_queue_stats(&self, name: &str, size: i64, durable: bool) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        let q = st.queue_mut(name)?;
        q.size = size;
        q.durable = durable;
        st.log(format!("update_queue_stats {name} {size}"));
        Ok(())
    }

    async fn set_queue_warned(&self, name: &str, warned: bool) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        st.queue_mut(name)?.warned = warned;
        st.log(format!("set_queue_warned {name} {warned}"));
        Ok(())
    }

    async fn set_queue_unbounded(&self, name: &str, unbounded: bool) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        st.queue_mut(name)?.unbounded = unbounded;
        st.log(format!("set_queue_unbounded {name} {unbounded}"));
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        st.remove_queue(name);
        st.log(format!("delete_queue {name}"));
        Ok(())
    }

    async fn queue_bindings(&self, queue_name: &str) -> StoreResult<Vec<BindingRecord>> {
        let st = self.lock();
        st.check()?;
        Ok(st
            .bindings
            .iter()
            .filter(|b| b.queue_name == queue_name)
            .cloned()
            .collect())
    }

    async fn add_binding(&self, binding: &BindingRecord) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if st.bindings.insert(binding.clone()) {
            st.log(format!("add_binding {} {}", binding.queue_name, binding.key()));
        }
        Ok(())
    }

    async fn remove_binding(&self, binding: &BindingRecord) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if st.bindings.remove(binding) {
            st.log(format!("remove_binding {} {}", binding.queue_name, binding.key()));
        }
        Ok(())
    }

    async fn queue_notifications(&self, queue_name: &str) -> StoreResult<Vec<String>> {
        let st = self.lock();
        st.check()?;
        Ok(st
            .notifications
            .iter()
            .filter(|(q, _)| q == queue_name)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn add_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        if !st.queues.contains_key(queue_name) {
            return Err(StoreError::not_found("queue", queue_name));
        }
        let email = normalize_email(email);
        st.notifications.insert((queue_name.to_string(), email.clone()));
        st.log(format!("add_queue_notification {queue_name} {email}"));
        Ok(())
    }

    async fn remove_queue_notification(&self, queue_name: &str, email: &str) -> StoreResult<()> {
        let mut st = self.lock();
        st.check()?;
        let email = normalize_email(email);
        st.notifications.remove(&(queue_name.to_string(), email.clone()));
        st.log(format!("remove_queue_notification {queue_name} {email}"));
        Ok(())
    }
}
