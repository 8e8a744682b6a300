//! Apply a reconciliation plan to the inventory.
//!
//! Creates and updates go out first with bounded concurrency; deactivations
//! follow only once every create and update has settled. A failed write is
//! recorded and the rest of the plan continues.

use std::net::Ipv4Addr;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use leasesync_core::InventoryRecord;
use leasesync_ipam::{AddressInventory, IpamError, IpamResult};

use crate::diff::{Action, ReconciliationPlan};
use crate::report::OperationFailure;

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub subnet_id: String,
    /// Writes in flight at once. Zero is treated as one.
    pub max_in_flight: usize,
}

/// What applying a plan actually achieved.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub created: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub failures: Vec<OperationFailure>,
}

impl ApplyOutcome {
    fn absorb(&mut self, action: Action, ip: Ipv4Addr, result: IpamResult<()>) {
        match result {
            Ok(()) => match action {
                Action::Create => self.created += 1,
                Action::Update => self.updated += 1,
                Action::Deactivate => self.deactivated += 1,
            },
            Err(e) => {
                tracing::warn!(
                    ip = %ip,
                    action = %action,
                    kind = %e.kind(),
                    error = %e,
                    "Inventory write failed"
                );
                self.failures.push(OperationFailure {
                    ip,
                    action,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
    }
}

pub async fn apply<I>(
    plan: &ReconciliationPlan,
    inventory: &I,
    options: &ApplyOptions,
) -> ApplyOutcome
where
    I: AddressInventory + ?Sized,
{
    let limit = options.max_in_flight.max(1);
    let subnet_id = options.subnet_id.as_str();
    let mut outcome = ApplyOutcome::default();

    // Writes run over owned records so the boxed futures stay `Send` inside a
    // spawned run.
    let writes: Vec<(Action, InventoryRecord)> = plan
        .create
        .iter()
        .map(|c| (Action::Create, c.desired.clone()))
        .chain(plan.update.iter().map(|c| (Action::Update, c.desired.clone())))
        .collect();
    for (action, ip, result) in run_batch(inventory, subnet_id, writes, limit).await {
        outcome.absorb(action, ip, result);
    }

    let deactivations: Vec<(Action, InventoryRecord)> = plan
        .deactivate
        .iter()
        .map(|record| (Action::Deactivate, record.clone()))
        .collect();
    for (action, ip, result) in run_batch(inventory, subnet_id, deactivations, limit).await {
        outcome.absorb(action, ip, result);
    }

    outcome
}

async fn run_batch<I>(
    inventory: &I,
    subnet_id: &str,
    writes: Vec<(Action, InventoryRecord)>,
    limit: usize,
) -> Vec<(Action, Ipv4Addr, IpamResult<()>)>
where
    I: AddressInventory + ?Sized,
{
    let futures: Vec<BoxFuture<'_, (Action, Ipv4Addr, IpamResult<()>)>> = writes
        .into_iter()
        .map(|(action, record)| {
            async move {
                let result = write(inventory, subnet_id, action, &record).await;
                (action, record.ip, result)
            }
            .boxed()
        })
        .collect();

    stream::iter(futures).buffer_unordered(limit).collect().await
}

async fn write<I>(
    inventory: &I,
    subnet_id: &str,
    action: Action,
    record: &InventoryRecord,
) -> IpamResult<()>
where
    I: AddressInventory + ?Sized,
{
    match action {
        Action::Create => inventory.create_address(subnet_id, record).await.map(|_| ()),
        Action::Update => {
            let id = record_id(record)?;
            inventory.update_address(id, record).await.map(|_| ())
        }
        Action::Deactivate => inventory.deactivate_address(record_id(record)?).await,
    }
}

fn record_id(record: &InventoryRecord) -> IpamResult<&leasesync_core::AddressId> {
    record
        .id
        .as_ref()
        .ok_or_else(|| IpamError::NotFound(format!("{} has no inventory id", record.ip)))
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory inventory for exercising the pipeline without HTTP.

    use std::collections::{HashMap, HashSet};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use leasesync_core::{AddressId, AddressStatus, InventoryRecord};
    use leasesync_ipam::{AddressInventory, AuthToken, IpamError, IpamResult};

    #[derive(Default)]
    pub struct FakeInventory {
        pub records: Mutex<Vec<InventoryRecord>>,
        /// IPs whose create or update is answered with a conflict.
        pub conflict_ips: HashSet<Ipv4Addr>,
        pub reject_auth: bool,
        pub fail_list: bool,
        pub writes: AtomicUsize,
        pub deactivated: Mutex<Vec<AddressId>>,
        /// Write order, for asserting deactivations come last.
        pub log: Mutex<Vec<&'static str>>,
        pub next_id: AtomicUsize,
        pub in_flight: AtomicUsize,
        /// Most writes ever outstanding at once.
        pub peak_in_flight: AtomicUsize,
    }

    impl FakeInventory {
        pub fn with_records(records: Vec<InventoryRecord>) -> Self {
            let next = records.len() + 100;
            let fake = Self {
                records: Mutex::new(records),
                ..Default::default()
            };
            fake.next_id.store(next, Ordering::SeqCst);
            fake
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }

        /// Hold a write slot across one scheduler yield so concurrent writes
        /// overlap.
        async fn occupy(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        pub fn snapshot(&self) -> HashMap<Ipv4Addr, InventoryRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .map(|r| (r.ip, r.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl AddressInventory for FakeInventory {
        async fn authenticate(&mut self) -> IpamResult<AuthToken> {
            if self.reject_auth {
                return Err(IpamError::Auth("Invalid username or password".into()));
            }
            Ok(AuthToken::new("fake"))
        }

        async fn list_addresses(&self, _subnet_id: &str) -> IpamResult<Vec<InventoryRecord>> {
            if self.fail_list {
                return Err(IpamError::RetriesExhausted {
                    attempts: 4,
                    message: "HTTP 503".into(),
                });
            }
            Ok(self.records.lock().unwrap().clone())
        }

        async fn create_address(
            &self,
            _subnet_id: &str,
            record: &InventoryRecord,
        ) -> IpamResult<InventoryRecord> {
            self.occupy().await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("create");
            if self.conflict_ips.contains(&record.ip) {
                return Err(IpamError::Conflict("Address already exists".into()));
            }
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let mut created = record.clone();
            created.id = Some(AddressId(id.to_string()));
            self.records.lock().unwrap().push(created.clone());
            Ok(created)
        }

        async fn update_address(
            &self,
            id: &AddressId,
            record: &InventoryRecord,
        ) -> IpamResult<InventoryRecord> {
            self.occupy().await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("update");
            if self.conflict_ips.contains(&record.ip) {
                return Err(IpamError::Conflict("Address already exists".into()));
            }
            let mut records = self.records.lock().unwrap();
            let slot = records
                .iter_mut()
                .find(|r| r.id.as_ref() == Some(id))
                .ok_or_else(|| IpamError::NotFound(id.to_string()))?;
            slot.mac = record.mac.clone();
            slot.hostname = record.hostname.clone();
            slot.status = record.status;
            Ok(slot.clone())
        }

        async fn deactivate_address(&self, id: &AddressId) -> IpamResult<()> {
            self.occupy().await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push("deactivate");
            let mut records = self.records.lock().unwrap();
            let slot = records
                .iter_mut()
                .find(|r| r.id.as_ref() == Some(id))
                .ok_or_else(|| IpamError::NotFound(id.to_string()))?;
            slot.status = Some(AddressStatus::Offline);
            self.deactivated.lock().unwrap().push(id.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::fake::FakeInventory;
    use super::*;
    use crate::diff::{plan, PlanOptions};
    use crate::merge::merge;
    use leasesync_core::{
        AddressId, AddressStatus, ErrorKind, HostObservation, MacAddress, SubnetTarget,
    };

    fn obs(ip: [u8; 4], mac: &str, hostname: &str) -> HostObservation {
        HostObservation::from_lease(
            Ipv4Addr::from(ip),
            MacAddress::parse(mac).unwrap(),
            Some(hostname.to_string()),
        )
    }

    fn record(id: &str, ip: [u8; 4], mac: &str, hostname: &str) -> InventoryRecord {
        InventoryRecord {
            id: Some(AddressId::from(id)),
            ip: Ipv4Addr::from(ip),
            mac: Some(mac.to_string()),
            hostname: Some(hostname.to_string()),
            description: None,
            status: Some(AddressStatus::Used),
        }
    }

    fn options() -> ApplyOptions {
        ApplyOptions {
            subnet_id: "3".into(),
            max_in_flight: 4,
        }
    }

    #[tokio::test]
    async fn test_apply_creates_updates_and_deactivates() {
        let inventory = FakeInventory::with_records(vec![
            record("1", [10, 0, 0, 1], "aa:aa:aa:aa:aa:01", "old-name"),
            record("2", [10, 0, 0, 2], "aa:aa:aa:aa:aa:02", "gone"),
        ]);
        let hosts = merge(
            vec![
                obs([10, 0, 0, 1], "aa:aa:aa:aa:aa:01", "new-name"),
                obs([10, 0, 0, 3], "aa:aa:aa:aa:aa:03", "fresh"),
            ],
            vec![],
        );
        let existing = inventory.list_addresses("3").await.unwrap();
        let p = plan(
            &hosts,
            existing,
            &SubnetTarget::new("3"),
            PlanOptions {
                enable_deactivation: true,
            },
        );

        let outcome = apply(&p, &inventory, &options()).await;
        assert_eq!(outcome.created, 1);
        assert_eq!(outcome.updated, 1);
        assert_eq!(outcome.deactivated, 1);
        assert!(outcome.failures.is_empty());

        let log = inventory.log.lock().unwrap().clone();
        assert_eq!(log.last(), Some(&"deactivate"));

        let state = inventory.snapshot();
        assert_eq!(
            state[&Ipv4Addr::new(10, 0, 0, 1)].hostname.as_deref(),
            Some("new-name")
        );
        assert_eq!(
            state[&Ipv4Addr::new(10, 0, 0, 2)].status,
            Some(AddressStatus::Offline)
        );
        assert!(state.contains_key(&Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[tokio::test]
    async fn test_failed_create_does_not_stop_others() {
        let mut inventory = FakeInventory::default();
        inventory.conflict_ips.insert(Ipv4Addr::new(10, 0, 0, 5));

        let hosts = merge(
            (1..=8)
                .map(|n| obs([10, 0, 0, n], &format!("aa:aa:aa:aa:aa:0{n}"), "h"))
                .collect(),
            vec![],
        );
        let p = plan(&hosts, vec![], &SubnetTarget::new("3"), PlanOptions::default());

        let outcome = apply(&p, &inventory, &options()).await;
        assert_eq!(outcome.created, 7);
        assert_eq!(outcome.failures.len(), 1);

        let failure = &outcome.failures[0];
        assert_eq!(failure.ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(failure.action, Action::Create);
        assert_eq!(failure.kind, ErrorKind::Conflict);
        assert_eq!(inventory.write_count(), 8);
    }

    #[tokio::test]
    async fn test_writes_in_flight_never_exceed_limit() {
        let inventory = FakeInventory::default();
        let hosts = merge(
            (1..=9)
                .map(|n| obs([10, 0, 0, n], &format!("aa:aa:aa:aa:aa:0{n}"), "h"))
                .collect(),
            vec![],
        );
        let p = plan(&hosts, vec![], &SubnetTarget::new("3"), PlanOptions::default());

        let outcome = apply(
            &p,
            &inventory,
            &ApplyOptions {
                subnet_id: "3".into(),
                max_in_flight: 3,
            },
        )
        .await;
        assert_eq!(outcome.created, 9);
        assert_eq!(inventory.peak_in_flight.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_plan_writes_nothing() {
        let inventory = FakeInventory::default();
        let outcome = apply(&ReconciliationPlan::default(), &inventory, &options()).await;
        assert_eq!(outcome.created + outcome.updated + outcome.deactivated, 0);
        assert_eq!(inventory.write_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_fan_out_still_applies() {
        let inventory = FakeInventory::default();
        let hosts = merge(vec![obs([10, 0, 0, 1], "aa:aa:aa:aa:aa:01", "h")], vec![]);
        let p = plan(&hosts, vec![], &SubnetTarget::new("3"), PlanOptions::default());

        let outcome = apply(
            &p,
            &inventory,
            &ApplyOptions {
                subnet_id: "3".into(),
                max_in_flight: 0,
            },
        )
        .await;
        assert_eq!(outcome.created, 1);
    }
}
