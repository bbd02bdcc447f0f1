//! Route reconciler: applies desired routes through the route-table API.
//!
//! Every write is an upsert keyed by (route table, destination) and every
//! delete tolerates an absent entry, so any call can be repeated safely.
//! Transient API failures are retried with the configured backoff; a route
//! table deleted out-of-band is `ResourceGone` and never retried.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use inspection_common::{
    retry_with_backoff, InspectionError, InspectionResult, ResourceKind, RetryPolicy,
    RouteTableApi,
};
use inspection_types::{Cidr, RouteEntry, RouteTarget, Subnet};
use tracing::{debug, error, info, instrument, warn};

use crate::plan::{plan_default_route, RoutePlan};
use crate::topology_index::TopologyIndex;

/// What an upsert did to the live table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Replaced an entry with a different target.
    Replaced(RouteTarget),
    /// Already in the desired state; no write issued.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    Removed,
    /// No such route (or no such table); nothing to do.
    AlreadyAbsent,
}

/// Counts from applying a [`RoutePlan`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl ApplyReport {
    pub fn changed(&self) -> usize {
        self.created + self.replaced
    }

    pub fn total(&self) -> usize {
        self.changed() + self.unchanged
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} replaced, {} unchanged",
            self.created, self.replaced, self.unchanged
        )
    }
}

type LiveTable = BTreeMap<Cidr, RouteTarget>;

pub struct RouteReconciler<C: ?Sized> {
    cloud: Arc<C>,
    policy: RetryPolicy,
}

impl<C: ?Sized> Clone for RouteReconciler<C> {
    fn clone(&self) -> Self {
        Self {
            cloud: Arc::clone(&self.cloud),
            policy: self.policy.clone(),
        }
    }
}

impl<C> RouteReconciler<C>
where
    C: RouteTableApi + ?Sized,
{
    pub fn new(cloud: Arc<C>, policy: RetryPolicy) -> Self {
        Self { cloud, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Points `subnet`'s route for `destination` at the firewall endpoint in
    /// the subnet's AZ.
    ///
    /// Returns `NoMatchingEndpoint` without touching the table when that AZ
    /// has no endpoint; the caller decides whether that is fatal.
    #[instrument(skip(self, subnet, index), fields(subnet = %subnet.id, az = %subnet.az))]
    pub async fn reconcile_default_route(
        &self,
        subnet: &Subnet,
        index: &TopologyIndex,
        destination: Cidr,
    ) -> InspectionResult<RouteEntry> {
        let entry = plan_default_route(subnet, index, destination)?;
        self.upsert(&entry).await?;
        Ok(entry)
    }

    /// Upserts a route with an explicit, non AZ-matched target such as the
    /// transit gateway.
    #[instrument(skip(self, subnet), fields(subnet = %subnet.id))]
    pub async fn reconcile_return_route(
        &self,
        subnet: &Subnet,
        destination: Cidr,
        target: RouteTarget,
    ) -> InspectionResult<RouteEntry> {
        let entry = RouteEntry::new(subnet.route_table_id.clone(), destination, target);
        self.upsert(&entry).await?;
        Ok(entry)
    }

    /// Upserts one entry unless the table already holds it.
    #[instrument(skip(self, entry), fields(route = %entry))]
    pub async fn upsert(&self, entry: &RouteEntry) -> InspectionResult<UpsertOutcome> {
        let live = self.read_table(&entry.route_table_id).await?;
        let outcome = match live.get(&entry.destination) {
            Some(current) if *current == entry.target => {
                debug!("Route already in place");
                return Ok(UpsertOutcome::Unchanged);
            }
            Some(current) => {
                warn!(previous = %current, "Replacing route target");
                UpsertOutcome::Replaced(current.clone())
            }
            None => UpsertOutcome::Created,
        };

        self.put(entry).await?;
        info!("Route installed");
        Ok(outcome)
    }

    /// Deletes the route for `destination` if present. Deleting an absent
    /// route, or one whose table is already gone, succeeds.
    #[instrument(skip(self))]
    pub async fn teardown(
        &self,
        route_table_id: &str,
        destination: &Cidr,
    ) -> InspectionResult<TeardownOutcome> {
        let result = retry_with_backoff(&self.policy, "DeleteRoute", || async {
            self.cloud
                .delete_route(route_table_id, destination)
                .await
                .map_err(InspectionError::from)
        })
        .await;

        match result {
            Ok(()) => {
                info!("Route removed");
                Ok(TeardownOutcome::Removed)
            }
            Err(InspectionError::ResourceGone {
                kind: ResourceKind::Route,
                ..
            }) => {
                debug!("Route already absent");
                Ok(TeardownOutcome::AlreadyAbsent)
            }
            Err(InspectionError::ResourceGone {
                kind: ResourceKind::RouteTable,
                ..
            }) => {
                warn!("Route table no longer exists, nothing to remove");
                Ok(TeardownOutcome::AlreadyAbsent)
            }
            Err(err) => Err(err),
        }
    }

    /// Applies a whole plan.
    ///
    /// Every affected table is read before anything is written, so a missing
    /// table fails the call with no change made. If a write fails part-way,
    /// the entries already changed are restored before the error is
    /// returned.
    #[instrument(skip(self, plan), fields(routes = plan.len()))]
    pub async fn apply(&self, plan: &RoutePlan) -> InspectionResult<ApplyReport> {
        let mut live: BTreeMap<String, LiveTable> = BTreeMap::new();
        for route_table_id in plan.route_table_ids() {
            let table = self.read_table(route_table_id).await?;
            live.insert(route_table_id.to_string(), table);
        }

        let mut report = ApplyReport::default();
        let mut applied: Vec<(RouteEntry, Option<RouteTarget>)> = Vec::new();

        for entry in plan.entries() {
            let previous = live
                .get(&entry.route_table_id)
                .and_then(|table| table.get(&entry.destination))
                .cloned();

            match &previous {
                Some(current) if *current == entry.target => {
                    report.unchanged += 1;
                    continue;
                }
                Some(current) => {
                    warn!(route = %entry, previous = %current, "Replacing route target");
                }
                None => {}
            }

            if let Err(err) = self.put(&entry).await {
                error!(route = %entry, error = %err, "Route apply failed, rolling back");
                self.rollback(applied).await;
                return Err(err);
            }

            if previous.is_some() {
                report.replaced += 1;
            } else {
                report.created += 1;
            }
            applied.push((entry, previous));
        }

        info!(%report, "Route plan applied");
        Ok(report)
    }

    async fn rollback(&self, applied: Vec<(RouteEntry, Option<RouteTarget>)>) {
        for (entry, previous) in applied.into_iter().rev() {
            let restored = match previous {
                Some(target) => {
                    let original =
                        RouteEntry::new(entry.route_table_id.clone(), entry.destination, target);
                    self.put(&original).await
                }
                None => self
                    .teardown(&entry.route_table_id, &entry.destination)
                    .await
                    .map(|_| ()),
            };
            match restored {
                Ok(()) => debug!(route = %entry, "Rolled back"),
                Err(err) => error!(route = %entry, error = %err, "Rollback failed"),
            }
        }
    }

    async fn read_table(&self, route_table_id: &str) -> InspectionResult<LiveTable> {
        let entries = retry_with_backoff(&self.policy, "DescribeRouteTables", || async {
            self.cloud
                .describe_routes(route_table_id)
                .await
                .map_err(InspectionError::from)
        })
        .await?;

        Ok(entries
            .into_iter()
            .map(|entry| (entry.destination, entry.target))
            .collect())
    }

    async fn put(&self, entry: &RouteEntry) -> InspectionResult<()> {
        retry_with_backoff(&self.policy, "CreateRoute", || async {
            self.cloud
                .upsert_route(entry)
                .await
                .map_err(InspectionError::from)
        })
        .await
    }
}
