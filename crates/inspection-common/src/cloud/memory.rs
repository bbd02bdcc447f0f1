//! In-memory cloud backend.
//!
//! Holds route tables, firewall endpoints, attachments and exports in one
//! [`CloudState`] document that can be loaded from and saved to JSON, so the
//! daemons can run against a local state file. Fault injection (throttling,
//! late endpoints, late exports, slow attachments) makes the retry paths
//! reproducible.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use inspection_types::{
    AttachmentState, Cidr, FirewallEndpoint, RouteEntry, RouteTarget, TransitGatewayAttachment,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CloudError, CloudResult, FirewallApi, ResourceKind, RouteTableApi, TransitGatewayApi,
};
use crate::exports::ExportRegistry;

/// Cloud operations, for fault injection and call accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudOperation {
    DescribeRoutes,
    UpsertRoute,
    DeleteRoute,
    DescribeEndpoints,
    DescribeAttachment,
    AssociateRouteTable,
    DisassociateRouteTable,
    EnablePropagation,
    GetExport,
}

impl CloudOperation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloudOperation::DescribeRoutes => "DescribeRouteTables",
            CloudOperation::UpsertRoute => "CreateRoute",
            CloudOperation::DeleteRoute => "DeleteRoute",
            CloudOperation::DescribeEndpoints => "DescribeFirewall",
            CloudOperation::DescribeAttachment => "DescribeTransitGatewayAttachments",
            CloudOperation::AssociateRouteTable => "AssociateTransitGatewayRouteTable",
            CloudOperation::DisassociateRouteTable => "DisassociateTransitGatewayRouteTable",
            CloudOperation::EnablePropagation => "EnableTransitGatewayRouteTablePropagation",
            CloudOperation::GetExport => "ListExports",
        }
    }
}

/// Persisted cloud state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudState {
    /// Route table id -> destination -> target.
    #[serde(default)]
    pub route_tables: BTreeMap<String, BTreeMap<Cidr, RouteTarget>>,
    /// Firewall ARN -> synced endpoints.
    #[serde(default)]
    pub firewalls: BTreeMap<String, Vec<FirewallEndpoint>>,
    #[serde(default)]
    pub attachments: BTreeMap<String, TransitGatewayAttachment>,
    #[serde(default)]
    pub exports: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Per-operation script; `None` lets a call through.
    failures: HashMap<CloudOperation, VecDeque<Option<CloudError>>>,
    /// Export name -> (lookups left before publication, value).
    late_exports: HashMap<String, (u32, String)>,
    /// Firewall ARN -> endpoints that sync after N describes.
    late_endpoints: HashMap<String, Vec<(u32, FirewallEndpoint)>>,
    /// Attachment id -> describes left while pending.
    pending_attachments: HashMap<String, u32>,
}

#[derive(Debug, Default)]
struct Inner {
    state: CloudState,
    faults: Faults,
    calls: HashMap<CloudOperation, usize>,
}

impl Inner {
    /// Records the call and returns an injected failure if one is queued.
    fn begin(&mut self, op: CloudOperation) -> CloudResult<()> {
        *self.calls.entry(op).or_default() += 1;
        match self.faults.failures.get_mut(&op).and_then(VecDeque::pop_front).flatten() {
            Some(err) => {
                debug!(operation = op.as_str(), error = %err, "Injected cloud failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn attachment_mut(&mut self, attachment_id: &str) -> CloudResult<&mut TransitGatewayAttachment> {
        self.state
            .attachments
            .get_mut(attachment_id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::Attachment, attachment_id))
    }
}

/// Shared handle to an in-memory cloud. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCloud {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: CloudState) -> Self {
        let cloud = Self::new();
        cloud.inner.lock().state = state;
        cloud
    }

    /// Loads state from a JSON file. A missing file yields an empty cloud.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let state: CloudState = serde_json::from_str(&content)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::from_state(state))
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(&self.snapshot())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }

    pub fn snapshot(&self) -> CloudState {
        self.inner.lock().state.clone()
    }

    pub fn add_route_table(&self, route_table_id: &str) {
        self.inner
            .lock()
            .state
            .route_tables
            .entry(route_table_id.to_string())
            .or_default();
    }

    /// Simulates a route table deleted out-of-band.
    pub fn remove_route_table(&self, route_table_id: &str) {
        self.inner.lock().state.route_tables.remove(route_table_id);
    }

    /// Seeds a route directly, creating the table if needed.
    pub fn seed_route(&self, entry: RouteEntry) {
        self.inner
            .lock()
            .state
            .route_tables
            .entry(entry.route_table_id)
            .or_default()
            .insert(entry.destination, entry.target);
    }

    pub fn add_firewall(&self, firewall_arn: &str, endpoints: Vec<FirewallEndpoint>) {
        self.inner
            .lock()
            .state
            .firewalls
            .insert(firewall_arn.to_string(), endpoints);
    }

    /// Registers an endpoint that only shows up after `describes` calls.
    pub fn add_endpoint_after(&self, endpoint: FirewallEndpoint, describes: u32) {
        let mut inner = self.inner.lock();
        inner
            .state
            .firewalls
            .entry(endpoint.firewall_arn.clone())
            .or_default();
        inner
            .faults
            .late_endpoints
            .entry(endpoint.firewall_arn.clone())
            .or_default()
            .push((describes, endpoint));
    }

    pub fn add_attachment(&self, attachment: TransitGatewayAttachment) {
        self.inner
            .lock()
            .state
            .attachments
            .insert(attachment.id.clone(), attachment);
    }

    /// Keeps an attachment `pending` for `describes` calls, then makes it
    /// available.
    pub fn keep_attachment_pending(&self, attachment_id: &str, describes: u32) {
        let mut inner = self.inner.lock();
        if let Some(attachment) = inner.state.attachments.get_mut(attachment_id) {
            attachment.state = AttachmentState::Pending;
        }
        inner
            .faults
            .pending_attachments
            .insert(attachment_id.to_string(), describes);
    }

    pub fn publish_export(&self, name: &str, value: &str) {
        let mut inner = self.inner.lock();
        inner.faults.late_exports.remove(name);
        inner
            .state
            .exports
            .insert(name.to_string(), value.to_string());
    }

    /// Publishes an export that is invisible for the first `lookups` calls.
    pub fn publish_export_after(&self, name: &str, value: &str, lookups: u32) {
        self.inner
            .lock()
            .faults
            .late_exports
            .insert(name.to_string(), (lookups, value.to_string()));
    }

    /// Fails the next call of `op` with `err`.
    pub fn inject_failure(&self, op: CloudOperation, err: CloudError) {
        self.inject_failures(op, err, 1);
    }

    /// Fails the next `count` calls of `op` with `err`.
    pub fn inject_failures(&self, op: CloudOperation, err: CloudError, count: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.faults.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(Some(err)).take(count));
    }

    /// Lets `successes` calls of `op` through, then fails one with `err`.
    pub fn inject_failure_after(&self, op: CloudOperation, err: CloudError, successes: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.faults.failures.entry(op).or_default();
        queue.extend(std::iter::repeat(None).take(successes));
        queue.push_back(Some(err));
    }

    pub fn call_count(&self, op: CloudOperation) -> usize {
        self.inner.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Current target of a route, if present.
    pub fn route(&self, route_table_id: &str, destination: &Cidr) -> Option<RouteTarget> {
        self.inner
            .lock()
            .state
            .route_tables
            .get(route_table_id)
            .and_then(|table| table.get(destination))
            .cloned()
    }

    /// Number of routes in a table, `None` if the table does not exist.
    pub fn route_count(&self, route_table_id: &str) -> Option<usize> {
        self.inner
            .lock()
            .state
            .route_tables
            .get(route_table_id)
            .map(BTreeMap::len)
    }

    pub fn attachment(&self, attachment_id: &str) -> Option<TransitGatewayAttachment> {
        self.inner.lock().state.attachments.get(attachment_id).cloned()
    }
}

#[async_trait]
impl RouteTableApi for InMemoryCloud {
    async fn describe_routes(&self, route_table_id: &str) -> CloudResult<Vec<RouteEntry>> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::DescribeRoutes)?;
        let table = inner
            .state
            .route_tables
            .get(route_table_id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::RouteTable, route_table_id))?;
        Ok(table
            .iter()
            .map(|(destination, target)| {
                RouteEntry::new(route_table_id, *destination, target.clone())
            })
            .collect())
    }

    async fn upsert_route(&self, entry: &RouteEntry) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::UpsertRoute)?;
        let table = inner
            .state
            .route_tables
            .get_mut(&entry.route_table_id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::RouteTable, &entry.route_table_id))?;
        table.insert(entry.destination, entry.target.clone());
        Ok(())
    }

    async fn delete_route(&self, route_table_id: &str, destination: &Cidr) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::DeleteRoute)?;
        let table = inner
            .state
            .route_tables
            .get_mut(route_table_id)
            .ok_or_else(|| CloudError::not_found(ResourceKind::RouteTable, route_table_id))?;
        match table.remove(destination) {
            Some(_) => Ok(()),
            None => Err(CloudError::not_found(
                ResourceKind::Route,
                format!("{}:{}", route_table_id, destination),
            )),
        }
    }
}

#[async_trait]
impl FirewallApi for InMemoryCloud {
    async fn describe_endpoints(&self, firewall_arn: &str) -> CloudResult<Vec<FirewallEndpoint>> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::DescribeEndpoints)?;

        if let Some(late) = inner.faults.late_endpoints.get_mut(firewall_arn) {
            let mut synced = Vec::new();
            late.retain_mut(|(remaining, endpoint)| {
                if *remaining == 0 {
                    synced.push(endpoint.clone());
                    false
                } else {
                    *remaining -= 1;
                    true
                }
            });
            if !synced.is_empty() {
                inner
                    .state
                    .firewalls
                    .entry(firewall_arn.to_string())
                    .or_default()
                    .extend(synced);
            }
        }

        inner
            .state
            .firewalls
            .get(firewall_arn)
            .cloned()
            .ok_or_else(|| CloudError::not_found(ResourceKind::Firewall, firewall_arn))
    }
}

#[async_trait]
impl TransitGatewayApi for InMemoryCloud {
    async fn describe_attachment(
        &self,
        attachment_id: &str,
    ) -> CloudResult<TransitGatewayAttachment> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::DescribeAttachment)?;

        let still_pending = match inner.faults.pending_attachments.get_mut(attachment_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            Some(_) => {
                inner.faults.pending_attachments.remove(attachment_id);
                false
            }
            None => false,
        };

        let attachment = inner.attachment_mut(attachment_id)?;
        if !still_pending && attachment.state == AttachmentState::Pending {
            attachment.state = AttachmentState::Available;
        }
        Ok(attachment.clone())
    }

    async fn associate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::AssociateRouteTable)?;
        let attachment = inner.attachment_mut(attachment_id)?;

        if attachment.state.is_gone() {
            return Err(CloudError::invalid_request(
                CloudOperation::AssociateRouteTable.as_str(),
                format!("attachment {} is {}", attachment_id, attachment.state),
            ));
        }
        match attachment.association.as_deref() {
            Some(current) if current == route_table_id => Err(CloudError::already_exists(
                ResourceKind::Association,
                format!("{}:{}", attachment_id, route_table_id),
            )),
            Some(current) => Err(CloudError::invalid_request(
                CloudOperation::AssociateRouteTable.as_str(),
                format!("attachment {} is already associated with {}", attachment_id, current),
            )),
            None => {
                attachment.association = Some(route_table_id.to_string());
                Ok(())
            }
        }
    }

    async fn disassociate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::DisassociateRouteTable)?;
        let attachment = inner.attachment_mut(attachment_id)?;

        if !attachment.is_associated_with(route_table_id) {
            return Err(CloudError::not_found(
                ResourceKind::Association,
                format!("{}:{}", attachment_id, route_table_id),
            ));
        }
        attachment.association = None;
        Ok(())
    }

    async fn enable_propagation(
        &self,
        route_table_id: &str,
        attachment_id: &str,
    ) -> CloudResult<()> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::EnablePropagation)?;
        let attachment = inner.attachment_mut(attachment_id)?;

        if !attachment.propagations.insert(route_table_id.to_string()) {
            return Err(CloudError::already_exists(
                ResourceKind::Propagation,
                format!("{}:{}", attachment_id, route_table_id),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ExportRegistry for InMemoryCloud {
    async fn get_export(&self, name: &str) -> CloudResult<Option<String>> {
        let mut inner = self.inner.lock();
        inner.begin(CloudOperation::GetExport)?;

        let publish_now = match inner.faults.late_exports.get_mut(name) {
            Some((remaining, _)) if *remaining > 0 => {
                *remaining -= 1;
                return Ok(None);
            }
            Some(_) => true,
            None => false,
        };
        if publish_now {
            if let Some((_, value)) = inner.faults.late_exports.remove(name) {
                inner.state.exports.insert(name.to_string(), value);
            }
        }

        Ok(inner.state.exports.get(name).cloned())
    }
}
