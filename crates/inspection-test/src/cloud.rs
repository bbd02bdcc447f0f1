//! Cloud wrapper that controls what concurrent handlers observe

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use inspection_common::{
    CloudResult, ExportRegistry, FirewallApi, InMemoryCloud, RouteTableApi, TransitGatewayApi,
};
use inspection_types::{Cidr, FirewallEndpoint, RouteEntry, TransitGatewayAttachment};
use parking_lot::Mutex;

/// Delegates to an [`InMemoryCloud`], optionally yielding to the runtime
/// before every call and serving queued stale attachment snapshots.
///
/// Yielding lets two handlers joined on one task interleave call by call;
/// stale snapshots reproduce eventually consistent describe results.
pub struct InterleavingCloud {
    inner: Arc<InMemoryCloud>,
    yield_between_calls: bool,
    stale_attachments: Mutex<HashMap<String, VecDeque<TransitGatewayAttachment>>>,
}

impl InterleavingCloud {
    pub fn new(inner: Arc<InMemoryCloud>) -> Self {
        Self {
            inner,
            yield_between_calls: false,
            stale_attachments: Mutex::new(HashMap::new()),
        }
    }

    /// Yield to the runtime before every call.
    pub fn yielding(mut self) -> Self {
        self.yield_between_calls = true;
        self
    }

    /// Serve `snapshot` for the next describe of its attachment instead of
    /// the live state.
    pub fn serve_stale(&self, snapshot: TransitGatewayAttachment) {
        self.stale_attachments
            .lock()
            .entry(snapshot.id.clone())
            .or_default()
            .push_back(snapshot);
    }

    pub fn inner(&self) -> &InMemoryCloud {
        &self.inner
    }

    async fn pause(&self) {
        if self.yield_between_calls {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl RouteTableApi for InterleavingCloud {
    async fn describe_routes(&self, route_table_id: &str) -> CloudResult<Vec<RouteEntry>> {
        self.pause().await;
        self.inner.describe_routes(route_table_id).await
    }

    async fn upsert_route(&self, entry: &RouteEntry) -> CloudResult<()> {
        self.pause().await;
        self.inner.upsert_route(entry).await
    }

    async fn delete_route(&self, route_table_id: &str, destination: &Cidr) -> CloudResult<()> {
        self.pause().await;
        self.inner.delete_route(route_table_id, destination).await
    }
}

#[async_trait]
impl FirewallApi for InterleavingCloud {
    async fn describe_endpoints(&self, firewall_arn: &str) -> CloudResult<Vec<FirewallEndpoint>> {
        self.pause().await;
        self.inner.describe_endpoints(firewall_arn).await
    }
}

#[async_trait]
impl TransitGatewayApi for InterleavingCloud {
    async fn describe_attachment(
        &self,
        attachment_id: &str,
    ) -> CloudResult<TransitGatewayAttachment> {
        self.pause().await;
        let stale = self
            .stale_attachments
            .lock()
            .get_mut(attachment_id)
            .and_then(VecDeque::pop_front);
        match stale {
            Some(snapshot) => Ok(snapshot),
            None => self.inner.describe_attachment(attachment_id).await,
        }
    }

    async fn associate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()> {
        self.pause().await;
        self.inner
            .associate_route_table(attachment_id, route_table_id)
            .await
    }

    async fn disassociate_route_table(
        &self,
        attachment_id: &str,
        route_table_id: &str,
    ) -> CloudResult<()> {
        self.pause().await;
        self.inner
            .disassociate_route_table(attachment_id, route_table_id)
            .await
    }

    async fn enable_propagation(
        &self,
        route_table_id: &str,
        attachment_id: &str,
    ) -> CloudResult<()> {
        self.pause().await;
        self.inner
            .enable_propagation(route_table_id, attachment_id)
            .await
    }
}

#[async_trait]
impl ExportRegistry for InterleavingCloud {
    async fn get_export(&self, name: &str) -> CloudResult<Option<String>> {
        self.pause().await;
        self.inner.get_export(name).await
    }
}
