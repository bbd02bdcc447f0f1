//! Provisioning lifecycle adapter.
//!
//! Wraps the reconciler in the provisioning system's Create/Update/Delete
//! custom-resource contract. Every invocation is stateless: endpoints are
//! read from the firewall's live state on each call and the route key is
//! carried by the request properties, so any request can be replayed.
//!
//! Create and Update both run a full reconciliation of the requested route.
//! Delete tears the route down; repeating it is a no-op.

use std::sync::Arc;
use std::time::Duration;

use inspection_common::{
    retry_with_backoff_if, CloudApi, Config, InspectionError,
    InspectionResult, MissingEndpointPolicy, RetryPolicy,
};
use inspection_types::{AvailabilityZone, Cidr, RouteEntry, RouteKey, RouteTarget, Subnet, SubnetGroup};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::plan::plan_default_route;
use crate::reconciler::{RouteReconciler, TeardownOutcome};
use crate::topology_index::TopologyIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Create,
    Update,
    Delete,
}

/// Request sent by the provisioning system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleRequest {
    pub request_type: RequestType,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_resource_id: Option<String>,
    #[serde(rename = "ResponseURL", default, skip_serializing_if = "Option::is_none")]
    pub response_url: Option<String>,
    #[serde(default)]
    pub resource_properties: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_resource_properties: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Success,
    Failed,
}

/// Response returned to the provisioning system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub physical_resource_id: String,
    pub stack_id: String,
    pub request_id: String,
    pub logical_resource_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl LifecycleResponse {
    pub fn success(request: &LifecycleRequest, physical_id: String, data: Map<String, Value>) -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
            physical_resource_id: physical_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data,
        }
    }

    pub fn failed(request: &LifecycleRequest, physical_id: String, reason: String) -> Self {
        Self {
            status: ResponseStatus::Failed,
            reason: Some(reason),
            physical_resource_id: physical_id,
            stack_id: request.stack_id.clone(),
            request_id: request.request_id.clone(),
            logical_resource_id: request.logical_resource_id.clone(),
            data: Map::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Stable physical id: `{stack name}/{logical id}/route`.
///
/// The stack name is taken from a stack ARN (`...:stack/{name}/{uuid}`);
/// any other stack id is used verbatim.
pub fn physical_resource_id(stack_id: &str, logical_id: &str) -> String {
    let stack_name = match stack_id.split_once(":stack/") {
        Some((_, rest)) => rest.split('/').next().unwrap_or(rest),
        None => stack_id,
    };
    format!("{}/{}/route", stack_name, logical_id)
}

/// What the route points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteVia {
    /// The firewall endpoint in the subnet's AZ.
    Firewall { firewall_arn: String },
    /// An explicit transit gateway, not AZ-matched.
    TransitGateway { transit_gateway_id: String },
}

/// Parsed `ResourceProperties`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteProperties {
    pub route_table_id: String,
    pub destination: Cidr,
    pub subnet_az: AvailabilityZone,
    pub subnet_id: Option<String>,
    pub via: RouteVia,
}

impl RouteProperties {
    pub fn from_map(props: &Map<String, Value>) -> InspectionResult<Self> {
        let route_table_id = required_str(props, "RouteTableId")?.to_string();
        let destination: Cidr = required_str(props, "DestinationCidr")?
            .parse()
            .map_err(|e: inspection_types::ParseError| {
                InspectionError::malformed("DestinationCidr", e.to_string())
            })?;
        let subnet_az = AvailabilityZone::new(required_str(props, "SubnetAz")?);
        let subnet_id = optional_str(props, "SubnetId")?.map(str::to_string);

        let via = match (
            optional_str(props, "FirewallArn")?,
            optional_str(props, "TransitGatewayId")?,
        ) {
            (Some(arn), None) => RouteVia::Firewall {
                firewall_arn: arn.to_string(),
            },
            (None, Some(id)) => RouteVia::TransitGateway {
                transit_gateway_id: id.to_string(),
            },
            (Some(_), Some(_)) => {
                return Err(InspectionError::malformed(
                    "FirewallArn",
                    "FirewallArn and TransitGatewayId are mutually exclusive",
                ))
            }
            (None, None) => {
                return Err(InspectionError::malformed(
                    "FirewallArn",
                    "one of FirewallArn or TransitGatewayId is required",
                ))
            }
        };

        Ok(Self {
            route_table_id,
            destination,
            subnet_az,
            subnet_id,
            via,
        })
    }

    pub fn key(&self) -> RouteKey {
        RouteKey::new(self.route_table_id.clone(), self.destination)
    }

    /// The subnet the route belongs to, as far as the request describes it.
    fn subnet(&self) -> Subnet {
        let group = match self.via {
            RouteVia::Firewall { .. } => SubnetGroup::Tgw,
            RouteVia::TransitGateway { .. } => SubnetGroup::Firewall,
        };
        Subnet::new(
            self.subnet_id
                .clone()
                .unwrap_or_else(|| self.route_table_id.clone()),
            self.subnet_az.clone(),
            self.route_table_id.clone(),
            group,
        )
    }
}

fn optional_str<'a>(props: &'a Map<String, Value>, name: &str) -> InspectionResult<Option<&'a str>> {
    match props.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim())),
        Some(other) => Err(InspectionError::malformed(
            name,
            format!("expected a string, got {}", other),
        )),
    }
}

fn required_str<'a>(props: &'a Map<String, Value>, name: &str) -> InspectionResult<&'a str> {
    optional_str(props, name)?
        .ok_or_else(|| InspectionError::malformed(name, "required property is missing"))
}

fn route_data(route_table_id: &str, destination: &Cidr) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("RouteTableId".to_string(), Value::from(route_table_id));
    data.insert("DestinationCidr".to_string(), Value::from(destination.to_string()));
    data
}

/// Lifecycle adapter settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleSettings {
    pub retry: RetryPolicy,
    pub missing_endpoint: MissingEndpointPolicy,
    /// A request still running after this long is reported as failed.
    pub deadline: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            missing_endpoint: config.lifecycle.missing_endpoint,
            deadline: config.lifecycle.request_deadline(),
        }
    }
}

fn is_retryable_or_missing_endpoint(err: &InspectionError) -> bool {
    err.is_retryable() || matches!(err, InspectionError::NoMatchingEndpoint { .. })
}

pub struct LifecycleAdapter<C: ?Sized> {
    cloud: Arc<C>,
    reconciler: RouteReconciler<C>,
    settings: LifecycleSettings,
}

impl<C> LifecycleAdapter<C>
where
    C: CloudApi + ?Sized,
{
    pub fn new(cloud: Arc<C>, settings: LifecycleSettings) -> Self {
        let reconciler = RouteReconciler::new(Arc::clone(&cloud), settings.retry.clone());
        Self {
            cloud,
            reconciler,
            settings,
        }
    }

    /// Runs one request and builds the response. Failures become a FAILED
    /// response carrying the error kind and message.
    #[instrument(
        skip(self, request),
        fields(request_type = ?request.request_type, logical_id = %request.logical_resource_id)
    )]
    pub async fn handle(&self, request: &LifecycleRequest) -> LifecycleResponse {
        let physical_id = physical_resource_id(&request.stack_id, &request.logical_resource_id);
        if let Some(previous) = &request.physical_resource_id {
            if *previous != physical_id {
                warn!(%previous, current = %physical_id, "Physical resource id changed");
            }
        }

        let processed = tokio::time::timeout(self.settings.deadline, self.process(request)).await;
        let result = match processed {
            Ok(result) => result,
            Err(_) => Err(InspectionError::retryable(
                "LifecycleRequest",
                format!("request did not finish within {:?}", self.settings.deadline),
            )),
        };

        match result {
            Ok(data) => {
                info!(physical_id = %physical_id, "Request succeeded");
                LifecycleResponse::success(request, physical_id, data)
            }
            Err(err) => {
                error!(physical_id = %physical_id, kind = err.kind(), error = %err, "Request failed");
                LifecycleResponse::failed(request, physical_id, format!("{}: {}", err.kind(), err))
            }
        }
    }

    /// Runs one request, returning the response data.
    pub async fn process(&self, request: &LifecycleRequest) -> InspectionResult<Map<String, Value>> {
        match request.request_type {
            RequestType::Create => {
                let props = RouteProperties::from_map(&request.resource_properties)?;
                self.create_or_update(&props, None).await
            }
            RequestType::Update => {
                let props = RouteProperties::from_map(&request.resource_properties)?;
                self.create_or_update(&props, request.old_resource_properties.as_ref())
                    .await
            }
            RequestType::Delete => self.delete(&request.resource_properties).await,
        }
    }

    async fn create_or_update(
        &self,
        props: &RouteProperties,
        old_props: Option<&Map<String, Value>>,
    ) -> InspectionResult<Map<String, Value>> {
        let mut data = route_data(&props.route_table_id, &props.destination);

        let Some(entry) = self.reconcile(props).await? else {
            data.insert("Skipped".to_string(), Value::from("true"));
            return Ok(data);
        };
        data.insert("Target".to_string(), Value::from(entry.target.id()));

        if let Some(old_props) = old_props {
            match RouteProperties::from_map(old_props) {
                Ok(old) if old.key() != props.key() => {
                    info!(old = %old.key(), new = %props.key(), "Route key changed, removing old route");
                    self.reconciler
                        .teardown(&old.route_table_id, &old.destination)
                        .await?;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "Ignoring unreadable previous properties");
                }
            }
        }

        Ok(data)
    }

    /// Installs the requested route. `None` when the AZ has no firewall
    /// endpoint and the policy is to skip.
    async fn reconcile(&self, props: &RouteProperties) -> InspectionResult<Option<RouteEntry>> {
        let subnet = props.subnet();

        match &props.via {
            RouteVia::TransitGateway { transit_gateway_id } => {
                let target = RouteTarget::TransitGateway(transit_gateway_id.clone());
                self.reconciler
                    .reconcile_return_route(&subnet, props.destination, target)
                    .await
                    .map(Some)
            }
            RouteVia::Firewall { firewall_arn } => {
                match self.resolve_index(&subnet, firewall_arn, props.destination).await {
                    Ok(index) => self
                        .reconciler
                        .reconcile_default_route(&subnet, &index, props.destination)
                        .await
                        .map(Some),
                    Err(InspectionError::NoMatchingEndpoint { subnet_id, az })
                        if self.settings.missing_endpoint == MissingEndpointPolicy::Skip =>
                    {
                        warn!(%subnet_id, %az, "No firewall endpoint in AZ, skipping route");
                        Ok(None)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Reads the firewall's endpoints and indexes them. With the `wait`
    /// policy a missing endpoint for the subnet's AZ is polled for.
    async fn resolve_index(
        &self,
        subnet: &Subnet,
        firewall_arn: &str,
        destination: Cidr,
    ) -> InspectionResult<TopologyIndex> {
        let should_retry: fn(&InspectionError) -> bool = match self.settings.missing_endpoint {
            MissingEndpointPolicy::Wait => is_retryable_or_missing_endpoint,
            MissingEndpointPolicy::Fail | MissingEndpointPolicy::Skip => InspectionError::is_retryable,
        };

        retry_with_backoff_if(&self.settings.retry, "DescribeFirewall", should_retry, || async {
            let endpoints = self
                .cloud
                .describe_endpoints(firewall_arn)
                .await
                .map_err(InspectionError::from)?;
            let index = TopologyIndex::build(std::slice::from_ref(subnet), &endpoints)?;
            plan_default_route(subnet, &index, destination)?;
            Ok::<_, InspectionError>(index)
        })
        .await
    }

    async fn delete(&self, props: &Map<String, Value>) -> InspectionResult<Map<String, Value>> {
        // A Create rejected for bad properties is followed by a Delete with
        // the same properties; nothing was installed for it.
        let props = match RouteProperties::from_map(props) {
            Ok(props) => props,
            Err(err) => {
                warn!(error = %err, "Unreadable properties on delete, nothing to remove");
                return Ok(Map::new());
            }
        };

        let outcome = self
            .reconciler
            .teardown(&props.route_table_id, &props.destination)
            .await?;
        if outcome == TeardownOutcome::AlreadyAbsent {
            info!(route = %props.key(), "Route already absent");
        }
        Ok(route_data(&props.route_table_id, &props.destination))
    }
}
