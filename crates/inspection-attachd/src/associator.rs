//! Attachment associator.
//!
//! Reacts to attachment-creation events: resolves the route table for the
//! VPC's role through a cross-stack export, associates the attachment and,
//! for workload VPCs, enables propagation. Events are delivered at least
//! once and unordered, so every step checks live state first and treats
//! "already done" as success.

use std::sync::Arc;
use std::time::Duration;

use inspection_common::{
    require_export, retry_with_backoff, CloudApi, Config, ExportKey, InspectionError,
    InspectionResult, ResourceKind, RetryPolicy, WorkloadPropagation,
};
use inspection_types::{TransitGatewayAttachment, TransitGatewayRouteTableId};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::event::{AttachmentCreated, VpcRole};
use crate::state::{AssociationMachine, AssociationState};

/// Associator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociatorSettings {
    pub retry: RetryPolicy,
    /// Upper bound on waiting for an attachment to leave `pending`.
    pub attachment_timeout: Duration,
    pub workload_export: String,
    pub inspection_export: String,
    pub workload_propagation: WorkloadPropagation,
    /// An event still being handled after this long is reported as failed.
    pub deadline: Duration,
}

impl AssociatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry_policy(),
            attachment_timeout: config.associator.attachment_timeout(),
            workload_export: config.exports.workload_route_table.clone(),
            inspection_export: config.exports.inspection_route_table.clone(),
            workload_propagation: config.associator.workload_propagation,
            deadline: config.associator.event_deadline(),
        }
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationOutcome {
    pub attachment_id: String,
    pub role: VpcRole,
    pub route_table_id: String,
    pub propagated_into: Option<String>,
    pub state: AssociationState,
}

pub struct AttachmentAssociator<C: ?Sized> {
    cloud: Arc<C>,
    settings: AssociatorSettings,
}

impl<C> AttachmentAssociator<C>
where
    C: CloudApi + ?Sized,
{
    pub fn new(cloud: Arc<C>, settings: AssociatorSettings) -> Self {
        Self { cloud, settings }
    }

    /// Parses a raw event and associates its attachment.
    pub async fn handle_event(&self, event: &Value) -> InspectionResult<AssociationOutcome> {
        let created = AttachmentCreated::from_event(event).map_err(|err| {
            warn!(error = %err, "Dropping malformed attachment event");
            err
        })?;
        self.associate(&created).await
    }

    #[instrument(skip(self, event), fields(attachment = %event.attachment_id, vpc = %event.vpc_id, role = %event.role))]
    pub async fn associate(&self, event: &AttachmentCreated) -> InspectionResult<AssociationOutcome> {
        let mut machine = AssociationMachine::new(event.attachment_id.clone());

        let ran = tokio::time::timeout(self.settings.deadline, self.run(event, &mut machine)).await;
        let result = match ran {
            Ok(result) => result,
            Err(_) => Err(InspectionError::retryable(
                "AssociateAttachment",
                format!("event did not finish within {:?}", self.settings.deadline),
            )),
        };

        match result {
            Ok(outcome) => {
                info!(
                    route_table = %outcome.route_table_id,
                    state = %outcome.state,
                    "Attachment association complete"
                );
                Ok(outcome)
            }
            Err(err) => {
                machine.fail();
                error!(kind = err.kind(), error = %err, state = %machine.state(), "Attachment association failed");
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        event: &AttachmentCreated,
        machine: &mut AssociationMachine,
    ) -> InspectionResult<AssociationOutcome> {
        let route_table = self.route_table_for(event.role).await?;
        let attachment = self.wait_until_settled(&event.attachment_id).await?;
        if !attachment.vpc_id.is_empty() && attachment.vpc_id != event.vpc_id {
            return Err(InspectionError::malformed(
                "vpcId",
                format!(
                    "event names {} but attachment {} belongs to {}",
                    event.vpc_id, attachment.id, attachment.vpc_id
                ),
            ));
        }

        self.ensure_association(&attachment, route_table.as_str())
            .await?;
        machine.transition(AssociationState::Associated)?;

        let propagated_into = match self.propagation_table_for(event.role, &route_table).await? {
            Some(target) => {
                self.ensure_propagation(&attachment, target.as_str()).await?;
                machine.transition(AssociationState::PropagationEnabled)?;
                Some(target.as_str().to_string())
            }
            None => None,
        };

        Ok(AssociationOutcome {
            attachment_id: event.attachment_id.clone(),
            role: event.role,
            route_table_id: route_table.as_str().to_string(),
            propagated_into,
            state: machine.state(),
        })
    }

    async fn resolve_export(&self, name: &str) -> InspectionResult<TransitGatewayRouteTableId> {
        let key = ExportKey::<TransitGatewayRouteTableId>::new(name);
        require_export(self.cloud.as_ref(), &key, &self.settings.retry).await
    }

    async fn route_table_for(&self, role: VpcRole) -> InspectionResult<TransitGatewayRouteTableId> {
        match role {
            VpcRole::Workload => self.resolve_export(&self.settings.workload_export).await,
            VpcRole::Inspection => self.resolve_export(&self.settings.inspection_export).await,
        }
    }

    async fn propagation_table_for(
        &self,
        role: VpcRole,
        associated: &TransitGatewayRouteTableId,
    ) -> InspectionResult<Option<TransitGatewayRouteTableId>> {
        match (role, self.settings.workload_propagation) {
            (VpcRole::Inspection, _) => Ok(None),
            (VpcRole::Workload, WorkloadPropagation::Association) => Ok(Some(associated.clone())),
            (VpcRole::Workload, WorkloadPropagation::Inspection) => self
                .resolve_export(&self.settings.inspection_export)
                .await
                .map(Some),
        }
    }

    async fn describe(&self, attachment_id: &str) -> InspectionResult<TransitGatewayAttachment> {
        retry_with_backoff(&self.settings.retry, "DescribeTransitGatewayAttachments", || async {
            self.cloud
                .describe_attachment(attachment_id)
                .await
                .map_err(InspectionError::from)
        })
        .await
    }

    /// Polls until the attachment leaves `pending`/`modifying`.
    async fn wait_until_settled(&self, attachment_id: &str) -> InspectionResult<TransitGatewayAttachment> {
        let mut polls = 0u32;
        let wait = async {
            loop {
                let attachment = self.describe(attachment_id).await?;
                polls += 1;

                if attachment.state.is_gone() {
                    return Err(InspectionError::resource_gone(ResourceKind::Attachment, attachment_id));
                }
                if !attachment.state.is_transitional() {
                    return Ok(attachment);
                }

                debug!(state = %attachment.state, polls, "Attachment not settled yet");
                let delay = self.settings.retry.base_delay(polls);
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let waited = tokio::time::timeout(self.settings.attachment_timeout, wait).await;
        match waited {
            Ok(result) => result,
            Err(_) => Err(InspectionError::Retryable {
                operation: "DescribeTransitGatewayAttachments".to_string(),
                attempts: polls,
                message: format!(
                    "attachment {} still pending after {:?}",
                    attachment_id, self.settings.attachment_timeout
                ),
            }),
        }
    }

    async fn ensure_association(
        &self,
        attachment: &TransitGatewayAttachment,
        route_table_id: &str,
    ) -> InspectionResult<()> {
        match attachment.association.as_deref() {
            Some(current) if current == route_table_id => {
                debug!(route_table = %route_table_id, "Already associated");
                return Ok(());
            }
            Some(current) => {
                warn!(from = %current, to = %route_table_id, "Attachment associated elsewhere, moving it");
                let settled = self
                    .disassociate(&attachment.id, current, route_table_id)
                    .await?;
                if settled.as_deref() == Some(route_table_id) {
                    debug!(route_table = %route_table_id, "Attachment moved by a concurrent handler");
                    return Ok(());
                }
            }
            None => {}
        }

        let created = retry_with_backoff(&self.settings.retry, "AssociateTransitGatewayRouteTable", || async {
            match self.cloud.associate_route_table(&attachment.id, route_table_id).await {
                Ok(()) => Ok(true),
                Err(err) if err.is_already_exists() => Ok(false),
                Err(err) => Err(InspectionError::from(err)),
            }
        })
        .await?;

        if created {
            info!(route_table = %route_table_id, "Associated attachment");
        } else {
            debug!(route_table = %route_table_id, "Association already present");
        }
        Ok(())
    }

    /// Removes the association with `current` and waits until the attachment
    /// reports no association, or one with `target` made by a concurrent
    /// handler. Returns the association it settled on.
    async fn disassociate(
        &self,
        attachment_id: &str,
        current: &str,
        target: &str,
    ) -> InspectionResult<Option<String>> {
        retry_with_backoff(&self.settings.retry, "DisassociateTransitGatewayRouteTable", || async {
            match self.cloud.disassociate_route_table(attachment_id, current).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_not_found(ResourceKind::Association) => Ok(()),
                Err(err) => Err(InspectionError::from(err)),
            }
        })
        .await?;

        retry_with_backoff(&self.settings.retry, "DescribeTransitGatewayAttachments", || async {
            let attachment = self
                .cloud
                .describe_attachment(attachment_id)
                .await
                .map_err(InspectionError::from)?;
            match attachment.association {
                None => Ok(None),
                Some(association) if association == target => Ok(Some(association)),
                Some(association) => Err(InspectionError::retryable(
                    "DisassociateTransitGatewayRouteTable",
                    format!("still associated with {}", association),
                )),
            }
        })
        .await
    }

    async fn ensure_propagation(
        &self,
        attachment: &TransitGatewayAttachment,
        route_table_id: &str,
    ) -> InspectionResult<()> {
        if attachment.propagates_into(route_table_id) {
            debug!(route_table = %route_table_id, "Propagation already enabled");
            return Ok(());
        }

        retry_with_backoff(&self.settings.retry, "EnableTransitGatewayRouteTablePropagation", || async {
            match self.cloud.enable_propagation(route_table_id, &attachment.id).await {
                Ok(()) => Ok(()),
                Err(err) if err.is_already_exists() => Ok(()),
                Err(err) => Err(InspectionError::from(err)),
            }
        })
        .await?;

        info!(route_table = %route_table_id, "Enabled propagation");
        Ok(())
    }
}
