//! Attachment-creation event parsing.
//!
//! Events arrive from the event bus as raw JSON. Every field is read
//! defensively: anything missing or of the wrong type is `MalformedInput`
//! and the event is dropped without retry.

use std::fmt;
use std::str::FromStr;

use inspection_common::{InspectionError, InspectionResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EVENT_SOURCE: &str = "aws.ec2";

pub const CREATE_ATTACHMENT_EVENT: &str = "CreateTransitGatewayVpcAttachment";

/// Tag on the attachment request naming the VPC's role.
pub const ROLE_TAG_KEY: &str = "routeTable";

const ATTACHMENT_POINTER: &str =
    "/responseElements/CreateTransitGatewayVpcAttachmentResponse/transitGatewayVpcAttachment";
const REQUEST_POINTER: &str = "/requestParameters/CreateTransitGatewayVpcAttachmentRequest";

/// Role of the VPC behind an attachment; decides its route table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpcRole {
    Workload,
    Inspection,
}

impl VpcRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            VpcRole::Workload => "workload",
            VpcRole::Inspection => "inspection",
        }
    }
}

impl fmt::Display for VpcRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VpcRole {
    type Err = InspectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workload" => Ok(VpcRole::Workload),
            "inspection" => Ok(VpcRole::Inspection),
            other => Err(InspectionError::malformed(
                "TagSpecifications",
                format!("unknown VPC role '{}'", other),
            )),
        }
    }
}

/// A parsed `CreateTransitGatewayVpcAttachment` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentCreated {
    pub attachment_id: String,
    pub vpc_id: String,
    pub role: VpcRole,
}

impl AttachmentCreated {
    pub fn from_event(event: &Value) -> InspectionResult<Self> {
        let source = str_at(event, "/source")
            .ok_or_else(|| InspectionError::malformed("source", "missing event source"))?;
        if source != EVENT_SOURCE {
            return Err(InspectionError::malformed(
                "source",
                format!("unexpected event source '{}'", source),
            ));
        }

        let detail = event
            .get("detail")
            .filter(|d| d.is_object())
            .ok_or_else(|| InspectionError::malformed("detail", "missing event detail"))?;

        let event_name = str_at(detail, "/eventName")
            .ok_or_else(|| InspectionError::malformed("detail.eventName", "missing event name"))?;
        if event_name != CREATE_ATTACHMENT_EVENT {
            return Err(InspectionError::malformed(
                "detail.eventName",
                format!("unexpected event '{}'", event_name),
            ));
        }

        let attachment_id = str_at(detail, &format!("{}/transitGatewayAttachmentId", ATTACHMENT_POINTER))
            .ok_or_else(|| {
                InspectionError::malformed("transitGatewayAttachmentId", "missing attachment id")
            })?;

        let vpc_id = str_at(detail, &format!("{}/vpcId", ATTACHMENT_POINTER))
            .or_else(|| str_at(detail, &format!("{}/VpcId", REQUEST_POINTER)))
            .ok_or_else(|| InspectionError::malformed("vpcId", "missing VPC id"))?;

        let role = match detail.pointer(&format!("{}/TagSpecifications", REQUEST_POINTER)) {
            Some(specs) => role_from_tag_specifications(specs)?,
            None => VpcRole::Workload,
        };

        Ok(Self {
            attachment_id: attachment_id.to_string(),
            vpc_id: vpc_id.to_string(),
            role,
        })
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Objects or lists of objects, flattened.
fn one_or_many(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Reads the role from `TagSpecifications`. Either may be an object or a
/// list, as may each specification's `Tag`. A `routeTable` tag decides; a lone tag
/// without a key is read by value. No usable tag means workload.
fn role_from_tag_specifications(specs: &Value) -> InspectionResult<VpcRole> {
    let tags: Vec<&Value> = one_or_many(specs)
        .into_iter()
        .filter_map(|spec| spec.get("Tag"))
        .flat_map(one_or_many)
        .collect();

    if let Some(tag) = tags
        .iter()
        .find(|tag| tag.get("Key").and_then(Value::as_str) == Some(ROLE_TAG_KEY))
    {
        let value = tag.get("Value").and_then(Value::as_str).ok_or_else(|| {
            InspectionError::malformed("TagSpecifications", "routeTable tag has no value")
        })?;
        return value.parse();
    }

    if let [tag] = tags.as_slice() {
        if tag.get("Key").is_none() {
            if let Some(value) = tag.get("Value").and_then(Value::as_str) {
                return value.parse();
            }
        }
    }

    Ok(VpcRole::Workload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event(tag_specs: Option<Value>) -> Value {
        let mut request = json!({ "VpcId": "vpc-req" });
        if let Some(specs) = tag_specs {
            request["TagSpecifications"] = specs;
        }
        json!({
            "source": "aws.ec2",
            "detail": {
                "eventName": "CreateTransitGatewayVpcAttachment",
                "requestParameters": { "CreateTransitGatewayVpcAttachmentRequest": request },
                "responseElements": {
                    "CreateTransitGatewayVpcAttachmentResponse": {
                        "transitGatewayVpcAttachment": {
                            "transitGatewayAttachmentId": "tgw-attach-1",
                            "vpcId": "vpc-1"
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_parse_tag_object() {
        let parsed = AttachmentCreated::from_event(&event(Some(json!({
            "ResourceType": "transit-gateway-attachment",
            "Tag": { "Key": "routeTable", "Value": "inspection" }
        }))))
        .unwrap();

        assert_eq!(
            parsed,
            AttachmentCreated {
                attachment_id: "tgw-attach-1".to_string(),
                vpc_id: "vpc-1".to_string(),
                role: VpcRole::Inspection,
            }
        );
    }

    #[test]
    fn test_parse_tag_list() {
        let parsed = AttachmentCreated::from_event(&event(Some(json!([{
            "Tag": [
                { "Key": "Name", "Value": "inspection" },
                { "Key": "routeTable", "Value": "Workload" }
            ]
        }]))))
        .unwrap();
        assert_eq!(parsed.role, VpcRole::Workload);
    }

    #[test]
    fn test_missing_tag_defaults_to_workload() {
        let parsed = AttachmentCreated::from_event(&event(None)).unwrap();
        assert_eq!(parsed.role, VpcRole::Workload);

        let other_tags = AttachmentCreated::from_event(&event(Some(json!({
            "Tag": { "Key": "Name", "Value": "inspection" }
        }))))
        .unwrap();
        assert_eq!(other_tags.role, VpcRole::Workload);
    }

    #[test]
    fn test_unknown_role_is_malformed() {
        let err = AttachmentCreated::from_event(&event(Some(json!({
            "Tag": { "Key": "routeTable", "Value": "shared-services" }
        }))))
        .unwrap_err();
        assert_eq!(err.kind(), "MalformedInput");
    }

    #[test]
    fn test_rejects_wrong_event() {
        let mut wrong_source = event(None);
        wrong_source["source"] = json!("aws.s3");
        assert!(AttachmentCreated::from_event(&wrong_source).is_err());

        let mut wrong_name = event(None);
        wrong_name["detail"]["eventName"] = json!("DeleteTransitGatewayVpcAttachment");
        assert!(AttachmentCreated::from_event(&wrong_name).is_err());

        assert!(AttachmentCreated::from_event(&json!({ "source": "aws.ec2" })).is_err());
        assert!(AttachmentCreated::from_event(&json!("not an object")).is_err());
    }

    #[test]
    fn test_missing_attachment_id() {
        let mut ev = event(None);
        ev["detail"]["responseElements"] = json!({});
        let err = AttachmentCreated::from_event(&ev).unwrap_err();
        assert!(matches!(err, InspectionError::MalformedInput { field, .. } if field == "transitGatewayAttachmentId"));
    }

    #[test]
    fn test_vpc_id_falls_back_to_request() {
        let mut ev = event(None);
        ev["detail"]["responseElements"]["CreateTransitGatewayVpcAttachmentResponse"]
            ["transitGatewayVpcAttachment"]["vpcId"] = Value::Null;
        assert_eq!(AttachmentCreated::from_event(&ev).unwrap().vpc_id, "vpc-req");
    }
}
