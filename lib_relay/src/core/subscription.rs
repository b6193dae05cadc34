//! # Subscription Filter
//!
//! The criteria sent upstream right after the connection opens: bounding boxes,
//! message types and an optional MMSI allow-list. Built once at startup and
//! shared read-only for the life of the process.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::RelayError;

/// Two `[latitude, longitude]` corners of a rectangle.
pub type BoundingBox = [[f64; 2]; 2];

/// The rectangle used when none is configured.
pub const DEFAULT_BBOX: BoundingBox = [[-23.95, -46.4], [-23.85, -46.2]];

/// The message type used when none is configured.
pub const DEFAULT_MESSAGE_TYPE: &str = "PositionReport";

/// Credential field spellings. The upstream has been seen to accept either one,
/// so one payload is sent per spelling.
pub const CREDENTIAL_FIELDS: [&str; 2] = ["APIKey", "Apikey"];

/// # Subscription Filter
///
/// Serializes to the upstream's subscription body, minus the credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionFilter {
    #[serde(rename = "BoundingBoxes")]
    bounding_boxes: Vec<BoundingBox>,
    #[serde(rename = "FilterMessageTypes")]
    message_types: Vec<String>,
    /// Sent as decimal strings (`["368207620"]`), not JSON numbers, even when configured as integers.
    #[serde(
        rename = "FiltersShipMMSI",
        skip_serializing_if = "Option::is_none",
        serialize_with = "mmsi_as_strings"
    )]
    ship_mmsi: Option<Vec<u32>>,
}

impl Default for SubscriptionFilter {
    fn default() -> Self {
        Self::new(vec![DEFAULT_BBOX], vec![DEFAULT_MESSAGE_TYPE.to_string()], None)
    }
}

impl SubscriptionFilter {
    /// Creates a filter. An empty MMSI list is stored as "no MMSI filter" so the
    /// field is left out of the payload instead of being sent empty.
    pub fn new(bounding_boxes: Vec<BoundingBox>, message_types: Vec<String>, ship_mmsi: Option<Vec<u32>>) -> Self {
        Self {
            bounding_boxes,
            message_types,
            ship_mmsi: ship_mmsi.filter(|ids| !ids.is_empty()),
        }
    }

    /// The rectangles, in configuration order.
    pub fn bounding_boxes(&self) -> &[BoundingBox] {
        &self.bounding_boxes
    }

    /// The message-type allow-list.
    pub fn message_types(&self) -> &[String] {
        &self.message_types
    }

    /// The MMSI allow-list, if one is configured.
    pub fn ship_mmsi(&self) -> Option<&[u32]> {
        self.ship_mmsi.as_deref()
    }

    /// Builds one serialized subscription request per entry of `CREDENTIAL_FIELDS`.
    pub fn subscription_payloads(&self, credential: &str) -> Result<Vec<String>, RelayError> {
        CREDENTIAL_FIELDS
            .iter()
            .map(|field| {
                let mut body = serde_json::to_value(self)?;
                if let Value::Object(map) = &mut body {
                    map.insert((*field).to_string(), Value::String(credential.to_string()));
                }
                Ok(serde_json::to_string(&body)?)
            })
            .collect()
    }
}

fn mmsi_as_strings<S: Serializer>(ship_mmsi: &Option<Vec<u32>>, serializer: S) -> Result<S::Ok, S::Error> {
    let ids: Vec<String> = ship_mmsi.iter().flatten().map(u32::to_string).collect();
    ids.serialize(serializer)
}
