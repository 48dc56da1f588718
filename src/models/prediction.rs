use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One detected object: bounding box, class and confidence.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Prediction {
    #[garde(range(min = 0.0))]
    pub x: f64,

    #[garde(range(min = 0.0))]
    pub y: f64,

    #[garde(range(min = 0.0))]
    pub width: f64,

    #[garde(range(min = 0.0))]
    pub height: f64,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[garde(length(min = 1, max = 255))]
    pub class: String,

    #[garde(skip)]
    pub class_id: i32,
}

/// A prediction as read back from storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredPrediction {
    pub id: Uuid,
    #[serde(flatten)]
    pub prediction: Prediction,
    pub created_at: DateTime<Utc>,
}
