//! Canned predictions and detection service payloads.

#![allow(dead_code)]

use vision_pipeline::models::prediction::Prediction;

pub const IMAGE_URL: &str = "https://x/img.png";

pub fn prediction(class: &str, class_id: i32, confidence: f64) -> Prediction {
    Prediction {
        x: 120.5,
        y: 88.0,
        width: 64.0,
        height: 48.25,
        confidence,
        class: class.to_string(),
        class_id,
    }
}

/// The cat/dog pair used across scenario tests.
pub fn cat_and_dog() -> Vec<Prediction> {
    vec![prediction("cat", 0, 0.92), prediction("dog", 1, 0.55)]
}

/// Roboflow workflow response carrying the cat/dog pair.
pub fn roboflow_cat_and_dog() -> serde_json::Value {
    serde_json::json!({
        "outputs": [{
            "count_objects": 2,
            "predictions": {
                "image": {"width": 640, "height": 480},
                "predictions": [
                    {
                        "x": 120.5, "y": 88.0, "width": 64.0, "height": 48.25,
                        "confidence": 0.92, "class": "cat", "class_id": 0,
                        "detection_id": "5b3c0e1a", "parent_id": "image"
                    },
                    {
                        "x": 120.5, "y": 88.0, "width": 64.0, "height": 48.25,
                        "confidence": 0.55, "class": "dog", "class_id": 1,
                        "detection_id": "9f2d7c44", "parent_id": "image"
                    }
                ]
            }
        }]
    })
}

pub fn roboflow_empty() -> serde_json::Value {
    serde_json::json!({
        "outputs": [{"count_objects": 0, "predictions": {"predictions": []}}]
    })
}
