use garde::Validate;
use serde::{Deserialize, Serialize};

/// Request to analyse an image already reachable by URL.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    #[garde(url, length(max = 2048), custom(http_scheme))]
    pub image_url: String,
}

/// Response after a job is accepted.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    pub status: String,
}

fn http_scheme(value: &str, _context: &()) -> garde::Result {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(garde::Error::new("image_url must use http or https"))
    }
}
