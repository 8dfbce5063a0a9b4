use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Sidecar written next to a saved try-on image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryOnReceipt {
    pub schema_version: u64,
    pub attempt_id: String,
    pub capability: String,
    pub model: Option<String>,
    pub tier: String,
    pub creativity: u8,
    pub outfit_mode: String,
    pub instruction: String,
    pub image_path: String,
    pub mime_type: String,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub capability_request: Map<String, Value>,
}

/// Writes the receipt as pretty JSON. `capability_request` is expected to hold
/// a summary where inline images are already reduced to their size.
pub fn write_receipt(path: &Path, receipt: &TryOnReceipt) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(receipt)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{write_receipt, TryOnReceipt, RECEIPT_SCHEMA_VERSION};
    use crate::events::payload;

    #[test]
    fn receipt_round_trips_through_disk() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("receipts").join("tryon-1.json");
        let receipt = TryOnReceipt {
            schema_version: RECEIPT_SCHEMA_VERSION,
            attempt_id: "a-1".to_string(),
            capability: "dryrun".to_string(),
            model: None,
            tier: "balanced".to_string(),
            creativity: 25,
            outfit_mode: "text".to_string(),
            instruction: "wear a jacket".to_string(),
            image_path: "/tmp/tryon-1.png".to_string(),
            mime_type: "image/png".to_string(),
            elapsed_ms: 12,
            capability_request: payload(json!({
                "parts": [
                    {"inlineData": {"mimeType": "image/png", "size_bytes": 4}},
                    {"text": "wear a jacket"}
                ]
            })),
        };
        write_receipt(&path, &receipt)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["tier"], json!("balanced"));
        assert_eq!(
            parsed["capability_request"]["parts"][0]["inlineData"]["size_bytes"],
            json!(4)
        );
        let back: TryOnReceipt = serde_json::from_value(parsed.clone())?;
        assert_eq!(back, receipt);
        assert_eq!(
            parsed["capability_request"]["parts"][1]["text"],
            json!("wear a jacket")
        );
        Ok(())
    }
}
