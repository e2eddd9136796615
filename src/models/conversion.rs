use serde::{ Deserialize, Serialize };

/// Validated perspective-conversion request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub source_role: String,
    pub target_role: String,
    pub content: String,
}

/// Raw request body as received over HTTP; every field may be absent.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerspectiveConvertBody {
    #[serde(default)]
    pub source_role: Option<String>,
    #[serde(default)]
    pub target_role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}
