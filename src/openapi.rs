//! OpenAPI document for the response envelopes, served at `/openapi.json`.

use crate::error::{ErrorBody, ErrorDetail};
use crate::response::{CreatedId, GridField, GridPage, MetaCount};
use crate::service::RelatedReference;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Senior-care administration API"),
    components(schemas(ErrorBody, ErrorDetail, GridPage, CreatedId, RelatedReference, MetaCount, GridField))
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_envelope_schemas() {
        let doc = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = doc["components"]["schemas"].as_object().unwrap();
        for name in ["ErrorBody", "GridPage", "CreatedId", "RelatedReference"] {
            assert!(schemas.contains_key(name), "missing {}", name);
        }
    }
}
