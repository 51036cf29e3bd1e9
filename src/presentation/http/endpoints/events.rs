use std::sync::Arc;

use chrono::Utc;
use poem::Result as PoemResult;
use poem_openapi::{OpenApi, payload::Json};

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    mappers::map_event_outcome,
    requests::parse_events_body,
    responses::EventsResponseDto,
    security::ApiKeyAuth,
};

pub struct EventsEndpoints {
    state: Arc<ApiState>,
}

impl EventsEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl EventsEndpoints {
    /// Push ingestion for reply/bounce signals. The body is one event
    /// object or `{"events": [...]}`; duplicates and unmatched events come
    /// back as skipped entries, never errors.
    #[oai(
        path = "/events",
        method = "post",
        tag = EndpointsTags::Events,
    )]
    pub async fn record_events(
        &self,
        auth: ApiKeyAuth,
        body: Json<serde_json::Value>,
    ) -> PoemResult<Json<EventsResponseDto>> {
        auth.verify(&self.state.api_secret)?;

        let events = parse_events_body(&body.0, Utc::now()).map_err(bad_request)?;

        let outcomes = self
            .state
            .record_events_usecase
            .execute(events)
            .await
            .map_err(internal_error)?;

        Ok(Json(EventsResponseDto {
            processed: outcomes.iter().map(map_event_outcome).collect(),
        }))
    }
}

fn bad_request(message: String) -> poem::Error {
    poem::Error::from_string(message, poem::http::StatusCode::BAD_REQUEST)
}

fn internal_error(err: anyhow::Error) -> poem::Error {
    poem::Error::from_string(
        err.to_string(),
        poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    )
}
