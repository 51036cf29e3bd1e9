use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Path, payload::Json};
use uuid::Uuid;

use crate::{
    domain::errors::DomainError,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::map_sequence_report,
        responses::{ArchiveRepliesResponseDto, SequenceStatusDto},
        security::ApiKeyAuth,
    },
};

pub struct SequencesEndpoints {
    state: Arc<ApiState>,
}

impl SequencesEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl SequencesEndpoints {
    #[oai(
        path = "/sequences/:sequence_id/status",
        method = "get",
        tag = EndpointsTags::Sequences,
    )]
    pub async fn sequence_status(
        &self,
        auth: ApiKeyAuth,
        sequence_id: Path<Uuid>,
    ) -> PoemResult<Json<SequenceStatusDto>> {
        auth.verify(&self.state.api_secret)?;

        let report = self
            .state
            .sequence_status_usecase
            .execute(sequence_id.0)
            .await
            .map_err(map_domain_error)?;

        Ok(Json(map_sequence_report(&report)))
    }

    #[oai(
        path = "/sequences/:sequence_id/archive_replies",
        method = "post",
        tag = EndpointsTags::Sequences,
    )]
    pub async fn archive_replies(
        &self,
        auth: ApiKeyAuth,
        sequence_id: Path<Uuid>,
    ) -> PoemResult<Json<ArchiveRepliesResponseDto>> {
        auth.verify(&self.state.api_secret)?;

        let archived = self
            .state
            .archive_replies_usecase
            .execute(sequence_id.0)
            .await
            .map_err(internal_error)?;

        Ok(Json(ArchiveRepliesResponseDto { archived }))
    }
}

fn map_domain_error(err: DomainError) -> poem::Error {
    let status = match &err {
        DomainError::NotFound(_) => poem::http::StatusCode::NOT_FOUND,
        DomainError::Validation(_) => poem::http::StatusCode::BAD_REQUEST,
        DomainError::Forbidden(_) => poem::http::StatusCode::FORBIDDEN,
        DomainError::Other(_) => poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    poem::Error::from_string(err.to_string(), status)
}

fn internal_error(err: anyhow::Error) -> poem::Error {
    poem::Error::from_string(
        err.to_string(),
        poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    )
}
