use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Query, payload::Json};
use uuid::Uuid;

use crate::{
    application::usecases::run_delivery_pass::PassRequest,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::map_pass_report,
        responses::PassReportDto,
        security::ApiKeyAuth,
    },
};

pub struct WorkerEndpoints {
    state: Arc<ApiState>,
}

impl WorkerEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl WorkerEndpoints {
    /// On-demand delivery pass: same selection and dispatch path the
    /// background loop runs, awaited inline so the caller gets the report.
    #[oai(
        path = "/worker/run",
        method = "post",
        tag = EndpointsTags::Worker,
    )]
    pub async fn run_pass(
        &self,
        auth: ApiKeyAuth,
        limit: Query<Option<u32>>,
        #[oai(name = "teamId")] team_id: Query<Option<Uuid>>,
    ) -> PoemResult<Json<PassReportDto>> {
        auth.verify(&self.state.api_secret)?;

        let report = self
            .state
            .run_pass_usecase
            .execute(PassRequest {
                limit: limit.0,
                team_id: team_id.0,
                manual: true,
            })
            .await
            .map_err(internal_error)?;

        Ok(Json(map_pass_report(&report)))
    }
}

fn internal_error(err: anyhow::Error) -> poem::Error {
    poem::Error::from_string(
        err.to_string(),
        poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    )
}
