use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;

use crate::core::errors::ApiError;
use crate::history::QueryRecord;
use crate::query::AnswerStream;
use crate::server::handlers::documents::Pagination;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub document_id: String,
    pub question: String,
}

impl QueryRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if self.document_id.trim().is_empty() || self.question.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "document_id and question are required".to_string(),
            ));
        }
        Ok(())
    }
}

pub async fn query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    request.validate()?;

    let answer = state
        .orchestrator
        .answer(&request.document_id, &request.question)
        .await
        .map_err(|e| {
            tracing::error!("Error processing query: {}", e);
            ApiError::from(e)
        })?;

    let record = QueryRecord::new(
        &request.document_id,
        &request.question,
        &answer.answer,
        answer.execution_time.as_secs_f64(),
        answer.context_chunks,
    );
    if let Err(e) = state.history.record(&record).await {
        tracing::warn!("Failed to record query {}: {}", record.id, e);
    }

    Ok(Json(json!({
        "id": record.id,
        "document_id": record.document_id,
        "question": record.question,
        "answer": record.answer,
        "created_at": record.created_at,
        "execution_time": record.execution_time,
        "context_chunks": record.context_chunks,
        "source": answer.source,
    })))
}

struct StreamBody {
    stream: Option<AnswerStream>,
    state: Arc<AppState>,
    request: QueryRequest,
}

/// Streams raw answer text as `text/plain`. Errors are reported in-band as
/// the last piece of the body since the status line is already sent.
pub async fn query_stream(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;

    let answer_stream = match state
        .orchestrator
        .stream(&request.document_id, &request.question)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Error in streaming query: {}", e);
            return Ok(plain_text(Body::from(format!(
                "Error processing your query: {}",
                e
            ))));
        }
    };

    let body = stream::unfold(
        StreamBody {
            stream: Some(answer_stream),
            state,
            request,
        },
        |mut ctx| async move {
            let answer_stream = ctx.stream.as_mut()?;
            match answer_stream.next().await {
                Some(Ok(fragment)) => Some((Ok::<_, Infallible>(fragment.into_text()), ctx)),
                Some(Err(e)) => {
                    tracing::error!("Error in streaming query: {}", e);
                    ctx.stream = None;
                    Some((Ok(format!("Error processing your query: {}", e)), ctx))
                }
                None => {
                    if let Some(answer) = answer_stream.answer() {
                        let record = QueryRecord::new(
                            &ctx.request.document_id,
                            &ctx.request.question,
                            answer,
                            answer_stream.elapsed().as_secs_f64(),
                            answer_stream.context_chunks().to_vec(),
                        );
                        if let Err(e) = ctx.state.history.record(&record).await {
                            tracing::warn!("Failed to record query {}: {}", record.id, e);
                        }
                    }
                    None
                }
            }
        },
    );

    Ok(plain_text(Body::from_stream(body)))
}

fn plain_text(body: Body) -> Response {
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response()
}

pub async fn query_history(
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, ApiError> {
    let (queries, total) = state.history.list(page.skip, page.limit).await?;
    Ok(Json(json!({"queries": queries, "total": total})))
}
