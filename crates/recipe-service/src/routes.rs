use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use recipe_api::RecipeService;
use recipe_core::{DeleteResult, Recipe, RecipeError, RecipeInput, UpdateResult};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ServiceState {
    pub service: RecipeService,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServiceError {
    status: StatusCode,
    body: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct SearchParams {
    #[serde(default)]
    tag: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

impl ServiceError {
    fn new(status: StatusCode, error: impl Into<String>, reason: Option<String>) -> Self {
        Self { status, body: ErrorBody { error: error.into(), reason } }
    }

    /// Map a service failure; dependency failures carry `server_message`
    /// and the underlying error text as `reason`.
    fn from_recipe(err: RecipeError, server_message: &str) -> Self {
        match err {
            RecipeError::InvalidId(_) | RecipeError::InvalidPayload(_) => {
                Self::new(StatusCode::BAD_REQUEST, err.to_string(), None)
            }
            RecipeError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, err.to_string(), None),
            RecipeError::Store(_) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, server_message, Some(err.to_string()))
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.body.error, reason = ?self.body.reason, "request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}

pub fn app(state: ServiceState) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/recipes", post(create_recipe).get(list_recipes))
        .route("/recipes/", post(create_recipe).get(list_recipes))
        .route("/recipes/search", get(search_recipes))
        .route("/recipe/:id", get(get_recipe).put(update_recipe).delete(delete_recipe));

    Router::new()
        .merge(routes.clone())
        .nest("/v1", routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run a store-bound operation on the blocking pool.
async fn blocking<T, F>(state: ServiceState, op: F) -> Result<T, RecipeError>
where
    T: Send + 'static,
    F: FnOnce(&RecipeService) -> Result<T, RecipeError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || op(&state.service))
        .await
        .map_err(|err| RecipeError::Store(format!("worker task failed: {err}")))?
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn create_recipe(
    State(state): State<ServiceState>,
    body: Bytes,
) -> Result<Json<Recipe>, ServiceError> {
    const FAILURE: &str = "Error adding new recipe";
    let input =
        RecipeInput::from_json(&body).map_err(|err| ServiceError::from_recipe(err, FAILURE))?;
    let recipe = blocking(state, move |service| service.create(input))
        .await
        .map_err(|err| ServiceError::from_recipe(err, FAILURE))?;
    Ok(Json(recipe))
}

async fn list_recipes(State(state): State<ServiceState>) -> Result<Json<Vec<Recipe>>, ServiceError> {
    let recipes = blocking(state, RecipeService::list)
        .await
        .map_err(|err| ServiceError::from_recipe(err, "Error listing recipes"))?;
    Ok(Json(recipes))
}

async fn search_recipes(
    State(state): State<ServiceState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Recipe>>, ServiceError> {
    let recipes = blocking(state, move |service| service.search_by_tag(&params.tag))
        .await
        .map_err(|err| ServiceError::from_recipe(err, "Error searching recipes"))?;
    Ok(Json(recipes))
}

// Not-found is reported as a server error here, unlike delete.
async fn get_recipe(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Recipe>, ServiceError> {
    const FAILURE: &str = "Unable to find data";
    let recipe = blocking(state, move |service| service.get(&id)).await.map_err(|err| match err {
        RecipeError::NotFound(_) => {
            ServiceError::new(StatusCode::INTERNAL_SERVER_ERROR, FAILURE, Some(err.to_string()))
        }
        other => ServiceError::from_recipe(other, FAILURE),
    })?;
    Ok(Json(recipe))
}

async fn update_recipe(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<UpdateResult>, ServiceError> {
    const FAILURE: &str = "Error in updating";
    let input =
        RecipeInput::from_json(&body).map_err(|err| ServiceError::from_recipe(err, FAILURE))?;
    let result = blocking(state, move |service| service.update(&id, &input))
        .await
        .map_err(|err| ServiceError::from_recipe(err, FAILURE))?;
    Ok(Json(result))
}

async fn delete_recipe(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>, ServiceError> {
    let result = blocking(state, move |service| service.delete(&id))
        .await
        .map_err(|err| ServiceError::from_recipe(err, "Error deleting recipe"))?;
    Ok(Json(result))
}
