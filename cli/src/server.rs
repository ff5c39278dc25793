use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{MatchedPath, Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use larder_core::auth::AuthError;
use larder_core::error::LarderError;
use larder_core::models::{
    Collection, CollectionDetail, Ingredient, MealPlan, MealPlanDetail, MealPlanEntry,
    NewMealPlan, NewRecipe, NewRecipeIngredient, Recipe, RecipeDetail, ShoppingList,
    ShoppingListDetail, ShoppingListItem, Unit, UpdateRecipe, UpdateShoppingListItem, User,
};
use larder_core::service::{LarderService, Session};
use larder_core::shopping::ShoppingError;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<Mutex<LarderService>>,
}

impl AppState {
    fn lock(&self) -> MutexGuard<'_, LarderService> {
        self.svc.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Raw bearer token of the current request, kept so logout can revoke it.
#[derive(Clone)]
struct SessionToken(String);

// --- Request / Response types ---

#[derive(Deserialize)]
struct CredentialsRequest {
    username: String,
    password: String,
}

#[derive(Deserialize)]
struct CreateUnitRequest {
    name: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
}

fn default_servings() -> f64 {
    1.0
}

#[derive(Deserialize)]
struct CreateRecipeRequest {
    title: String,
    description: Option<String>,
    instructions: Option<String>,
    #[serde(default = "default_servings")]
    servings: f64,
    image_url: Option<String>,
    #[serde(default)]
    ingredients: Vec<NewRecipeIngredient>,
}

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateRecipeRequest {
    title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    instructions: Option<Option<String>>,
    servings: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_some")]
    image_url: Option<Option<String>>,
    ingredients: Option<Vec<NewRecipeIngredient>>,
}

#[derive(Deserialize)]
struct CreateCollectionRequest {
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct CreateMealPlanRequest {
    name: String,
    start_date: String,
    days: i64,
}

#[derive(Deserialize)]
struct AddPlanRecipeRequest {
    recipe_id: i64,
    day: i64,
    quantity: Option<f64>,
}

#[derive(Deserialize, Default)]
struct GenerateShoppingListRequest {
    name: Option<String>,
}

#[derive(Serialize)]
struct GenerateShoppingListResponse {
    message: String,
    #[serde(rename = "shoppingList")]
    shopping_list: larder_core::models::ShoppingListRef,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    Aggregation(ShoppingError),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Aggregation(err) => {
                tracing::error!(error = %err, "shopping list aggregation failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(e) = err.downcast_ref::<LarderError>() {
            return match e {
                LarderError::Invalid(msg) => Self::BadRequest(msg.clone()),
                LarderError::NotFound(msg) => Self::NotFound(msg.clone()),
                LarderError::Conflict(msg) => Self::Conflict(msg.clone()),
            };
        }
        if let Some(e) = err.downcast_ref::<ShoppingError>() {
            return Self::Aggregation(e.clone());
        }
        match err.downcast_ref::<AuthError>() {
            Some(e @ AuthError::UsernameTaken(_)) => Self::Conflict(e.to_string()),
            Some(e @ AuthError::InvalidCredentials) => Self::Unauthorized(e.to_string()),
            None => Self::Internal(err),
        }
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    let user = token
        .as_deref()
        .and_then(|t| match state.lock().user_for_token(t) {
            Ok(user) => user,
            Err(e) => {
                tracing::error!("session lookup failed: {e:#}");
                None
            }
        });

    let (Some(token), Some(user)) = (token, user) else {
        tracing::warn!(path = %request.uri().path(), "rejected unauthenticated request");
        return ApiError::Unauthorized("Invalid or missing session token".to_string())
            .into_response();
    };

    request.extensions_mut().insert(user);
    request.extensions_mut().insert(SessionToken(token));
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Users ---

async fn register(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.lock().register(&req.username, &req.password)?;
    tracing::info!(user_id = user.id, "user registered");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<Session>, ApiError> {
    let session = state.lock().login(&req.username, &req.password).inspect_err(|_| {
        tracing::warn!("failed login attempt");
    })?;
    Ok(Json(session))
}

async fn logout(
    State(state): State<AppState>,
    Extension(SessionToken(token)): Extension<SessionToken>,
) -> Result<StatusCode, ApiError> {
    state.lock().logout(&token)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

// --- Units ---

async fn list_units(State(state): State<AppState>) -> Result<Json<Vec<Unit>>, ApiError> {
    let units = state.lock().db().list_units().context("failed to list units")?;
    Ok(Json(units))
}

async fn create_unit(
    State(state): State<AppState>,
    Json(req): Json<CreateUnitRequest>,
) -> Result<(StatusCode, Json<Unit>), ApiError> {
    let unit = state.lock().create_unit(&req.name)?;
    Ok((StatusCode::CREATED, Json(unit)))
}

// --- Ingredients ---

async fn list_ingredients(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Ingredient>>, ApiError> {
    let ingredients = state
        .lock()
        .db()
        .list_ingredients(query.q.as_deref())
        .context("failed to list ingredients")?;
    Ok(Json(ingredients))
}

// --- Recipes ---

async fn list_recipes(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<Recipe>>, ApiError> {
    let recipes = state
        .lock()
        .db()
        .list_recipes(user.id, query.q.as_deref())
        .context("failed to list recipes")?;
    Ok(Json(recipes))
}

async fn create_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateRecipeRequest>,
) -> Result<(StatusCode, Json<RecipeDetail>), ApiError> {
    let recipe = NewRecipe {
        title: req.title,
        description: req.description,
        instructions: req.instructions,
        servings: req.servings,
        image_url: req.image_url,
        ingredients: req.ingredients,
    };
    let detail = state.lock().create_recipe(user.id, &recipe)?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let detail = state.lock().db().get_recipe_detail(user.id, id)?;
    Ok(Json(detail))
}

async fn update_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateRecipeRequest>,
) -> Result<Json<RecipeDetail>, ApiError> {
    let update = UpdateRecipe {
        title: req.title,
        description: req.description,
        instructions: req.instructions,
        servings: req.servings,
        image_url: req.image_url,
    };
    let detail = state
        .lock()
        .update_recipe(user.id, id, &update, req.ingredients.as_deref())?;
    Ok(Json(detail))
}

async fn delete_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .delete_recipe(user.id, id)
        .context("failed to delete recipe")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Recipe {id} not found")))
    }
}

// --- Collections ---

async fn list_collections(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<Collection>>, ApiError> {
    let collections = state
        .lock()
        .db()
        .list_collections(user.id)
        .context("failed to list collections")?;
    Ok(Json(collections))
}

async fn create_collection(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateCollectionRequest>,
) -> Result<(StatusCode, Json<Collection>), ApiError> {
    let collection = state
        .lock()
        .create_collection(user.id, &req.name, req.description.as_deref())?;
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn get_collection(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<CollectionDetail>, ApiError> {
    let detail = state.lock().db().get_collection_detail(user.id, id)?;
    Ok(Json(detail))
}

async fn delete_collection(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .delete_collection(user.id, id)
        .context("failed to delete collection")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Collection {id} not found")))
    }
}

async fn add_collection_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((id, recipe_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    state
        .lock()
        .db()
        .add_recipe_to_collection(user.id, id, recipe_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_collection_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((id, recipe_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .remove_recipe_from_collection(user.id, id, recipe_id)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Recipe {recipe_id} is not in collection {id}"
        )))
    }
}

// --- Meal plans ---

async fn list_meal_plans(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<MealPlan>>, ApiError> {
    let plans = state
        .lock()
        .db()
        .list_meal_plans(user.id)
        .context("failed to list meal plans")?;
    Ok(Json(plans))
}

async fn create_meal_plan(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<CreateMealPlanRequest>,
) -> Result<(StatusCode, Json<MealPlan>), ApiError> {
    let start_date = NaiveDate::parse_from_str(&req.start_date, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!(
            "Invalid start_date '{}'. Use YYYY-MM-DD",
            req.start_date
        ))
    })?;
    let plan = state.lock().create_meal_plan(
        user.id,
        &NewMealPlan {
            name: req.name,
            start_date,
            days: req.days,
        },
    )?;
    Ok((StatusCode::CREATED, Json(plan)))
}

async fn get_meal_plan(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<MealPlanDetail>, ApiError> {
    let detail = state.lock().db().get_meal_plan_detail(user.id, id)?;
    Ok(Json(detail))
}

async fn delete_meal_plan(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .delete_meal_plan(user.id, id)
        .context("failed to delete meal plan")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Meal plan {id} not found")))
    }
}

async fn add_meal_plan_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    Json(req): Json<AddPlanRecipeRequest>,
) -> Result<(StatusCode, Json<MealPlanEntry>), ApiError> {
    let entry = state
        .lock()
        .add_meal_plan_entry(user.id, id, req.recipe_id, req.day, req.quantity)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn remove_meal_plan_recipe(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((id, entry_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .remove_meal_plan_entry(user.id, id, entry_id)?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Entry {entry_id} not found")))
    }
}

async fn generate_shopping_list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<GenerateShoppingListResponse>), ApiError> {
    // The body is optional; an empty one means "use the default name"
    let req: GenerateShoppingListRequest = if body.iter().all(u8::is_ascii_whitespace) {
        GenerateShoppingListRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?
    };

    let list = state
        .lock()
        .generate_shopping_list(user.id, id, req.name.as_deref())?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateShoppingListResponse {
            message: "Shopping list generated successfully".to_string(),
            shopping_list: list,
        }),
    ))
}

// --- Shopping lists ---

async fn list_shopping_lists(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<ShoppingList>>, ApiError> {
    let lists = state
        .lock()
        .db()
        .list_shopping_lists(user.id)
        .context("failed to list shopping lists")?;
    Ok(Json(lists))
}

async fn get_shopping_list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Json<ShoppingListDetail>, ApiError> {
    let detail = state.lock().db().get_shopping_list_detail(user.id, id)?;
    Ok(Json(detail))
}

async fn delete_shopping_list(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .lock()
        .db()
        .delete_shopping_list(user.id, id)
        .context("failed to delete shopping list")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Shopping list {id} not found")))
    }
}

async fn update_shopping_list_item(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path((id, item_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateShoppingListItem>,
) -> Result<Json<ShoppingListItem>, ApiError> {
    let item = state
        .lock()
        .update_shopping_list_item(user.id, id, item_id, &req)?;
    Ok(Json(item))
}

async fn export_shopping_list_csv(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let csv = state.lock().export_shopping_list_csv(user.id, id)?;

    let disposition = format!("attachment; filename=\"shopping-list-{id}.csv\"");
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    )
        .into_response())
}

// --- Router ---

fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/api/users/register", post(register))
        .route("/api/users/login", post(login));

    let protected = Router::new()
        .route("/api/users/logout", post(logout))
        .route("/api/users/me", get(me))
        .route("/api/units", get(list_units).post(create_unit))
        .route("/api/ingredients", get(list_ingredients))
        .route("/api/recipes", get(list_recipes).post(create_recipe))
        .route(
            "/api/recipes/{id}",
            get(get_recipe).put(update_recipe).delete(delete_recipe),
        )
        .route(
            "/api/collections",
            get(list_collections).post(create_collection),
        )
        .route(
            "/api/collections/{id}",
            get(get_collection).delete(delete_collection),
        )
        .route(
            "/api/collections/{id}/recipes/{recipe_id}",
            put(add_collection_recipe).delete(remove_collection_recipe),
        )
        .route("/api/meal-plans", get(list_meal_plans).post(create_meal_plan))
        .route(
            "/api/meal-plans/{id}",
            get(get_meal_plan).delete(delete_meal_plan),
        )
        .route("/api/meal-plans/{id}/recipes", post(add_meal_plan_recipe))
        .route(
            "/api/meal-plans/{id}/recipes/{entry_id}",
            axum::routing::delete(remove_meal_plan_recipe),
        )
        .route(
            "/api/meal-plans/{id}/shopping-list",
            post(generate_shopping_list),
        )
        .route("/api/shopping-lists", get(list_shopping_lists))
        .route(
            "/api/shopping-lists/{id}",
            get(get_shopping_list).delete(delete_shopping_list),
        )
        .route(
            "/api/shopping-lists/{id}/items/{item_id}",
            put(update_shopping_list_item),
        )
        .route(
            "/api/shopping-lists/{id}/csv",
            get(export_shopping_list_csv),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let matched_path = request
                        .extensions()
                        .get::<MatchedPath>()
                        .map_or(request.uri().path(), MatchedPath::as_str);
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %matched_path,
                    )
                })
                .on_request(|_request: &Request, _span: &Span| {})
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    let status = response.status().as_u16();
                    if status >= 500 {
                        tracing::error!(
                            status,
                            latency_ms = %latency.as_millis(),
                            "request failed with server error"
                        );
                    } else {
                        tracing::info!(
                            status,
                            latency_ms = %latency.as_millis(),
                            "request completed"
                        );
                    }
                }),
        )
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(svc: LarderService, port: u16, bind: &str) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(Mutex::new(svc)),
    };
    let app = build_router(state);

    if bind != "127.0.0.1" && bind != "localhost" {
        tracing::warn!(
            "Listening on {bind}: anyone who can reach this address can register an account"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
