use crate::error::CounterError;
use crate::model::CounterView;
use crate::pool::DbPool;
use crate::store;
use anyhow::anyhow;
use dropshot::endpoint;
use dropshot::ApiDescription;
use dropshot::ConfigDropshot;
use dropshot::HttpError;
use dropshot::HttpServerStarter;
use dropshot::Path;
use dropshot::RequestContext;
use http::header;
use http::HeaderValue;
use http::Method;
use http::Response;
use http::StatusCode;
use hyper::Body;
use schemars::JsonSchema;
use serde::Deserialize;
use slog::error;
use slog::info;

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// The server-wide context: the database connection pool and the PostgreSQL
/// major version the readiness gate requires.
pub struct CounterContext {
    pool: DbPool,
    required_version: u32,
}

impl CounterContext {
    pub fn new(pool: DbPool, required_version: u32) -> CounterContext {
        CounterContext { pool, required_version }
    }

    async fn check_readiness(&self) -> Result<(), CounterError> {
        store::check_readiness(&self.pool, self.required_version).await
    }
}

/// Every request path, split into segments.
#[derive(Deserialize, JsonSchema)]
struct AllPath {
    path: Vec<String>,
}

/// What a gated request resolves to once the readiness check has passed.
#[derive(Debug, PartialEq)]
enum Route {
    GetCounter,
    IncrementCounter,
    NotFound,
}

fn route(method: &Method, segments: &[String]) -> Route {
    let is_counter = matches!(segments, [api, counter]
        if api == "api" && counter == "counter");
    match (is_counter, method) {
        (true, &Method::GET) => Route::GetCounter,
        (true, &Method::PUT) => Route::IncrementCounter,
        _ => Route::NotFound,
    }
}

pub async fn create_dropshot_server(
    config_dropshot: ConfigDropshot,
    log: slog::Logger,
    api_context: CounterContext,
) -> anyhow::Result<dropshot::HttpServer<CounterContext>> {
    // Every method is registered on a wildcard path so that the readiness
    // gate runs before we decide whether the path exists at all.
    let mut api = ApiDescription::new();
    api.register(api_get)
        .and_then(|_| api.register(api_put))
        .and_then(|_| api.register(api_post))
        .and_then(|_| api.register(api_patch))
        .and_then(|_| api.register(api_delete))
        .and_then(|_| api.register(api_preflight))
        .map_err(|error| anyhow!("registering endpoints: {}", error))?;

    Ok(HttpServerStarter::new(&config_dropshot, api, api_context, &log)
        .map_err(|error| anyhow!("creating Dropshot server: {:#}", error))?
        .start())
}

#[endpoint {
    method = GET,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_get(
    rqctx: RequestContext<CounterContext>,
    path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    handle_gated(&rqctx, Method::GET, path_params.into_inner()).await
}

#[endpoint {
    method = PUT,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_put(
    rqctx: RequestContext<CounterContext>,
    path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    handle_gated(&rqctx, Method::PUT, path_params.into_inner()).await
}

#[endpoint {
    method = POST,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_post(
    rqctx: RequestContext<CounterContext>,
    path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    handle_gated(&rqctx, Method::POST, path_params.into_inner()).await
}

#[endpoint {
    method = PATCH,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_patch(
    rqctx: RequestContext<CounterContext>,
    path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    handle_gated(&rqctx, Method::PATCH, path_params.into_inner()).await
}

#[endpoint {
    method = DELETE,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_delete(
    rqctx: RequestContext<CounterContext>,
    path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    handle_gated(&rqctx, Method::DELETE, path_params.into_inner()).await
}

/// CORS preflight for any path.  Browsers send this before a cross-origin
/// PUT.  It is answered without consulting the database.
#[endpoint {
    method = OPTIONS,
    path = "/{path:.*}",
    unpublished = true,
}]
async fn api_preflight(
    rqctx: RequestContext<CounterContext>,
    _path_params: Path<AllPath>,
) -> Result<Response<Body>, HttpError> {
    let requested = rqctx
        .request
        .headers()
        .get(header::ACCESS_CONTROL_REQUEST_HEADERS);
    preflight_response(requested)
}

/// Runs the readiness gate, then serves the counter or a 404.  A failed gate
/// answers 500 whatever the path.
async fn handle_gated(
    rqctx: &RequestContext<CounterContext>,
    method: Method,
    path: AllPath,
) -> Result<Response<Body>, HttpError> {
    let api_context = rqctx.context();
    if let Err(error) = api_context.check_readiness().await {
        error!(rqctx.log, "readiness check failed"; "error_message" => #%error);
        return error_response(&error);
    }

    match route(&method, &path.path) {
        Route::GetCounter => {
            match store::get_counter(&api_context.pool).await {
                Ok(count) => counter_response(&CounterView { count }),
                Err(error) => {
                    error!(rqctx.log, "error fetching count";
                        "error_message" => #%error);
                    error_response(&error)
                }
            }
        }
        Route::IncrementCounter => {
            match store::increment_counter(&api_context.pool).await {
                Ok(count) => {
                    info!(rqctx.log, "bumped counter"; "count" => count);
                    counter_response(&CounterView { count })
                }
                Err(error) => {
                    error!(rqctx.log, "error incrementing count";
                        "error_message" => #%error);
                    error_response(&error)
                }
            }
        }
        Route::NotFound => {
            not_found_response(&method, rqctx.request.uri().path())
        }
    }
}

fn counter_response(view: &CounterView) -> Result<Response<Body>, HttpError> {
    let body = serde_json::to_vec(view).map_err(|error| {
        HttpError::for_internal_error(format!("serializing counter: {}", error))
    })?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .map_err(build_error)
}

/// Every storage failure reaches the client the same way: a 500 whose plain
/// text body is the error message prefixed with "Database error: ".
fn error_response(error: &CounterError) -> Result<Response<Body>, HttpError> {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(format!("Database error: {}", error)))
        .map_err(build_error)
}

fn not_found_response(
    method: &Method,
    path: &str,
) -> Result<Response<Body>, HttpError> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(format!("Cannot {} {}", method, path)))
        .map_err(build_error)
}

fn preflight_response(
    requested_headers: Option<&HeaderValue>,
) -> Result<Response<Body>, HttpError> {
    let mut builder = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(header::ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS);
    if let Some(requested) = requested_headers {
        builder = builder
            .header(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone())
            .header(header::VARY, "Access-Control-Request-Headers");
    }
    builder
        .header(header::CONTENT_LENGTH, "0")
        .body(Body::empty())
        .map_err(build_error)
}

fn build_error(error: http::Error) -> HttpError {
    HttpError::for_internal_error(format!("building response: {}", error))
}
