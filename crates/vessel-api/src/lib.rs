//! ---
//! vsl_section: "05-networking-external-interfaces"
//! vsl_subsection: "module"
//! vsl_type: "source"
//! vsl_scope: "code"
//! vsl_description: "Release server HTTP API."
//! vsl_version: "v0.0.0-prealpha"
//! vsl_owner: "tbd"
//! ---

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use vessel_build::{BuildForm, BuildPipeline, BuildRequest, UploadIntake};
use vessel_catalog::{Catalog, CatalogError, Product};
use vessel_common::{OperatingSystem, ServerEndpoints, StorageConfig, UpdaterConfig};
use vessel_metrics::DistributionMetrics;

mod error;

pub use error::ApiError;

const UPLOAD_FORM: &str = include_str!("../templates/upload.html");
const DEFAULT_UPLOAD_LIMIT: usize = 1 << 30;

/// Shared API state exposed to handlers.
pub struct ApiState {
    catalog: Arc<Catalog>,
    pipeline: Arc<BuildPipeline>,
    intake: UploadIntake,
    releases_dir: PathBuf,
    updater: UpdaterConfig,
    public_url: Option<ServerEndpoints>,
    metrics: Option<DistributionMetrics>,
    upload_limit: usize,
}

impl ApiState {
    pub fn new(
        pipeline: Arc<BuildPipeline>,
        storage: &StorageConfig,
        updater: UpdaterConfig,
    ) -> Self {
        Self {
            catalog: pipeline.catalog().clone(),
            pipeline,
            intake: UploadIntake::new(storage.uploads_dir(), storage.unzipped_dir()),
            releases_dir: storage.releases_dir.clone(),
            updater,
            public_url: None,
            metrics: None,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
        }
    }

    /// Base URL embedded into capsules instead of the request's `Host`.
    pub fn with_public_url(mut self, public_url: Option<ServerEndpoints>) -> Self {
        self.public_url = public_url;
        self
    }

    pub fn with_metrics(mut self, metrics: DistributionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit = bytes;
        self
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    fn server_endpoints(&self, headers: &HeaderMap) -> Result<ServerEndpoints, ApiError> {
        if let Some(url) = &self.public_url {
            return Ok(url.clone());
        }
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::bad_request("missing Host header and no api.public_url"))?;
        ServerEndpoints::parse(&format!("http://{host}/"))
            .map_err(|err| ApiError::bad_request(err.to_string()))
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("releases_dir", &self.releases_dir)
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// All release server routes.
pub fn router(state: Arc<ApiState>) -> Router {
    let releases = ServeDir::new(&state.releases_dir);
    let upload_limit = state.upload_limit;
    Router::new()
        .route("/", get(get_index))
        .route("/product/:identifier/latest/version", get(get_latest_version))
        .route("/product/:identifier/latest/:os", get(get_latest_archive))
        .route("/updater", get(get_updater))
        .route(
            "/pakkage",
            axum::routing::post(post_pakkage).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/products",
            get(list_products).put(put_product).delete(delete_product),
        )
        .nest_service("/releases", releases)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `addr` and serve [`router`] until shut down.
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Run catalog, intake and pipeline work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ApiError::internal(format!("worker task failed: {err}")))?
}

async fn get_index() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}

async fn get_latest_version(
    State(state): State<Arc<ApiState>>,
    Path(identifier): Path<String>,
) -> Result<String, ApiError> {
    let catalog = state.catalog.clone();
    let lookup = identifier.clone();
    let result = blocking(move || catalog.get_latest(&lookup).map_err(ApiError::from)).await;
    if let Some(metrics) = &state.metrics {
        let outcome = if result.is_ok() { "found" } else { "missing" };
        metrics.record_version_check(&identifier, outcome);
    }
    result.map(|release| release.version.canonical())
}

async fn get_latest_archive(
    State(state): State<Arc<ApiState>>,
    Path((identifier, os)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let os = OperatingSystem::parse(&os)?;
    let catalog = state.catalog.clone();
    let lookup = identifier.clone();
    let (_, path) =
        blocking(move || catalog.latest_path(&lookup, os).map_err(ApiError::from)).await?;

    let body = read_served_file(&path.dist_path, "distribution archive").await?;
    if let Some(metrics) = &state.metrics {
        metrics.record_download(&identifier, os.as_str());
    }
    Ok(attachment(&path.dist_path, "application/zip", body))
}

#[derive(Debug, Deserialize)]
struct UpdaterQuery {
    os: Option<String>,
}

async fn get_updater(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<UpdaterQuery>,
) -> Result<Response, ApiError> {
    let os = query
        .os
        .as_deref()
        .map(OperatingSystem::parse)
        .transpose()?;
    let program = state.updater.binary_for(os);
    let body = read_served_file(program, "updater program").await?;
    Ok(attachment(program, "application/octet-stream", body))
}

async fn post_pakkage(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let mut form = BuildForm::default();
    let mut upload: Option<(Option<String>, Bytes)> = None;
    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().map(str::to_owned);
                upload = Some((file_name, field.bytes().await?));
            }
            "identifier" => form.identifier = field.text().await?,
            "name" => form.name = field.text().await?,
            "password" => form.password = field.text().await?,
            "app" => form.app = field.text().await?,
            "pakked" => form.pakked = field.text().await?,
            "unpakked" => form.unpakked = field.text().await?,
            "plist" => form.plist = field.text().await?,
            _ => {}
        }
    }

    let (file_name, data) = upload.ok_or_else(|| ApiError::bad_request("no file part"))?;
    if let Some(file_name) = file_name.filter(|name| !name.is_empty()) {
        if !has_zip_extension(&file_name) {
            return Err(ApiError::bad_request(format!(
                "upload {file_name} is not a .zip file"
            )));
        }
    }
    let server = state.server_endpoints(&headers)?;

    let outcome = blocking(move || {
        let stored = state.intake.store(&data)?;
        let result = BuildRequest::from_form(
            &form,
            &stored.root,
            server,
            &state.pipeline.config().icon_name,
        )
        .and_then(|request| state.pipeline.run(&request));
        stored.discard();
        result.map_err(ApiError::from)
    })
    .await?;

    let installers = outcome
        .installers
        .iter()
        .map(|(os, path)| (os.as_str().to_owned(), path.display().to_string()))
        .collect();
    Ok(Json(installers))
}

async fn list_products(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<Product>>, ApiError> {
    let catalog = state.catalog.clone();
    blocking(move || catalog.list_products().map_err(ApiError::from))
        .await
        .map(Json)
}

#[derive(Debug, Deserialize)]
struct ProductForm {
    identifier: String,
    name: String,
}

async fn put_product(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<ProductForm>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    let catalog = state.catalog.clone();
    let product = blocking(move || {
        catalog
            .create_product(form.identifier.trim(), form.name.trim())
            .map_err(ApiError::from)
    })
    .await?;
    info!(identifier = %product.identifier, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Debug, Deserialize)]
struct ProductRef {
    identifier: String,
}

async fn delete_product(
    State(state): State<Arc<ApiState>>,
    Form(form): Form<ProductRef>,
) -> Result<StatusCode, ApiError> {
    let catalog = state.catalog.clone();
    let identifier = form.identifier.trim().to_owned();
    blocking(move || {
        catalog.delete_product(&identifier).map_err(|err| match err {
            // DELETE answers 400 for unknown identifiers.
            CatalogError::ProductNotFound(_) => {
                ApiError::bad_request(format!("no product with the identifier {identifier}"))
            }
            other => ApiError::from(other),
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn read_served_file(path: &FsPath, what: &str) -> Result<Vec<u8>, ApiError> {
    tokio::fs::read(path).await.map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            ApiError::not_found(format!("{what} missing at {}", path.display()))
        } else {
            ApiError::internal(format!("failed to read {what} {}: {err}", path.display()))
        }
    })
}

fn attachment(path: &FsPath, content_type: &'static str, body: Vec<u8>) -> Response {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_owned());
    (
        [
            (header::CONTENT_TYPE, content_type.to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        body,
    )
        .into_response()
}

fn has_zip_extension(file_name: &str) -> bool {
    FsPath::new(file_name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_extension_is_case_insensitive() {
        assert!(has_zip_extension("build.zip"));
        assert!(has_zip_extension("BUILD.ZIP"));
        assert!(!has_zip_extension("build.tar.gz"));
        assert!(!has_zip_extension("zip"));
    }

    #[test]
    fn attachment_names_the_file() {
        let response = attachment(FsPath::new("/releases/demo/1.0/Demo.zip"), "application/zip", vec![1]);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"Demo.zip\""
        );
    }
}
