//! HTTP サービス
//!
//! 起動時に [`AppState`] を一度だけ組み立て、全ハンドラで共有します。

pub mod detect;
pub mod diagnosis;
mod handlers;
pub mod upload;

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::inference::{Classifier, InferenceEngine};
use crate::model::{DetectorKind, ServerSettings};
use detect::{ClassifierDetector, Detector, UnavailableDetector};
use diagnosis::DiagnosisCatalog;
use upload::{UploadPolicy, UploadStore};

/// ルート一覧（`GET /routes` の出力元）
pub struct RouteInfo {
    pub endpoint: &'static str,
    pub path: &'static str,
    pub methods: &'static [&'static str],
}

impl fmt::Display for RouteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.endpoint, self.path, self.methods.join(","))
    }
}

pub const ROUTES: &[RouteInfo] = &[
    RouteInfo {
        endpoint: "index",
        path: "/",
        methods: &["GET", "HEAD", "OPTIONS"],
    },
    RouteInfo {
        endpoint: "list_routes",
        path: "/routes",
        methods: &["GET", "HEAD", "OPTIONS"],
    },
    RouteInfo {
        endpoint: "predict",
        path: "/predict",
        methods: &["OPTIONS", "POST"],
    },
    RouteInfo {
        endpoint: "vgg16",
        path: "/vgg16",
        methods: &["OPTIONS", "POST"],
    },
];

/// サービス全体で共有する状態
pub struct AppState {
    pub engine: InferenceEngine,
    pub detector: Arc<dyn Detector>,
    pub policy: UploadPolicy,
    pub uploads: UploadStore,
    pub catalog: DiagnosisCatalog,
}

impl AppState {
    pub fn new(
        engine: InferenceEngine,
        detector: Arc<dyn Detector>,
        settings: &ServerSettings,
    ) -> Result<Self> {
        Ok(Self {
            engine,
            detector,
            policy: UploadPolicy::default(),
            uploads: UploadStore::new(&settings.upload_dir, settings.retain_uploads)?,
            catalog: DiagnosisCatalog::default(),
        })
    }

    /// 設定に従って検出器を選ぶ
    pub fn from_classifier(classifier: Arc<dyn Classifier>, settings: &ServerSettings) -> Result<Self> {
        let engine = InferenceEngine::new(classifier);
        let detector: Arc<dyn Detector> = match settings.detector {
            DetectorKind::Classifier => Arc::new(ClassifierDetector::new(engine.clone())),
            DetectorKind::Unavailable => Arc::new(UnavailableDetector::default()),
        };
        Self::new(engine, detector, settings)
    }
}

/// 全オリジン許可の CORS
async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let allow_headers = request
            .headers()
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, OPTIONS, POST"),
        );
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        return response;
    }

    let mut response = next.run(request).await;
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn router(state: Arc<AppState>, settings: &ServerSettings) -> Router {
    let app = Router::new()
        .route("/", get(handlers::index))
        .route("/routes", get(handlers::list_routes))
        .route("/predict", post(handlers::predict))
        .route("/vgg16", post(handlers::vgg16))
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .with_state(state);

    if settings.cors {
        app.layer(middleware::from_fn(cors_middleware))
    } else {
        app
    }
}

/// サーバーを起動
pub async fn serve(state: AppState, settings: &ServerSettings) -> Result<()> {
    let app = router(Arc::new(state), settings);

    let listener = TcpListener::bind(&settings.bind_addr).await?;
    info!(
        addr = %settings.bind_addr,
        upload_dir = %settings.upload_dir.display(),
        retain_uploads = settings.retain_uploads,
        "サーバーを起動しました"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
