//! HTTP ハンドラ

use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, info, warn};

use super::upload::{ImageUpload, UploadRejection, IMAGE_FIELD};
use super::{AppState, ROUTES};
use crate::error::{ClassifierError, Result};

const INDEX_HTML: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Nail Classifier</title></head>
<body>
<h1>Nail Classifier</h1>
<form action="/vgg16" method="post" enctype="multipart/form-data">
  <input type="file" name="image" accept="image/png,image/jpeg,image/gif,image/webp">
  <button type="submit">Predict</button>
</form>
</body>
</html>
"#;

/// ハンドラ内の失敗
enum Failure {
    Rejected(UploadRejection),
    Multipart(MultipartError),
    Processing(ClassifierError),
}

impl Failure {
    fn status(&self) -> StatusCode {
        match self {
            Failure::Rejected(_) => StatusCode::BAD_REQUEST,
            Failure::Multipart(e) => e.status(),
            Failure::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            Failure::Rejected(r) => r.message().to_string(),
            Failure::Multipart(e) => e.body_text(),
            Failure::Processing(ClassifierError::DetectorUnavailable(detail)) => format!(
                "{} Please install or configure the detection backend properly.",
                detail
            ),
            Failure::Processing(e) => format!("Processing error: {}", e),
        }
    }

    fn log(&self, endpoint: &str) {
        match self {
            Failure::Processing(e) => warn!(endpoint, error = %e, "処理に失敗しました"),
            _ => warn!(endpoint, reason = %self.message(), "リクエストを拒否しました"),
        }
    }

    fn into_json(self, endpoint: &str) -> Response {
        self.log(endpoint);
        (self.status(), Json(json!({ "error": self.message() }))).into_response()
    }

    fn into_text(self, endpoint: &str) -> Response {
        self.log(endpoint);
        (self.status(), self.message()).into_response()
    }
}

/// `image` フィールドを探す
///
/// ファイル名を持たない同名フィールドはファイルとして扱わない。
async fn read_image_field(
    multipart: &mut Multipart,
) -> std::result::Result<Option<ImageUpload>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?.to_vec();
        return Ok(Some(ImageUpload { filename, bytes }));
    }
    Ok(None)
}

/// multipart でないリクエストはファイル無しとして扱う
async fn accept_upload(
    state: &AppState,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> std::result::Result<ImageUpload, Failure> {
    let mut multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            debug!(reason = %rejection.body_text(), "multipart として解釈できません");
            return Err(Failure::Rejected(UploadRejection::MissingFile));
        }
    };
    let field = read_image_field(&mut multipart).await.map_err(Failure::Multipart)?;
    state.policy.validate(field).map_err(Failure::Rejected)
}

/// 保存・デコード・推論はブロッキングスレッドで行う
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ClassifierError::Model(format!("worker task failed: {}", e)))?
}

pub(super) async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub(super) async fn list_routes() -> Json<serde_json::Value> {
    let routes: Vec<String> = ROUTES.iter().map(|r| r.to_string()).collect();
    Json(json!({ "routes": routes }))
}

/// 検出器の出力を JSON で返す
pub(super) async fn predict(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    const ENDPOINT: &str = "predict";

    let upload = match accept_upload(&state, multipart).await {
        Ok(upload) => upload,
        Err(failure) => return failure.into_json(ENDPOINT),
    };
    let filename = upload.filename.clone();

    let worker = Arc::clone(&state);
    let result = run_blocking(move || {
        let stored = worker.uploads.store(&upload)?;
        worker.detector.detect(stored.path())
    })
    .await;

    match result {
        Ok(predictions) => {
            info!(endpoint = ENDPOINT, filename = %filename, count = predictions.len(), "検出完了");
            Json(json!({ "predictions": predictions })).into_response()
        }
        Err(e) => Failure::Processing(e).into_json(ENDPOINT),
    }
}

/// 最も確率の高いクラスと説明をプレーンテキストで返す
pub(super) async fn vgg16(
    State(state): State<Arc<AppState>>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Response {
    const ENDPOINT: &str = "vgg16";

    let upload = match accept_upload(&state, multipart).await {
        Ok(upload) => upload,
        Err(failure) => return failure.into_text(ENDPOINT),
    };
    let filename = upload.filename.clone();
    info!(endpoint = ENDPOINT, filename = %filename, bytes = upload.bytes.len(), "画像を受信しました");

    let worker = Arc::clone(&state);
    let result = run_blocking(move || {
        let stored = worker.uploads.store(&upload)?;
        let predictions = worker.engine.predict_path(stored.path())?;
        predictions
            .top()
            .cloned()
            .ok_or_else(|| ClassifierError::Model("model returned no predictions".to_string()))
    })
    .await;

    match result {
        Ok(top) => {
            let text = state.catalog.report(&top);
            info!(
                endpoint = ENDPOINT,
                filename = %filename,
                label = %top.label,
                probability = top.probability,
                "予測完了"
            );
            (StatusCode::OK, text).into_response()
        }
        Err(e) => Failure::Processing(e).into_text(ENDPOINT),
    }
}
