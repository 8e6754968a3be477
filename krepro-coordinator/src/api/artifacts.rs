use crate::auth::WorkerIdentity;
use crate::bootstrap::Services;
use futures_util::StreamExt;
use krepro_common::model::TaskId;
use poem::http::StatusCode;
use poem::web::{Data, Multipart, Path};
use poem::{handler, Body, IntoResponse, Response};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// Stream-upload deadline, distinct from the 5 s control-plane deadline
/// (SPEC_FULL.md §5, §9): artifacts can be gigabytes of compressed kernel
/// build output.
const UPLOAD_DEADLINE: Duration = Duration::from_secs(600);

/// `POST /api/v1/tasks/:id/artifact`. Raw `poem` handler rather than an
/// `#[OpenApi]` method: the multipart body is parsed and written to disk a
/// chunk at a time so the process never holds a whole artifact in memory
/// (SPEC_FULL.md §4.1, §9), which the `poem_openapi` `Upload::into_vec`
/// shape this codebase otherwise uses for uploads does not give us.
#[handler]
pub async fn upload_artifact(
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
    identity: WorkerIdentity,
    Data(services): Data<&Services>,
) -> poem::Result<Response> {
    let task_id = TaskId(id);
    // Any authenticated, currently-online worker may upload an artifact for
    // any task; ownership is enforced on the terminal status patch, not here.
    let _ = &identity;

    let field = multipart
        .next_field()
        .await?
        .ok_or_else(|| poem::Error::from_string("missing multipart field", StatusCode::BAD_REQUEST))?;
    let original_name = field
        .file_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "artifact".to_string());

    let dir = services.artifacts.root.join(task_id.to_string());
    fs::create_dir_all(&dir)
        .await
        .map_err(poem::error::InternalServerError)?;

    let tmp_path = dir.join(format!("{original_name}.part"));
    let final_path = dir.join(&original_name);

    let write_result = write_field_to_file(field, &tmp_path);
    match tokio::time::timeout(UPLOAD_DEADLINE, write_result).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(poem::Error::from_string(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR));
        }
        Err(_) => {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(poem::Error::from_string("artifact upload timed out", StatusCode::INTERNAL_SERVER_ERROR));
        }
    }

    fs::rename(&tmp_path, &final_path)
        .await
        .map_err(poem::error::InternalServerError)?;

    let relative_path = format!("{}/{}", task_id, original_name);
    services
        .task_service
        .record_artifact(task_id, &relative_path, &original_name)
        .await
        .map_err(|err| poem::Error::from_string(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR))?;

    Ok(StatusCode::OK.into_response())
}

async fn write_field_to_file(mut field: poem::web::Field, path: &std::path::Path) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    while let Some(chunk) = field.next().await {
        let bytes = chunk.map_err(|err| std::io::Error::other(err.to_string()))?;
        file.write_all(&bytes).await?;
    }
    file.flush().await?;
    Ok(())
}

/// `GET /api/v1/artifacts/:id`. Streams the file from disk rather than
/// reading it into a buffer first (SPEC_FULL.md §9).
#[handler]
pub async fn download_artifact(Path(id): Path<Uuid>, Data(services): Data<&Services>) -> poem::Result<Response> {
    let task_id = TaskId(id);
    let task = services
        .task_service
        .get(task_id)
        .await
        .map_err(|err| poem::Error::from_string(err.to_string(), StatusCode::NOT_FOUND))?;

    let (path, name) = match (task.artifact_path, task.artifact_name) {
        (Some(path), Some(name)) => (path, name),
        _ => return Err(poem::Error::from_string("task has no artifact", StatusCode::NOT_FOUND)),
    };

    let full_path = services.artifacts.root.join(&path);
    let file = fs::File::open(&full_path).await.map_err(|err| {
        warn!(%err, path = %full_path.display(), "artifact row present but file missing on disk");
        poem::Error::from_string("artifact not found", StatusCode::NOT_FOUND)
    })?;

    let stream = tokio_util::io::ReaderStream::new(file);
    let body = Body::from_bytes_stream(stream);

    Ok(Response::builder()
        .header("content-disposition", format!("attachment; filename=\"{name}\""))
        .body(body))
}
