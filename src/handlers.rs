// src/handlers.rs
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, Multipart, Path, Query, Request,
        State,
    },
    http::{header::HOST, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use futures::{StreamExt, TryStreamExt};
use reqwest::Url;
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::artifact::{ArtifactSource, ArtifactStore};
use crate::error::OtaError;
use crate::registry::ArtifactRef;
use crate::state::AppState;
use crate::types::*;

type AppS = State<Arc<AppState>>;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn device_ping(State(state): AppS, Query(q): Query<DeviceQuery>) -> &'static str {
    if let Some(device) = DeviceId::from_query(&q) {
        state.liveness.record_ping(&device);
    }
    "OK"
}

pub async fn check_device(State(state): AppS, Query(q): Query<DeviceQuery>) -> Json<OnlineRes> {
    let online = DeviceId::from_query(&q)
        .map(|d| state.liveness.is_online(&d))
        .unwrap_or(false);
    Json(OnlineRes { online })
}

pub async fn update_link(
    State(state): AppS,
    Path(device): Path<String>,
    body: Result<Json<UpdateLinkReq>, JsonRejection>,
) -> Result<Json<MessageRes>, OtaError> {
    let device = DeviceId::parse(device)?;
    let raw = body
        .ok()
        .and_then(|Json(b)| b.url)
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| OtaError::invalid("No URL provided"))?;
    let raw = raw.trim();
    let url = parse_firmware_url(raw)?;

    if state.config.mirror_remote {
        state
            .acquire_artifact(&device, ArtifactSource::Remote(url))
            .await?;
    } else {
        state.arm_link(&device, raw)?;
    }

    Ok(Json(MessageRes {
        message: "Firmware URL saved successfully".into(),
    }))
}

pub async fn upload(
    State(state): AppS,
    Path(device): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<String, OtaError> {
    let device = DeviceId::parse(device)?;
    let mut multipart = multipart.map_err(|_| OtaError::invalid("No file uploaded"))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OtaError::invalid(format!("malformed upload: {e}")))?
    {
        if field.name() != Some("firmware") {
            continue;
        }
        let stream = field
            .map_err(|e| OtaError::invalid(format!("upload interrupted: {e}")))
            .boxed();
        state
            .acquire_artifact(&device, ArtifactSource::Upload(stream))
            .await?;
        return Ok(format!("Firmware uploaded for {device}"));
    }

    Err(OtaError::invalid("No file uploaded"))
}

pub async fn trigger_update(
    State(state): AppS,
    headers: HeaderMap,
    Query(q): Query<DeviceQuery>,
) -> Json<TriggerRes> {
    let Some(device) = DeviceId::from_query(&q) else {
        return Json(TriggerRes { update: false, url: None });
    };
    match state.registry.consume_if_pending(&device) {
        Some(artifact) => {
            let base = download_base(&state, &headers);
            Json(TriggerRes {
                update: true,
                url: Some(artifact.location(base.as_deref())),
            })
        }
        None => Json(TriggerRes { update: false, url: None }),
    }
}

pub async fn download(State(state): AppS, Path(file): Path<String>, req: Request) -> Response {
    let path = match ArtifactStore::device_for_file(&file)
        .ok_or_else(|| OtaError::NotFound(file.clone()))
        .and_then(|d| state.artifacts.path_for(&d).map_err(|_| OtaError::NotFound(file)))
    {
        Ok(path) => path,
        Err(e) => return e.into_response(),
    };
    match ServeFile::new(path).oneshot(req).await {
        Ok(res) => res.into_response(),
        Err(never) => match never {},
    }
}

pub async fn all_updates(
    State(state): AppS,
    headers: HeaderMap,
) -> Json<BTreeMap<String, UpdateView>> {
    let base = download_base(&state, &headers);
    let base = base.as_deref();
    let all = state
        .registry
        .snapshot()
        .into_iter()
        .map(|(id, r)| {
            let source_url = match &r.artifact {
                ArtifactRef::Stored { source_url, .. } => source_url.clone(),
                ArtifactRef::Remote { .. } => None,
            };
            let view = UpdateView {
                update: r.pending,
                firmware_url: r.artifact.location(base),
                source: r.artifact.source(),
                source_url,
                armed_at: r.armed_at.to_rfc3339(),
            };
            (id, view)
        })
        .collect();
    Json(all)
}

pub async fn list_devices(State(state): AppS) -> Json<serde_json::Value> {
    let devices: Vec<DeviceView> = state
        .liveness
        .snapshot()
        .into_iter()
        .map(|(device, r, online)| DeviceView {
            device,
            last_seen_at: r.last_seen_at.to_rfc3339(),
            online,
        })
        .collect();
    Json(json!({ "devices": devices }))
}

fn parse_firmware_url(raw: &str) -> Result<Url, OtaError> {
    let url = Url::parse(raw).map_err(|e| OtaError::invalid(format!("invalid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(OtaError::invalid(format!("unsupported URL scheme: {other}"))),
    }
}

fn download_base(state: &AppState, headers: &HeaderMap) -> Option<String> {
    state.config.public_base_url.clone().or_else(|| {
        headers
            .get(HOST)
            .and_then(|h| h.to_str().ok())
            .map(|h| format!("http://{h}"))
    })
}
