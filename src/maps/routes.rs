//! Loopback-only map resource routes (spec.md §4.9). Loopback enforcement
//! itself is a layer applied by [`crate::router`], not duplicated here.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use bytes::Bytes;

use crate::app::AppState;
use crate::error::{self, AppError, ErrorCode};
use crate::store::PackageSlot;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/default/style.json", get(get_default_style))
        .route("/:slot/info", get(get_info))
        .route("/:slot/style.json", get(get_style))
        .route("/:slot/*path", get(get_resource))
        .route("/:slot", put(put_map).delete(delete_map))
}

fn parse_slot(raw: &str) -> Result<PackageSlot, AppError> {
    raw.parse::<PackageSlot>()
        .map_err(|_| error::map_not_found(format!("unknown slot {raw:?}")))
}

fn base_url(headers: &HeaderMap, slot: PackageSlot) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1");
    format!("http://{host}/maps/{slot}/")
}

async fn get_info(State(state): State<AppState>, Path(slot): Path<String>) -> Result<Json<crate::store::MapInfo>, AppError> {
    let slot = parse_slot(&slot)?;
    let info = state.store.get_info(slot).await?;
    Ok(Json(info))
}

async fn get_style(
    State(state): State<AppState>,
    Path(slot): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let slot = parse_slot(&slot)?;
    let reader = state.store.get_reader(slot).await?;
    let style = reader.get_style(&base_url(&headers, slot)).await?;
    Ok(Json(style).into_response())
}

async fn get_resource(
    State(state): State<AppState>,
    Path((slot, path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let slot = parse_slot(&slot)?;
    let reader = state.store.get_reader(slot).await?;
    let resource = reader.serve_resource(&path).await?;

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, resource.content_type)
        .header(header::CONTENT_LENGTH, resource.content_length);
    if let Some(encoding) = resource.content_encoding {
        builder = builder.header(header::CONTENT_ENCODING, encoding);
    }
    Ok(builder
        .body(Body::from(resource.body))
        .expect("response builder invariants upheld"))
}

/// `GET /maps/default/style.json` — 302 to the first HTTP-OK candidate in
/// order: custom, `defaultOnlineStyleUrl`, fallback. Local candidates are
/// probed in-process (no self-dial over the socket); the online candidate
/// is probed with an outbound request.
async fn get_default_style(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if local_style_ok(&state, &headers, PackageSlot::Custom).await {
        return redirect_302("/maps/custom/style.json");
    }
    if let Some(url) = state.config.default_online_style_url.clone() {
        if online_style_ok(&state, &url).await {
            return redirect_302(url.as_str());
        }
    }
    if local_style_ok(&state, &headers, PackageSlot::Fallback).await {
        return redirect_302("/maps/fallback/style.json");
    }
    error::map_not_found("no map available for any candidate").into_response()
}

async fn local_style_ok(state: &AppState, headers: &HeaderMap, slot: PackageSlot) -> bool {
    let Ok(reader) = state.store.get_reader(slot).await else {
        return false;
    };
    reader.get_style(&base_url(headers, slot)).await.is_ok()
}

async fn online_style_ok(state: &AppState, url: &url::Url) -> bool {
    matches!(
        state.http_client.get(url.clone()).send().await,
        Ok(resp) if resp.status().is_success()
    )
}

fn redirect_302(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"))
        .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
        .body(Body::empty())
        .expect("response builder invariants upheld")
}

/// `PUT /maps/:slot` — `custom` only; concurrent PUTs serialize on the
/// slot's write lock inside [`crate::store::PackageStore::open_write`], so
/// the last writer to commit wins.
async fn put_map(State(state): State<AppState>, Path(slot): Path<String>, body: Bytes) -> Result<StatusCode, AppError> {
    let slot = parse_slot(&slot)?;
    if !slot.is_mutable() {
        return Err(error::forbidden(format!("slot {slot} is read-only")));
    }
    if body.is_empty() {
        return Err(error::invalid_map_file("upload body is empty"));
    }

    let mut sink = state.store.open_write(slot).await?;
    if let Err(err) = sink.write_all(&body).await {
        sink.abort().await;
        return Err(error::invalid_map_file(err.to_string()));
    }
    sink.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_map(State(state): State<AppState>, Path(slot): Path<String>) -> Result<StatusCode, AppError> {
    let slot = parse_slot(&slot)?;
    state.store.delete(slot).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_slot_maps_to_map_not_found() {
        let err = parse_slot("nonsense").unwrap_err();
        assert_eq!(err.code, ErrorCode::MapNotFound);
    }

    #[test]
    fn put_on_fallback_is_rejected_before_any_io() {
        let slot = parse_slot("fallback").unwrap();
        assert!(!slot.is_mutable());
    }
}
