use crate::backup;
use crate::db;
use crate::ipc::helpers::{require_admin, required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

fn current_workspace(state: &AppState) -> Result<PathBuf, HandlerErr> {
    state
        .workspace
        .clone()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

fn backup_export(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let out_path = required_str(req, "outPath")?;
    let workspace_path = current_workspace(state)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| {
            HandlerErr::new("backup_failed", format!("{e:#}"))
                .with_details(json!({ "path": out_path }))
        })?;
    info!(path = %out_path, sha256 = %export.db_sha256, "workspace exported");

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256,
    }))
}

fn backup_import(state: &mut AppState, req: &Request) -> HandlerResult {
    require_admin(req)?;
    let in_path = required_str(req, "inPath")?;
    let workspace_path = current_workspace(state)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::new("not_found", "bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    state.db = None;

    let imported = backup::import_workspace_bundle(&src, &workspace_path);
    let reopened = db::open_db(&workspace_path);
    match reopened {
        Ok(conn) => state.db = Some(conn),
        Err(e) => {
            error!(workspace = %workspace_path.display(), "reopen after import failed: {e:#}");
            state.workspace = None;
            return Err(HandlerErr::new("db_open_failed", format!("{e:#}")));
        }
    }

    let import = imported.map_err(|e| {
        HandlerErr::new("backup_failed", format!("{e:#}")).with_details(json!({ "path": in_path }))
    })?;
    info!(path = %in_path, sha256 = %import.db_sha256, "workspace imported");

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormat": import.bundle_format,
        "dbSha256": import.db_sha256,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.export" => backup_export(state, req),
        "backup.import" => backup_import(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
