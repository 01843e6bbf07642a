use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Returns a local folder path selected by the OS file-selection dialog.
/// The dialog itself is an external collaborator (§1); this shells out to
/// the platform's native picker rather than reimplementing one.
pub async fn browse(State(_state): State<AppState>) -> AppResult<Json<serde_json::Value>> {
    let path = tokio::task::spawn_blocking(run_native_dialog)
        .await
        .map_err(|e| AppError::Internal(e.into()))??;

    match path {
        Some(path) => Ok(Json(json!({ "path": path }))),
        None => Ok(Json(json!({ "path": null }))),
    }
}

#[cfg(target_os = "macos")]
fn run_native_dialog() -> AppResult<Option<String>> {
    let output = std::process::Command::new("osascript")
        .args(["-e", "POSIX path of (choose folder)"])
        .output()?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}

#[cfg(target_os = "windows")]
fn run_native_dialog() -> AppResult<Option<String>> {
    let script = "Add-Type -AssemblyName System.Windows.Forms; \
        $f = New-Object System.Windows.Forms.FolderBrowserDialog; \
        if ($f.ShowDialog() -eq 'OK') { $f.SelectedPath }";
    let output = std::process::Command::new("powershell")
        .args(["-NoProfile", "-Command", script])
        .output()?;
    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok(if path.is_empty() { None } else { Some(path) })
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn run_native_dialog() -> AppResult<Option<String>> {
    let output = std::process::Command::new("zenity")
        .args(["--file-selection", "--directory"])
        .output()?;
    if !output.status.success() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
}
