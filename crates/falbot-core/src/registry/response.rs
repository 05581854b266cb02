//! Per-task parsing of fal completion payloads into artifacts.

use serde_json::Value;

use crate::error::QueueError;
use crate::types::{Artifact, FinalResult, Task};

/// Parse the model-specific completion payload for a task. Every parser
/// extracts the primary artifact URL(s) and MIME type(s); multi-artifact
/// payloads keep their order.
pub fn parse_final(task: Task, payload: &Value) -> Result<FinalResult, QueueError> {
    let artifacts = match task {
        Task::TextToImage | Task::ImageToImage => parse_images(payload)?,
        Task::TextToVideo | Task::ImageToVideo => parse_video(payload)?,
        Task::TextToSpeech => parse_audio(payload)?,
    };
    if artifacts.is_empty() {
        return Err(QueueError::NoArtifacts);
    }
    Ok(FinalResult { artifacts })
}

fn artifact_from_object(obj: &Value, default_mime: &str) -> Option<Artifact> {
    let url = obj.get("url").and_then(|v| v.as_str())?;
    let content_type = obj
        .get("content_type")
        .and_then(|v| v.as_str())
        .unwrap_or(default_mime);
    Some(Artifact {
        url: url.to_string(),
        content_type: content_type.to_string(),
    })
}

/// Image payloads carry either an `images` array or a single `image`.
fn parse_images(payload: &Value) -> Result<Vec<Artifact>, QueueError> {
    if let Some(images) = payload.get("images").and_then(|v| v.as_array()) {
        return Ok(images
            .iter()
            .filter_map(|img| artifact_from_object(img, "image/png"))
            .collect());
    }
    if let Some(image) = payload.get("image") {
        return Ok(artifact_from_object(image, "image/png").into_iter().collect());
    }
    Err(QueueError::Parse("no images in completion payload".to_string()))
}

fn parse_video(payload: &Value) -> Result<Vec<Artifact>, QueueError> {
    let video = payload
        .get("video")
        .ok_or_else(|| QueueError::Parse("no video in completion payload".to_string()))?;
    Ok(artifact_from_object(video, "video/mp4").into_iter().collect())
}

/// Audio payloads come as an `audio` object or a bare `audio_url`.
fn parse_audio(payload: &Value) -> Result<Vec<Artifact>, QueueError> {
    if let Some(audio) = payload.get("audio") {
        if audio.is_object() {
            return Ok(artifact_from_object(audio, "audio/mpeg").into_iter().collect());
        }
        if let Some(url) = audio.as_str() {
            return Ok(vec![Artifact { url: url.to_string(), content_type: "audio/mpeg".to_string() }]);
        }
    }
    if let Some(url) = payload.get("audio_url").and_then(|v| v.as_str()) {
        return Ok(vec![Artifact { url: url.to_string(), content_type: "audio/mpeg".to_string() }]);
    }
    Err(QueueError::Parse("no audio in completion payload".to_string()))
}
