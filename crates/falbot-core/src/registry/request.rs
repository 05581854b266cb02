//! Option validation and per-task request-body building.

use std::collections::HashMap;

use serde_json::{json, Value};

use crate::error::CommandError;
use crate::types::Task;

use super::{ModelDescriptor, ParamKind};

/// Short flag aliases accepted on the command line.
const ALIASES: &[(&str, &str)] = &[
    ("aspect", "aspect_ratio"),
    ("negative", "negative_prompt"),
    ("cfg", "cfg_scale"),
];

fn canonical_key(key: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, full)| *full)
        .unwrap_or(key)
}

/// Options parsed and type-checked against a model schema.
#[derive(Debug, Clone, Default)]
pub struct ParsedOptions {
    values: HashMap<&'static str, Value>,
}

impl ParsedOptions {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_i64(&mut self, key: &'static str, v: i64) {
        self.values.insert(key, json!(v));
    }

    fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// Validate raw `--flag value` pairs against the model schema and parse
/// each value to its declared type.
pub fn parse_options(
    desc: &ModelDescriptor,
    flags: &[(String, String)],
) -> Result<ParsedOptions, CommandError> {
    let mut values = HashMap::new();
    for (raw_key, raw_value) in flags {
        let key = canonical_key(raw_key);
        let spec = desc.param(key).ok_or_else(|| {
            CommandError::InvalidOption(format!("--{} is not an option of {}", raw_key, desc.name))
        })?;
        let value = match spec.kind {
            ParamKind::Str => json!(raw_value),
            ParamKind::Int => {
                let n: i64 = raw_value.parse().map_err(|_| {
                    CommandError::InvalidOption(format!("--{} expects an integer, got '{}'", raw_key, raw_value))
                })?;
                json!(n)
            }
            ParamKind::Float => {
                let f: f64 = raw_value.parse().map_err(|_| {
                    CommandError::InvalidOption(format!("--{} expects a number, got '{}'", raw_key, raw_value))
                })?;
                json!(f)
            }
            ParamKind::Bool => match raw_value.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => json!(true),
                "false" | "0" | "no" => json!(false),
                _ => {
                    return Err(CommandError::InvalidOption(format!(
                        "--{} expects true or false, got '{}'",
                        raw_key, raw_value
                    )))
                }
            },
        };
        values.insert(spec.key, value);
    }
    Ok(ParsedOptions { values })
}

/// Build the model-specific request body for the fal queue.
pub fn build_request(
    desc: &ModelDescriptor,
    prompt: &str,
    image_url: Option<&str>,
    opts: &ParsedOptions,
) -> Result<Value, CommandError> {
    match desc.task {
        Task::TextToImage => {
            if prompt.is_empty() {
                return Err(CommandError::MissingArgument("prompt".to_string()));
            }
            let mut body = json!({ "prompt": prompt });
            apply_options(&mut body, opts, &[]);
            Ok(body)
        }
        Task::ImageToImage => {
            let url = image_url.ok_or_else(|| CommandError::MissingArgument("image_url".to_string()))?;
            let mut body = json!({ "image_url": url });
            if !prompt.is_empty() {
                body["prompt"] = json!(prompt);
            }
            apply_options(&mut body, opts, &[]);
            Ok(body)
        }
        Task::TextToVideo => {
            if prompt.is_empty() {
                return Err(CommandError::MissingArgument("prompt".to_string()));
            }
            let mut body = json!({ "prompt": prompt });
            // fal video endpoints take duration as a string of seconds
            if let Some(d) = opts.get_i64("duration") {
                body["duration"] = json!(d.to_string());
            }
            apply_options(&mut body, opts, &["duration"]);
            Ok(body)
        }
        Task::ImageToVideo => {
            let url = image_url.ok_or_else(|| CommandError::MissingArgument("image_url".to_string()))?;
            if prompt.is_empty() {
                return Err(CommandError::MissingArgument("prompt".to_string()));
            }
            let mut body = json!({ "image_url": url, "prompt": prompt });
            if let Some(d) = opts.get_i64("duration") {
                body["duration"] = json!(d.to_string());
            }
            apply_options(&mut body, opts, &["duration"]);
            Ok(body)
        }
        Task::TextToSpeech => {
            if prompt.is_empty() {
                return Err(CommandError::MissingArgument("text".to_string()));
            }
            let mut voice = serde_json::Map::new();
            let mut audio = serde_json::Map::new();
            for (key, value) in opts.iter() {
                match key {
                    "voice_id" | "speed" | "vol" | "pitch" | "emotion" => {
                        voice.insert(key.to_string(), value.clone());
                    }
                    "sample_rate" | "bitrate" | "format" | "channel" => {
                        audio.insert(key.to_string(), value.clone());
                    }
                    _ => {}
                }
            }
            let mut body = json!({ "text": prompt });
            if !voice.is_empty() {
                body["voice_setting"] = Value::Object(voice);
            }
            if !audio.is_empty() {
                body["audio_setting"] = Value::Object(audio);
            }
            Ok(body)
        }
    }
}

/// Copy every parsed option into the body, except keys already handled.
fn apply_options(body: &mut Value, opts: &ParsedOptions, skip: &[&str]) {
    for (key, value) in opts.iter() {
        if skip.contains(&key) {
            continue;
        }
        body[key] = value.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelRegistry;

    fn desc(task: Task, name: &str) -> &'static ModelDescriptor {
        // Leak-free: catalog entries are 'static already.
        ModelRegistry::new().get(task, name).unwrap()
    }

    fn flags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_options_types() {
        let d = desc(Task::TextToImage, "flux/dev");
        let opts = parse_options(
            d,
            &flags(&[("num_images", "2"), ("guidance_scale", "3.5"), ("raw", "true"), ("image_size", "square_hd")]),
        )
        .unwrap();
        assert_eq!(opts.get_i64("num_images"), Some(2));
        assert_eq!(opts.get_f64("guidance_scale"), Some(3.5));
        assert_eq!(opts.get_str("image_size"), Some("square_hd"));
    }

    #[test]
    fn test_parse_options_rejects_unknown_flag() {
        let d = desc(Task::TextToImage, "flux/dev");
        let err = parse_options(d, &flags(&[("voice_id", "nova")]));
        assert!(matches!(err, Err(CommandError::InvalidOption(_))));
    }

    #[test]
    fn test_parse_options_rejects_bad_types() {
        let d = desc(Task::TextToImage, "flux/dev");
        assert!(parse_options(d, &flags(&[("num_images", "two")])).is_err());
        assert!(parse_options(d, &flags(&[("guidance_scale", "high")])).is_err());
        assert!(parse_options(d, &flags(&[("raw", "maybe")])).is_err());
    }

    #[test]
    fn test_video_aliases() {
        let d = desc(Task::TextToVideo, "veo2");
        let opts = parse_options(
            d,
            &flags(&[("aspect", "16:9"), ("negative", "blurry"), ("cfg", "0.5"), ("duration", "8")]),
        )
        .unwrap();
        assert_eq!(opts.get_str("aspect_ratio"), Some("16:9"));
        assert_eq!(opts.get_str("negative_prompt"), Some("blurry"));
        assert_eq!(opts.get_f64("cfg_scale"), Some(0.5));
        assert_eq!(opts.get_i64("duration"), Some(8));
    }

    #[test]
    fn test_build_text2image_body() {
        let d = desc(Task::TextToImage, "flux/dev");
        let opts = parse_options(d, &flags(&[("num_images", "2"), ("seed", "42")])).unwrap();
        let body = build_request(d, "a cat in the rain", None, &opts).unwrap();
        assert_eq!(body["prompt"], "a cat in the rain");
        assert_eq!(body["num_images"], 2);
        assert_eq!(body["seed"], 42);
    }

    #[test]
    fn test_build_text2image_requires_prompt() {
        let d = desc(Task::TextToImage, "flux/dev");
        let err = build_request(d, "", None, &ParsedOptions::empty());
        assert!(matches!(err, Err(CommandError::MissingArgument(_))));
    }

    #[test]
    fn test_build_image2image_requires_url() {
        let d = desc(Task::ImageToImage, "flux/dev/image-to-image");
        assert!(build_request(d, "sketch style", None, &ParsedOptions::empty()).is_err());

        let body = build_request(d, "sketch style", Some("https://x/cat.png"), &ParsedOptions::empty()).unwrap();
        assert_eq!(body["image_url"], "https://x/cat.png");
        assert_eq!(body["prompt"], "sketch style");
    }

    #[test]
    fn test_build_video_duration_stringified() {
        let d = desc(Task::TextToVideo, "veo2");
        let opts = parse_options(d, &flags(&[("duration", "8")])).unwrap();
        let body = build_request(d, "pan across a city", None, &opts).unwrap();
        assert_eq!(body["duration"], "8");
    }

    #[test]
    fn test_build_tts_nested_settings() {
        let d = desc(Task::TextToSpeech, "minimax/speech-02-hd");
        let opts = parse_options(
            d,
            &flags(&[("voice_id", "Wise_Woman"), ("speed", "1.2"), ("sample_rate", "44100"), ("format", "mp3")]),
        )
        .unwrap();
        let body = build_request(d, "hello there", None, &opts).unwrap();
        assert_eq!(body["text"], "hello there");
        assert_eq!(body["voice_setting"]["voice_id"], "Wise_Woman");
        assert_eq!(body["voice_setting"]["speed"], 1.2);
        assert_eq!(body["audio_setting"]["sample_rate"], 44100);
        assert_eq!(body["audio_setting"]["format"], "mp3");
        assert!(body.get("speed").is_none());
    }
}
