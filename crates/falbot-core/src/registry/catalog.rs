//! Compiled-in model catalog: fal.ai endpoints, prices, option schemas.

use crate::types::Task;

use super::{ModelDescriptor, ParamKind, ParamSpec, Pricing};

const TEXT_TO_IMAGE_SCHEMA: &[ParamSpec] = &[
    ParamSpec { key: "num_images", kind: ParamKind::Int, help: "number of images to generate (1-4)" },
    ParamSpec { key: "image_size", kind: ParamKind::Str, help: "square_hd, portrait_4_3, landscape_16_9, ..." },
    ParamSpec { key: "seed", kind: ParamKind::Int, help: "seed for reproducible output" },
    ParamSpec { key: "num_inference_steps", kind: ParamKind::Int, help: "denoising steps" },
    ParamSpec { key: "guidance_scale", kind: ParamKind::Float, help: "prompt adherence strength" },
    ParamSpec { key: "negative_prompt", kind: ParamKind::Str, help: "what to avoid" },
    ParamSpec { key: "aspect_ratio", kind: ParamKind::Str, help: "e.g. 16:9, 1:1, 9:16" },
    ParamSpec { key: "safety_tolerance", kind: ParamKind::Str, help: "1 (strict) to 6 (permissive)" },
    ParamSpec { key: "output_format", kind: ParamKind::Str, help: "jpeg or png" },
    ParamSpec { key: "enable_safety_checker", kind: ParamKind::Bool, help: "run the output safety checker" },
    ParamSpec { key: "raw", kind: ParamKind::Bool, help: "less processed, more natural look" },
];

const IMAGE_TO_IMAGE_SCHEMA: &[ParamSpec] = &[
    ParamSpec { key: "strength", kind: ParamKind::Float, help: "how much to transform the input (0-1)" },
    ParamSpec { key: "num_images", kind: ParamKind::Int, help: "number of images to generate (1-4)" },
    ParamSpec { key: "seed", kind: ParamKind::Int, help: "seed for reproducible output" },
    ParamSpec { key: "guidance_scale", kind: ParamKind::Float, help: "prompt adherence strength" },
    ParamSpec { key: "negative_prompt", kind: ParamKind::Str, help: "what to avoid" },
    ParamSpec { key: "output_format", kind: ParamKind::Str, help: "jpeg or png" },
    ParamSpec { key: "enable_safety_checker", kind: ParamKind::Bool, help: "run the output safety checker" },
];

const VIDEO_SCHEMA: &[ParamSpec] = &[
    ParamSpec { key: "duration", kind: ParamKind::Int, help: "clip length in seconds" },
    ParamSpec { key: "aspect_ratio", kind: ParamKind::Str, help: "e.g. 16:9, 9:16 (alias: --aspect)" },
    ParamSpec { key: "negative_prompt", kind: ParamKind::Str, help: "what to avoid (alias: --negative)" },
    ParamSpec { key: "cfg_scale", kind: ParamKind::Float, help: "guidance strength (alias: --cfg)" },
    ParamSpec { key: "seed", kind: ParamKind::Int, help: "seed for reproducible output" },
];

const TEXT_TO_SPEECH_SCHEMA: &[ParamSpec] = &[
    ParamSpec { key: "voice_id", kind: ParamKind::Str, help: "voice preset" },
    ParamSpec { key: "speed", kind: ParamKind::Float, help: "speech rate (0.5-2.0)" },
    ParamSpec { key: "vol", kind: ParamKind::Float, help: "volume (0-10)" },
    ParamSpec { key: "pitch", kind: ParamKind::Int, help: "pitch shift (-12 to 12)" },
    ParamSpec { key: "emotion", kind: ParamKind::Str, help: "happy, sad, angry, neutral, ..." },
    ParamSpec { key: "sample_rate", kind: ParamKind::Int, help: "output sample rate in Hz" },
    ParamSpec { key: "bitrate", kind: ParamKind::Int, help: "output bitrate in bps" },
    ParamSpec { key: "format", kind: ParamKind::Str, help: "mp3, wav, flac" },
    ParamSpec { key: "channel", kind: ParamKind::Int, help: "1 = mono, 2 = stereo" },
];

/// The full model catalog. Order within a task is display order; the
/// first entry is the fallback when no default is configured.
pub static CATALOG: &[ModelDescriptor] = &[
    // ---- text2image ----
    ModelDescriptor {
        task: Task::TextToImage,
        name: "flux/dev",
        endpoint_path: "fal-ai/flux/dev",
        pricing: Pricing::PerImage(0.025),
        schema: TEXT_TO_IMAGE_SCHEMA,
        help: "FLUX.1 dev, balanced quality and speed",
    },
    ModelDescriptor {
        task: Task::TextToImage,
        name: "flux/schnell",
        endpoint_path: "fal-ai/flux/schnell",
        pricing: Pricing::PerImage(0.003),
        schema: TEXT_TO_IMAGE_SCHEMA,
        help: "FLUX.1 schnell, fastest and cheapest",
    },
    ModelDescriptor {
        task: Task::TextToImage,
        name: "flux-pro/ultra",
        endpoint_path: "fal-ai/flux-pro/v1.1-ultra",
        pricing: Pricing::PerImage(0.06),
        schema: TEXT_TO_IMAGE_SCHEMA,
        help: "FLUX1.1 pro ultra, highest quality, up to 2k",
    },
    ModelDescriptor {
        task: Task::TextToImage,
        name: "recraft/v3",
        endpoint_path: "fal-ai/recraft/v3/text-to-image",
        pricing: Pricing::PerImage(0.04),
        schema: TEXT_TO_IMAGE_SCHEMA,
        help: "Recraft V3, strong typography and vector styles",
    },
    // ---- image2image ----
    ModelDescriptor {
        task: Task::ImageToImage,
        name: "flux/dev/image-to-image",
        endpoint_path: "fal-ai/flux/dev/image-to-image",
        pricing: Pricing::PerImage(0.025),
        schema: IMAGE_TO_IMAGE_SCHEMA,
        help: "FLUX.1 dev img2img, restyle an input image",
    },
    ModelDescriptor {
        task: Task::ImageToImage,
        name: "flux-pro/kontext",
        endpoint_path: "fal-ai/flux-pro/kontext",
        pricing: Pricing::PerImage(0.04),
        schema: IMAGE_TO_IMAGE_SCHEMA,
        help: "FLUX.1 Kontext pro, instruction-based editing",
    },
    // ---- text2video ----
    ModelDescriptor {
        task: Task::TextToVideo,
        name: "veo2",
        endpoint_path: "fal-ai/veo2",
        pricing: Pricing::PerSecond { base: 2.50, included_secs: 5, per_extra_sec: 0.50 },
        schema: VIDEO_SCHEMA,
        help: "Google Veo 2, 5s base, up to 8s",
    },
    ModelDescriptor {
        task: Task::TextToVideo,
        name: "kling/v2-master",
        endpoint_path: "fal-ai/kling-video/v2/master/text-to-video",
        pricing: Pricing::PerSecond { base: 1.40, included_secs: 5, per_extra_sec: 0.28 },
        schema: VIDEO_SCHEMA,
        help: "Kling 2.0 Master, cinematic motion",
    },
    ModelDescriptor {
        task: Task::TextToVideo,
        name: "minimax/video-01",
        endpoint_path: "fal-ai/minimax/video-01",
        pricing: Pricing::Flat(0.50),
        schema: VIDEO_SCHEMA,
        help: "MiniMax video-01, fixed 6s clips",
    },
    // ---- image2video ----
    ModelDescriptor {
        task: Task::ImageToVideo,
        name: "veo2/image-to-video",
        endpoint_path: "fal-ai/veo2/image-to-video",
        pricing: Pricing::PerSecond { base: 2.50, included_secs: 5, per_extra_sec: 0.50 },
        schema: VIDEO_SCHEMA,
        help: "Google Veo 2, animate a still image",
    },
    ModelDescriptor {
        task: Task::ImageToVideo,
        name: "kling/v2-master/image-to-video",
        endpoint_path: "fal-ai/kling-video/v2/master/image-to-video",
        pricing: Pricing::PerSecond { base: 1.40, included_secs: 5, per_extra_sec: 0.28 },
        schema: VIDEO_SCHEMA,
        help: "Kling 2.0 Master img2vid",
    },
    // ---- text2speech ----
    ModelDescriptor {
        task: Task::TextToSpeech,
        name: "minimax/speech-02-hd",
        endpoint_path: "fal-ai/minimax/speech-02-hd",
        pricing: Pricing::Flat(0.05),
        schema: TEXT_TO_SPEECH_SCHEMA,
        help: "MiniMax Speech-02 HD, expressive voices",
    },
    ModelDescriptor {
        task: Task::TextToSpeech,
        name: "playai/tts/v3",
        endpoint_path: "fal-ai/playai/tts/v3",
        pricing: Pricing::Flat(0.03),
        schema: TEXT_TO_SPEECH_SCHEMA,
        help: "PlayAI Dialog v3",
    },
    ModelDescriptor {
        task: Task::TextToSpeech,
        name: "kokoro",
        endpoint_path: "fal-ai/kokoro/american-english",
        pricing: Pricing::Flat(0.02),
        schema: TEXT_TO_SPEECH_SCHEMA,
        help: "Kokoro, lightweight and cheap",
    },
];

/// Global default model per task.
pub static DEFAULTS: &[(Task, &str)] = &[
    (Task::TextToImage, "flux/dev"),
    (Task::ImageToImage, "flux/dev/image-to-image"),
    (Task::TextToVideo, "veo2"),
    (Task::ImageToVideo, "veo2/image-to-video"),
    (Task::TextToSpeech, "minimax/speech-02-hd"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_unique_per_task() {
        for (i, a) in CATALOG.iter().enumerate() {
            for b in &CATALOG[i + 1..] {
                assert!(
                    !(a.task == b.task && a.name == b.name),
                    "duplicate catalog entry: {} {}",
                    a.task,
                    a.name
                );
            }
        }
    }

    #[test]
    fn test_defaults_exist_in_catalog() {
        for (task, name) in DEFAULTS {
            assert!(
                CATALOG.iter().any(|d| d.task == *task && d.name == *name),
                "default {} for {} not in catalog",
                name,
                task
            );
        }
    }

    #[test]
    fn test_every_task_covered() {
        for task in Task::ALL {
            assert!(CATALOG.iter().any(|d| d.task == task), "no models for {}", task);
        }
    }

    #[test]
    fn test_prices_positive() {
        for d in CATALOG {
            assert!(d.pricing.base_usd() > 0.0, "{} has non-positive price", d.name);
        }
    }
}
