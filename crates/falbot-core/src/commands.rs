use crate::error::CommandError;
use crate::types::Task;

// ---------------------------------------------------------------------------
// Command types
// ---------------------------------------------------------------------------

/// Parsed `!` command from user input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `!help [task] [model]`
    Help { task: Option<Task>, model: Option<String> },
    /// `!balance`
    Balance,
    /// `!rate`
    Rate,
    /// `!listmodels <task>`
    ListModels { task: Task },
    /// `!setmodel <task> <model>`
    SetModel { task: Task, model: String },
    /// A generation command, e.g. `!text2image <prompt> [--flags]`
    Generate(GenerateRequest),
}

/// One generation invocation, before schema validation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub task: Task,
    pub prompt: String,
    pub image_url: Option<String>,
    pub flags: Vec<(String, String)>,
}

impl GenerateRequest {
    /// A bare command with no arguments at all gets the model help text
    /// instead of a job.
    pub fn is_bare(&self) -> bool {
        self.prompt.is_empty() && self.image_url.is_none() && self.flags.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse user text into a command. Returns `Ok(None)` for text that is
/// not a command at all (no `!` prefix).
pub fn parse_command(text: &str) -> Result<Option<Command>, CommandError> {
    let trimmed = text.trim();
    let rest = match trimmed.strip_prefix('!') {
        Some(rest) if !rest.is_empty() => rest,
        _ => return Ok(None),
    };

    let tokens = split_quoted(rest);
    let (verb, args) = match tokens.split_first() {
        Some((verb, args)) => (verb.to_ascii_lowercase(), args),
        None => return Ok(None),
    };

    match verb.as_str() {
        "help" => parse_help(args).map(Some),
        "balance" => Ok(Some(Command::Balance)),
        "rate" => Ok(Some(Command::Rate)),
        "listmodels" => {
            let task_arg = args.first().ok_or_else(|| CommandError::MissingArgument("task".to_string()))?;
            let task = Task::parse(task_arg).ok_or_else(|| CommandError::UnknownTask(task_arg.clone()))?;
            Ok(Some(Command::ListModels { task }))
        }
        "setmodel" => {
            let task_arg = args.first().ok_or_else(|| CommandError::MissingArgument("task".to_string()))?;
            let task = Task::parse(task_arg).ok_or_else(|| CommandError::UnknownTask(task_arg.clone()))?;
            let model = args.get(1).ok_or_else(|| CommandError::MissingArgument("model".to_string()))?;
            Ok(Some(Command::SetModel { task, model: model.clone() }))
        }
        other => match Task::parse(other) {
            Some(task) => parse_generate(task, args).map(|req| Some(Command::Generate(req))),
            None => Err(CommandError::Unknown(other.to_string())),
        },
    }
}

fn parse_help(args: &[String]) -> Result<Command, CommandError> {
    let task = match args.first() {
        Some(arg) => Some(Task::parse(arg).ok_or_else(|| CommandError::UnknownTask(arg.clone()))?),
        None => None,
    };
    Ok(Command::Help { task, model: args.get(1).cloned() })
}

fn parse_generate(task: Task, args: &[String]) -> Result<GenerateRequest, CommandError> {
    let mut flags = Vec::new();
    let mut positionals: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        let token = &args[i];
        if let Some(flag) = token.strip_prefix("--") {
            if flag.is_empty() {
                return Err(CommandError::InvalidOption("empty flag".to_string()));
            }
            if let Some((key, value)) = flag.split_once('=') {
                flags.push((key.to_string(), value.to_string()));
            } else if let Some(next) = args.get(i + 1).filter(|n| !n.starts_with("--")) {
                flags.push((flag.to_string(), next.clone()));
                i += 1;
            } else {
                // bare boolean flag
                flags.push((flag.to_string(), "true".to_string()));
            }
        } else {
            positionals.push(token);
        }
        i += 1;
    }

    let takes_image = matches!(task, Task::ImageToImage | Task::ImageToVideo);
    let (image_url, prompt_parts) = if takes_image {
        match positionals.split_first() {
            Some((first, rest)) => {
                if !first.starts_with("http://") && !first.starts_with("https://") {
                    return Err(CommandError::InvalidOption(format!(
                        "first argument of !{} must be an image URL, got '{}'",
                        task.command(),
                        first
                    )));
                }
                (Some(first.to_string()), rest.to_vec())
            }
            None => (None, Vec::new()),
        }
    } else {
        (None, positionals)
    };

    Ok(GenerateRequest {
        task,
        prompt: prompt_parts.join(" "),
        image_url,
        flags,
    })
}

/// Split a command line into tokens, honoring double quotes.
fn split_quoted(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_command_text_passes_through() {
        assert_eq!(parse_command("hello there").unwrap(), None);
        assert_eq!(parse_command("").unwrap(), None);
        assert_eq!(parse_command("!").unwrap(), None);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("!balance").unwrap(), Some(Command::Balance));
        assert_eq!(parse_command("!rate").unwrap(), Some(Command::Rate));
        assert_eq!(parse_command("  !BALANCE  ").unwrap(), Some(Command::Balance));
    }

    #[test]
    fn test_help_variants() {
        assert_eq!(parse_command("!help").unwrap(), Some(Command::Help { task: None, model: None }));
        assert_eq!(
            parse_command("!help text2image").unwrap(),
            Some(Command::Help { task: Some(Task::TextToImage), model: None })
        );
        assert_eq!(
            parse_command("!help text2image flux/dev").unwrap(),
            Some(Command::Help { task: Some(Task::TextToImage), model: Some("flux/dev".to_string()) })
        );
        assert!(parse_command("!help juggling").is_err());
    }

    #[test]
    fn test_listmodels_and_setmodel() {
        assert_eq!(
            parse_command("!listmodels t2v").unwrap(),
            Some(Command::ListModels { task: Task::TextToVideo })
        );
        assert!(matches!(parse_command("!listmodels"), Err(CommandError::MissingArgument(_))));

        assert_eq!(
            parse_command("!setmodel text2image flux/schnell").unwrap(),
            Some(Command::SetModel { task: Task::TextToImage, model: "flux/schnell".to_string() })
        );
        assert!(matches!(parse_command("!setmodel text2image"), Err(CommandError::MissingArgument(_))));
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(parse_command("!dance"), Err(CommandError::Unknown(_))));
    }

    #[test]
    fn test_generate_prompt_and_flags() {
        let cmd = parse_command("!text2image a cat in the rain --num_images 2 --seed 42").unwrap();
        let Some(Command::Generate(req)) = cmd else { panic!("expected generate") };
        assert_eq!(req.task, Task::TextToImage);
        assert_eq!(req.prompt, "a cat in the rain");
        assert_eq!(req.flags, vec![
            ("num_images".to_string(), "2".to_string()),
            ("seed".to_string(), "42".to_string()),
        ]);
        assert!(req.image_url.is_none());
    }

    #[test]
    fn test_generate_quoted_flag_value() {
        let cmd = parse_command(r#"!text2image a castle --negative_prompt "blurry, low quality""#).unwrap();
        let Some(Command::Generate(req)) = cmd else { panic!("expected generate") };
        assert_eq!(req.prompt, "a castle");
        assert_eq!(req.flags, vec![("negative_prompt".to_string(), "blurry, low quality".to_string())]);
    }

    #[test]
    fn test_generate_equals_and_bare_flags() {
        let cmd = parse_command("!text2image neon city --raw=true --enable_safety_checker").unwrap();
        let Some(Command::Generate(req)) = cmd else { panic!("expected generate") };
        assert_eq!(req.flags, vec![
            ("raw".to_string(), "true".to_string()),
            ("enable_safety_checker".to_string(), "true".to_string()),
        ]);
    }

    #[test]
    fn test_image2video_takes_url_then_prompt() {
        let cmd = parse_command("!image2video https://x/cat.png slow pan --duration 8").unwrap();
        let Some(Command::Generate(req)) = cmd else { panic!("expected generate") };
        assert_eq!(req.image_url.as_deref(), Some("https://x/cat.png"));
        assert_eq!(req.prompt, "slow pan");
        assert_eq!(req.flags, vec![("duration".to_string(), "8".to_string())]);
    }

    #[test]
    fn test_image2image_rejects_non_url() {
        let err = parse_command("!image2image cat.png sketch");
        assert!(matches!(err, Err(CommandError::InvalidOption(_))));
    }

    #[test]
    fn test_bare_generate_command() {
        let cmd = parse_command("!text2video").unwrap();
        let Some(Command::Generate(req)) = cmd else { panic!("expected generate") };
        assert!(req.is_bare());
    }

    #[test]
    fn test_split_quoted() {
        assert_eq!(split_quoted(r#"a "b c" d"#), vec!["a", "b c", "d"]);
        assert_eq!(split_quoted("  spaced   out "), vec!["spaced", "out"]);
        assert_eq!(split_quoted(r#"--x="quoted value""#), vec!["--x=quoted value"]);
    }
}
