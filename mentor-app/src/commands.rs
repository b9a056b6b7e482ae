//! Terminal command parsing and dispatch.
//!
//! Plain lines are chat messages, or the answer to a pending checkpoint
//! question. Lines starting with `/` are commands.

use std::path::PathBuf;

use mentor_core::provider::Attachment;

use crate::state::AppState;

pub const HELP: &str = "\
commands:
  <text>                  chat (or answer the pending question)
  /attach <path> [text]   chat with a file attached
  /lesson <topic>         start a narrated lesson
  /pause  /resume         pause or resume the lesson
  /seek <secs>            jump within the lesson
  /stop                   stop the lesson
  /save <file.wav>        export the last narration
  /call  /hangup          start or end a live voice call
  /help  /quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Chat(String),
    Attach { path: PathBuf, text: String },
    Lesson(String),
    Pause,
    Resume,
    Seek(f64),
    Stop,
    Save(PathBuf),
    Call,
    HangUp,
    Help,
    Quit,
}

/// Whether the host loop should keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`; malformed commands
/// yield a usage message.
pub fn parse(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Chat(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "attach" => {
            let (path, text) = match arg.split_once(char::is_whitespace) {
                Some((path, text)) => (path, text.trim()),
                None => (arg, ""),
            };
            if path.is_empty() {
                return Err("usage: /attach <path> [text]".into());
            }
            let text = if text.is_empty() {
                "Please look at this file and help me understand it."
            } else {
                text
            };
            Command::Attach {
                path: PathBuf::from(path),
                text: text.to_string(),
            }
        }
        "lesson" if !arg.is_empty() => Command::Lesson(arg.to_string()),
        "lesson" => return Err("usage: /lesson <topic>".into()),
        "pause" => Command::Pause,
        "resume" | "play" => Command::Resume,
        "seek" => match arg.parse::<f64>() {
            Ok(secs) if secs.is_finite() => Command::Seek(secs),
            _ => return Err("usage: /seek <seconds>".into()),
        },
        "stop" => Command::Stop,
        "save" if !arg.is_empty() => Command::Save(PathBuf::from(arg)),
        "save" => return Err("usage: /save <file.wav>".into()),
        "call" => Command::Call,
        "hangup" | "hang-up" => Command::HangUp,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command /{other} (try /help)")),
    };
    Ok(Some(command))
}

/// Run one command against the engine.
pub fn execute(state: &mut AppState, command: Command) -> Flow {
    let engine = &mut state.engine;
    match command {
        Command::Chat(text) => {
            if engine.pending_question().is_some() {
                report(engine.answer(text));
            } else {
                engine.send_message(text, None);
            }
        }
        Command::Attach { path, text } => match Attachment::from_path(&path) {
            Ok(attachment) => engine.send_message(text, Some(attachment)),
            Err(e) => println!("cannot attach {}: {e}", path.display()),
        },
        Command::Lesson(topic) => engine.start_lesson(topic),
        Command::Pause => engine.pause(),
        Command::Resume => report(engine.resume()),
        Command::Seek(secs) => report(engine.seek(secs)),
        Command::Stop => engine.stop_lesson(),
        Command::Save(path) => match engine.save_narration(&path) {
            Ok(()) => println!("saved {}", path.display()),
            Err(e) => println!("nothing saved: {e}"),
        },
        // Connects in the background; the outcome arrives as call events.
        Command::Call => engine.start_call(),
        Command::HangUp => engine.hang_up(),
        Command::Help => println!("{HELP}"),
        Command::Quit => return Flow::Quit,
    }
    Flow::Continue
}

fn report(result: mentor_core::Result<()>) {
    if let Err(e) = result {
        println!("{e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            parse("  what is a prime?  "),
            Ok(Some(Command::Chat("what is a prime?".into())))
        );
        assert_eq!(parse("   "), Ok(None));
    }

    #[test]
    fn lesson_takes_the_rest_of_the_line() {
        assert_eq!(
            parse("/lesson the water cycle"),
            Ok(Some(Command::Lesson("the water cycle".into())))
        );
        assert!(parse("/lesson").is_err());
    }

    #[test]
    fn attach_splits_path_from_text() {
        assert_eq!(
            parse("/attach notes.pdf explain page 2"),
            Ok(Some(Command::Attach {
                path: PathBuf::from("notes.pdf"),
                text: "explain page 2".into(),
            }))
        );
        let Ok(Some(Command::Attach { text, .. })) = parse("/attach photo.png") else {
            panic!("expected an attach command");
        };
        assert!(!text.is_empty());
    }

    #[test]
    fn seek_requires_a_number() {
        assert_eq!(parse("/seek 12.5"), Ok(Some(Command::Seek(12.5))));
        assert!(parse("/seek soon").is_err());
        assert!(parse("/seek NaN").is_err());
    }

    #[test]
    fn commands_are_case_insensitive_with_aliases() {
        assert_eq!(parse("/HANGUP"), Ok(Some(Command::HangUp)));
        assert_eq!(parse("/exit"), Ok(Some(Command::Quit)));
        assert_eq!(parse("/play"), Ok(Some(Command::Resume)));
        assert!(parse("/dance").unwrap_err().contains("/dance"));
    }
}
