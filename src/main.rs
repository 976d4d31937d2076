//! study-cli - terminal front end for the study assistant
//!
//! Drives the conversation and quiz controllers against a live backend and
//! prints their snapshots as they change.

use std::sync::Arc;
use study_session::config::ClientConfig;
use study_session::gateway::{DocumentId, Gateway, HttpGateway, LoggingGateway};
use study_session::runtime::{spawn_conversation, spawn_quiz, ControlError, QuizHandle};
use study_session::state_machine::{ConversationState, QuizPhase, QuizState, ReportStatus, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Library and binary events; the binary logs under its own target
const DEFAULT_LOG_FILTER: &str = "study_session=info,study_cli=info";

const HELP: &str = "\
Commands:
  ask <text>            ask a question (a bare line works too)
  clear                 clear the conversation
  quiz <doc-id> <topic> generate a quiz from a document
  pick <q#> <opt#>      choose an answer (1-based)
  submit                grade the quiz
  new                   start a new quiz session
  history               list past quiz attempts
  show                  print the current state
  help                  show this help
  quit                  exit";

#[derive(Debug, PartialEq)]
enum Command {
    Ask(String),
    Clear,
    Quiz { document_id: DocumentId, topic: String },
    Pick { question: usize, option: usize },
    Submit,
    New,
    History,
    Show,
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        let command = match word {
            "ask" => Command::Ask(rest.to_string()),
            "clear" => Command::Clear,
            "quiz" => {
                let (doc, topic) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                let document_id = doc
                    .parse()
                    .map(DocumentId)
                    .map_err(|_| format!("not a document id: {doc:?}"))?;
                Command::Quiz {
                    document_id,
                    topic: topic.trim().to_string(),
                }
            }
            "pick" => {
                let mut nums = rest.split_whitespace().map(str::parse::<usize>);
                match (nums.next(), nums.next()) {
                    (Some(Ok(q)), Some(Ok(o))) if q > 0 && o > 0 => Command::Pick {
                        question: q - 1,
                        option: o - 1,
                    },
                    _ => return Err("usage: pick <question#> <option#>".to_string()),
                }
            }
            "submit" => Command::Submit,
            "new" => Command::New,
            "history" => Command::History,
            "show" => Command::Show,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Ask(line.to_string()),
        };
        Ok(Some(command))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so they do not interleave with the session output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        authenticated = config.api_token.is_some(),
        timeout_secs = config.request_timeout.as_secs(),
        "Starting study client"
    );
    if config.api_token.is_none() {
        tracing::warn!("No STUDY_API_TOKEN set; authenticated calls will fail");
    }

    let gateway = Arc::new(LoggingGateway::new(HttpGateway::new(&config)?));
    let conversation = spawn_conversation(gateway.clone());
    let quiz = spawn_quiz(gateway.clone());

    tokio::spawn(render_conversation(conversation.watch()));
    tokio::spawn(render_quiz(quiz.watch()));

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(e) => {
                println!("! {e}");
                continue;
            }
        };

        match command {
            Command::Ask(text) => report(conversation.submit(text).await)?,
            Command::Clear => report(conversation.reset().await)?,
            Command::Quiz { document_id, topic } => report(
                quiz.generate(topic, Some(document_id), config.default_question_count)
                    .await,
            )?,
            Command::Pick { question, option } => report(pick(&quiz, question, option).await)?,
            Command::Submit => report(quiz.grade().await)?,
            Command::New => report(quiz.new_session().await)?,
            Command::History => show_history(gateway.as_ref()).await,
            Command::Show => {
                print_transcript(&conversation.snapshot());
                print_quiz(&quiz.snapshot());
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    tracing::info!("Study client exiting");
    Ok(())
}

/// Print a refused operation; only a stopped controller ends the session
fn report(result: Result<(), ControlError>) -> Result<(), ControlError> {
    match result {
        Err(ControlError::Rejected(e)) => {
            println!("! {e}");
            Ok(())
        }
        other => other,
    }
}

async fn pick(quiz: &QuizHandle, question: usize, option: usize) -> Result<(), ControlError> {
    let chosen = quiz.snapshot().session().and_then(|s| {
        s.questions()
            .get(question)
            .and_then(|q| q.options().get(option).cloned())
    });
    match chosen {
        Some(text) => quiz.select_answer(question, text).await,
        None => {
            println!("! no option {} for question {}", option + 1, question + 1);
            Ok(())
        }
    }
}

async fn show_history<G: Gateway>(gateway: &G) {
    match gateway.list_attempts().await {
        Ok(attempts) if attempts.is_empty() => println!("No quiz attempts yet."),
        Ok(attempts) => {
            for attempt in attempts {
                println!("  {attempt}");
            }
        }
        Err(e) => println!("! could not load history: {e}"),
    }
}

// ============================================================================
// Rendering
// ============================================================================

async fn render_conversation(mut rx: watch::Receiver<ConversationState>) {
    let mut shown = 0;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        if state.turns().len() < shown {
            println!("-- conversation cleared --");
            shown = 0;
        }
        for turn in state.turns().iter().skip(shown) {
            match turn.role {
                Role::User => println!("you> {}", turn.content),
                Role::Assistant => {
                    println!("assistant> {}", turn.content);
                    for source in &turn.sources {
                        println!("    [source: {}]", source.source);
                    }
                }
            }
        }
        shown = state.turns().len();
        if state.is_pending() {
            println!("(thinking...)");
        }
    }
}

fn print_transcript(state: &ConversationState) {
    if state.turns().is_empty() {
        println!("(no conversation)");
    }
    for turn in state.turns() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{who}> {}", turn.content);
    }
}

async fn render_quiz(mut rx: watch::Receiver<QuizState>) {
    let mut last: Option<QuizState> = None;
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        let phase_changed = last.as_ref().is_none_or(|l| {
            std::mem::discriminant(l.phase()) != std::mem::discriminant(state.phase())
                || l.generation() != state.generation()
        });

        match state.phase() {
            QuizPhase::Active { session } if !phase_changed => {
                println!(
                    "answered {}/{}",
                    session.answers().len(),
                    session.questions().len()
                );
            }
            QuizPhase::Graded { report, .. } if !phase_changed => print_report(report),
            _ => print_quiz(&state),
        }
        last = Some(state);
    }
}

fn print_quiz(state: &QuizState) {
    match state.phase() {
        QuizPhase::Configuring { last_error: None } => println!("(no quiz)"),
        QuizPhase::Configuring {
            last_error: Some(e),
        } => println!("! {e}"),
        QuizPhase::Generating { topic, count, .. } => {
            println!("Generating {count} question(s) on {topic:?}...");
        }
        QuizPhase::Active { session } => {
            println!("Quiz: {}", session.topic());
            for (i, q) in session.questions().iter().enumerate() {
                println!("{}. {}", i + 1, q.prompt());
                for (j, option) in q.options().iter().enumerate() {
                    let mark = if session.answer(i) == Some(option.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("   {mark}{}) {option}", j + 1);
                }
            }
        }
        QuizPhase::Graded { session, report } => {
            if let Some(score) = session.score() {
                println!("Score: {score}/{}", session.questions().len());
            }
            for r in session.review() {
                let mark = if r.is_correct { "ok" } else { "x " };
                println!(
                    "  {mark} {}. {} (yours: {}, correct: {})",
                    r.index + 1,
                    r.prompt,
                    r.selected.as_deref().unwrap_or("-"),
                    r.correct_option
                );
            }
            print_report(report);
        }
    }
}

fn print_report(report: &ReportStatus) {
    match report {
        ReportStatus::Pending => println!("(saving attempt...)"),
        ReportStatus::Recorded { attempt_id } => println!("Attempt #{attempt_id} saved."),
        ReportStatus::Failed { message } => println!("! attempt not saved: {message}"),
    }
}
