//! Interactive terminal chat.

use crate::bot::{Event, Kingbot, RenderedTurn, View};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::feedback::FeedbackEvent;
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};
use uuid::Uuid;

/// One line of terminal input.
#[derive(Debug, PartialEq)]
enum Command {
    Quit,
    Help,
    Ask(String),
    Quick(usize),
    Rate { glyph: &'static str, comment: String },
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            return Some(Command::Quit);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Command::Ask(line.to_string()));
        };

        let (word, arg) = rest.split_once(' ').unwrap_or((rest, ""));
        let arg = arg.trim().to_string();
        let command = match word {
            "help" => Command::Help,
            "good" => Command::Rate {
                glyph: "👍",
                comment: arg,
            },
            "bad" => Command::Rate {
                glyph: "👎",
                comment: arg,
            },
            n => match n.parse::<usize>() {
                Ok(n) if n >= 1 => Command::Quick(n - 1),
                _ => Command::Unknown(line.to_string()),
            },
        };
        Some(command)
    }
}

/// Run the interactive chat command.
pub async fn run_chat(settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Chat, &settings) {
        Output::error(&e.to_string());
        return Err(e.into());
    }

    let bot = Kingbot::new(settings)?;
    let id = bot.open_session().await;
    let mut view = bot.view(id).await?;

    let ui = &bot.settings().ui;
    println!("\n{}", style(&ui.main.title).bold().cyan());
    println!("{}", style(&ui.side.intro).dim());
    print_help(&bot);
    for message in &view.messages {
        print_turn(message);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style(format!("{}:", ui.roles.user)).green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let event = match Command::parse(&input) {
            None => continue,
            Some(Command::Quit) => {
                Output::info("Goodbye!");
                break;
            }
            Some(Command::Help) => {
                print_help(&bot);
                continue;
            }
            Some(Command::Unknown(line)) => {
                Output::warning(&format!("Unknown command: {}", line));
                continue;
            }
            Some(Command::Ask(text)) => Event::Query { text },
            Some(Command::Quick(index)) => match ui.button(index) {
                Ok(button) => {
                    println!("{}", style(&button.content).dim());
                    Event::QuickQuestion { index }
                }
                Err(e) => {
                    Output::warning(&e.to_string());
                    continue;
                }
            },
            Some(Command::Rate { glyph, comment }) => match view.feedback_key.clone() {
                Some(key) => Event::Feedback(FeedbackEvent {
                    key,
                    rating: Some(glyph.to_string()),
                    comment: Some(comment),
                }),
                None => {
                    Output::warning("Nothing to rate yet.");
                    continue;
                }
            },
        };

        let is_feedback = matches!(event, Event::Feedback(_));
        view = match send(&bot, id, event).await {
            Ok(next) => next,
            Err(e) => {
                Output::error(&e.to_string());
                continue;
            }
        };

        if let Some(error) = &view.error {
            Output::error(error);
        } else if is_feedback {
            Output::success("Thanks for your feedback!");
        } else if let Some(answer) = view.messages.last() {
            println!();
            print_turn(answer);
        }
    }

    bot.close_session(id).await;
    Ok(())
}

async fn send(bot: &Kingbot, id: Uuid, event: Event) -> crate::error::Result<View> {
    let spinner = Output::spinner("In progress...");
    let result = bot.dispatch(id, event).await;
    spinner.finish_and_clear();
    result
}

fn print_turn(turn: &RenderedTurn) {
    Output::chat_message(turn.role, &turn.avatar, &turn.name, &turn.content);
}

fn print_help(bot: &Kingbot) {
    Output::header("Commands");
    for (i, button) in bot.settings().ui.buttons.iter().enumerate() {
        Output::kv(&format!("/{}", i + 1), &button.label);
    }
    Output::kv("/good [comment]", "Rate the last answer as helpful");
    Output::kv("/bad [comment]", "Rate the last answer as unhelpful");
    Output::kv("exit", "Leave the chat");
    println!();
}
