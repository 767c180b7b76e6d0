//! Interactive swipe feed.

use std::io::Write;

use anyhow::Result;
use client_core::{SessionError, SwipeSession};
use shared::protocol::AuthSession;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};

use crate::render;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Like,
    Dislike,
    Reload,
    Quit,
    Help,
}

impl Gesture {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "l" | "like" | "y" => Some(Self::Like),
            "d" | "dislike" | "n" | "pass" => Some(Self::Dislike),
            "r" | "reload" => Some(Self::Reload),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => Some(Self::Help),
        }
    }
}

fn prompt(text: &str) -> Result<()> {
    print!("{text}");
    std::io::stdout().flush()?;
    Ok(())
}

pub async fn run(mut feed: SwipeSession, identity: &AuthSession) -> Result<()> {
    if let Err(err) = feed.reload(identity).await {
        eprintln!("Could not load animals: {err}");
    }

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        match feed.current() {
            Some(candidate) => {
                println!();
                print!(
                    "{}",
                    render::candidate_card(candidate, feed.cursor() + 1, feed.batch_len())
                );
                println!("{}", render::match_badge(feed.liked_count()));
            }
            None => {
                println!();
                print!("{}", render::exhausted_screen(feed.liked_count()));
            }
        }
        prompt("> ")?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let Some(gesture) = Gesture::parse(&line) else {
            continue;
        };

        match gesture {
            Gesture::Like => match feed.like(identity).await {
                Ok(outcome) => println!("You liked {}! ♥", outcome.candidate.name),
                Err(SessionError::NoCurrentCandidate) => {
                    println!("No pet to like right now. Press r to reload.")
                }
                Err(err) => eprintln!("Could not record your match: {err}"),
            },
            Gesture::Dislike => match feed.dislike(identity).await {
                Ok(_) => {}
                Err(SessionError::NoCurrentCandidate) => {
                    println!("No pet to pass on right now. Press r to reload.")
                }
                Err(err) => eprintln!("Could not record your choice: {err}"),
            },
            Gesture::Reload => match feed.reload(identity).await {
                Ok(0) => println!("No animals available yet."),
                Ok(count) => println!("Loaded {count} animals."),
                Err(err) => eprintln!("Could not load animals: {err}"),
            },
            Gesture::Quit => break,
            Gesture::Help => println!("Commands: l = like, d = pass, r = reload, q = quit"),
        }
    }

    println!("{} this session.", render::match_badge(feed.liked_count()));
    Ok(())
}
