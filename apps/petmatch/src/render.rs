//! Plain-text screens for the terminal feed.

use shared::protocol::{Candidate, Profile};

pub fn candidate_card(candidate: &Candidate, position: usize, total: usize) -> String {
    let mut lines = Vec::new();

    let mut title = candidate.name.clone();
    if let Some(age) = candidate.age_label() {
        title.push_str(&format!(" · {age}"));
    }
    lines.push(title);
    lines.push(candidate.headline());
    if let Some(location) = &candidate.location {
        lines.push(format!("Location: {location}"));
    }
    if let Some(behavior) = &candidate.behavior {
        lines.push(behavior.clone());
    }
    match &candidate.photo_url {
        Some(url) => lines.push(format!("Photo: {url}")),
        None => lines.push("(no photo)".to_string()),
    }

    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        let edge = if i == 0 { "┌" } else { "│" };
        out.push_str(&format!("{edge} {line}\n"));
    }
    out.push_str(&format!(
        "└ [d] pass  [l] like  [q] quit   ({position} of {total})\n"
    ));
    out
}

pub fn match_badge(liked: u64) -> String {
    match liked {
        1 => "1 match".to_string(),
        n => format!("{n} matches"),
    }
}

pub fn exhausted_screen(liked: u64) -> String {
    format!(
        "You've seen every pet! Come back later to meet new friends.\n{}  ·  [r] reload  [q] quit\n",
        match_badge(liked)
    )
}

pub fn profile(profile: &Profile) -> String {
    let mut out = format!("{} <{}>\n", profile.name, profile.email);
    if let Some(location) = &profile.location {
        out.push_str(&format!("Location: {location}\n"));
    }
    if let Some(bio) = &profile.bio {
        out.push_str(&format!("Bio: {bio}\n"));
    }
    if let Some(avatar) = &profile.avatar_url {
        out.push_str(&format!("Avatar: {avatar}\n"));
    }
    out
}
