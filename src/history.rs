//! Selection of the chat turns shown to the user.

use crate::memory::ChatTurn;

/// Default number of messages shown at once.
pub const DEFAULT_MAX_MESSAGES: usize = 10;

/// Pick the turns to display from the full conversation.
///
/// Before the conversation starts the last `max_messages` turns are shown,
/// which in practice is just the greeting. Once it has started the greeting at
/// index 0 is skipped, and only the most recent `max_messages` turns are kept
/// when more than `max_messages + 1` are stored.
pub fn render(turns: &[ChatTurn], max_messages: usize, started: bool) -> &[ChatTurn] {
    if started {
        if turns.len() > max_messages + 1 {
            &turns[turns.len() - max_messages..]
        } else {
            turns.get(1..).unwrap_or(&[])
        }
    } else {
        &turns[turns.len().saturating_sub(max_messages)..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(len: usize) -> Vec<ChatTurn> {
        let mut turns = vec![ChatTurn::assistant("greeting")];
        for i in 1..len {
            if i % 2 == 1 {
                turns.push(ChatTurn::user(format!("question {}", i)));
            } else {
                turns.push(ChatTurn::assistant(format!("answer {}", i)));
            }
        }
        turns.truncate(len);
        turns
    }

    #[test]
    fn test_not_started_shows_greeting() {
        let turns = conversation(1);
        assert_eq!(render(&turns, 10, false), &turns[..]);
    }

    #[test]
    fn test_not_started_shows_last_k() {
        for len in 0..25 {
            let turns = conversation(len);
            let shown = render(&turns, 10, false);
            let k = len.min(10);
            assert_eq!(shown, &turns[len - k..], "len = {}", len);
        }
    }

    #[test]
    fn test_started_skips_greeting_up_to_k_plus_one() {
        for len in 2..=11 {
            let turns = conversation(len);
            assert_eq!(render(&turns, 10, true), &turns[1..], "len = {}", len);
        }
    }

    #[test]
    fn test_started_keeps_last_k_beyond_k_plus_one() {
        for len in 12..30 {
            let turns = conversation(len);
            let shown = render(&turns, 10, true);
            assert_eq!(shown.len(), 10);
            assert_eq!(shown, &turns[len - 10..], "len = {}", len);
        }
    }

    #[test]
    fn test_started_before_first_answer() {
        // The question is still pending, so only the greeting is stored
        let turns = conversation(1);
        assert!(render(&turns, 10, true).is_empty());
        assert!(render(&[], 10, true).is_empty());
    }

    #[test]
    fn test_render_is_deterministic() {
        let turns = conversation(17);
        for started in [false, true] {
            assert_eq!(render(&turns, 4, started), render(&turns, 4, started));
        }
    }
}
