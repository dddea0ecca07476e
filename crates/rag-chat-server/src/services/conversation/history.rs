use serde::Serialize;
use std::collections::VecDeque;

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    question: String,
    answer: String,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn answer(&self) -> &str {
        &self.answer
    }
}

/// Bounded FIFO of the most recent turns, sent as context with the next
/// question. Never holds more than `capacity` turns; the oldest turn is
/// evicted first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryWindow {
    turns: VecDeque<Turn>,
    capacity: usize,
}

impl HistoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Return a window with `turn` appended, dropping the oldest turn when
    /// the bound would be exceeded.
    pub fn append(mut self, turn: Turn) -> Self {
        self.push(turn);
        self
    }

    /// In-place form of [`HistoryWindow::append`].
    pub fn push(&mut self, turn: Turn) {
        if self.capacity == 0 {
            return;
        }
        if self.turns.len() == self.capacity {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// Render as the `Human:`/`Assistant:` transcript used in condense prompts.
    pub fn to_prompt_text(&self) -> String {
        self.turns
            .iter()
            .map(|turn| format!("Human: {}\nAssistant: {}", turn.question, turn.answer))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(i: usize) -> Turn {
        Turn::new(format!("q{}", i), format!("a{}", i))
    }

    #[test]
    fn test_length_is_min_of_appended_and_bound() {
        for k in 0..=6 {
            for n in 0..=10 {
                let window = (1..=n).fold(HistoryWindow::new(k), |w, i| w.append(turn(i)));

                assert_eq!(window.len(), n.min(k), "k={} n={}", k, n);

                // Exactly the most recent turns, in original order
                let expected: Vec<Turn> = (1..=n).skip(n.saturating_sub(k)).map(turn).collect();
                let actual: Vec<Turn> = window.iter().cloned().collect();
                assert_eq!(actual, expected, "k={} n={}", k, n);
            }
        }
    }

    #[test]
    fn test_oldest_turn_is_evicted() {
        let window = (1..=6).fold(HistoryWindow::new(5), |w, i| w.append(turn(i)));
        let questions: Vec<&str> = window.iter().map(Turn::question).collect();
        assert_eq!(questions, vec!["q2", "q3", "q4", "q5", "q6"]);
    }

    #[test]
    fn test_zero_capacity_stays_empty() {
        let mut window = HistoryWindow::new(0);
        window.push(turn(1));
        window.push(turn(2));
        assert!(window.is_empty());
        assert_eq!(window.to_prompt_text(), "");
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut once = HistoryWindow::new(3).append(turn(1)).append(turn(2));
        once.clear();
        let mut twice = once.clone();
        twice.clear();

        assert!(once.is_empty());
        assert_eq!(once, twice);
        assert_eq!(once.capacity(), 3);
    }

    #[test]
    fn test_prompt_text() {
        let window = HistoryWindow::new(2).append(turn(1)).append(turn(2));
        assert_eq!(
            window.to_prompt_text(),
            "Human: q1\nAssistant: a1\nHuman: q2\nAssistant: a2"
        );
    }
}
